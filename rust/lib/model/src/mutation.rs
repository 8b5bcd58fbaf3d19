//! Copy-on-write state transitions.
//!
//! Reducers mutate a draft of the instance state in place. The draft is
//! then reconciled against the state it was taken from so every subtree
//! that ended up deep-equal gets its old identity back, and spliced into
//! the root. Unchanged instances leave the root itself untouched.

use std::sync::Arc;

use crate::model::{HandlerEntry, ReducerFn};
use crate::registry::InstanceId;
use crate::tree;
use crate::value::Value;

/// Restore the identity of `before` wherever `after` is deep-equal to it.
pub fn reconcile(before: &Value, after: Value) -> Value {
    if before.same(&after) {
        return after;
    }
    match (before, after) {
        (Value::Object(old), Value::Object(mut new)) => {
            let map = Arc::make_mut(&mut new);
            let mut unchanged = old.len() == map.len();
            for (key, child) in map.iter_mut() {
                match old.get(key) {
                    Some(previous) => {
                        let next = reconcile(previous, std::mem::take(child));
                        unchanged &= next.same(previous);
                        *child = next;
                    }
                    None => unchanged = false,
                }
            }
            if unchanged {
                before.clone()
            } else {
                Value::Object(new)
            }
        }
        (Value::Array(old), Value::Array(mut new)) => {
            let items = Arc::make_mut(&mut new);
            let mut unchanged = old.len() == items.len();
            for (i, child) in items.iter_mut().enumerate() {
                match old.get(i) {
                    Some(previous) => {
                        let next = reconcile(previous, std::mem::take(child));
                        unchanged &= next.same(previous);
                        *child = next;
                    }
                    None => unchanged = false,
                }
            }
            if unchanged {
                before.clone()
            } else {
                Value::Array(new)
            }
        }
        (_, after) => after,
    }
}

fn scoped_path(id: &InstanceId, scope: &[String]) -> Vec<String> {
    let mut path = id.path();
    path.extend(scope.iter().cloned());
    path
}

/// Run a reducer against one instance.
///
/// Unregistered instances are left alone. The reducer sees the slice of
/// the instance state its entry is scoped to.
pub fn apply_reducer(
    root: &Value,
    id: &InstanceId,
    entry: &HandlerEntry<ReducerFn>,
    payload: &Value,
) -> Value {
    let Some(current) = tree::instance_state(root, id) else {
        return root.clone();
    };
    let before = current.get_path(&entry.scope).cloned().unwrap_or_default();
    let mut draft = before.clone();
    (entry.handler)(&mut draft, payload);

    let next = reconcile(&before, draft);
    if next.same(&before) {
        return root.clone();
    }
    tree::set_in(root, &scoped_path(id, &entry.scope), next)
}

/// Replace an instance's state (or a scoped slice of it).
pub fn set(root: &Value, id: &InstanceId, scope: &[String], state: Value) -> Value {
    if !tree::contains(root, id) {
        return root.clone();
    }
    tree::set_in(root, &scoped_path(id, scope), state)
}

/// Shallow-merge `payload` into an instance's state (or a scoped slice).
///
/// Keys whose value is identical are skipped, so an empty patch, or one
/// that repeats the current values, returns `root` itself. A non-object
/// current state is replaced by the payload; a non-object payload is
/// ignored.
pub fn patch(root: &Value, id: &InstanceId, scope: &[String], payload: &Value) -> Value {
    let Some(current) = tree::instance_state(root, id) else {
        return root.clone();
    };
    let Some(fields) = payload.as_object() else {
        return root.clone();
    };
    let path = scoped_path(id, scope);
    let before = current.get_path(scope).cloned().unwrap_or_default();
    if !before.is_object() {
        return tree::set_in(root, &path, payload.clone());
    }

    let mut next = before.clone();
    for (key, value) in fields.iter() {
        let same = before.get(key).is_some_and(|old| old.same(value));
        if !same {
            next.insert(key.clone(), value.clone());
        }
    }
    if next.same(&before) {
        return root.clone();
    }
    tree::set_in(root, &path, next)
}
