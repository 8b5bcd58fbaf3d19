//! Root state tree access with structural sharing.
//!
//! Writers never mutate a committed tree: they clone the root (an `Arc`
//! bump) and write through `Arc::make_mut`, which copies only the nodes on
//! the written path. Siblings keep their identity.

use crate::registry::InstanceId;
use crate::value::Value;

pub fn get_in<'a, S: AsRef<str>>(root: &'a Value, path: &[S]) -> Option<&'a Value> {
    root.get_path(path)
}

/// Committed state of an instance, `None` when it is not registered.
pub fn instance_state<'a>(root: &'a Value, id: &InstanceId) -> Option<&'a Value> {
    get_in(root, &id.path())
}

/// An instance is registered exactly when the tree has an entry for it.
pub fn contains(root: &Value, id: &InstanceId) -> bool {
    instance_state(root, id).is_some()
}

/// A new root with `value` at `path`. Returns `root` itself when the
/// value already there is identical.
pub fn set_in<S: AsRef<str>>(root: &Value, path: &[S], value: Value) -> Value {
    if get_in(root, path).is_some_and(|current| current.same(&value)) {
        return root.clone();
    }
    let mut next = root.clone();
    next.set_path(path, value);
    next
}

/// A new root without the entry at `path`. Returns `root` itself when
/// there is nothing to remove.
pub fn remove_in<S: AsRef<str>>(root: &Value, path: &[S]) -> Value {
    if get_in(root, path).is_none() {
        return root.clone();
    }
    let mut next = root.clone();
    remove_path(&mut next, path);
    next
}

fn remove_path<S: AsRef<str>>(value: &mut Value, path: &[S]) {
    match path {
        [] => {}
        [last] => {
            value.remove(last.as_ref());
        }
        [first, rest @ ..] => {
            if let Some(child) = value.get_mut(first.as_ref()) {
                remove_path(child, rest);
            }
        }
    }
}

pub fn set_instance(root: &Value, id: &InstanceId, state: Value) -> Value {
    set_in(root, &id.path(), state)
}

/// Remove an instance entry. A dynamic container left empty is removed too.
pub fn remove_instance(root: &Value, id: &InstanceId) -> Value {
    let next = remove_in(root, &id.path());
    if id.key.is_some()
        && next
            .get(&id.namespace)
            .is_some_and(|container| container.is_object() && container.is_empty())
    {
        return remove_in(&next, &[id.namespace.as_str()]);
    }
    next
}

/// Every instance with an entry in the tree.
///
/// `dynamic` reports whether a namespace is defined and dynamic; unknown
/// namespaces are skipped, as are dynamic entries that are not objects.
pub fn registered_ids<F>(root: &Value, dynamic: F) -> Vec<InstanceId>
where
    F: Fn(&str) -> Option<bool>,
{
    let Some(entries) = root.as_object() else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for (namespace, entry) in entries.iter() {
        match dynamic(namespace) {
            Some(false) => ids.push(InstanceId::static_model(namespace.as_str())),
            Some(true) => {
                if let Some(container) = entry.as_object() {
                    ids.extend(
                        container
                            .keys()
                            .map(|key| InstanceId::keyed(namespace.as_str(), key.as_str())),
                    );
                }
            }
            None => {}
        }
    }
    ids
}
