//! Register, unregister and reload reductions.
//!
//! These run inside the store's reduction and only compute the next tree.
//! What has to happen once the tree is committed (opening and closing
//! side-effect scopes, settling tickets, starting effects) is recorded in
//! a [`PostCommit`] and applied by the host afterwards, in order.

use crate::action::{ModelTarget, Ticket};
use crate::error::{ModelError, Result};
use crate::model::EffectFn;
use crate::registry::{check_key, InstanceId, Registry};
use crate::tree;
use crate::value::Value;

/// Mount/unmount of one instance, applied after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Mount(InstanceId),
    Unmount(InstanceId),
}

/// An effect claimed during reduction, started after commit.
pub(crate) struct PendingEffect {
    pub(crate) ticket: Option<Ticket>,
    pub(crate) id: InstanceId,
    pub(crate) scope: Vec<String>,
    pub(crate) action_type: String,
    pub(crate) handler: EffectFn,
    pub(crate) payload: Value,
}

/// Work left over from one reduction.
#[derive(Default)]
pub struct PostCommit {
    pub(crate) transitions: Vec<Transition>,
    pub(crate) rejected: Vec<(Ticket, ModelError)>,
    pub(crate) unhandled: Vec<ModelError>,
    pub(crate) resolved: Vec<Ticket>,
    pub(crate) effects: Vec<PendingEffect>,
    pub(crate) reset_instances: bool,
}

impl PostCommit {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
            && self.rejected.is_empty()
            && self.unhandled.is_empty()
            && self.resolved.is_empty()
            && self.effects.is_empty()
            && !self.reset_instances
    }

    pub(crate) fn mount(&mut self, id: InstanceId) {
        self.transitions.push(Transition::Mount(id));
    }

    pub(crate) fn unmount(&mut self, id: InstanceId) {
        self.transitions.push(Transition::Unmount(id));
    }

    /// Reject the ticket, or report the error when there is none.
    pub(crate) fn reject(&mut self, ticket: Option<Ticket>, err: ModelError) {
        match ticket {
            Some(ticket) => self.rejected.push((ticket, err)),
            None => self.unhandled.push(err),
        }
    }

    /// Resolve the ticket with `Null`, unless it was rejected first.
    pub(crate) fn resolve(&mut self, ticket: Option<Ticket>) {
        if let Some(ticket) = ticket {
            self.resolved.push(ticket);
        }
    }
}

fn dynamic_of(registry: &Registry) -> impl Fn(&str) -> Option<bool> + '_ {
    |namespace: &str| registry.definition(namespace).map(|d| d.is_dynamic())
}

/// Check a register target against the current tree.
pub(crate) fn validate_target(root: &Value, registry: &Registry, target: &ModelTarget) -> Result<()> {
    let definition = registry
        .definition(&target.namespace)
        .ok_or_else(|| ModelError::NotRegistered(target.namespace.clone()))?;
    check_key(&definition, target.key.as_deref())?;
    let id = target.id();
    if tree::contains(root, &id) {
        return Err(ModelError::AlreadyRegistered(id.to_string()));
    }
    Ok(())
}

/// Write the target's state into the tree.
///
/// Uses the explicit state when given, otherwise the instance's initial
/// state, so a model read before registration keeps the same value.
pub(crate) fn register_target(
    root: &Value,
    registry: &Registry,
    target: &ModelTarget,
) -> Result<(Value, InstanceId)> {
    validate_target(root, registry, target)?;
    let id = target.id();
    let state = match &target.state {
        Some(state) => state.clone(),
        None => registry
            .get_or_create_instance(&id.namespace, id.key.as_deref())?
            .initial_state(),
    };
    Ok((tree::set_instance(root, &id, state), id))
}

/// Remove the target's entry. `None` when there is nothing to remove.
pub(crate) fn unregister_target(
    root: &Value,
    registry: &Registry,
    target: &ModelTarget,
) -> Option<(Value, InstanceId)> {
    let definition = registry.definition(&target.namespace)?;
    check_key(&definition, target.key.as_deref()).ok()?;
    let id = target.id();
    if !tree::contains(root, &id) {
        return None;
    }
    Some((tree::remove_instance(root, &id), id))
}

/// Reload the tree.
///
/// Without a snapshot, registered static models get a fresh initial state
/// and dynamic and lazy ones are dropped. With a snapshot, the tree becomes
/// the snapshot and every known model with an object entry in it is
/// mounted. Unknown namespaces are carried over untouched either way.
pub(crate) fn reload(
    root: &Value,
    registry: &Registry,
    snapshot: Option<&Value>,
) -> (Value, Vec<Transition>) {
    let mut transitions: Vec<Transition> = tree::registered_ids(root, dynamic_of(registry))
        .into_iter()
        .map(Transition::Unmount)
        .collect();

    let next = match snapshot {
        Some(snapshot) => {
            let next = if snapshot.is_object() {
                snapshot.clone()
            } else {
                Value::object()
            };
            transitions.extend(
                tree::registered_ids(&next, dynamic_of(registry))
                    .into_iter()
                    .filter(|id| tree::instance_state(&next, id).is_some_and(Value::is_object))
                    .map(Transition::Mount),
            );
            next
        }
        None => {
            let mut next = root.clone();
            if let Some(entries) = root.as_object() {
                for namespace in entries.keys() {
                    let Some(definition) = registry.definition(namespace) else {
                        continue;
                    };
                    if definition.is_dynamic() || definition.is_lazy() {
                        next.remove(namespace);
                    } else {
                        next.insert(namespace.clone(), definition.initial_state());
                        transitions.push(Transition::Mount(InstanceId::static_model(
                            namespace.as_str(),
                        )));
                    }
                }
            }
            next
        }
    };
    (next, transitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_code;
    use crate::model::ModelDefinition;

    fn registry() -> Registry {
        let registry = Registry::new();
        for def in [
            ModelDefinition::builder("counter")
                .state_fn(|| Value::from_entries([("n", 0)]))
                .build(),
            ModelDefinition::builder("todoItem")
                .state_fn(|| Value::from_entries([("title", "")]))
                .dynamic()
                .build(),
            ModelDefinition::builder("settings")
                .state(Value::from_entries([("dark", false)]))
                .lazy()
                .build(),
        ] {
            registry.define(def.unwrap()).unwrap();
        }
        registry
    }

    // ========================================================================
    // register / unregister
    // ========================================================================

    #[test]
    fn register_writes_initial_state() {
        let registry = registry();
        let (root, id) =
            register_target(&Value::object(), &registry, &ModelTarget::new("counter")).unwrap();
        assert_eq!(id, InstanceId::static_model("counter"));
        let instance = registry.get_or_create_instance("counter", None).unwrap();
        assert!(root.get("counter").unwrap().same(&instance.initial_state()));
    }

    #[test]
    fn register_explicit_state() {
        let registry = registry();
        let target = ModelTarget::keyed("todoItem", "7").with_state(Value::from_entries([("title", "x")]));
        let (root, _) = register_target(&Value::object(), &registry, &target).unwrap();
        assert_eq!(
            root.get_path(&["todoItem", "7", "title"]).and_then(Value::as_str),
            Some("x")
        );
    }

    #[test]
    fn register_validates() {
        let registry = registry();
        let (root, _) =
            register_target(&Value::object(), &registry, &ModelTarget::new("counter")).unwrap();

        let err = register_target(&root, &registry, &ModelTarget::new("counter")).unwrap_err();
        assert_eq!(err.code(), error_code::ALREADY_REGISTERED);
        let err = register_target(&root, &registry, &ModelTarget::new("ghost")).unwrap_err();
        assert_eq!(err.code(), error_code::NOT_REGISTERED);
        let err = register_target(&root, &registry, &ModelTarget::new("todoItem")).unwrap_err();
        assert_eq!(err.code(), error_code::INVALID_KEY_USAGE);
    }

    #[test]
    fn unregister_absent_is_none() {
        let registry = registry();
        let root = Value::object();
        assert!(unregister_target(&root, &registry, &ModelTarget::new("counter")).is_none());
        assert!(unregister_target(&root, &registry, &ModelTarget::new("ghost")).is_none());
    }

    #[test]
    fn unregister_last_key_drops_container() {
        let registry = registry();
        let target = ModelTarget::keyed("todoItem", "1");
        let (root, _) = register_target(&Value::object(), &registry, &target).unwrap();
        let (root, id) = unregister_target(&root, &registry, &target).unwrap();
        assert_eq!(id, InstanceId::keyed("todoItem", "1"));
        assert!(!root.contains_key("todoItem"));
    }

    // ========================================================================
    // reload
    // ========================================================================

    fn populated() -> Value {
        Value::from(serde_json::json!({
            "counter": {"n": 9},
            "todoItem": {"1": {"title": "a"}},
            "settings": {"dark": true},
            "foreign": [1, 2]
        }))
    }

    #[test]
    fn reload_without_snapshot_reinitializes_static_models() {
        let registry = registry();
        let root = populated();
        let (next, transitions) = reload(&root, &registry, None);

        assert_eq!(next.get_path(&["counter", "n"]).and_then(Value::as_i64), Some(0));
        assert!(!next.contains_key("todoItem"));
        assert!(!next.contains_key("settings"));
        assert!(next.get("foreign").unwrap().same(root.get("foreign").unwrap()));

        assert_eq!(
            transitions,
            vec![
                Transition::Unmount(InstanceId::static_model("counter")),
                Transition::Unmount(InstanceId::static_model("settings")),
                Transition::Unmount(InstanceId::keyed("todoItem", "1")),
                Transition::Mount(InstanceId::static_model("counter")),
            ]
        );
    }

    #[test]
    fn reload_with_snapshot_replaces_tree() {
        let registry = registry();
        let snapshot = Value::from(serde_json::json!({
            "todoItem": {"4": {"title": "d"}, "5": {"title": "e"}, "6": "bogus"},
            "counter": 3,
            "unknown": 1
        }));
        let (next, transitions) = reload(&Value::object(), &registry, Some(&snapshot));

        assert!(next.same(&snapshot));
        assert_eq!(
            transitions,
            vec![
                Transition::Mount(InstanceId::keyed("todoItem", "4")),
                Transition::Mount(InstanceId::keyed("todoItem", "5")),
            ]
        );
    }

    #[test]
    fn post_commit_routes_ticketless_rejections() {
        let mut post = PostCommit::default();
        assert!(post.is_empty());
        post.reject(None, ModelError::AlreadyRegistered("counter".into()));
        post.reject(Some(Ticket(3)), ModelError::AlreadyRegistered("counter".into()));
        post.resolve(None);
        assert_eq!(post.unhandled.len(), 1);
        assert_eq!(post.rejected.len(), 1);
        assert!(post.resolved.is_empty());
    }
}
