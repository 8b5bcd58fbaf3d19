use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::action::Action;
use crate::lifecycle::PostCommit;
use crate::model::ModelDefinition;
use crate::registry::InstanceId;
use crate::trie::Trie;
use crate::value::Value;

/// Callback for state changes: `(topic, instance_state)`.
///
/// The topic is `namespace` or `namespace/key`; the state is `Null` when
/// the instance was removed.
pub type StateListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Unique handle for a subscription, returned by `Store::subscribe()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Result of one reduction: the next tree and the work to run after commit.
pub struct Reduction {
    pub state: Value,
    pub post: PostCommit,
}

impl Reduction {
    /// A reduction that changes nothing.
    pub fn unchanged(state: &Value) -> Self {
        Self {
            state: state.clone(),
            post: PostCommit::default(),
        }
    }
}

/// The runtime as seen by a store.
pub trait ModelHost: Send + Sync {
    /// Compute the next tree. Must not call back into the store.
    fn reduce(&self, state: &Value, action: &Action) -> Reduction;

    /// Called once the reduction is committed and listeners were notified.
    fn after_commit(&self, action: &Action, post: PostCommit);

    /// Definition of a namespace, if one is known.
    fn model_definition(&self, namespace: &str) -> Option<Arc<ModelDefinition>>;

    /// Open the side-effect scope of an instance.
    fn mount_model(&self, id: &InstanceId);

    /// Close the side-effect scope of an instance and drop its caches.
    fn unmount_model(&self, id: &InstanceId);
}

/// State backend of a runtime.
///
/// Holds the committed root tree and serializes dispatches. Each
/// dispatch is reduced by the attached host, committed, announced to
/// listeners, then handed back to the host's `after_commit`.
pub trait Store: Send + Sync {
    fn attach(&self, host: Arc<dyn ModelHost>);

    fn get_state(&self) -> Value;

    fn dispatch(&self, action: &Action);

    /// Subscribe to instance changes matching an MQTT-style pattern
    /// (`todo/+`, `#`).
    fn subscribe(&self, pattern: &str, listener: StateListener) -> SubscriptionId;

    fn unsubscribe(&self, pattern: &str, id: SubscriptionId) -> bool;
}

#[derive(Clone)]
struct ListenerEntry {
    id: SubscriptionId,
    listener: StateListener,
}

/// In-memory store over a persistent [`Value`] tree.
///
/// - `dispatch` runs under a dispatch lock, so reductions never interleave.
/// - Listeners and `after_commit` run after the lock is released and may
///   dispatch again.
/// - Reads (`get_state`) are an `Arc` clone of the committed root.
pub struct TreeStore {
    state: RwLock<Value>,
    dispatch_lock: Mutex<()>,
    host: RwLock<Option<Arc<dyn ModelHost>>>,
    listeners: Trie<ListenerEntry>,
    next_id: AtomicU64,
}

impl TreeStore {
    pub fn new() -> Self {
        Self::with_state(Value::object())
    }

    /// A store starting from an existing tree.
    pub fn with_state(state: Value) -> Self {
        Self {
            state: RwLock::new(state),
            dispatch_lock: Mutex::new(()),
            host: RwLock::new(None),
            listeners: Trie::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn notify(&self, host: &dyn ModelHost, previous: &Value, next: &Value) {
        for (topic, state) in changed_topics(host, previous, next) {
            for entry in self.listeners.match_topic(&topic) {
                (entry.listener)(&topic, &state);
            }
        }
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for TreeStore {
    fn attach(&self, host: Arc<dyn ModelHost>) {
        *self.host.write() = Some(host);
    }

    fn get_state(&self) -> Value {
        self.state.read().clone()
    }

    fn dispatch(&self, action: &Action) {
        let Some(host) = self.host.read().clone() else {
            warn!(action = action.action_type(), "dispatch on a store with no host");
            return;
        };

        let (previous, reduction) = {
            let _guard = self.dispatch_lock.lock();
            let previous = self.get_state();
            let reduction = host.reduce(&previous, action);
            if !reduction.state.same(&previous) {
                *self.state.write() = reduction.state.clone();
            }
            (previous, reduction)
        };

        if !reduction.state.same(&previous) {
            self.notify(host.as_ref(), &previous, &reduction.state);
        }
        host.after_commit(action, reduction.post);
    }

    fn subscribe(&self, pattern: &str, listener: StateListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(pattern, ListenerEntry { id, listener });
        id
    }

    fn unsubscribe(&self, pattern: &str, id: SubscriptionId) -> bool {
        self.listeners.remove(pattern, |entry| entry.id == id)
    }
}

/// Topics whose instance state differs between two trees, with the new state.
///
/// Dynamic namespaces report per key; everything else per namespace.
fn changed_topics(host: &dyn ModelHost, previous: &Value, next: &Value) -> Vec<(String, Value)> {
    let mut namespaces = BTreeSet::new();
    for tree in [previous, next] {
        if let Some(entries) = tree.as_object() {
            namespaces.extend(entries.keys().cloned());
        }
    }

    let mut topics = Vec::new();
    for namespace in namespaces {
        let before = previous.get(&namespace);
        let after = next.get(&namespace);
        if matches!((before, after), (Some(a), Some(b)) if a.same(b)) {
            continue;
        }
        let dynamic = host
            .model_definition(&namespace)
            .is_some_and(|def| def.is_dynamic());
        if !dynamic {
            topics.push((namespace, after.cloned().unwrap_or_default()));
            continue;
        }

        let mut keys = BTreeSet::new();
        for container in [before, after].into_iter().flatten() {
            if let Some(entries) = container.as_object() {
                keys.extend(entries.keys().cloned());
            }
        }
        for key in keys {
            let old = before.and_then(|c| c.get(&key));
            let new = after.and_then(|c| c.get(&key));
            if matches!((old, new), (Some(a), Some(b)) if a.same(b)) {
                continue;
            }
            let id = InstanceId::keyed(namespace.as_str(), key);
            topics.push((id.topic(), new.cloned().unwrap_or_default()));
        }
    }
    topics
}
