use std::fmt;

use crate::registry::InstanceId;
use crate::value::Value;

// ── Reserved names ──────────────────────────────────────────────────

/// Register one instance; payload is the optional initial state.
pub const MOUNT: &str = "$mount";
/// Unregister one instance.
pub const UNMOUNT: &str = "$unmount";
/// Replace an instance's state; an absent payload resets it.
pub const SET: &str = "$set";
/// Shallow-merge the payload into an instance's state.
pub const PATCH: &str = "$patch";

/// Register every `ModelTarget` in the payload.
pub const REGISTER: &str = "@@register";
/// Unregister every `ModelTarget` in the payload.
pub const UNREGISTER: &str = "@@unregister";
/// Reinitialize static models, or replace the tree with the payload snapshot.
pub const RELOAD: &str = "@@reload";
/// Apply the batched child actions in one commit.
pub const BATCH: &str = "@@batch";

/// Handler names with this prefix belong to the runtime.
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with('$')
}

/// Correlates a dispatched action with the future its caller holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub(crate) u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Action ──────────────────────────────────────────────────────────

/// A typed request: `{type, payload}`.
///
/// The type is `namespace[/key]/name` for model actions, or one of the
/// `@@` constants for process-wide ones.
#[derive(Debug, Clone)]
pub struct Action {
    action_type: String,
    payload: Option<Value>,
    pub(crate) ticket: Option<Ticket>,
    pub(crate) batched: Vec<Action>,
}

impl Action {
    pub fn new(action_type: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            ticket: None,
            batched: Vec::new(),
        }
    }

    pub fn with_payload(action_type: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self::new(action_type, Some(payload.into()))
    }

    /// Register the given instances.
    pub fn register<I>(targets: I) -> Self
    where
        I: IntoIterator<Item = ModelTarget>,
    {
        let items: Vec<Value> = targets.into_iter().map(|t| t.to_value()).collect();
        Self::with_payload(REGISTER, items)
    }

    /// Unregister the given instances.
    pub fn unregister<I>(targets: I) -> Self
    where
        I: IntoIterator<Item = ModelTarget>,
    {
        let items: Vec<Value> = targets.into_iter().map(|t| t.to_value()).collect();
        Self::with_payload(UNREGISTER, items)
    }

    /// Reload; with a snapshot the whole tree is replaced by it.
    pub fn reload(snapshot: Option<Value>) -> Self {
        Self::new(RELOAD, snapshot)
    }

    /// Group actions so they commit together.
    pub fn batch(actions: Vec<Action>) -> Self {
        let mut action = Self::new(BATCH, None);
        action.batched = actions;
        action
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// The payload, or `Null` when absent.
    pub fn payload_or_null(&self) -> Value {
        self.payload.clone().unwrap_or_default()
    }

    /// Ticket assigned by `Runtime::dispatch`, if any.
    pub fn ticket(&self) -> Option<Ticket> {
        self.ticket
    }

    /// Children of a batch action.
    pub fn batched(&self) -> &[Action] {
        &self.batched
    }
}

// ── ActionType helper ───────────────────────────────────────────────

/// A named action helper: creates actions of one type and recognizes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionType {
    action_type: String,
}

impl ActionType {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.action_type
    }

    pub fn create(&self, payload: impl Into<Value>) -> Action {
        Action::with_payload(self.action_type.clone(), payload)
    }

    pub fn create_empty(&self) -> Action {
        Action::new(self.action_type.clone(), None)
    }

    pub fn is(&self, action: &Action) -> bool {
        action.action_type == self.action_type
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.action_type)
    }
}

pub fn create_action(action_type: &ActionType, payload: Option<Value>) -> Action {
    Action::new(action_type.as_str(), payload)
}

pub fn is_action_of(action_type: &ActionType, action: &Action) -> bool {
    action_type.is(action)
}

// ── ModelTarget ─────────────────────────────────────────────────────

/// Addresses one instance in a register/unregister payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTarget {
    pub namespace: String,
    pub key: Option<String>,
    /// Explicit initial state for register; ignored by unregister.
    pub state: Option<Value>,
}

impl ModelTarget {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: None,
            state: None,
        }
    }

    pub fn keyed(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: Some(key.into()),
            state: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<Value>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn id(&self) -> InstanceId {
        InstanceId::new(self.namespace.clone(), self.key.clone())
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut v = Value::object();
        v.insert("namespace", self.namespace.as_str());
        if let Some(key) = &self.key {
            v.insert("key", key.as_str());
        }
        if let Some(state) = &self.state {
            v.insert("state", state.clone());
        }
        v
    }

    pub(crate) fn from_value(v: &Value) -> Option<Self> {
        let namespace = v.get("namespace")?.as_str()?.to_string();
        let key = v.get("key").and_then(Value::as_str).map(str::to_string);
        let state = v.get("state").cloned();
        Some(Self {
            namespace,
            key,
            state,
        })
    }

    /// Decode a register/unregister payload: one target or a list of them.
    pub(crate) fn list_from_payload(payload: Option<&Value>) -> Vec<Self> {
        match payload {
            Some(Value::Array(items)) => items.iter().filter_map(Self::from_value).collect(),
            Some(v @ Value::Object(_)) => Self::from_value(v).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}
