//! The per-instance surface handed to callers, effects and subscriptions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::action::{Action, ActionType, ModelTarget, PATCH, SET};
use crate::bridge::Dispatched;
use crate::error::Result;
use crate::model::ModelDefinition;
use crate::path::{action_type, canonical_path, scoped, wire_path, CANONICAL_SEPARATOR};
use crate::registry::{InstanceId, ModelInstance};
use crate::runtime::Runtime;
use crate::selector::SelectorContext;
use crate::store::SubscriptionId;
use crate::tree;
use crate::value::Value;

/// One model instance, optionally projected onto a nested slice of its
/// state (see [`ModelHandle::sub_model`]).
///
/// Cheap to clone. Reads always go to the committed tree, so a handle
/// kept across dispatches observes the latest state.
#[derive(Clone)]
pub struct ModelHandle {
    runtime: Runtime,
    instance: Arc<ModelInstance>,
    scope: Vec<String>,
}

impl ModelHandle {
    pub(crate) fn new(runtime: Runtime, instance: Arc<ModelInstance>, scope: Vec<String>) -> Self {
        Self {
            runtime,
            instance,
            scope,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.instance.id().namespace
    }

    pub fn key(&self) -> Option<&str> {
        self.instance.id().key.as_deref()
    }

    pub fn id(&self) -> &InstanceId {
        self.instance.id()
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        self.instance.definition()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Path of the projected slice inside the instance state.
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn is_registered(&self) -> bool {
        tree::contains(&self.runtime.get_state(), self.id())
    }

    /// Whole instance state: the committed entry, or the initial state
    /// while unregistered.
    fn model_state(&self) -> Value {
        let root = self.runtime.get_state();
        match tree::instance_state(&root, self.id()) {
            Some(state) => state.clone(),
            None => self.instance.initial_state(),
        }
    }

    /// State of this handle's slice.
    pub fn state(&self) -> Value {
        self.model_state()
            .get_path(&self.scope)
            .cloned()
            .unwrap_or_default()
    }

    fn full_name(&self, name: &str) -> String {
        let name = canonical_path(name, &self.runtime.config().path_separator);
        scoped(&self.scope, &name)
    }

    /// Evaluate a getter by path, relative to this handle's scope.
    ///
    /// Values are cached until the instance state changes; memo selectors
    /// additionally keep their last arguments across changes.
    pub fn getter(&self, path: &str) -> Option<Value> {
        let full = self.full_name(path);
        let entry = self.definition().selector(&full)?;

        let model_state = self.model_state();
        if let Some(value) = self.instance.cached_getter(&model_state, &full) {
            return Some(value);
        }

        let slice = model_state
            .get_path(&entry.scope)
            .cloned()
            .unwrap_or_default();
        let owner = self.with_scope(entry.scope.clone());
        let slot = self.instance.memo_slot(&full);
        let mut memo = slot.lock();
        // Another reader may have finished while this one waited.
        if let Some(value) = self.instance.cached_getter(&model_state, &full) {
            return Some(value);
        }
        let value = entry
            .handler
            .evaluate(&SelectorContext::for_model(&slice, &owner), &mut memo);
        self.instance.store_getter(&model_state, &full, value.clone());
        Some(value)
    }

    /// Every getter under this handle's scope, keyed by relative path.
    pub fn getters(&self) -> BTreeMap<String, Value> {
        let names: Vec<String> = self
            .definition()
            .selectors()
            .keys()
            .filter_map(|name| self.relative(name))
            .collect();
        names
            .into_iter()
            .filter_map(|name| {
                let value = self.getter(&name)?;
                Some((name, value))
            })
            .collect()
    }

    /// `name` relative to this handle's scope, if it lies under it.
    fn relative(&self, name: &str) -> Option<String> {
        if self.scope.is_empty() {
            return Some(name.to_string());
        }
        let prefix = scoped(&self.scope, "");
        name.strip_prefix(&prefix)?
            .strip_prefix(CANONICAL_SEPARATOR)
            .map(str::to_string)
    }

    fn wire_type(&self, name: &str) -> String {
        let config = self.runtime.config();
        action_type(
            self.namespace(),
            self.key(),
            &wire_path(name, &config.path_separator),
            &config.namespace_separator,
        )
    }

    /// Action helper for a handler of this model (relative to the scope).
    pub fn action(&self, name: &str) -> ActionType {
        ActionType::new(self.wire_type(&self.full_name(name)))
    }

    /// Helpers for every reducer and effect under this handle's scope.
    pub fn actions(&self) -> BTreeMap<String, ActionType> {
        let config = self.runtime.config();
        self.instance
            .actions(&config.namespace_separator, &config.path_separator)
            .iter()
            .filter_map(|(name, ty)| Some((self.relative(name)?, ty.clone())))
            .collect()
    }

    /// Dispatch one of this model's actions.
    pub fn dispatch(&self, name: &str, payload: Option<Value>) -> Dispatched {
        let ty = self.wire_type(&self.full_name(name));
        self.runtime.dispatch(Action::new(ty, payload))
    }

    /// Register this instance, with an explicit state or its initial one.
    pub fn register(&self, state: Option<Value>) -> Result<Dispatched> {
        let mut target = ModelTarget::new(self.namespace());
        target.key = self.key().map(str::to_string);
        target.state = state;
        self.runtime.register([target])
    }

    pub fn unregister(&self) -> Result<Dispatched> {
        let mut target = ModelTarget::new(self.namespace());
        target.key = self.key().map(str::to_string);
        self.runtime.unregister([target])
    }

    /// Replace this slice's state; `None` resets it to a fresh initial state.
    pub fn set(&self, state: Option<Value>) -> Dispatched {
        let ty = self.wire_type(&scoped(&self.scope, SET));
        self.runtime.dispatch(Action::new(ty, state))
    }

    /// Shallow-merge `fields` into this slice's state.
    pub fn patch(&self, fields: Value) -> Dispatched {
        let ty = self.wire_type(&scoped(&self.scope, PATCH));
        self.runtime.dispatch(Action::with_payload(ty, fields))
    }

    /// Project onto the `key` sub-slice of this handle's state.
    pub fn sub_model(&self, key: &str) -> ModelHandle {
        let mut scope = self.scope.clone();
        scope.push(key.to_string());
        self.with_scope(scope)
    }

    fn with_scope(&self, scope: Vec<String>) -> ModelHandle {
        ModelHandle::new(self.runtime.clone(), Arc::clone(&self.instance), scope)
    }

    /// Listen to commits that change this instance. The listener receives
    /// the whole instance state, `Null` once it is unregistered.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.runtime
            .subscribe(&self.id().topic(), move |_topic, state| listener(state))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.runtime.unsubscribe(&self.id().topic(), id)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", self.id())
            .field("scope", &self.scope)
            .finish()
    }
}
