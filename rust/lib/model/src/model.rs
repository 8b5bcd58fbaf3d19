//! Model definitions.
//!
//! A [`ModelDefinition`] is the immutable blueprint of one namespace: how
//! to build its initial state, and the getters, reducers, effects and
//! subscriptions that operate on it. Definitions are built once with
//! [`ModelDefinition::builder`] and shared as `Arc<ModelDefinition>`.
//!
//! ```ignore
//! let counter = ModelDefinition::builder("counter")
//!     .state(Value::from_entries([("n", 0)]))
//!     .reducer("increment", |state, _payload| {
//!         let n = state.get("n").and_then(Value::as_f64).unwrap_or(0.0);
//!         state.insert("n", n + 1.0);
//!     })
//!     .getter("double", |cx| {
//!         Value::from(cx.field("n").as_f64().unwrap_or(0.0) * 2.0)
//!     })
//!     .build()?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::action::is_reserved_name;
use crate::error::{ModelError, Result};
use crate::handle::ModelHandle;
use crate::path::{join_path, split_path, CANONICAL_SEPARATOR};
use crate::selector::{Selector, SelectorContext};
use crate::value::Value;

/// Produces a fresh initial state.
pub type StateFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Synchronous state transition over a draft: `(state, payload)`.
pub type ReducerFn = Arc<dyn Fn(&mut Value, &Value) + Send + Sync>;

/// A boxed, `Send`-able future returned by effects.
pub type EffectFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Type-erased effect: `(model, payload) -> future result`.
pub type EffectFn = Arc<dyn Fn(ModelHandle, Value) -> EffectFuture + Send + Sync>;

/// Cleanup returned by a subscription, run when its scope closes.
pub type Teardown = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Side-effect started when an instance mounts.
pub type SubscriptionFn =
    Arc<dyn Fn(ModelHandle, CancellationToken) -> Option<Teardown> + Send + Sync>;

/// A handler plus the path inside the model state it operates on.
///
/// Handlers declared directly on a model have an empty scope; handlers
/// merged in through the record form are scoped to their sub-key.
#[derive(Clone)]
pub struct HandlerEntry<H> {
    pub scope: Vec<String>,
    pub handler: H,
}

impl<H> HandlerEntry<H> {
    pub(crate) fn unscoped(handler: H) -> Self {
        Self {
            scope: Vec::new(),
            handler,
        }
    }
}

pub type SelectorMap = BTreeMap<String, HandlerEntry<Selector>>;
pub type ReducerMap = BTreeMap<String, HandlerEntry<ReducerFn>>;
pub type EffectMap = BTreeMap<String, HandlerEntry<EffectFn>>;
pub type SubscriptionMap = BTreeMap<String, HandlerEntry<SubscriptionFn>>;

pub struct ModelDefinition {
    pub(crate) name: String,
    pub(crate) initial: StateFactory,
    pub(crate) selectors: SelectorMap,
    pub(crate) reducers: ReducerMap,
    pub(crate) effects: EffectMap,
    pub(crate) subscriptions: SubscriptionMap,
    pub(crate) lazy: bool,
    pub(crate) dynamic: bool,
}

impl ModelDefinition {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A fresh initial state from the factory.
    pub fn initial_state(&self) -> Value {
        (self.initial)()
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn selectors(&self) -> &SelectorMap {
        &self.selectors
    }

    pub fn reducers(&self) -> &ReducerMap {
        &self.reducers
    }

    pub fn effects(&self) -> &EffectMap {
        &self.effects
    }

    pub fn subscriptions(&self) -> &SubscriptionMap {
        &self.subscriptions
    }

    pub fn reducer(&self, path: &str) -> Option<&HandlerEntry<ReducerFn>> {
        self.reducers.get(path)
    }

    pub fn effect(&self, path: &str) -> Option<&HandlerEntry<EffectFn>> {
        self.effects.get(path)
    }

    pub fn selector(&self, path: &str) -> Option<&HandlerEntry<Selector>> {
        self.selectors.get(path)
    }

    /// Whether `path` names a reducer or an effect.
    pub fn has_handler(&self, path: &str) -> bool {
        self.reducers.contains_key(path) || self.effects.contains_key(path)
    }

    /// Every action name this model answers to (reducers, then effects),
    /// each once.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.reducers
            .keys()
            .chain(
                self.effects
                    .keys()
                    .filter(|name| !self.reducers.contains_key(*name)),
            )
            .map(String::as_str)
    }

    /// Reject malformed handler names.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ModelError::invalid_definition("", "namespace must not be empty"));
        }
        let names = self
            .selectors
            .keys()
            .chain(self.reducers.keys())
            .chain(self.effects.keys())
            .chain(self.subscriptions.keys());
        for name in names {
            if name.is_empty() {
                return Err(ModelError::invalid_definition(
                    &self.name,
                    "handler names must not be empty",
                ));
            }
            if split_path(name, CANONICAL_SEPARATOR)
                .iter()
                .any(|segment| is_reserved_name(segment))
            {
                return Err(ModelError::invalid_definition(
                    &self.name,
                    format!("handler `{name}` uses a reserved `$` name"),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("lazy", &self.lazy)
            .field("dynamic", &self.dynamic)
            .field("selectors", &self.selectors.keys().collect::<Vec<_>>())
            .field("reducers", &self.reducers.keys().collect::<Vec<_>>())
            .field("effects", &self.effects.keys().collect::<Vec<_>>())
            .field("subscriptions", &self.subscriptions.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Declares a model. Nested handler names are dot paths (`todo.add`).
pub struct ModelBuilder {
    def: ModelDefinition,
}

fn normalize(name: &str) -> String {
    join_path(split_path(name, CANONICAL_SEPARATOR), CANONICAL_SEPARATOR)
}

impl ModelBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            def: ModelDefinition {
                name: name.into(),
                initial: Arc::new(Value::object),
                selectors: BTreeMap::new(),
                reducers: BTreeMap::new(),
                effects: BTreeMap::new(),
                subscriptions: BTreeMap::new(),
                lazy: false,
                dynamic: false,
            },
        }
    }

    /// Initial state as a value. Every instance starts from this value.
    pub fn state(mut self, state: impl Into<Value>) -> Self {
        let state = state.into();
        self.def.initial = Arc::new(move || state.clone());
        self
    }

    /// Initial state as a factory, called once per fresh instance.
    pub fn state_fn<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.def.initial = Arc::new(factory);
        self
    }

    pub fn selector(mut self, name: &str, selector: Selector) -> Self {
        self.def
            .selectors
            .insert(normalize(name), HandlerEntry::unscoped(selector));
        self
    }

    /// Plain getter, recomputed when the model state changes.
    pub fn getter<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&SelectorContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.selector(name, Selector::plain(f))
    }

    pub fn reducer<F>(mut self, name: &str, reducer: F) -> Self
    where
        F: Fn(&mut Value, &Value) + Send + Sync + 'static,
    {
        self.def
            .reducers
            .insert(normalize(name), HandlerEntry::unscoped(Arc::new(reducer)));
        self
    }

    /// Async effect. Its `Ok` value resolves the dispatching future.
    pub fn effect<F, Fut>(mut self, name: &str, effect: F) -> Self
    where
        F: Fn(ModelHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: EffectFn = Arc::new(move |model: ModelHandle, payload: Value| -> EffectFuture {
            Box::pin(effect(model, payload))
        });
        self.def
            .effects
            .insert(normalize(name), HandlerEntry::unscoped(handler));
        self
    }

    /// Side-effect started on mount. The token is cancelled on unmount,
    /// after which the returned teardown runs.
    pub fn subscription<F>(mut self, name: &str, subscription: F) -> Self
    where
        F: Fn(ModelHandle, CancellationToken) -> Option<Teardown> + Send + Sync + 'static,
    {
        self.def
            .subscriptions
            .insert(normalize(name), HandlerEntry::unscoped(Arc::new(subscription)));
        self
    }

    /// Register on first use of one of its reducers or effects.
    pub fn lazy(mut self) -> Self {
        self.def.lazy = true;
        self
    }

    /// One state container per key (`namespace/key`).
    pub fn dynamic(mut self) -> Self {
        self.def.dynamic = true;
        self
    }

    /// The definition without validation, for composition.
    pub(crate) fn into_parts(self) -> ModelDefinition {
        self.def
    }

    pub fn build(self) -> Result<Arc<ModelDefinition>> {
        self.def.validate()?;
        Ok(Arc::new(self.def))
    }
}
