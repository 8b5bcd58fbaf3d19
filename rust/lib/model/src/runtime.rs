use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::action::{create_action, Action, ActionType, ModelTarget, BATCH, REGISTER, RELOAD, UNREGISTER};
use crate::bridge::{deliver, Bridge, Dispatched};
use crate::config::RuntimeConfig;
use crate::error::{ModelError, Result};
use crate::handle::ModelHandle;
use crate::lifecycle::{self, PendingEffect, PostCommit, Transition};
use crate::model::ModelDefinition;
use crate::mutation;
use crate::registry::{check_key, check_key_format, InstanceId, ModelRef, Registry};
use crate::router::{HandlerKind, Route, Router};
use crate::scope::{run_teardown, ScopeTable};
use crate::store::{ModelHost, Reduction, Store, SubscriptionId, TreeStore};
use crate::tree;
use crate::value::Value;

/// The model runtime.
///
/// Owns the namespace registry, routes actions to reducers and effects,
/// and drives instance lifecycles over a [`Store`]:
/// - `define` / `model`: declare namespaces and get instance handles
/// - `dispatch`: send an action; the returned future settles with the
///   effect's value, `Null`, or the rejection
/// - `register` / `unregister` / `reload` / `batch`: lifecycle
/// - `subscribe`: observe committed changes per instance topic
///
/// Cheap to clone; clones share everything.
///
/// # Examples
///
/// ```ignore
/// let runtime = Runtime::new(RuntimeConfig::default())?;
/// runtime.define(counter)?;
/// runtime.register([ModelTarget::new("counter")])?.await?;
///
/// let counter = runtime.model("counter", None)?;
/// counter.dispatch("increment", None).await?;
/// assert_eq!(counter.state().get("n").and_then(Value::as_i64), Some(1));
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    registry: Registry,
    router: Router,
    bridge: Bridge,
    scopes: ScopeTable,
    store: Arc<dyn Store>,
}

/// The store's view of the runtime. Weak, so the store never keeps the
/// runtime alive.
struct HostAdapter(Weak<RuntimeInner>);

impl HostAdapter {
    fn runtime(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

impl Runtime {
    /// A runtime over an in-memory [`TreeStore`].
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(TreeStore::new()))
    }

    /// A runtime over a caller-provided store. The store is attached to
    /// this runtime and should not be shared with another one.
    pub fn with_store(config: RuntimeConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, store))
    }

    fn assemble(config: RuntimeConfig, store: Arc<dyn Store>) -> Self {
        let inner = Arc::new(RuntimeInner {
            router: Router::new(&config),
            bridge: Bridge::new(config.error_channel_capacity),
            registry: Registry::new(),
            scopes: ScopeTable::new(),
            store,
            config,
        });
        inner
            .store
            .attach(Arc::new(HostAdapter(Arc::downgrade(&inner))));
        Self { inner }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ====================================================================
    // Models
    // ====================================================================

    /// Define a namespace. Defining the same `Arc` twice is a no-op.
    pub fn define(&self, definition: Arc<ModelDefinition>) -> Result<()> {
        self.inner.registry.define(definition)?;
        Ok(())
    }

    /// Handle for an instance, by namespace or by definition (which is
    /// defined on first use). `key` addresses dynamic models.
    pub fn model(&self, model: impl Into<ModelRef>, key: Option<&str>) -> Result<ModelHandle> {
        let registry = &self.inner.registry;
        let context = registry.get_or_create_context(model)?;
        self.check_addressable(context.namespace(), key)?;
        let instance = registry.get_or_create_instance(context.namespace(), key)?;
        Ok(ModelHandle::new(self.clone(), instance, Vec::new()))
    }

    /// Every defined model, sorted by namespace.
    pub fn definitions(&self) -> Vec<Arc<ModelDefinition>> {
        self.inner.registry.definitions()
    }

    pub fn is_registered(&self, id: &InstanceId) -> bool {
        tree::contains(&self.get_state(), id)
    }

    fn check_addressable(&self, namespace: &str, key: Option<&str>) -> Result<()> {
        check_key_format(namespace, key, &self.inner.config.namespace_separator)
    }

    // ====================================================================
    // State
    // ====================================================================

    /// The committed root tree.
    pub fn get_state(&self) -> Value {
        self.inner.store.get_state()
    }

    /// The committed tree, suitable for `reload(Some(..))`.
    pub fn snapshot(&self) -> Value {
        self.get_state()
    }

    /// Top-level entries of the tree, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.get_state()
            .as_object()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ====================================================================
    // Dispatch
    // ====================================================================

    /// Dispatch an action.
    ///
    /// The state change (if any) is committed before this returns. The
    /// future settles with the effect's value, with `Null` when the action
    /// ran no effect, or with the error that rejected it.
    pub fn dispatch(&self, mut action: Action) -> Dispatched {
        let (ticket, dispatched) = self.inner.bridge.open(action.action_type());
        action.ticket = Some(ticket);
        trace!(action = action.action_type(), %ticket, "dispatch");
        self.inner.store.dispatch(&action);
        dispatched
    }

    pub fn dispatch_type(&self, action_type: &ActionType, payload: Option<Value>) -> Dispatched {
        self.dispatch(create_action(action_type, payload))
    }

    /// Register instances. Every target is checked against the current
    /// tree first; nothing is dispatched if one of them fails.
    pub fn register<I>(&self, targets: I) -> Result<Dispatched>
    where
        I: IntoIterator<Item = ModelTarget>,
    {
        let targets: Vec<ModelTarget> = targets.into_iter().collect();
        let root = self.get_state();
        let mut seen = HashSet::new();
        for target in &targets {
            self.check_addressable(&target.namespace, target.key.as_deref())?;
            lifecycle::validate_target(&root, &self.inner.registry, target)?;
            let id = target.id();
            if !seen.insert(id.clone()) {
                return Err(ModelError::AlreadyRegistered(id.to_string()));
            }
        }
        info!(count = targets.len(), "registering models");
        Ok(self.dispatch(Action::register(targets)))
    }

    /// Unregister instances. Targets that are not registered are skipped.
    pub fn unregister<I>(&self, targets: I) -> Result<Dispatched>
    where
        I: IntoIterator<Item = ModelTarget>,
    {
        let targets: Vec<ModelTarget> = targets.into_iter().collect();
        for target in &targets {
            let definition = self
                .inner
                .registry
                .definition(&target.namespace)
                .ok_or_else(|| ModelError::NotRegistered(target.namespace.clone()))?;
            check_key(&definition, target.key.as_deref())?;
            self.check_addressable(&target.namespace, target.key.as_deref())?;
        }
        info!(count = targets.len(), "unregistering models");
        Ok(self.dispatch(Action::unregister(targets)))
    }

    /// Reinitialize static models, or replace the whole tree with `snapshot`.
    pub fn reload(&self, snapshot: Option<Value>) -> Dispatched {
        info!(snapshot = snapshot.is_some(), "reloading models");
        self.dispatch(Action::reload(snapshot))
    }

    /// Commit `actions` together and wait for all of them to settle.
    ///
    /// The first rejection is returned. `timeout` (or the configured
    /// default) bounds the wait with `BatchTimeout`.
    pub async fn batch(&self, actions: Vec<Action>, timeout: Option<Duration>) -> Result<()> {
        self.run_batch(actions, timeout).await.map(|_| ())
    }

    /// Like [`batch`](Self::batch), with the actions collected by `build`.
    /// Resolves to the results in dispatch order.
    pub async fn batch_with<F>(&self, build: F, timeout: Option<Duration>) -> Result<Vec<Value>>
    where
        F: FnOnce(&mut BatchScope),
    {
        let mut scope = BatchScope::default();
        build(&mut scope);
        self.run_batch(scope.actions, timeout).await
    }

    async fn run_batch(&self, actions: Vec<Action>, timeout: Option<Duration>) -> Result<Vec<Value>> {
        let mut children = Vec::with_capacity(actions.len());
        let mut pending = Vec::with_capacity(actions.len());
        for mut action in actions {
            let (ticket, dispatched) = self.inner.bridge.open(action.action_type());
            action.ticket = Some(ticket);
            children.push(action);
            pending.push(dispatched);
        }
        debug!(count = children.len(), "dispatching batch");
        self.inner.store.dispatch(&Action::batch(children));

        let settle = async move {
            let mut results = Vec::with_capacity(pending.len());
            for dispatched in pending {
                results.push(dispatched.await?);
            }
            Ok(results)
        };
        match timeout.or_else(|| self.inner.config.batch_timeout()) {
            Some(limit) => tokio::time::timeout(limit, settle)
                .await
                .map_err(|_| ModelError::BatchTimeout(limit))?,
            None => settle.await,
        }
    }

    // ====================================================================
    // Observation
    // ====================================================================

    /// Listen to committed changes of instances whose topic
    /// (`namespace` or `namespace/key`) matches `pattern` (`+`, `#`).
    pub fn subscribe<F>(&self, pattern: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(pattern, Arc::new(listener))
    }

    pub fn unsubscribe(&self, pattern: &str, id: SubscriptionId) -> bool {
        self.inner.store.unsubscribe(pattern, id)
    }

    /// Rejections nobody observed, and teardown failures.
    pub fn errors(&self) -> broadcast::Receiver<ModelError> {
        self.inner.bridge.subscribe_errors()
    }

    /// Dispatches whose ticket has not been claimed yet.
    pub fn pending_dispatches(&self) -> usize {
        self.inner.bridge.pending()
    }

    /// Open (or fetch) the side-effect scope of an instance.
    pub fn start_side_effect_scope(&self, id: &InstanceId) -> CancellationToken {
        self.inner.scopes.open(id)
    }

    /// Close every open side-effect scope and cancel dispatches that were
    /// never picked up. The tree is left as it is.
    pub fn shutdown(&self) {
        let scopes = self.inner.scopes.len();
        let errors = self.inner.scopes.close_all();
        self.inner.bridge.cancel_all();
        info!(scopes, teardown_errors = errors.len(), "model runtime shut down");
        for err in errors {
            self.inner.bridge.report_unhandled(err);
        }
    }

    // ====================================================================
    // Reduction
    // ====================================================================

    fn reduce_into(&self, state: &mut Value, action: &Action, post: &mut PostCommit) {
        let registry = &self.inner.registry;
        let ticket = action.ticket;
        match action.action_type() {
            BATCH => {
                for child in action.batched() {
                    self.reduce_into(state, child, post);
                }
                post.resolve(ticket);
            }
            REGISTER => {
                for target in ModelTarget::list_from_payload(action.payload()) {
                    let registered = self
                        .check_addressable(&target.namespace, target.key.as_deref())
                        .and_then(|()| lifecycle::register_target(state, registry, &target));
                    match registered {
                        Ok((next, id)) => {
                            *state = next;
                            post.mount(id);
                        }
                        Err(err) => post.reject(ticket, err),
                    }
                }
                post.resolve(ticket);
            }
            UNREGISTER => {
                for target in ModelTarget::list_from_payload(action.payload()) {
                    if let Some((next, id)) = lifecycle::unregister_target(state, registry, &target) {
                        *state = next;
                        post.unmount(id);
                    }
                }
                post.resolve(ticket);
            }
            RELOAD => {
                let (next, transitions) = lifecycle::reload(state, registry, action.payload());
                *state = next;
                post.transitions.extend(transitions);
                post.reset_instances = true;
                post.resolve(ticket);
            }
            action_type => match self.inner.router.route(registry, state, action_type) {
                Some(route) => self.apply_route(state, action, route, post),
                None => {
                    trace!(action = action_type, "no model answers to action");
                    post.resolve(ticket);
                }
            },
        }
    }

    fn apply_route(&self, state: &mut Value, action: &Action, route: Route, post: &mut PostCommit) {
        let registry = &self.inner.registry;
        let ticket = action.ticket;
        let target = ModelTarget {
            namespace: route.id.namespace.clone(),
            key: route.id.key.clone(),
            state: None,
        };

        if route.auto_register {
            match lifecycle::register_target(state, registry, &target) {
                Ok((next, id)) => {
                    debug!(model = %id, action = action.action_type(), "lazy model registered on first use");
                    *state = next;
                    post.mount(id);
                }
                Err(err) => {
                    post.reject(ticket, err);
                    return;
                }
            }
        }

        match route.kind {
            HandlerKind::Reducer | HandlerKind::Effect | HandlerKind::ReducerAndEffect => {
                if let Some(entry) = route.definition.reducer(&route.handler) {
                    *state = mutation::apply_reducer(state, &route.id, entry, &action.payload_or_null());
                }
                // The effect starts after commit, so it sees the reducer's write.
                match route.definition.effect(&route.handler) {
                    Some(entry) => post.effects.push(PendingEffect {
                        ticket,
                        id: route.id,
                        scope: entry.scope.clone(),
                        action_type: action.action_type().to_string(),
                        handler: Arc::clone(&entry.handler),
                        payload: action.payload_or_null(),
                    }),
                    None => post.resolve(ticket),
                }
            }
            HandlerKind::Mount => {
                let target = ModelTarget {
                    state: action.payload().cloned(),
                    ..target
                };
                match lifecycle::register_target(state, registry, &target) {
                    Ok((next, id)) => {
                        *state = next;
                        post.mount(id);
                    }
                    Err(err) => post.reject(ticket, err),
                }
                post.resolve(ticket);
            }
            HandlerKind::Unmount => {
                if let Some((next, id)) = lifecycle::unregister_target(state, registry, &target) {
                    *state = next;
                    post.unmount(id);
                }
                post.resolve(ticket);
            }
            HandlerKind::Set => {
                let value = match action.payload() {
                    Some(value) => value.clone(),
                    None => route
                        .definition
                        .initial_state()
                        .get_path(&route.scope)
                        .cloned()
                        .unwrap_or_default(),
                };
                *state = mutation::set(state, &route.id, &route.scope, value);
                post.resolve(ticket);
            }
            HandlerKind::Patch => {
                *state = mutation::patch(state, &route.id, &route.scope, &action.payload_or_null());
                post.resolve(ticket);
            }
            HandlerKind::None => {
                trace!(action = action.action_type(), model = %route.id, "model has no such handler");
                post.resolve(ticket);
            }
        }
    }

    // ====================================================================
    // After commit
    // ====================================================================

    fn finish(&self, post: PostCommit) {
        let inner = &self.inner;
        if post.reset_instances {
            inner.registry.discard_all();
        }
        for transition in post.transitions {
            match transition {
                Transition::Mount(id) => self.mount(&id),
                Transition::Unmount(id) => self.unmount(&id),
            }
        }
        for (ticket, err) in post.rejected {
            debug!(%ticket, code = err.code(), "dispatch rejected: {err}");
            inner.bridge.settle(Some(ticket), Err(err));
        }
        for err in post.unhandled {
            inner.bridge.report_unhandled(err);
        }
        for ticket in post.resolved {
            inner.bridge.settle(Some(ticket), Ok(Value::Null));
        }
        for effect in post.effects {
            self.start_effect(effect);
        }
    }

    /// Open the instance's scope and start its subscriptions.
    ///
    /// Skipped when the instance left the tree before its turn came (a
    /// listener or an earlier subscription unregistered it) or when its
    /// subscriptions are already running.
    fn mount(&self, id: &InstanceId) {
        let inner = &self.inner;
        if !tree::contains(&self.get_state(), id) {
            debug!(model = %id, "model unregistered before mounting");
            return;
        }
        let instance = match inner
            .registry
            .get_or_create_instance(&id.namespace, id.key.as_deref())
        {
            Ok(instance) => instance,
            Err(err) => {
                warn!(model = %id, "cannot mount model: {err}");
                return;
            }
        };
        let Some(token) = inner.scopes.mount(id) else {
            debug!(model = %id, "model already mounted");
            return;
        };
        let definition = Arc::clone(instance.definition());
        for (name, entry) in definition.subscriptions() {
            let model = ModelHandle::new(self.clone(), Arc::clone(&instance), entry.scope.clone());
            let Some(teardown) = (entry.handler)(model, token.clone()) else {
                continue;
            };
            // The subscription may have unregistered its own model.
            if let Err(teardown) = inner.scopes.add_teardown(id, name, teardown) {
                if let Err(err) = run_teardown(id, name, teardown) {
                    inner.bridge.report_unhandled(err);
                }
            }
        }
        info!(model = %id, "model mounted");
    }

    /// Close the instance's scope and drop its instance.
    fn unmount(&self, id: &InstanceId) {
        for err in self.inner.scopes.close(id) {
            self.inner.bridge.report_unhandled(err);
        }
        self.inner.registry.discard(id);
        info!(model = %id, "model unmounted");
    }

    fn start_effect(&self, effect: PendingEffect) {
        let inner = &self.inner;
        let settle = effect.ticket.and_then(|ticket| inner.bridge.claim(ticket));
        let errors = inner.bridge.error_sender();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(action = %effect.action_type, "effect dispatched outside of a tokio runtime");
            deliver(settle, Err(ModelError::NoAsyncRuntime(effect.action_type)), &errors);
            return;
        };
        let instance = match inner
            .registry
            .get_or_create_instance(&effect.id.namespace, effect.id.key.as_deref())
        {
            Ok(instance) => instance,
            Err(err) => {
                deliver(settle, Err(err), &errors);
                return;
            }
        };

        let model = ModelHandle::new(self.clone(), instance, effect.scope);
        let PendingEffect {
            action_type,
            handler,
            payload,
            ..
        } = effect;
        handle.spawn(async move {
            let result = handler(model, payload)
                .await
                .map_err(|err| ModelError::effect(&action_type, err));
            deliver(settle, result, &errors);
        });
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::assemble(RuntimeConfig::default(), Arc::new(TreeStore::new()))
    }
}

impl ModelHost for HostAdapter {
    fn reduce(&self, state: &Value, action: &Action) -> Reduction {
        let Some(runtime) = self.runtime() else {
            return Reduction::unchanged(state);
        };
        let mut next = state.clone();
        let mut post = PostCommit::default();
        runtime.reduce_into(&mut next, action, &mut post);
        Reduction { state: next, post }
    }

    fn after_commit(&self, _action: &Action, post: PostCommit) {
        if post.is_empty() {
            return;
        }
        if let Some(runtime) = self.runtime() {
            runtime.finish(post);
        }
    }

    fn model_definition(&self, namespace: &str) -> Option<Arc<ModelDefinition>> {
        self.0.upgrade()?.registry.definition(namespace)
    }

    fn mount_model(&self, id: &InstanceId) {
        if let Some(runtime) = self.runtime() {
            runtime.mount(id);
        }
    }

    fn unmount_model(&self, id: &InstanceId) {
        if let Some(runtime) = self.runtime() {
            runtime.unmount(id);
        }
    }
}

/// Collects the actions of [`Runtime::batch_with`].
#[derive(Default)]
pub struct BatchScope {
    actions: Vec<Action>,
}

impl BatchScope {
    pub fn dispatch(&mut self, action: Action) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn dispatch_type(&mut self, action_type: &ActionType, payload: Option<Value>) -> &mut Self {
        self.dispatch(create_action(action_type, payload))
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("models", &self.inner.registry.definitions().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose;
    use crate::error::error_code;
    use crate::model::Teardown;
    use crate::selector::{create_selector, input};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counter() -> Arc<ModelDefinition> {
        ModelDefinition::builder("counter")
            .state(Value::from_entries([("n", 0), ("step", 1)]))
            .reducer("increment", |state, _payload| {
                let n = state.get("n").and_then(Value::as_i64).unwrap_or(0);
                let step = state.get("step").and_then(Value::as_i64).unwrap_or(1);
                state.insert("n", n + step);
            })
            .reducer("add", |state, payload| {
                let n = state.get("n").and_then(Value::as_i64).unwrap_or(0);
                state.insert("n", n + payload.as_i64().unwrap_or(0));
            })
            .getter("double", |cx| {
                Value::from(cx.field("n").as_i64().unwrap_or(0) * 2)
            })
            .build()
            .unwrap()
    }

    fn todo_item() -> Arc<ModelDefinition> {
        ModelDefinition::builder("todoItem")
            .state_fn(|| Value::from(serde_json::json!({"title": "", "done": false})))
            .reducer("setTitle", |state, payload| {
                state.insert("title", payload.clone());
            })
            .dynamic()
            .lazy()
            .build()
            .unwrap()
    }

    fn todo_list() -> Arc<ModelDefinition> {
        ModelDefinition::builder("todo")
            .state_fn(|| Value::from_entries([("items", Value::array())]))
            .reducer("push", |state, payload| {
                let mut items = state.get("items").cloned().unwrap_or_else(Value::array);
                items.push(payload.clone());
                state.insert("items", items);
            })
            .effect("add", |model: ModelHandle, payload: Value| async move {
                let id = model.state().get("items").map(Value::len).unwrap_or(0) + 1;
                let mut item = Value::from_entries([("id", id)]);
                item.insert("title", payload);
                model.dispatch("push", Some(item)).await?;
                anyhow::Ok(Value::from(id))
            })
            .effect("fail", |_model: ModelHandle, _payload: Value| async move {
                Err::<Value, _>(anyhow::anyhow!("backend unavailable"))
            })
            .effect("stall", |_model: ModelHandle, _payload: Value| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::Ok(Value::Null)
            })
            .build()
            .unwrap()
    }

    fn runtime() -> Runtime {
        let runtime = Runtime::default();
        runtime.define(counter()).unwrap();
        runtime.define(todo_item()).unwrap();
        runtime.define(todo_list()).unwrap();
        runtime
    }

    async fn registered() -> Runtime {
        let runtime = runtime();
        runtime
            .register([ModelTarget::new("counter"), ModelTarget::new("todo")])
            .unwrap()
            .await
            .unwrap();
        runtime
    }

    fn n(runtime: &Runtime) -> Option<i64> {
        runtime
            .get_state()
            .get_path(&["counter", "n"])
            .and_then(Value::as_i64)
    }

    // ========================================================================
    // Construction
    // ========================================================================

    #[test]
    fn new_validates_config() {
        let config = RuntimeConfig {
            path_separator: "/".to_string(),
            ..RuntimeConfig::default()
        };
        let err = Runtime::new(config).unwrap_err();
        assert_eq!(err.code(), error_code::CONFIG);
    }

    #[test]
    fn define_rejects_second_definition() {
        let runtime = runtime();
        let err = runtime.define(counter()).unwrap_err();
        assert_eq!(err.code(), error_code::DUPLICATE_NAMESPACE);
        assert_eq!(runtime.definitions().len(), 3);
    }

    #[test]
    fn model_checks_key_usage() {
        let runtime = runtime();
        assert_eq!(
            runtime.model("counter", Some("1")).unwrap_err().code(),
            error_code::INVALID_KEY_USAGE
        );
        assert_eq!(
            runtime.model("todoItem", None).unwrap_err().code(),
            error_code::INVALID_KEY_USAGE
        );
        assert_eq!(
            runtime.model("ghost", None).unwrap_err().code(),
            error_code::NOT_REGISTERED
        );
    }

    #[test]
    fn model_by_definition_defines_it() {
        let runtime = Runtime::default();
        let def = counter();
        let handle = runtime.model(&def, None).unwrap();
        assert_eq!(handle.namespace(), "counter");
        assert_eq!(runtime.definitions().len(), 1);
    }

    // ========================================================================
    // Reducers
    // ========================================================================

    #[tokio::test]
    async fn counter_increments() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();

        let result = counter.dispatch("increment", None).await.unwrap();
        assert!(result.is_null());
        counter.dispatch("add", Some(Value::from(5))).await.unwrap();

        assert_eq!(n(&runtime), Some(6));
        assert_eq!(counter.getter("double").and_then(|v| v.as_i64()), Some(12));
        assert_eq!(runtime.pending_dispatches(), 0);
    }

    #[tokio::test]
    async fn each_commit_is_a_new_tree() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();
        let mut trees = vec![runtime.get_state()];
        for _ in 0..3 {
            counter.dispatch("increment", None).await.unwrap();
            trees.push(runtime.get_state());
        }

        assert_eq!(n(&runtime), Some(3));
        for (i, a) in trees.iter().enumerate() {
            for b in &trees[i + 1..] {
                assert!(!a.same(b));
                assert!(!a.get("counter").unwrap().same(b.get("counter").unwrap()));
            }
        }
        // untouched siblings keep their identity
        assert!(trees[0].get("todo").unwrap().same(trees[3].get("todo").unwrap()));
    }

    #[tokio::test]
    async fn reducer_on_unregistered_static_model_is_ignored() {
        let runtime = runtime();
        let counter = runtime.model("counter", None).unwrap();
        let before = runtime.get_state();

        counter.dispatch("increment", None).await.unwrap();
        assert!(runtime.get_state().same(&before));
        assert!(!counter.is_registered());
        assert_eq!(counter.state().get("n").and_then(Value::as_i64), Some(0));
    }

    #[tokio::test]
    async fn unregistered_state_is_identity_stable() {
        let runtime = runtime();
        let counter = runtime.model("counter", None).unwrap();
        assert!(counter.state().same(&counter.state()));

        counter.register(None).unwrap().await.unwrap();
        let registered = runtime.get_state();
        assert!(counter.state().same(registered.get("counter").unwrap()));
    }

    #[tokio::test]
    async fn lazy_dynamic_model_registers_on_first_action() {
        let runtime = runtime();
        let id = InstanceId::keyed("todoItem", "7");
        assert!(!runtime.is_registered(&id));

        runtime
            .dispatch(Action::with_payload("todoItem/7/setTitle", "buy milk"))
            .await
            .unwrap();

        assert!(runtime.is_registered(&id));
        assert_eq!(
            runtime
                .get_state()
                .get_path(&["todoItem", "7", "title"])
                .and_then(Value::as_str),
            Some("buy milk")
        );
        assert_eq!(
            runtime
                .get_state()
                .get_path(&["todoItem", "7", "done"])
                .and_then(Value::as_bool),
            Some(false)
        );
    }

    #[tokio::test]
    async fn unknown_actions_resolve_null_and_change_nothing() {
        let runtime = registered().await;
        let before = runtime.get_state();

        let a = runtime.dispatch(Action::new("ghost/run", None)).await.unwrap();
        let b = runtime.dispatch(Action::new("counter/nothing", None)).await.unwrap();
        assert!(a.is_null() && b.is_null());
        assert!(runtime.get_state().same(&before));
    }

    #[tokio::test]
    async fn dispatch_type_uses_action_helpers() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();
        let actions = counter.actions();
        let add = actions.get("add").unwrap();
        assert_eq!(add.as_str(), "counter/add");

        runtime.dispatch_type(add, Some(Value::from(3))).await.unwrap();
        assert_eq!(n(&runtime), Some(3));
    }

    // ========================================================================
    // Effects
    // ========================================================================

    #[tokio::test]
    async fn reducer_and_effect_share_an_action() {
        let def = ModelDefinition::builder("cart")
            .state(Value::from_entries([("count", 0)]))
            .reducer("add", |state, _payload| {
                let n = state.get("count").and_then(Value::as_i64).unwrap_or(0);
                state.insert("count", n + 1);
            })
            .effect("add", |model: ModelHandle, _payload: Value| async move {
                anyhow::Ok(model.state().get("count").cloned().unwrap_or_default())
            })
            .build()
            .unwrap();
        let runtime = Runtime::default();
        runtime.define(def).unwrap();
        let cart = runtime.model("cart", None).unwrap();
        cart.register(None).unwrap().await.unwrap();

        // the effect starts after the reducer's commit
        let seen = cart.dispatch("add", None).await.unwrap();
        assert_eq!(seen.as_i64(), Some(1));
        assert_eq!(cart.state().get("count").and_then(Value::as_i64), Some(1));
    }

    #[tokio::test]
    async fn effect_resolves_with_its_value() {
        let runtime = registered().await;
        let todo = runtime.model("todo", None).unwrap();

        let id = todo.dispatch("add", Some(Value::from("milk"))).await.unwrap();
        assert_eq!(id.as_i64(), Some(1));
        let effect = todo.dispatch("add", Some(Value::from("eggs")));
        let reducer = runtime.dispatch(Action::new("counter/increment", None));
        assert!(reducer.await.unwrap().is_null());
        assert_eq!(effect.await.unwrap().as_i64(), Some(2));

        let items = todo.state().get("items").cloned().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items.as_array().unwrap()[1].get("title").and_then(Value::as_str),
            Some("eggs")
        );
    }

    #[tokio::test]
    async fn effect_error_rejects_the_dispatch() {
        let runtime = registered().await;
        let todo = runtime.model("todo", None).unwrap();

        let err = todo.dispatch("fail", None).await.unwrap_err();
        assert_eq!(err.code(), error_code::EFFECT_REJECTION);
        assert!(err.effect_cause().unwrap().to_string().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn dropped_rejection_reaches_error_channel() {
        let runtime = registered().await;
        let mut errors = runtime.errors();
        let todo = runtime.model("todo", None).unwrap();

        drop(todo.dispatch("fail", None));
        let err = errors.recv().await.unwrap();
        assert_eq!(err.code(), error_code::EFFECT_REJECTION);
    }

    #[test]
    fn effect_without_async_runtime_is_rejected() {
        let runtime = runtime();
        let todo = runtime.model("todo", None).unwrap();
        drop(todo.register(None).unwrap());

        let dispatched = todo.dispatch("add", Some(Value::from("milk")));
        let executor = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = executor.block_on(dispatched).unwrap_err();
        assert_eq!(err.code(), error_code::NO_ASYNC_RUNTIME);
    }

    // ========================================================================
    // Set / patch
    // ========================================================================

    #[tokio::test]
    async fn empty_patch_keeps_identity() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();
        let before = runtime.get_state();

        counter.patch(Value::object()).await.unwrap();
        assert!(runtime.get_state().same(&before));

        counter
            .patch(Value::from_entries([("n", 0)]))
            .await
            .unwrap();
        assert!(runtime.get_state().same(&before));

        counter
            .patch(Value::from_entries([("n", 4)]))
            .await
            .unwrap();
        assert_eq!(n(&runtime), Some(4));
        assert_eq!(
            runtime.get_state().get_path(&["counter", "step"]).and_then(Value::as_i64),
            Some(1)
        );
    }

    #[tokio::test]
    async fn set_replaces_or_resets() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();

        counter
            .set(Some(Value::from_entries([("n", 9), ("step", 3)])))
            .await
            .unwrap();
        assert_eq!(n(&runtime), Some(9));

        counter.set(None).await.unwrap();
        assert_eq!(n(&runtime), Some(0));
    }

    #[tokio::test]
    async fn sub_model_patches_its_slice() {
        let runtime = Runtime::default();
        let merged = compose::merge_nested("app", &[("counter", counter())]).unwrap();
        runtime.define(merged).unwrap();
        let app = runtime.model("app", None).unwrap();
        app.register(None).unwrap().await.unwrap();

        let counter = app.sub_model("counter");
        counter.dispatch("increment", None).await.unwrap();
        counter
            .patch(Value::from_entries([("step", 10)]))
            .await
            .unwrap();
        counter.dispatch("increment", None).await.unwrap();

        assert_eq!(counter.state().get("n").and_then(Value::as_i64), Some(11));
        assert_eq!(counter.getter("double").and_then(|v| v.as_i64()), Some(22));
        assert!(counter.getters().contains_key("double"));
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn register_is_prevalidated() {
        let runtime = registered().await;
        let before = runtime.get_state();

        let err = runtime.register([ModelTarget::new("counter")]).unwrap_err();
        assert_eq!(err.code(), error_code::ALREADY_REGISTERED);
        let err = runtime
            .register([ModelTarget::keyed("todoItem", "1"), ModelTarget::keyed("todoItem", "1")])
            .unwrap_err();
        assert_eq!(err.code(), error_code::ALREADY_REGISTERED);
        let err = runtime.register([ModelTarget::new("ghost")]).unwrap_err();
        assert_eq!(err.code(), error_code::NOT_REGISTERED);
        let err = runtime.unregister([ModelTarget::new("todoItem")]).unwrap_err();
        assert_eq!(err.code(), error_code::INVALID_KEY_USAGE);

        assert!(runtime.get_state().same(&before));
    }

    #[tokio::test]
    async fn register_unregister_register_starts_fresh() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();
        counter.dispatch("increment", None).await.unwrap();
        assert_eq!(n(&runtime), Some(1));

        counter.unregister().unwrap().await.unwrap();
        assert!(!counter.is_registered());
        assert!(!runtime.namespaces().contains(&"counter".to_string()));

        // unregistering again is a no-op
        counter.unregister().unwrap().await.unwrap();

        counter.register(None).unwrap().await.unwrap();
        assert_eq!(n(&runtime), Some(0));
    }

    #[tokio::test]
    async fn unaddressable_keys_are_rejected() {
        let runtime = runtime();
        let err = runtime.model("todoItem", Some("a/b")).unwrap_err();
        assert_eq!(err.code(), error_code::INVALID_KEY_USAGE);
        assert!(runtime.model("todoItem", Some("")).is_err());

        let err = runtime
            .register([ModelTarget::keyed("todoItem", "a/b")])
            .unwrap_err();
        assert_eq!(err.code(), error_code::INVALID_KEY_USAGE);
        assert!(runtime.unregister([ModelTarget::keyed("todoItem", "")]).is_err());

        // a raw register action is refused during reduction too
        let err = runtime
            .dispatch(Action::register([ModelTarget::keyed("todoItem", "a/b")]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), error_code::INVALID_KEY_USAGE);
        assert!(runtime.get_state().is_empty());
    }

    #[tokio::test]
    async fn dynamic_register_cycle_leaves_no_residue() {
        let runtime = runtime();
        let item = runtime.model("todoItem", Some("9")).unwrap();
        item.register(None).unwrap().await.unwrap();
        let fresh = item.state();

        item.dispatch("setTitle", Some(Value::from("draft"))).await.unwrap();
        item.unregister().unwrap().await.unwrap();
        item.register(None).unwrap().await.unwrap();

        assert_eq!(item.state(), fresh);
        assert_eq!(item.state().get("title").and_then(Value::as_str), Some(""));
    }

    #[tokio::test]
    async fn register_with_explicit_state() {
        let runtime = runtime();
        runtime
            .register([ModelTarget::keyed("todoItem", "3")
                .with_state(Value::from(serde_json::json!({"title": "x", "done": true})))])
            .unwrap()
            .await
            .unwrap();
        let item = runtime.model("todoItem", Some("3")).unwrap();
        assert_eq!(item.state().get("done").and_then(Value::as_bool), Some(true));
    }

    #[tokio::test]
    async fn mount_and_unmount_actions() {
        let runtime = runtime();
        runtime
            .dispatch(Action::with_payload(
                "todoItem/5/$mount",
                Value::from_entries([("title", "e")]),
            ))
            .await
            .unwrap();
        assert!(runtime.is_registered(&InstanceId::keyed("todoItem", "5")));

        let err = runtime
            .dispatch(Action::new("todoItem/5/$mount", None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), error_code::ALREADY_REGISTERED);

        runtime
            .dispatch(Action::new("todoItem/5/$unmount", None))
            .await
            .unwrap();
        assert!(!runtime.get_state().contains_key("todoItem"));
    }

    #[tokio::test]
    async fn reload_round_trips_a_snapshot() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();
        counter.dispatch("add", Some(Value::from(7))).await.unwrap();
        runtime
            .dispatch(Action::with_payload("todoItem/1/setTitle", "a"))
            .await
            .unwrap();
        let snapshot = runtime.snapshot();

        runtime.reload(None).await.unwrap();
        assert_eq!(n(&runtime), Some(0));
        assert!(!runtime.get_state().contains_key("todoItem"));

        runtime.reload(Some(snapshot.clone())).await.unwrap();
        assert!(runtime.get_state().same(&snapshot));
        assert_eq!(n(&runtime), Some(7));
        assert!(runtime.is_registered(&InstanceId::keyed("todoItem", "1")));

        // instances were rebuilt and still work
        counter.dispatch("increment", None).await.unwrap();
        assert_eq!(n(&runtime), Some(8));
    }

    // ========================================================================
    // Subscriptions and scopes
    // ========================================================================

    fn clock(started: Arc<AtomicU64>, stopped: Arc<AtomicU64>) -> Arc<ModelDefinition> {
        ModelDefinition::builder("clock")
            .state(Value::from_entries([("ticks", 0)]))
            .subscription("broken", |_model, _token| -> Option<Teardown> {
                Some(Box::new(|| -> anyhow::Result<()> {
                    Err(anyhow::anyhow!("socket already closed"))
                }))
            })
            .subscription("ticker", move |_model, token| -> Option<Teardown> {
                started.fetch_add(1, Ordering::Relaxed);
                let stopped = stopped.clone();
                Some(Box::new(move || -> anyhow::Result<()> {
                    assert!(token.is_cancelled());
                    stopped.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }))
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn teardown_failures_are_isolated_and_reported() {
        let started = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicU64::new(0));
        let runtime = Runtime::default();
        runtime.define(clock(started.clone(), stopped.clone())).unwrap();
        let mut errors = runtime.errors();

        let clock = runtime.model("clock", None).unwrap();
        clock.register(None).unwrap().await.unwrap();
        assert_eq!(started.load(Ordering::Relaxed), 1);

        clock.unregister().unwrap().await.unwrap();
        assert_eq!(stopped.load(Ordering::Relaxed), 1);
        let err = errors.try_recv().unwrap();
        assert_eq!(err.code(), error_code::SUBSCRIPTION_TEARDOWN);
        assert!(err.to_string().contains("socket already closed"));
    }

    #[tokio::test]
    async fn register_then_unregister_in_one_batch_opens_and_closes() {
        let started = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicU64::new(0));
        let runtime = Runtime::default();
        runtime.define(clock(started.clone(), stopped.clone())).unwrap();

        runtime
            .batch(
                vec![
                    Action::register([ModelTarget::new("clock")]),
                    Action::unregister([ModelTarget::new("clock")]),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(started.load(Ordering::Relaxed), 1);
        assert_eq!(stopped.load(Ordering::Relaxed), 1);
        assert!(!runtime.get_state().contains_key("clock"));
    }

    #[tokio::test]
    async fn shutdown_closes_scopes() {
        let started = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicU64::new(0));
        let runtime = Runtime::default();
        runtime.define(clock(started, stopped.clone())).unwrap();
        runtime
            .register([ModelTarget::new("clock")])
            .unwrap()
            .await
            .unwrap();

        runtime.shutdown();
        assert_eq!(stopped.load(Ordering::Relaxed), 1);
        assert!(runtime.get_state().contains_key("clock"));
    }

    #[tokio::test]
    async fn model_unregistered_by_a_listener_is_never_mounted() {
        let started = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicU64::new(0));
        let runtime = Runtime::default();
        runtime.define(clock(started.clone(), stopped.clone())).unwrap();

        let remote = runtime.clone();
        let listener = runtime.subscribe("clock", move |_topic, state| {
            if state.is_object() {
                let _ = remote.unregister([ModelTarget::new("clock")]);
            }
        });
        runtime
            .register([ModelTarget::new("clock")])
            .unwrap()
            .await
            .unwrap();

        assert!(!runtime.is_registered(&InstanceId::static_model("clock")));
        assert_eq!(started.load(Ordering::Relaxed), 0);
        assert_eq!(runtime.inner.scopes.len(), 0);

        // a later registration starts from a fresh scope
        assert!(runtime.unsubscribe("clock", listener));
        let clock = runtime.model("clock", None).unwrap();
        clock.register(None).unwrap().await.unwrap();
        assert_eq!(started.load(Ordering::Relaxed), 1);
        clock.unregister().unwrap().await.unwrap();
        assert_eq!(stopped.load(Ordering::Relaxed), 1);
        assert_eq!(runtime.inner.scopes.len(), 0);
    }

    #[tokio::test]
    async fn effect_settling_after_unregister_leaves_tree_alone() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let wait = gate.clone();
        let def = ModelDefinition::builder("upload")
            .state(Value::from_entries([("done", false)]))
            .reducer("finish", |state, _payload| {
                state.insert("done", true);
            })
            .effect("start", move |model: ModelHandle, _payload: Value| {
                let wait = wait.clone();
                async move {
                    wait.notified().await;
                    model.dispatch("finish", None).await?;
                    anyhow::Ok(Value::from(7))
                }
            })
            .build()
            .unwrap();
        let runtime = Runtime::default();
        runtime.define(def).unwrap();
        let upload = runtime.model("upload", None).unwrap();
        upload.register(None).unwrap().await.unwrap();

        let pending = upload.dispatch("start", None);
        upload.unregister().unwrap().await.unwrap();
        gate.notify_one();

        assert_eq!(pending.await.unwrap().as_i64(), Some(7));
        assert!(!upload.is_registered());
        assert!(runtime.get_state().is_empty());
    }

    // ========================================================================
    // Batch
    // ========================================================================

    #[tokio::test]
    async fn batch_commits_once() {
        let runtime = registered().await;
        let commits = Arc::new(AtomicU64::new(0));
        let commits_c = commits.clone();
        runtime.subscribe("counter", move |_topic, _state| {
            commits_c.fetch_add(1, Ordering::Relaxed);
        });

        let counter = runtime.model("counter", None).unwrap();
        let increment = counter.action("increment");
        runtime
            .batch(
                vec![
                    increment.create_empty(),
                    increment.create_empty(),
                    counter.action("add").create(10),
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(n(&runtime), Some(12));
        assert_eq!(commits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn batch_with_collects_results_in_order() {
        let runtime = registered().await;
        let todo = runtime.model("todo", None).unwrap();
        let add = todo.action("add");

        let results = runtime
            .batch_with(
                |scope| {
                    scope
                        .dispatch(add.create("milk"))
                        .dispatch(Action::new("counter/increment", None));
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_i64(), Some(1));
        assert!(results[1].is_null());
    }

    #[tokio::test]
    async fn batch_propagates_first_rejection() {
        let runtime = registered().await;
        let err = runtime
            .batch(
                vec![
                    Action::new("counter/increment", None),
                    Action::new("todo/fail", None),
                ],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), error_code::EFFECT_REJECTION);
        assert_eq!(n(&runtime), Some(1));
    }

    #[tokio::test]
    async fn batch_deadline_times_out() {
        let runtime = registered().await;
        let err = runtime
            .batch(
                vec![Action::new("todo/stall", None)],
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), error_code::BATCH_TIMEOUT);
    }

    // ========================================================================
    // Getters and observation
    // ========================================================================

    #[tokio::test]
    async fn memo_combiner_runs_once_per_input_change() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls_c = calls.clone();
        let def = ModelDefinition::builder("stats")
            .state(Value::from(serde_json::json!({"n": 2, "label": "a"})))
            .selector(
                "squared",
                create_selector([input(|cx| cx.field("n"))], move |args, _previous| {
                    calls_c.fetch_add(1, Ordering::Relaxed);
                    let n = args[0].as_i64().unwrap_or(0);
                    Value::from(n * n)
                }),
            )
            .build()
            .unwrap();
        let runtime = Runtime::default();
        runtime.define(def).unwrap();
        let stats = runtime.model("stats", None).unwrap();
        stats.register(None).unwrap().await.unwrap();

        assert_eq!(stats.getter("squared").and_then(|v| v.as_i64()), Some(4));
        assert_eq!(stats.getter("squared").and_then(|v| v.as_i64()), Some(4));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // unrelated change: inputs are re-read, combiner is not re-run
        stats
            .patch(Value::from_entries([("label", "b")]))
            .await
            .unwrap();
        assert_eq!(stats.getter("squared").and_then(|v| v.as_i64()), Some(4));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        stats.patch(Value::from_entries([("n", 3)])).await.unwrap();
        assert_eq!(stats.getter("squared").and_then(|v| v.as_i64()), Some(9));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn concurrent_readers_combine_once() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls_c = calls.clone();
        let def = ModelDefinition::builder("stats")
            .state(Value::from_entries([("n", 3)]))
            .selector(
                "squared",
                create_selector([input(|cx| cx.field("n"))], move |args, _previous| {
                    calls_c.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(Duration::from_millis(20));
                    let n = args[0].as_i64().unwrap_or(0);
                    Value::from(n * n)
                }),
            )
            .build()
            .unwrap();
        let runtime = Runtime::default();
        runtime.define(def).unwrap();
        let stats = runtime.model("stats", None).unwrap();
        stats.register(None).unwrap().await.unwrap();

        let barrier = std::sync::Barrier::new(4);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    assert_eq!(stats.getter("squared").and_then(|v| v.as_i64()), Some(9));
                });
            }
        });
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn handle_subscribe_sees_own_changes_only() {
        let runtime = registered().await;
        let counter = runtime.model("counter", None).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_c = seen.clone();
        let id = counter.subscribe(move |state: &Value| {
            seen_c.lock().push(state.get("n").and_then(Value::as_i64));
        });

        counter.dispatch("increment", None).await.unwrap();
        runtime
            .dispatch(Action::with_payload("todo/push", "x"))
            .await
            .unwrap();
        assert!(counter.unsubscribe(id));
        counter.dispatch("increment", None).await.unwrap();

        assert_eq!(*seen.lock(), vec![Some(1)]);
    }

    #[tokio::test]
    async fn wildcard_subscription_sees_dynamic_keys() {
        let runtime = runtime();
        let topics = Arc::new(Mutex::new(Vec::new()));
        let topics_c = topics.clone();
        runtime.subscribe("todoItem/+", move |topic, _state| {
            topics_c.lock().push(topic.to_string());
        });

        runtime
            .dispatch(Action::with_payload("todoItem/1/setTitle", "a"))
            .await
            .unwrap();
        runtime
            .dispatch(Action::with_payload("todoItem/2/setTitle", "b"))
            .await
            .unwrap();

        assert_eq!(*topics.lock(), vec!["todoItem/1".to_string(), "todoItem/2".to_string()]);
    }
}
