//! Namespace registry.
//!
//! One [`Context`] per defined namespace, holding the definition and the
//! live [`ModelInstance`]s created for it (one per key for dynamic models).
//! Instances carry caches only; committed state always lives in the store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::action::ActionType;
use crate::error::{ModelError, Result};
use crate::model::ModelDefinition;
use crate::path::{action_type, split_key, wire_path};
use crate::selector::SelectorCacheEntry;
use crate::value::Value;

// ── InstanceId ──────────────────────────────────────────────────────

/// Addresses one model instance: `namespace` or `namespace` + key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub namespace: String,
    pub key: Option<String>,
}

impl InstanceId {
    pub fn new(namespace: impl Into<String>, key: Option<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key,
        }
    }

    pub fn static_model(namespace: impl Into<String>) -> Self {
        Self::new(namespace, None)
    }

    pub fn keyed(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(namespace, Some(key.into()))
    }

    /// Location of the instance state in the root tree.
    pub fn path(&self) -> Vec<String> {
        let mut path = vec![self.namespace.clone()];
        if let Some(key) = &self.key {
            path.push(key.clone());
        }
        path
    }

    /// Store notification topic: `namespace` or `namespace/key`.
    pub fn topic(&self) -> String {
        match &self.key {
            Some(key) => format!("{}/{}", self.namespace, key),
            None => self.namespace.clone(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic())
    }
}

// ── ModelRef ────────────────────────────────────────────────────────

/// Names a model either by namespace or by its definition.
#[derive(Clone)]
pub enum ModelRef {
    Name(String),
    Definition(Arc<ModelDefinition>),
}

impl ModelRef {
    pub fn namespace(&self) -> &str {
        match self {
            ModelRef::Name(name) => name,
            ModelRef::Definition(def) => def.name(),
        }
    }
}

impl From<&str> for ModelRef {
    fn from(name: &str) -> Self {
        ModelRef::Name(name.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(name: String) -> Self {
        ModelRef::Name(name)
    }
}

impl From<Arc<ModelDefinition>> for ModelRef {
    fn from(def: Arc<ModelDefinition>) -> Self {
        ModelRef::Definition(def)
    }
}

impl From<&Arc<ModelDefinition>> for ModelRef {
    fn from(def: &Arc<ModelDefinition>) -> Self {
        ModelRef::Definition(Arc::clone(def))
    }
}

// ── ModelInstance ───────────────────────────────────────────────────

#[derive(Default)]
struct GetterCache {
    /// Model state the cached values were computed from.
    state: Option<Value>,
    values: HashMap<String, Value>,
    memo: HashMap<String, MemoSlot>,
}

/// Last arguments and result of one memo getter. Held locked while the
/// getter evaluates, so concurrent readers combine once.
pub(crate) type MemoSlot = Arc<Mutex<Option<SelectorCacheEntry>>>;

/// Runtime-side companion of one `(namespace, key)`.
pub struct ModelInstance {
    id: InstanceId,
    definition: Arc<ModelDefinition>,
    initial: OnceLock<Value>,
    actions: OnceLock<BTreeMap<String, ActionType>>,
    cache: Mutex<GetterCache>,
}

impl ModelInstance {
    fn new(id: InstanceId, definition: Arc<ModelDefinition>) -> Self {
        Self {
            id,
            definition,
            initial: OnceLock::new(),
            actions: OnceLock::new(),
            cache: Mutex::new(GetterCache::default()),
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.definition
    }

    /// Initial state, computed once per instance.
    pub fn initial_state(&self) -> Value {
        self.initial
            .get_or_init(|| self.definition.initial_state())
            .clone()
    }

    /// Action helpers for every reducer and effect, keyed by canonical path.
    pub(crate) fn actions(&self, namespace_sep: &str, path_sep: &str) -> &BTreeMap<String, ActionType> {
        self.actions.get_or_init(|| {
            self.definition
                .action_names()
                .map(|name| {
                    let ty = action_type(
                        &self.id.namespace,
                        self.id.key.as_deref(),
                        &wire_path(name, path_sep),
                        namespace_sep,
                    );
                    (name.to_string(), ActionType::new(ty))
                })
                .collect()
        })
    }

    /// Getter value cached for `state`, if that is still the model state.
    pub(crate) fn cached_getter(&self, state: &Value, path: &str) -> Option<Value> {
        let cache = self.cache.lock();
        match &cache.state {
            Some(cached) if cached.same(state) => cache.values.get(path).cloned(),
            _ => None,
        }
    }

    /// The memo slot of the getter at `path`, created on first use.
    pub(crate) fn memo_slot(&self, path: &str) -> MemoSlot {
        let mut cache = self.cache.lock();
        Arc::clone(cache.memo.entry(path.to_string()).or_default())
    }

    /// Store a computed getter value against the state it was computed from.
    pub(crate) fn store_getter(&self, state: &Value, path: &str, value: Value) {
        let mut cache = self.cache.lock();
        let stale = cache.state.as_ref().is_none_or(|cached| !cached.same(state));
        if stale {
            cache.values.clear();
            cache.state = Some(state.clone());
        }
        cache.values.insert(path.to_string(), value);
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance").field("id", &self.id).finish()
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// Per-namespace record: the definition plus its instances.
pub struct Context {
    definition: Arc<ModelDefinition>,
    instances: Mutex<HashMap<Option<String>, Arc<ModelInstance>>>,
}

impl Context {
    fn new(definition: Arc<ModelDefinition>) -> Self {
        Self {
            definition,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.definition
    }

    pub fn namespace(&self) -> &str {
        self.definition.name()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace())
            .finish()
    }
}

/// Reject a key on a static model, or a missing key on a dynamic one.
pub fn check_key(definition: &ModelDefinition, key: Option<&str>) -> Result<()> {
    if definition.is_dynamic() != key.is_some() {
        return Err(ModelError::InvalidKeyUsage {
            namespace: definition.name().to_string(),
            dynamic: definition.is_dynamic(),
        });
    }
    Ok(())
}

/// Reject keys the router cannot split back out of an action type: empty
/// ones and ones containing the namespace separator.
pub fn check_key_format(namespace: &str, key: Option<&str>, separator: &str) -> Result<()> {
    match key {
        Some(key) if key.is_empty() || key.contains(separator) => Err(ModelError::InvalidKey {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }),
        _ => Ok(()),
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// A namespace resolved from an action type.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub id: InstanceId,
    pub definition: Arc<ModelDefinition>,
}

#[derive(Default)]
pub struct Registry {
    contexts: RwLock<HashMap<String, Arc<Context>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a namespace. Re-defining with the same `Arc` is a no-op.
    pub fn define(&self, definition: Arc<ModelDefinition>) -> Result<Arc<Context>> {
        let mut contexts = self.contexts.write();
        if let Some(existing) = contexts.get(definition.name()) {
            if Arc::ptr_eq(existing.definition(), &definition) {
                return Ok(Arc::clone(existing));
            }
            return Err(ModelError::DuplicateNamespace(definition.name().to_string()));
        }
        debug!(namespace = definition.name(), "model defined");
        let context = Arc::new(Context::new(definition));
        contexts.insert(context.namespace().to_string(), Arc::clone(&context));
        Ok(context)
    }

    pub fn get_or_create_context(&self, model: impl Into<ModelRef>) -> Result<Arc<Context>> {
        match model.into() {
            ModelRef::Definition(def) => self.define(def),
            ModelRef::Name(name) => self
                .context(&name)
                .ok_or(ModelError::NotRegistered(name)),
        }
    }

    pub fn context(&self, namespace: &str) -> Option<Arc<Context>> {
        self.contexts.read().get(namespace).cloned()
    }

    pub fn definition(&self, namespace: &str) -> Option<Arc<ModelDefinition>> {
        self.context(namespace).map(|c| Arc::clone(c.definition()))
    }

    /// Every definition, ordered by namespace.
    pub fn definitions(&self) -> Vec<Arc<ModelDefinition>> {
        let mut defs: Vec<_> = self
            .contexts
            .read()
            .values()
            .map(|c| Arc::clone(c.definition()))
            .collect();
        defs.sort_by(|a, b| a.name().cmp(b.name()));
        defs
    }

    /// Instance for `(namespace, key)`, created on first access.
    pub fn get_or_create_instance(
        &self,
        namespace: &str,
        key: Option<&str>,
    ) -> Result<Arc<ModelInstance>> {
        let context = self
            .context(namespace)
            .ok_or_else(|| ModelError::NotRegistered(namespace.to_string()))?;
        check_key(context.definition(), key)?;

        let mut instances = context.instances.lock();
        let slot = key.map(str::to_string);
        let instance = instances.entry(slot).or_insert_with(|| {
            let id = InstanceId::new(namespace, key.map(str::to_string));
            Arc::new(ModelInstance::new(id, Arc::clone(context.definition())))
        });
        Ok(Arc::clone(instance))
    }

    /// Detach an instance; the next access builds a fresh one.
    pub fn discard(&self, id: &InstanceId) -> Option<Arc<ModelInstance>> {
        let context = self.context(&id.namespace)?;
        let removed = context.instances.lock().remove(&id.key);
        if removed.is_some() {
            debug!(model = %id, "instance discarded");
        }
        removed
    }

    /// Detach every instance of every namespace.
    pub fn discard_all(&self) {
        for context in self.contexts.read().values() {
            context.instances.lock().clear();
        }
    }

    /// Resolve the namespace half of an action type.
    ///
    /// An exact match on a static model wins; otherwise the trailing
    /// segment is taken as the key of a dynamic model.
    pub fn resolve(&self, full_namespace: &str, separator: &str) -> Option<Resolved> {
        if let Some(def) = self.definition(full_namespace) {
            if !def.is_dynamic() {
                return Some(Resolved {
                    id: InstanceId::static_model(full_namespace),
                    definition: def,
                });
            }
        }
        let (namespace, key) = split_key(full_namespace, separator)?;
        let def = self.definition(namespace)?;
        if !def.is_dynamic() {
            return None;
        }
        Some(Resolved {
            id: InstanceId::keyed(namespace, key),
            definition: def,
        })
    }
}
