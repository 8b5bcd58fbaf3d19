use std::sync::Arc;

use crate::action::{is_reserved_name, MOUNT, PATCH, SET, UNMOUNT};
use crate::config::RuntimeConfig;
use crate::model::ModelDefinition;
use crate::path::{canonical_path, split_action_type, split_path, CANONICAL_SEPARATOR};
use crate::registry::{InstanceId, Registry};
use crate::tree;
use crate::value::Value;

/// What an action addressed to an instance does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Reducer,
    Effect,
    /// The reducer commits first, then the effect starts.
    ReducerAndEffect,
    Mount,
    Unmount,
    Set,
    Patch,
    /// The instance exists but has no handler of that name.
    None,
}

/// Where an action goes.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: InstanceId,
    pub definition: Arc<ModelDefinition>,
    pub kind: HandlerKind,
    /// Canonical handler path (`list.add`), or the reserved name.
    pub handler: String,
    /// State scope of `$set` / `$patch` addressed to a nested slice.
    pub scope: Vec<String>,
    /// The instance is lazy and unregistered: register it first.
    pub auto_register: bool,
}

/// Maps action types onto model instances and handlers.
///
/// Type layout is `<namespace>[<sep><key>]<sep><action>`; the action part
/// may be a nested path in the configured path separator.
pub struct Router {
    namespace_separator: String,
    path_separator: String,
}

impl Router {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            namespace_separator: config.namespace_separator.clone(),
            path_separator: config.path_separator.clone(),
        }
    }

    /// Resolve `action_type` against the registry and the current tree.
    ///
    /// Returns `None` for types no defined model answers to; such actions
    /// pass through the store without effect.
    pub fn route(&self, registry: &Registry, state: &Value, action_type: &str) -> Option<Route> {
        let (full_namespace, name) = split_action_type(action_type, &self.namespace_separator)?;
        let resolved = registry.resolve(full_namespace, &self.namespace_separator)?;
        let handler = canonical_path(name, &self.path_separator);

        let (kind, scope) = classify(&resolved.definition, &handler);
        let auto_register = matches!(
            kind,
            HandlerKind::Reducer | HandlerKind::Effect | HandlerKind::ReducerAndEffect
        )
            && resolved.definition.is_lazy()
            && !tree::contains(state, &resolved.id);

        Some(Route {
            id: resolved.id,
            definition: resolved.definition,
            kind,
            handler,
            scope,
            auto_register,
        })
    }
}

fn classify(definition: &ModelDefinition, handler: &str) -> (HandlerKind, Vec<String>) {
    match (definition.reducer(handler), definition.effect(handler)) {
        (Some(_), Some(_)) => return (HandlerKind::ReducerAndEffect, Vec::new()),
        (Some(_), None) => return (HandlerKind::Reducer, Vec::new()),
        (None, Some(_)) => return (HandlerKind::Effect, Vec::new()),
        (None, None) => {}
    }

    let mut segments = split_path(handler, CANONICAL_SEPARATOR);
    let Some(last) = segments.pop() else {
        return (HandlerKind::None, Vec::new());
    };
    if !is_reserved_name(&last) {
        return (HandlerKind::None, Vec::new());
    }
    let kind = match last.as_str() {
        MOUNT if segments.is_empty() => HandlerKind::Mount,
        UNMOUNT if segments.is_empty() => HandlerKind::Unmount,
        SET => HandlerKind::Set,
        PATCH => HandlerKind::Patch,
        _ => HandlerKind::None,
    };
    (kind, segments)
}
