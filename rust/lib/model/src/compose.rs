//! Definition composition: `merge`, `merge_nested` and `extend`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ModelError, Result};
use crate::model::{HandlerEntry, ModelDefinition};
use crate::path::scoped;
use crate::value::{Map, Value};

fn insert_unique<H: Clone>(
    namespace: &str,
    kind: &'static str,
    target: &mut BTreeMap<String, HandlerEntry<H>>,
    source: &BTreeMap<String, HandlerEntry<H>>,
) -> Result<()> {
    for (name, entry) in source {
        if target.contains_key(name) {
            return Err(ModelError::MergeConflict {
                namespace: namespace.to_string(),
                kind,
                key: name.clone(),
            });
        }
        target.insert(name.clone(), entry.clone());
    }
    Ok(())
}

fn object_state(namespace: &str, def: &ModelDefinition) -> Result<Arc<Map>> {
    match def.initial_state() {
        Value::Object(map) => Ok(map),
        other => Err(ModelError::invalid_definition(
            namespace,
            format!("cannot merge `{}`: state is not an object ({other})", def.name()),
        )),
    }
}

/// Union sibling definitions into one namespace.
///
/// States must be objects and may not share keys; no two inputs may
/// declare the same getter, reducer, effect or subscription. The result is
/// dynamic or lazy if any input is.
pub fn merge(name: &str, defs: &[Arc<ModelDefinition>]) -> Result<Arc<ModelDefinition>> {
    let mut state_keys = BTreeSet::new();
    let mut builder = ModelDefinition::builder(name).into_parts();

    for def in defs {
        for key in object_state(name, def)?.keys() {
            if !state_keys.insert(key.clone()) {
                return Err(ModelError::MergeConflict {
                    namespace: name.to_string(),
                    kind: "state",
                    key: key.clone(),
                });
            }
        }
        insert_unique(name, "getter", &mut builder.selectors, &def.selectors)?;
        insert_unique(name, "reducer", &mut builder.reducers, &def.reducers)?;
        insert_unique(name, "effect", &mut builder.effects, &def.effects)?;
        insert_unique(name, "subscription", &mut builder.subscriptions, &def.subscriptions)?;
        builder.lazy |= def.lazy;
        builder.dynamic |= def.dynamic;
    }

    // Factories of the inputs run again per instance so states stay fresh.
    let factories: Vec<_> = defs.iter().map(|d| Arc::clone(&d.initial)).collect();
    builder.initial = Arc::new(move || {
        let mut merged = Map::new();
        for factory in &factories {
            if let Value::Object(map) = factory() {
                merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Value::from(merged)
    });

    builder.validate()?;
    Ok(Arc::new(builder))
}

fn rescope<H: Clone>(
    key: &str,
    target: &mut BTreeMap<String, HandlerEntry<H>>,
    source: &BTreeMap<String, HandlerEntry<H>>,
) {
    let prefix = [key.to_string()];
    for (name, entry) in source {
        let mut scope = prefix.to_vec();
        scope.extend(entry.scope.iter().cloned());
        target.insert(
            scoped(&prefix, name),
            HandlerEntry {
                scope,
                handler: entry.handler.clone(),
            },
        );
    }
}

/// Nest definitions under sub-keys of one namespace.
///
/// The state becomes `{key: def.state, ..}`; handlers are re-keyed
/// `key.<name>` and operate on the `key` slice of the state.
pub fn merge_nested(
    name: &str,
    parts: &[(&str, Arc<ModelDefinition>)],
) -> Result<Arc<ModelDefinition>> {
    let mut def = ModelDefinition::builder(name).into_parts();
    let mut seen = Vec::with_capacity(parts.len());

    for (key, part) in parts {
        if key.is_empty() {
            return Err(ModelError::invalid_definition(name, "nested keys must not be empty"));
        }
        if seen.contains(key) {
            return Err(ModelError::MergeConflict {
                namespace: name.to_string(),
                kind: "state",
                key: key.to_string(),
            });
        }
        seen.push(*key);
        rescope(key, &mut def.selectors, &part.selectors);
        rescope(key, &mut def.reducers, &part.reducers);
        rescope(key, &mut def.effects, &part.effects);
        rescope(key, &mut def.subscriptions, &part.subscriptions);
        def.lazy |= part.lazy;
        def.dynamic |= part.dynamic;
    }

    let factories: Vec<(String, _)> = parts
        .iter()
        .map(|(key, part)| (key.to_string(), Arc::clone(&part.initial)))
        .collect();
    def.initial = Arc::new(move || {
        Value::from_entries(factories.iter().map(|(key, factory)| (key.clone(), factory())))
    });

    def.validate()?;
    Ok(Arc::new(def))
}

/// Derive a definition from `base`, with `overrides` taking precedence.
///
/// State keys are shallow-merged (override wins) when both states are
/// objects; otherwise the override state replaces the base one. Handler
/// maps are merged by name within each kind, so an override effect sits
/// next to a base reducer of the same name. Flags are OR-ed.
pub fn extend(base: &ModelDefinition, overrides: &ModelDefinition) -> Result<Arc<ModelDefinition>> {
    let mut def = ModelDefinition::builder(base.name()).into_parts();

    for source in [&base.selectors, &overrides.selectors] {
        def.selectors
            .extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for source in [&base.reducers, &overrides.reducers] {
        def.reducers
            .extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for source in [&base.effects, &overrides.effects] {
        def.effects
            .extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for source in [&base.subscriptions, &overrides.subscriptions] {
        def.subscriptions
            .extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    def.lazy = base.lazy || overrides.lazy;
    def.dynamic = base.dynamic || overrides.dynamic;

    let base_state = Arc::clone(&base.initial);
    let override_state = Arc::clone(&overrides.initial);
    def.initial = Arc::new(move || match (base_state(), override_state()) {
        (Value::Object(mut merged), Value::Object(extra)) => {
            let map = Arc::make_mut(&mut merged);
            map.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        (_, replacement) => replacement,
    });

    def.validate()?;
    Ok(Arc::new(def))
}
