//! Model runtime: namespaced state models over one immutable tree.
//!
//! A model is a namespace with an initial state, getters, reducers, effects
//! and subscriptions. The runtime keeps every registered instance inside a
//! single copy-on-write [`Value`] tree and drives it with actions.
//!
//! # Action Addressing
//!
//! Action types are `<namespace>[/<key>]/<action>`:
//! - Static model: `counter/increment`
//! - Dynamic model, one instance per key: `todoItem/7/setTitle`
//! - Nested handler path: `app/list.add`
//! - Reserved names: `$mount`, `$unmount`, `$set`, `$patch`
//!
//! Runtime-wide actions are `@@register`, `@@unregister`, `@@reload` and
//! `@@batch`.
//!
//! # Lifecycle
//!
//! An instance is registered when the tree has an entry for it. Registering
//! writes its state and starts its subscriptions inside a side-effect scope;
//! unregistering cancels the scope, runs the teardowns and drops the entry.
//! Lazy models register themselves on their first reducer or effect.
//!
//! # Example
//!
//! ```ignore
//! use openerp_model::{ModelDefinition, ModelTarget, Runtime, Value};
//!
//! let counter = ModelDefinition::builder("counter")
//!     .state(Value::from_entries([("n", 0)]))
//!     .reducer("increment", |state, _| {
//!         let n = state.get("n").and_then(Value::as_i64).unwrap_or(0);
//!         state.insert("n", n + 1);
//!     })
//!     .build()?;
//!
//! let runtime = Runtime::default();
//! runtime.define(counter)?;
//! runtime.register([ModelTarget::new("counter")])?.await?;
//!
//! // Reducers commit before `dispatch` returns; the future settles with
//! // the effect's value, or `Null` when there is none.
//! runtime.model("counter", None)?.dispatch("increment", None).await?;
//!
//! runtime.subscribe("#", |topic, state| {
//!     println!("{topic} changed");
//! });
//! ```

pub mod action;
mod bridge;
pub mod compose;
pub mod config;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod model;
pub mod mutation;
pub mod path;
pub mod registry;
pub mod router;
pub mod runtime;
mod scope;
pub mod selector;
pub mod store;
pub mod tree;
pub mod trie;
pub mod value;

// Re-export primary types at crate root.
pub use action::{create_action, is_action_of, Action, ActionType, ModelTarget, Ticket};
pub use bridge::Dispatched;
pub use compose::{extend, merge, merge_nested};
pub use config::RuntimeConfig;
pub use error::{error_code, ModelError, Result};
pub use handle::ModelHandle;
pub use lifecycle::{PostCommit, Transition};
pub use model::{ModelBuilder, ModelDefinition, Teardown};
pub use registry::{InstanceId, ModelRef};
pub use runtime::{BatchScope, Runtime};
pub use selector::{create_selector, input, Selector, SelectorContext};
pub use store::{ModelHost, Reduction, StateListener, Store, SubscriptionId, TreeStore};
pub use value::Value;
