use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Callers match on these, never on
// the rendered message.

pub mod error_code {
    pub const NOT_REGISTERED: &str = "NOT_REGISTERED";
    pub const INVALID_KEY_USAGE: &str = "INVALID_KEY_USAGE";
    pub const ALREADY_REGISTERED: &str = "ALREADY_REGISTERED";
    pub const DUPLICATE_NAMESPACE: &str = "DUPLICATE_NAMESPACE";
    pub const MERGE_CONFLICT: &str = "MERGE_CONFLICT";
    pub const INVALID_DEFINITION: &str = "INVALID_DEFINITION";
    pub const EFFECT_REJECTION: &str = "EFFECT_REJECTION";
    pub const SUBSCRIPTION_TEARDOWN: &str = "SUBSCRIPTION_TEARDOWN";
    pub const CANCELED: &str = "CANCELED";
    pub const BATCH_TIMEOUT: &str = "BATCH_TIMEOUT";
    pub const NO_ASYNC_RUNTIME: &str = "NO_ASYNC_RUNTIME";
    pub const CONFIG: &str = "CONFIG";
}

// ── ModelError ──────────────────────────────────────────────────────

/// Errors raised by the model runtime.
///
/// Structural errors (`NotRegistered`, `InvalidKeyUsage`, `InvalidKey`,
/// `AlreadyRegistered`, `DuplicateNamespace`, `MergeConflict`,
/// `InvalidDefinition`) are programmer errors returned at the call site.
/// `EffectRejection` travels through the dispatch future, or through the
/// runtime's unhandled-error channel when nobody is waiting for it.
///
/// Cloneable so it can fan out over a broadcast channel; user causes are
/// kept behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    /// The namespace was never defined.
    #[error("model `{0}` is not registered")]
    NotRegistered(String),

    /// A key was given for a static model, or omitted for a dynamic one.
    #[error("{}", invalid_key_message(.namespace, .dynamic))]
    InvalidKeyUsage { namespace: String, dynamic: bool },

    /// The key is empty or contains the namespace separator, so no action
    /// type could address the instance.
    #[error("model `{namespace}` cannot be addressed with key `{key}`")]
    InvalidKey { namespace: String, key: String },

    /// The instance already has a state-tree entry.
    #[error("model `{0}` is already registered")]
    AlreadyRegistered(String),

    /// A different definition already owns this namespace.
    #[error("namespace `{0}` is already defined by another model")]
    DuplicateNamespace(String),

    /// Sibling definitions declare the same key.
    #[error("cannot merge into `{namespace}`: {kind} `{key}` is declared more than once")]
    MergeConflict {
        namespace: String,
        kind: &'static str,
        key: String,
    },

    /// The definition is malformed.
    #[error("invalid model definition `{namespace}`: {reason}")]
    InvalidDefinition { namespace: String, reason: String },

    /// A user effect returned an error.
    #[error("effect `{action}` rejected: {cause}")]
    EffectRejection {
        action: String,
        cause: Arc<anyhow::Error>,
    },

    /// A side-effect scope's teardown failed while closing.
    #[error("teardown of subscription `{subscription}` on `{model}` failed: {message}")]
    SubscriptionTeardown {
        model: String,
        subscription: String,
        message: String,
    },

    /// The dispatch was abandoned before it settled (e.g. the effect task panicked).
    #[error("dispatch of `{0}` was dropped before it settled")]
    Canceled(String),

    /// A batch did not settle before its deadline.
    #[error("batch did not settle within {0:?}")]
    BatchTimeout(Duration),

    /// An effect was dispatched outside of a tokio runtime.
    #[error("no async runtime available to run effect `{0}`")]
    NoAsyncRuntime(String),

    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(String),
}

fn invalid_key_message(namespace: &str, dynamic: &bool) -> String {
    if *dynamic {
        format!("model `{namespace}` is dynamic and must be addressed with a key")
    } else {
        format!("model `{namespace}` is static and cannot be addressed with a key")
    }
}

impl ModelError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ModelError::NotRegistered(_) => error_code::NOT_REGISTERED,
            ModelError::InvalidKeyUsage { .. } | ModelError::InvalidKey { .. } => {
                error_code::INVALID_KEY_USAGE
            }
            ModelError::AlreadyRegistered(_) => error_code::ALREADY_REGISTERED,
            ModelError::DuplicateNamespace(_) => error_code::DUPLICATE_NAMESPACE,
            ModelError::MergeConflict { .. } => error_code::MERGE_CONFLICT,
            ModelError::InvalidDefinition { .. } => error_code::INVALID_DEFINITION,
            ModelError::EffectRejection { .. } => error_code::EFFECT_REJECTION,
            ModelError::SubscriptionTeardown { .. } => error_code::SUBSCRIPTION_TEARDOWN,
            ModelError::Canceled(_) => error_code::CANCELED,
            ModelError::BatchTimeout(_) => error_code::BATCH_TIMEOUT,
            ModelError::NoAsyncRuntime(_) => error_code::NO_ASYNC_RUNTIME,
            ModelError::Config(_) => error_code::CONFIG,
        }
    }

    /// The user error behind an `EffectRejection`.
    pub fn effect_cause(&self) -> Option<&anyhow::Error> {
        match self {
            ModelError::EffectRejection { cause, .. } => Some(&**cause),
            _ => None,
        }
    }

    pub(crate) fn effect(action: &str, cause: anyhow::Error) -> Self {
        ModelError::EffectRejection {
            action: action.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn invalid_definition(namespace: &str, reason: impl Into<String>) -> Self {
        ModelError::InvalidDefinition {
            namespace: namespace.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
