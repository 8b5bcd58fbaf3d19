//! Per-instance side-effect scopes.
//!
//! A scope is opened when an instance mounts and closed when it unmounts.
//! Subscriptions receive the scope's [`CancellationToken`] and may return a
//! teardown; closing cancels the token and runs every teardown, collecting
//! failures instead of stopping at the first one.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ModelError;
use crate::model::Teardown;
use crate::registry::InstanceId;

struct OpenScope {
    token: CancellationToken,
    teardowns: Vec<(String, Teardown)>,
    /// Subscriptions were started in this scope.
    mounted: bool,
}

#[derive(Default)]
pub(crate) struct ScopeTable {
    scopes: Mutex<HashMap<InstanceId, OpenScope>>,
}

impl ScopeTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn entry<'a>(scopes: &'a mut HashMap<InstanceId, OpenScope>, id: &InstanceId) -> &'a mut OpenScope {
        scopes.entry(id.clone()).or_insert_with(|| {
            debug!(model = %id, "side-effect scope opened");
            OpenScope {
                token: CancellationToken::new(),
                teardowns: Vec::new(),
                mounted: false,
            }
        })
    }

    /// Open the scope of `id`, or return the token of the one already open.
    pub(crate) fn open(&self, id: &InstanceId) -> CancellationToken {
        let mut scopes = self.scopes.lock();
        Self::entry(&mut scopes, id).token.clone()
    }

    /// Open the scope of `id` for starting its subscriptions.
    ///
    /// Returns `None` when the subscriptions of the current scope were
    /// already started.
    pub(crate) fn mount(&self, id: &InstanceId) -> Option<CancellationToken> {
        let mut scopes = self.scopes.lock();
        let scope = Self::entry(&mut scopes, id);
        if scope.mounted {
            return None;
        }
        scope.mounted = true;
        Some(scope.token.clone())
    }

    /// Attach a teardown to an open scope.
    ///
    /// Hands the teardown back when the scope was closed in the meantime,
    /// so the caller can run it right away.
    pub(crate) fn add_teardown(
        &self,
        id: &InstanceId,
        name: &str,
        teardown: Teardown,
    ) -> Result<(), Teardown> {
        let mut scopes = self.scopes.lock();
        match scopes.get_mut(id) {
            Some(scope) => {
                scope.teardowns.push((name.to_string(), teardown));
                Ok(())
            }
            None => Err(teardown),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.scopes.lock().len()
    }

    /// Close the scope of `id`. Closing a scope that is not open is a no-op.
    pub(crate) fn close(&self, id: &InstanceId) -> Vec<ModelError> {
        let Some(scope) = self.scopes.lock().remove(id) else {
            return Vec::new();
        };
        debug!(model = %id, teardowns = scope.teardowns.len(), "side-effect scope closed");
        scope.token.cancel();
        scope
            .teardowns
            .into_iter()
            .filter_map(|(name, teardown)| run_teardown(id, &name, teardown).err())
            .collect()
    }

    /// Close every open scope.
    pub(crate) fn close_all(&self) -> Vec<ModelError> {
        let ids: Vec<InstanceId> = self.scopes.lock().keys().cloned().collect();
        ids.iter().flat_map(|id| self.close(id)).collect()
    }
}

/// Run one teardown, turning an error or a panic into `SubscriptionTeardown`.
pub(crate) fn run_teardown(
    id: &InstanceId,
    name: &str,
    teardown: Teardown,
) -> Result<(), ModelError> {
    let message = match catch_unwind(AssertUnwindSafe(teardown)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => format!("{err:#}"),
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "teardown panicked".to_string()),
    };
    Err(ModelError::SubscriptionTeardown {
        model: id.to_string(),
        subscription: name.to_string(),
        message,
    })
}
