use std::sync::Arc;

use gate_store::Store;

use crate::companion::CompanionSupervisor;

/// Shared request-handler state. The store is the only mutable resource and
/// serializes its own writes; the supervisor is exposed read-only.
#[derive(Clone)]
pub(crate) struct AppState {
    store: Store,
    companion: Option<Arc<CompanionSupervisor>>,
    admin_token: Option<String>,
}

impl AppState {
    pub fn new(
        store: Store,
        companion: Option<Arc<CompanionSupervisor>>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            store,
            companion,
            admin_token,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn companion(&self) -> Option<&Arc<CompanionSupervisor>> {
        self.companion.as_ref()
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }
}
