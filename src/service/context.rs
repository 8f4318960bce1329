//! Process-scoped service context

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Allocates instance IDs for service instances
///
/// IDs are unique and increasing within one context. They correlate log
/// lines only; nothing compares them for business identity. Tests create
/// their own context to get predictable IDs.
#[derive(Debug, Default)]
pub struct ServiceContext {
    last_instance_id: AtomicU64,
}

static GLOBAL: OnceLock<Arc<ServiceContext>> = OnceLock::new();

impl ServiceContext {
    /// Create a context whose first instance ID is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide context
    pub fn global() -> Arc<ServiceContext> {
        GLOBAL.get_or_init(|| Arc::new(ServiceContext::new())).clone()
    }

    /// Allocate the next instance ID
    pub fn next_instance_id(&self) -> u64 {
        self.last_instance_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}
