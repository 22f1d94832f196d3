//! Host context injection
//!
//! Thread-local storage for the host a piece of simulation code is acting
//! for. The network context sets it while it updates a router, so every log
//! entry emitted from inside that router carries the host address.

use std::cell::RefCell;
use std::sync::OnceLock;

use ferry_core::HostId;
use uuid::Uuid;

/// Host context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContextData {
    pub host: HostId,
    /// Identifier of the simulation run this process is executing
    pub run_id: Uuid,
}

thread_local! {
    static HOST_CONTEXT: RefCell<Option<HostContextData>> = const { RefCell::new(None) };
}

static RUN_ID: OnceLock<Uuid> = OnceLock::new();

/// Identifier of the current run, generated once per process
pub fn run_id() -> Uuid {
    *RUN_ID.get_or_init(Uuid::new_v4)
}

/// RAII guard for host context
///
/// Creating the guard sets the host for the current thread. Dropping it
/// restores the previous context, so guards nest.
///
/// # Example
///
/// ```ignore
/// use ferry_core::HostId;
/// use ferry_logging::HostContextGuard;
///
/// let _guard = HostContextGuard::new(HostId(3));
/// // Spans opened in this scope carry host n3
/// tracing::info!("Buffer full");
/// ```
pub struct HostContextGuard {
    previous: Option<HostContextData>,
}

impl HostContextGuard {
    /// Act as `host` until the guard drops
    pub fn new(host: HostId) -> Self {
        Self::with_run_id(host, run_id())
    }

    /// Act as `host` within an explicitly identified run
    pub fn with_run_id(host: HostId, run_id: Uuid) -> Self {
        let previous = HOST_CONTEXT.with(|ctx| ctx.replace(Some(HostContextData { host, run_id })));
        Self { previous }
    }

    /// Get the current host context (if any)
    pub fn current() -> Option<HostContextData> {
        HOST_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current host (if set)
    pub fn current_host() -> Option<HostId> {
        HOST_CONTEXT.with(|ctx| ctx.borrow().as_ref().map(|c| c.host))
    }
}

impl Drop for HostContextGuard {
    fn drop(&mut self) {
        HOST_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block as a given host
///
/// # Example
///
/// ```ignore
/// with_host_context!(HostId(1), {
///     tracing::info!("Contact up");
/// });
/// ```
#[macro_export]
macro_rules! with_host_context {
    ($host:expr, $body:block) => {{
        let _guard = $crate::context::HostContextGuard::new($host);
        $body
    }};
}
