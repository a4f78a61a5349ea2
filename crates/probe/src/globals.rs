//! Global probe storage
//!
//! The host process installs its [`Probe`] and [`SignalBroker`] once during
//! startup and the shadow layer reads them from here. Access is thread-safe
//! via OnceLock.

use std::sync::OnceLock;

use crate::error::ProbeError;
use crate::object::{ContextId, RawObject, Task};
use crate::signals::SignalBroker;

/// Host-side view of object lifetimes and execution contexts.
///
/// Implementations answer three questions the shadow layer cannot answer on
/// its own: is this pointer still a live object, which execution context
/// does it belong to, and how do I run code on that context.
pub trait Probe: Send + Sync {
    /// Whether `obj` currently points at a live, tracked object.
    fn is_valid_object(&self, obj: RawObject) -> bool;

    /// The execution context the calling thread belongs to.
    fn current_context(&self) -> ContextId;

    /// The execution context that owns `obj`, or `None` when the object is
    /// free-threaded.
    fn object_context(&self, obj: RawObject) -> Option<ContextId>;

    /// Queues `task` for execution on `ctx`. Returns `false` when the task
    /// could not be queued (unknown context or full queue), in which case
    /// it is dropped.
    fn dispatch(&self, ctx: ContextId, task: Task) -> bool;
}

/// Installed probe and signal broker
static PROBE: OnceLock<&'static dyn Probe> = OnceLock::new();
static BROKER: OnceLock<&'static dyn SignalBroker> = OnceLock::new();

/// Install the process-wide probe and signal broker
///
/// Called once during host startup. Returns error if already installed.
pub fn install(
    probe: &'static dyn Probe,
    broker: &'static dyn SignalBroker,
) -> Result<(), ProbeError> {
    PROBE.set(probe).map_err(|_| ProbeError::AlreadyInstalled)?;
    // PROBE and BROKER are only written here, so this cannot fail.
    let _ = BROKER.set(broker);
    tracing::info!("probe installed");
    Ok(())
}

/// Get the installed probe
///
/// # Panics
/// Panics if called before `install`
pub fn probe() -> &'static dyn Probe {
    *PROBE.get().expect("Probe not installed")
}

/// Try to get the installed probe without panicking
pub fn try_probe() -> Option<&'static dyn Probe> {
    PROBE.get().copied()
}

/// Get the installed signal broker
///
/// # Panics
/// Panics if called before `install`
pub fn broker() -> &'static dyn SignalBroker {
    *BROKER.get().expect("Signal broker not installed")
}

/// Try to get the installed signal broker without panicking
pub fn try_broker() -> Option<&'static dyn SignalBroker> {
    BROKER.get().copied()
}

/// Check if a probe is installed
pub fn is_installed() -> bool {
    PROBE.get().is_some()
}
