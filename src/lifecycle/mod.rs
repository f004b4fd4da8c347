//! Application lifecycle core
//!
//! Everything that coordinates background work, screen transitions and
//! teardown lives here. The rest of the application talks to this module
//! through [`LifecycleController::dispatch`] only.

use std::any::Any;
use std::fmt;

pub mod controller;
pub mod dispatch;
pub mod resources;
pub mod screens;
pub mod shutdown;
pub mod tasks;

pub use controller::{EventHandler, HandlerContext, LifecycleController, Payload};
pub use dispatch::{ImmediateDispatcher, UiDispatcher, UiJob, UiQueue, UiQueueReceiver};
pub use resources::{ManagedResource, ResourceRegistry};
pub use screens::{ScreenCoordinator, ScreenKind, ShowCallback, TransitionGuard, TransitionPermit, ViewFactory, ViewSlot};
pub use shutdown::{
    BusinessTeardown, PhaseOutcome, ProcessExit, ResourceLifecycle, ShutdownOrchestrator, ShutdownReport,
    StdProcessExit, UiTeardown,
};
pub use tasks::{TaskInfo, TaskRegistry};

/// Phase the shutdown sequence is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownPhase {
    /// Shutdown has not started
    None,

    /// Cancelling background tasks
    Business,

    /// Releasing UI-owned resources
    Ui,

    /// Closing external resources (files, stores)
    Resources,

    /// Closing the main window, flushing logs, exiting
    Final,

    /// FINAL failed, forced termination
    Emergency,
}

impl ShutdownPhase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ShutdownPhase::None => 0,
            ShutdownPhase::Business => 1,
            ShutdownPhase::Ui => 2,
            ShutdownPhase::Resources => 3,
            ShutdownPhase::Final => 4,
            ShutdownPhase::Emergency => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ShutdownPhase::Business,
            2 => ShutdownPhase::Ui,
            3 => ShutdownPhase::Resources,
            4 => ShutdownPhase::Final,
            5 => ShutdownPhase::Emergency,
            _ => ShutdownPhase::None,
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownPhase::None => "none",
            ShutdownPhase::Business => "business",
            ShutdownPhase::Ui => "ui",
            ShutdownPhase::Resources => "resources",
            ShutdownPhase::Final => "final",
            ShutdownPhase::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Policy for building views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// Construct a view the first time its kind is requested (default)
    #[default]
    Lazy,

    /// Construct every kind when the coordinator is created
    Eager,
}

/// How a background task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// Work returned `Ok`
    Completed,

    /// Work returned `Err`
    Failed,

    /// Work panicked
    Panicked,

    /// Work returned after its token was cancelled
    Cancelled,
}

/// Render a panic payload as text for logging
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_round_trips_through_u8() {
        for phase in [
            ShutdownPhase::None,
            ShutdownPhase::Business,
            ShutdownPhase::Ui,
            ShutdownPhase::Resources,
            ShutdownPhase::Final,
            ShutdownPhase::Emergency,
        ] {
            assert_eq!(ShutdownPhase::from_u8(phase.as_u8()), phase);
        }
        assert_eq!(ShutdownPhase::from_u8(42), ShutdownPhase::None);
    }

    #[test]
    fn test_panic_message_handles_common_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");
    }
}
