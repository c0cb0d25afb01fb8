pub mod dispatch_loop;
pub mod manager_state;
pub mod step_runner;
pub mod stop_reason;

pub use dispatch_loop::{Clock, DispatchLoop};
pub use manager_state::{
    ManagerState, MAX_CONSECUTIVE_DEADLOCKS, MAX_CRITICAL_FAILURES, PARAM_ACTIVE,
    PARAM_CLEANUP_MODE, PARAM_DEBUG_LEVEL, PARAM_UPDATE_REQUIRED,
};
pub use step_runner::{apply_disk_policy, run_step, StepEnvironment, StepOutcome};
pub use stop_reason::StopReason;
