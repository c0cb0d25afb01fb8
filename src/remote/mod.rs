pub mod descriptor;
pub mod markers;
pub mod runtime_sync;
pub mod state_machine;
pub mod transfer;

pub use descriptor::{RemoteDescriptor, RemoteObservation, RemoteState};
pub use markers::{parse_marker, InfoFile, RemoteMarker, RemoteProgress};
pub use runtime_sync::{digest_hex, RuntimeSync, REMOTE_RUNTIME_DIR};
pub use state_machine::{
    poll_remote_task, query_status, stage_task, RemotePollResult, RemoteStatusReport, StaleFile,
};
pub use transfer::{MountedRemote, RemoteError, RemoteFileInfo, RemoteTransfer};
