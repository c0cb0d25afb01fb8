pub mod error;
pub mod load;
pub mod paths;
pub mod settings;
pub mod watcher;

pub use error::ConfigError;
pub use load::load_settings;
pub use paths::{
    DEFAULT_MANIFEST_FILE_NAME, DEFAULT_QUEUE_DB_FILE_NAME, DEFAULT_STATE_DIR,
    SETTINGS_FILE_NAME,
};
pub use settings::{
    CleanupMode, DiskSettings, ManagerSettings, PluginSettings, QueueSettings, RecoverySettings,
    RemoteHost, RemoteSettings, Settings,
};
pub use watcher::ConfigWatcher;
