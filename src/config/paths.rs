pub const DEFAULT_STATE_DIR: &str = ".stepagent";
pub const SETTINGS_FILE_NAME: &str = "config.yaml";
pub const DEFAULT_QUEUE_DB_FILE_NAME: &str = "queue.sqlite3";
pub const DEFAULT_MANIFEST_FILE_NAME: &str = "plugins.yaml";
