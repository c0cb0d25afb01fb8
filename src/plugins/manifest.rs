use super::capability::PluginError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const TEST_PREFIX: &str = "test_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub tool: String,
    pub class: String,
    #[serde(default)]
    pub module: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Stager,
    Executor,
}

impl PluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stager => "stager",
            Self::Executor => "executor",
        }
    }
}

/// Maps step tools to plugin classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub stagers: Vec<ManifestEntry>,
    #[serde(default)]
    pub executors: Vec<ManifestEntry>,
}

impl PluginManifest {
    pub fn from_path(path: &Path) -> Result<Self, PluginError> {
        let raw = fs::read_to_string(path).map_err(|source| PluginError::ManifestRead {
            path: path.display().to_string(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| PluginError::ManifestParse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn entries(&self, kind: PluginKind) -> &[ManifestEntry] {
        match kind {
            PluginKind::Stager => &self.stagers,
            PluginKind::Executor => &self.executors,
        }
    }

    /// Case-insensitive lookup. A tool named `Test_<name>` falls back to `<name>` once
    /// when it has no entry of its own.
    pub fn lookup(&self, kind: PluginKind, tool: &str) -> Option<&ManifestEntry> {
        let tool = tool.trim();
        let find = |name: &str| {
            self.entries(kind)
                .iter()
                .find(|entry| entry.tool.trim().eq_ignore_ascii_case(name))
        };
        find(tool).or_else(|| strip_test_prefix(tool).and_then(find))
    }
}

fn strip_test_prefix(tool: &str) -> Option<&str> {
    let head = tool.get(..TEST_PREFIX.len())?;
    if head.eq_ignore_ascii_case(TEST_PREFIX) {
        tool.get(TEST_PREFIX.len()..).filter(|rest| !rest.is_empty())
    } else {
        None
    }
}
