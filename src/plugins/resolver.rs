use super::capability::{PluginError, PluginSetup, ResourceStager, TaskDirectories, ToolExecutor};
use super::manifest::{ManifestEntry, PluginKind, PluginManifest};
use super::registry::PluginRegistry;
use crate::config::Settings;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Turns a step-tool name into plugin instances.
///
/// The manifest is re-read on every call so edits take effect without a restart.
/// The first failure for a given tool is logged at error level, repeats at warn.
#[derive(Debug)]
pub struct PluginResolver {
    state_root: PathBuf,
    registry: PluginRegistry,
    reported: BTreeSet<String>,
}

impl PluginResolver {
    pub fn new(state_root: &Path, registry: PluginRegistry) -> Self {
        Self {
            state_root: state_root.to_path_buf(),
            registry,
            reported: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn load_manifest(&self, settings: &Settings) -> Result<PluginManifest, PluginError> {
        PluginManifest::from_path(&settings.resolve_manifest_path(&self.state_root))
    }

    pub fn lookup(
        &self,
        kind: PluginKind,
        tool: &str,
        settings: &Settings,
    ) -> Result<ManifestEntry, PluginError> {
        self.load_manifest(settings)?
            .lookup(kind, tool)
            .cloned()
            .ok_or_else(|| PluginError::UnknownTool {
                kind: kind.as_str(),
                tool: tool.to_string(),
            })
    }

    pub fn resolve_stager(
        &mut self,
        tool: &str,
        settings: &Settings,
    ) -> Result<Box<dyn ResourceStager>, PluginError> {
        let result = self
            .lookup(PluginKind::Stager, tool, settings)
            .and_then(|entry| {
                self.registry
                    .build_stager(&entry.class, &setup_for(settings, &entry))
            });
        self.report(PluginKind::Stager, tool, result)
    }

    pub fn resolve_executor(
        &mut self,
        tool: &str,
        settings: &Settings,
    ) -> Result<Box<dyn ToolExecutor>, PluginError> {
        let result = self
            .lookup(PluginKind::Executor, tool, settings)
            .and_then(|entry| {
                self.registry
                    .build_executor(&entry.class, &setup_for(settings, &entry))
            });
        self.report(PluginKind::Executor, tool, result)
    }

    /// Whether a failure for this tool and kind has been logged already.
    pub fn has_reported(&self, kind: PluginKind, tool: &str) -> bool {
        self.reported.contains(&report_key(kind, tool))
    }

    fn report<T>(
        &mut self,
        kind: PluginKind,
        tool: &str,
        result: Result<T, PluginError>,
    ) -> Result<T, PluginError> {
        if let Err(err) = &result {
            if self.reported.insert(report_key(kind, tool)) {
                tracing::error!(tool, kind = kind.as_str(), "plugin resolution failed: {err}");
            } else {
                tracing::warn!(tool, kind = kind.as_str(), "plugin resolution failed again: {err}");
            }
        }
        result
    }
}

fn report_key(kind: PluginKind, tool: &str) -> String {
    format!("{}:{}", kind.as_str(), tool.trim().to_ascii_lowercase())
}

fn setup_for(settings: &Settings, entry: &ManifestEntry) -> PluginSetup {
    PluginSetup {
        manager_name: settings.manager_name().to_string(),
        dirs: TaskDirectories::from_settings(settings),
        settings: settings.clone(),
        module: entry.module.clone(),
    }
}
