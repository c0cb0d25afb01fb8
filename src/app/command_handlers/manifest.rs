use crate::app::command_support::load_agent_settings;
use crate::plugins::{PluginKind, PluginRegistry, PluginResolver};
use crate::runtime::StatePaths;

/// Reports the manifest entries for `tool` and whether their classes are registered.
pub fn cmd_manifest_check(paths: &StatePaths, tool: &str) -> Result<String, String> {
    let settings = load_agent_settings(paths)?;
    let resolver = PluginResolver::new(&paths.root, PluginRegistry::with_builtins());

    let mut lines = vec![format!(
        "manifest={}",
        settings.resolve_manifest_path(&paths.root).display()
    )];
    let mut missing = Vec::new();
    for kind in [PluginKind::Stager, PluginKind::Executor] {
        match resolver.lookup(kind, tool, &settings) {
            Ok(entry) => {
                let registered = match kind {
                    PluginKind::Stager => resolver.registry().has_stager(&entry.class),
                    PluginKind::Executor => resolver.registry().has_executor(&entry.class),
                };
                lines.push(format!(
                    "{}={} module={} registered={registered}",
                    kind.as_str(),
                    entry.class,
                    entry.module
                ));
                if !registered {
                    missing.push(format!(
                        "{} class `{}` is not registered",
                        kind.as_str(),
                        entry.class
                    ));
                }
            }
            Err(err) => missing.push(err.to_string()),
        }
    }
    if missing.is_empty() {
        Ok(lines.join("\n"))
    } else {
        Err(format!("{}\n{}", lines.join("\n"), missing.join("\n")))
    }
}
