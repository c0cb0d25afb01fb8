pub mod builtin;
pub mod capability;
pub mod events;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod results;

pub use builtin::{ExecutorCommand, StagerCopyInputs, StagerNoResources};
pub use capability::{
    PluginContext, PluginError, PluginSetup, ResourceStager, TaskDirectories, ToolExecutor,
};
pub use events::{EventLog, EventSink, PluginEvent};
pub use manifest::{ManifestEntry, PluginKind, PluginManifest};
pub use registry::{ExecutorConstructor, PluginRegistry, StagerConstructor};
pub use resolver::PluginResolver;
