/// Events a plugin raises while it works.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginEvent {
    Debug(String),
    Status(String),
    Warning(String),
    Error(String),
    Progress { percent: f32, detail: String },
}

pub trait EventSink {
    fn emit(&mut self, event: PluginEvent);

    fn debug(&mut self, message: &str) {
        self.emit(PluginEvent::Debug(message.to_string()));
    }

    fn status(&mut self, message: &str) {
        self.emit(PluginEvent::Status(message.to_string()));
    }

    fn warning(&mut self, message: &str) {
        self.emit(PluginEvent::Warning(message.to_string()));
    }

    fn error(&mut self, message: &str) {
        self.emit(PluginEvent::Error(message.to_string()));
    }

    fn progress(&mut self, percent: f32, detail: &str) {
        self.emit(PluginEvent::Progress {
            percent,
            detail: detail.to_string(),
        });
    }
}

/// Collects events in memory.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    pub events: Vec<PluginEvent>,
}

impl EventLog {
    pub fn warnings(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PluginEvent::Warning(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PluginEvent::Error(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: PluginEvent) {
        self.events.push(event);
    }
}
