use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Job-wide parameters shared by every step of a job.
pub const SECTION_JOB: &str = "JobParameters";
/// Parameters specific to the claimed step.
pub const SECTION_STEP: &str = "StepParameters";

/// Section-partitioned key/value parameters carried by a [`crate::task::Task`].
///
/// Section and key lookups ignore ASCII case. Writes to an existing key keep the
/// spelling of the first write. Plugins that need scratch values add their own section
/// named after the step tool rather than writing into the job or step sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamStore {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ParamStore {
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let values = self.section(section)?;
        values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get_str(section, key)?.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Option<u64> {
        self.get_str(section, key)?.parse().ok()
    }

    /// Looks in the step section first, then the job section.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.get_str(SECTION_STEP, key)
            .or_else(|| self.get_str(SECTION_JOB, key))
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let section_key = self
            .sections
            .keys()
            .find(|name| name.eq_ignore_ascii_case(section))
            .cloned()
            .unwrap_or_else(|| section.to_string());
        let values = self.sections.entry(section_key).or_default();
        let key_name = values
            .keys()
            .find(|name| name.eq_ignore_ascii_case(key))
            .cloned()
            .unwrap_or_else(|| key.to_string());
        values.insert(key_name, value.into());
    }

    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        let values = self
            .sections
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(section))
            .map(|(_, values)| values)?;
        let key_name = values
            .keys()
            .find(|name| name.eq_ignore_ascii_case(key))
            .cloned()?;
        values.remove(&key_name)
    }

    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.sections
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(section))
            .map(|(_, values)| values)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }
}
