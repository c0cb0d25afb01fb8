use crate::app::cli::EnqueueArgs;
use crate::app::command_support::{load_agent_settings, open_queue};
use crate::queue::NewStep;
use crate::runtime::StatePaths;
use crate::shared::time::now_secs;
use crate::task::{ParamStore, SECTION_STEP};

pub fn cmd_enqueue(paths: &StatePaths, args: &EnqueueArgs) -> Result<String, String> {
    let settings = load_agent_settings(paths)?;
    let mut queue = open_queue(paths, &settings)?;
    let mut params = ParamStore::default();
    for raw in &args.params {
        let (section, key, value) = parse_param(raw)?;
        params.set(section, key, value);
    }
    let step = NewStep {
        job: args.job,
        step: args.step,
        tool: args.tool.trim().to_string(),
        dataset: args.dataset.trim().to_string(),
        params,
        priority: args.priority,
    };
    queue
        .enqueue(&step, now_secs())
        .map_err(|e| e.to_string())?;
    Ok(format!(
        "enqueued\njob={}\nstep={}\ntool={}",
        step.job, step.step, step.tool
    ))
}

/// Splits `Section.Key=Value`. Without a section the key goes to StepParameters.
pub fn parse_param(raw: &str) -> Result<(&str, &str, &str), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("parameter `{raw}` must look like Section.Key=Value"))?;
    let (section, key) = match name.split_once('.') {
        Some((section, key)) => (section.trim(), key.trim()),
        None => (SECTION_STEP, name.trim()),
    };
    if section.is_empty() || key.is_empty() {
        return Err(format!("parameter `{raw}` has an empty section or key"));
    }
    Ok((section, key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_to_step_section() {
        assert_eq!(
            parse_param("RunJobRemotely=true").expect("param"),
            (SECTION_STEP, "RunJobRemotely", "true")
        );
        assert_eq!(
            parse_param("JobParameters.DatasetID = 42").expect("param"),
            ("JobParameters", "DatasetID", "42")
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param(".Key=1").is_err());
    }
}
