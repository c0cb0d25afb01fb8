use super::capability::{io_error, PluginContext, PluginError};
use crate::task::Task;
use std::fs;
use std::path::Path;

/// Copies the working directory's result files to `<results root>/<dataset>/`.
/// Files the task marked as skipped and the parameter snapshot stay behind.
pub fn copy_results_to_transfer(
    task: &mut Task,
    ctx: &mut PluginContext<'_>,
) -> Result<usize, PluginError> {
    let Some(root) = ctx.dirs.results_root() else {
        ctx.events.warning(&format!(
            "no transfer or cache directory configured; results of {} were not copied",
            task.job_step_stem()
        ));
        return Ok(0);
    };
    let folder = if task.dataset.trim().is_empty() {
        task.job_step_stem()
    } else {
        task.dataset.clone()
    };
    let target = root.join(folder);
    let param_file = task.parameter_file_name();
    let copied = copy_files(&ctx.dirs.working_dir, &target, &|name| {
        !task.skips_result_file(name) && !name.eq_ignore_ascii_case(&param_file)
    })?;
    ctx.events.status(&format!(
        "copied {copied} result file(s) to {}",
        target.display()
    ));
    Ok(copied)
}

/// Preserves whatever a failed step left behind under `<failed results dir>/<stem>/`.
pub fn archive_failed_results(
    task: &mut Task,
    ctx: &mut PluginContext<'_>,
) -> Result<usize, PluginError> {
    let Some(root) = ctx.dirs.failed_results_dir.as_deref() else {
        return Ok(0);
    };
    let target = root.join(task.job_step_stem());
    let copied = copy_files(&ctx.dirs.working_dir, &target, &|_| true)?;
    ctx.events
        .warning(&format!("archived {copied} file(s) to {}", target.display()));
    Ok(copied)
}

/// Fetches result files from the task's remote work dir into the working directory.
pub fn retrieve_remote_files(
    task: &mut Task,
    ctx: &mut PluginContext<'_>,
    declared: &[String],
) -> Result<Vec<String>, PluginError> {
    let stem = task.job_step_stem();
    let remote = ctx.remote.ok_or_else(|| PluginError::NoRemote { stem: stem.clone() })?;
    let descriptor = task
        .remote
        .clone()
        .ok_or_else(|| PluginError::NoRemote { stem: stem.clone() })?;
    let bookkeeping = descriptor.bookkeeping_file_names();

    let names = if declared.is_empty() {
        remote
            .list_files(&descriptor.work_dir)?
            .into_iter()
            .map(|info| info.name)
            .collect::<Vec<_>>()
    } else {
        declared.to_vec()
    };

    let mut fetched = Vec::new();
    for name in names {
        if bookkeeping.iter().any(|own| own.eq_ignore_ascii_case(&name)) {
            continue;
        }
        let local = ctx.dirs.working_dir.join(&name);
        remote.get_file(&format!("{}/{}", descriptor.work_dir, name), &local)?;
        fetched.push(name);
    }
    for own in bookkeeping {
        task.skip_result_file(own);
    }
    ctx.events.debug(&format!(
        "retrieved {} remote file(s) for {stem}",
        fetched.len()
    ));
    Ok(fetched)
}

fn copy_files(
    source: &Path,
    target: &Path,
    include: &dyn Fn(&str) -> bool,
) -> Result<usize, PluginError> {
    let entries = match fs::read_dir(source) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(io_error(source, err)),
    };
    let mut copied = 0;
    for entry in entries {
        let path = entry.map_err(|e| io_error(source, e))?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !include(name) {
            continue;
        }
        let destination = target.join(name);
        if path.is_dir() {
            copied += copy_files(&path, &destination, &|_| true)?;
            continue;
        }
        fs::create_dir_all(target).map_err(|e| io_error(target, e))?;
        fs::copy(&path, &destination).map_err(|e| io_error(&destination, e))?;
        copied += 1;
    }
    Ok(copied)
}
