pub mod disk_space;
pub mod workdir;

pub use disk_space::{
    check_requirement, nearest_existing_ancestor, DiskPolicy, DiskRequirement, DiskRole,
    FixedFreeSpace, FreeSpaceProbe, PreflightFailure, StatvfsProbe,
};
pub use workdir::{ensure_working_dir_empty, WorkDirCheck, WorkDirError};

use crate::config::Settings;
use crate::task::Task;

/// Directories that must have room before any step is claimed: the working directory,
/// then the transfer directory or, without one, the cache directory.
pub fn requirements_before_claim(settings: &Settings) -> Vec<DiskRequirement> {
    let mut requirements = vec![DiskRequirement {
        role: DiskRole::WorkingDirectory,
        path: settings.manager.working_dir.clone(),
        min_free_mb: settings.disk.working_dir_min_free_mb,
    }];
    if let Some(transfer) = &settings.manager.transfer_dir {
        requirements.push(DiskRequirement {
            role: DiskRole::TransferDirectory,
            path: transfer.clone(),
            min_free_mb: settings.disk.transfer_dir_min_free_mb,
        });
    } else if let Some(cache) = &settings.manager.cache_dir {
        requirements.push(DiskRequirement {
            role: DiskRole::CacheDirectory,
            path: cache.clone(),
            min_free_mb: settings.disk.cache_dir_min_free_mb,
        });
    }
    requirements
}

/// Directories only some steps touch: dataset storage for results transfer, the
/// reference database directory for steps that need one.
pub fn requirements_for_task(settings: &Settings, task: &Task) -> Vec<DiskRequirement> {
    if task.is_results_transfer() {
        return settings
            .manager
            .dataset_storage_dir
            .iter()
            .map(|path| DiskRequirement {
                role: DiskRole::DatasetStorage,
                path: path.clone(),
                min_free_mb: settings.disk.dataset_dir_min_free_mb,
            })
            .collect();
    }
    match (&settings.manager.org_db_dir, task.requires_org_db()) {
        (Some(path), true) => vec![DiskRequirement {
            role: DiskRole::ReferenceDatabase,
            path: path.clone(),
            min_free_mb: settings.disk.org_db_min_free_mb,
        }],
        _ => Vec::new(),
    }
}

fn check_all(
    probe: &dyn FreeSpaceProbe,
    requirements: &[DiskRequirement],
) -> Result<(), PreflightFailure> {
    for requirement in requirements {
        let free_mb = check_requirement(probe, requirement)?;
        tracing::debug!(
            role = requirement.role.as_str(),
            path = %requirement.path.display(),
            free_mb,
            "disk space ok"
        );
    }
    Ok(())
}

pub fn validate_before_claim(
    settings: &Settings,
    probe: &dyn FreeSpaceProbe,
) -> Result<(), PreflightFailure> {
    check_all(probe, &requirements_before_claim(settings))
}

pub fn validate_for_task(
    settings: &Settings,
    task: &Task,
    probe: &dyn FreeSpaceProbe,
) -> Result<(), PreflightFailure> {
    check_all(probe, &requirements_for_task(settings, task))
}

/// Full check for one step. A results-transfer step only needs dataset storage.
pub fn validate(
    settings: &Settings,
    task: &Task,
    probe: &dyn FreeSpaceProbe,
) -> Result<(), PreflightFailure> {
    if !task.is_results_transfer() {
        validate_before_claim(settings, probe)?;
    }
    validate_for_task(settings, task, probe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SECTION_STEP;
    use std::path::PathBuf;

    fn settings() -> Settings {
        let mut settings = Settings::for_manager("pub-1", "/");
        settings.manager.cache_dir = Some(PathBuf::from("/"));
        settings.manager.org_db_dir = Some(PathBuf::from("/"));
        settings.manager.dataset_storage_dir = Some(PathBuf::from("/"));
        settings
    }

    #[test]
    fn cache_dir_is_checked_when_no_transfer_dir() {
        let roles = requirements_before_claim(&settings())
            .into_iter()
            .map(|req| req.role)
            .collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![DiskRole::WorkingDirectory, DiskRole::CacheDirectory]
        );
    }

    #[test]
    fn results_transfer_only_checks_dataset_storage() {
        let task = Task::new(1, 1, "Results_Transfer", "ds");
        let probe = FixedFreeSpace::new(100);
        let err = validate(&settings(), &task, &probe).expect_err("dataset too small");
        assert_eq!(err.role, DiskRole::DatasetStorage);
    }

    #[test]
    fn reference_db_is_only_checked_when_required() {
        let mut task = Task::new(1, 1, "Sync", "ds");
        assert!(requirements_for_task(&settings(), &task).is_empty());
        task.params.set(SECTION_STEP, "OrgDbRequired", "true");
        let requirements = requirements_for_task(&settings(), &task);
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].min_free_mb, 2048);
    }
}
