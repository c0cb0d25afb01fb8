use std::fs;
use stepagent::config::Settings;
use stepagent::preflight::{
    validate, validate_before_claim, DiskPolicy, DiskRole, FixedFreeSpace,
};
use stepagent::task::{Task, SECTION_STEP};
use tempfile::tempdir;

#[test]
fn working_dir_one_megabyte_short_fails_and_names_the_path() {
    let dir = tempdir().expect("tempdir");
    let work = dir.path().join("work");
    fs::create_dir_all(&work).expect("work dir");
    let settings = Settings::for_manager("pub-1", &work);
    let probe = FixedFreeSpace::new(100_000).with_path(&work, 749);

    let failure = validate_before_claim(&settings, &probe).expect_err("749 < 750");
    assert_eq!(failure.role, DiskRole::WorkingDirectory);
    assert_eq!(failure.path, work);
    assert!(failure.message.contains(&work.display().to_string()));
    assert_eq!(failure.policy(), DiskPolicy::DisableLocally);

    let probe = FixedFreeSpace::new(100_000).with_path(&work, 750);
    validate_before_claim(&settings, &probe).expect("750 is enough");
}

#[test]
fn transfer_dir_at_exact_minimum_passes_and_below_pauses() {
    let dir = tempdir().expect("tempdir");
    let transfer = dir.path().join("transfer");
    fs::create_dir_all(&transfer).expect("transfer dir");
    let mut settings = Settings::for_manager("pub-1", dir.path().join("work"));
    settings.manager.transfer_dir = Some(transfer.clone());

    let probe = FixedFreeSpace::new(100_000).with_path(&transfer, 10_241);
    validate_before_claim(&settings, &probe).expect("10241 >= 10240");

    let probe = FixedFreeSpace::new(100_000).with_path(&transfer, 10_239);
    let failure = validate_before_claim(&settings, &probe).expect_err("too small");
    assert_eq!(failure.role, DiskRole::TransferDirectory);
    assert_eq!(failure.policy(), DiskPolicy::PauseTemporarily);
}

#[test]
fn missing_directory_is_measured_at_nearest_existing_ancestor() {
    let dir = tempdir().expect("tempdir");
    let settings = Settings::for_manager("pub-1", dir.path().join("not/yet/created"));
    let probe = FixedFreeSpace::new(100_000).with_path(dir.path(), 10);

    let failure = validate_before_claim(&settings, &probe).expect_err("ancestor is full");
    assert_eq!(failure.role, DiskRole::WorkingDirectory);
}

#[test]
fn results_transfer_only_checks_dataset_storage() {
    let dir = tempdir().expect("tempdir");
    let work = dir.path().join("work");
    let storage = dir.path().join("storage");
    fs::create_dir_all(&work).expect("work dir");
    fs::create_dir_all(&storage).expect("storage dir");
    let mut settings = Settings::for_manager("pub-1", &work);
    settings.manager.dataset_storage_dir = Some(storage.clone());

    let probe = FixedFreeSpace::new(100_000).with_path(&work, 1);
    let task = Task::new(5, 4, "Results_Transfer", "QC_Shew_01");
    validate(&settings, &task, &probe).expect("working dir is not checked");

    let probe = FixedFreeSpace::new(100_000).with_path(&storage, 5);
    let failure = validate(&settings, &task, &probe).expect_err("storage full");
    assert_eq!(failure.role, DiskRole::DatasetStorage);
}

#[test]
fn reference_db_dir_checked_only_when_step_requires_it() {
    let dir = tempdir().expect("tempdir");
    let org_db = dir.path().join("org_db");
    fs::create_dir_all(&org_db).expect("org db dir");
    let mut settings = Settings::for_manager("pub-1", dir.path().join("work"));
    settings.manager.org_db_dir = Some(org_db.clone());
    let probe = FixedFreeSpace::new(100_000).with_path(&org_db, 2_047);

    let mut task = Task::new(5, 2, "MSGFPlus", "QC_Shew_01");
    validate(&settings, &task, &probe).expect("org db not required");

    task.params.set(SECTION_STEP, "OrgDbRequired", "true");
    let failure = validate(&settings, &task, &probe).expect_err("2047 < 2048");
    assert_eq!(failure.role, DiskRole::ReferenceDatabase);
}
