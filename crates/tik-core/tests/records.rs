mod common;

use std::fs::{self, OpenOptions};
use std::sync::Arc;

use fs4::FileExt;
use tik_core::{RecordError, Work};

#[test]
fn held_lock_reports_busy_and_leaves_record_untouched() {
    let (_temp, mut session, _root) = common::project_session("tik-busy", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let task = project
        .create_task(soldier, "superman", Some(common::labels(&["Model"]).as_slice()), None)
        .expect("task")
        .done()
        .expect("created");
    let mut work = task
        .category("Model")
        .expect("model")
        .create_work("test", None, "", false)
        .expect("work")
        .done()
        .expect("created");
    let record = work.record_file().to_path_buf();
    let before = fs::read(&record).expect("read");

    let mut lock_name = record.clone().into_os_string();
    lock_name.push(".lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_name)
        .expect("open lock");
    lock_file.lock_exclusive().expect("lock record");

    let err = work.new_version(None, "", false).expect_err("busy");
    let busy = err.downcast_ref::<RecordError>().expect("record error");
    assert!(matches!(busy, RecordError::Busy { .. }));
    assert!(busy.is_transient());
    assert_eq!(fs::read(&record).expect("read"), before);

    let err = Work::load(Arc::clone(session.guard()), &record).expect_err("busy load");
    assert!(matches!(
        err.downcast_ref::<RecordError>(),
        Some(RecordError::Busy { .. })
    ));

    FileExt::unlock(&lock_file).expect("unlock");
    let reloaded = Work::load(Arc::clone(session.guard()), &record).expect("load");
    assert_eq!(reloaded.version_count().expect("count"), 1);
}

#[test]
fn garbage_records_are_reported_as_corrupt() {
    let (_temp, mut session, root) = common::project_session("tik-corrupt", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let task = project
        .create_task(soldier, "superman", None, None)
        .expect("task")
        .done()
        .expect("created");
    fs::write(task.record_file(), b"{ not json").expect("corrupt");

    let err = project.find_task(soldier, "superman").expect_err("corrupt");
    let corrupt = err.downcast_ref::<RecordError>().expect("record error");
    assert!(matches!(corrupt, RecordError::Corrupt { .. }));
    assert!(!corrupt.is_transient());
    // The damaged record is left for a human to inspect.
    assert!(root
        .join(tik_core::DATABASE_DIR)
        .join("Assets/Characters/Soldier/superman.task")
        .exists());
}
