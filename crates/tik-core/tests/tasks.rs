mod common;

use tik_core::{Outcome, RefusalKind, DATABASE_DIR, PURGATORY_DIR};
use tik_domain::{ADMIN_USER, DEFAULT_PASSWORD};

#[test]
fn category_order_only_accepts_permutations() {
    let (_temp, mut session, _root) = common::project_session("tik-order", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let labels = common::labels(&["Model", "Rig", "LookDev"]);
    let mut task = project
        .create_task(soldier, "superman", Some(labels.as_slice()), None)
        .expect("task")
        .done()
        .expect("created");

    let short = task
        .order_categories(&common::labels(&["Rig", "Model"]))
        .expect("order");
    assert_eq!(short.refusal().map(|r| r.kind), Some(RefusalKind::WrongLength));

    let foreign = task
        .order_categories(&common::labels(&["Rig", "Model", "Layout"]))
        .expect("order");
    assert_eq!(foreign.refusal().map(|r| r.kind), Some(RefusalKind::ForeignLabel));

    let repeated = task
        .order_categories(&common::labels(&["Rig", "Rig", "Model"]))
        .expect("order");
    assert_eq!(repeated.refusal().map(|r| r.kind), Some(RefusalKind::ForeignLabel));
    assert_eq!(task.category_labels(), labels);

    let reordered = common::labels(&["LookDev", "Model", "Rig"]);
    assert!(task.order_categories(&reordered).expect("order").is_done());
    let reloaded = project
        .find_task(soldier, "superman")
        .expect("find")
        .expect("task");
    assert_eq!(reloaded.category_labels(), reordered);
}

#[test]
fn categories_must_be_defined_and_unique() {
    let (_temp, mut session, _root) = common::project_session("tik-add-category", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let mut task = project
        .create_task(soldier, "superman", Some(common::labels(&["Model"]).as_slice()), None)
        .expect("task")
        .done()
        .expect("created");

    let unknown = task.add_category("Sculpt").expect("add");
    assert_eq!(unknown.refusal().map(|r| r.kind), Some(RefusalKind::NotFound));
    let duplicate = task.add_category("Model").expect("add");
    assert_eq!(duplicate.refusal().map(|r| r.kind), Some(RefusalKind::Duplicate));

    let rig = task.add_category("Rig").expect("add").done().expect("rig");
    assert_eq!(rig.path(), "Assets/Characters/Soldier/superman/Rig");
    assert_eq!(task.category_labels(), common::labels(&["Model", "Rig"]));
}

#[test]
fn tasks_can_be_renamed_only_while_empty() {
    let (_temp, mut session, root) = common::project_session("tik-task-rename", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let mut task = project
        .create_task(soldier, "superman", Some(common::labels(&["Model"]).as_slice()), None)
        .expect("task")
        .done()
        .expect("created");
    let id = task.id();

    task.edit(Some("batman"), Some("hero"), None)
        .expect("edit")
        .done()
        .expect("renamed");
    assert!(project.find_task(soldier, "superman").expect("find").is_none());
    let renamed = project
        .find_task(soldier, "batman")
        .expect("find")
        .expect("task");
    assert_eq!(renamed.id(), id);
    assert_eq!(renamed.task_type(), Some("hero"));
    assert_eq!(
        project.find_task_by_id(id).expect("by id").map(|task| task.name().to_string()),
        Some("batman".to_string())
    );

    let model = task.category("Model").expect("model");
    model
        .create_work("test", None, "", false)
        .expect("work")
        .done()
        .expect("created");
    assert!(root
        .join("Assets/Characters/Soldier/batman/Model/test/test_v001.txt")
        .exists());
    let protected = task.edit(Some("robin"), None, None).expect("edit");
    assert_eq!(protected.refusal().map(|r| r.kind), Some(RefusalKind::Protected));
}

#[test]
fn deleting_tasks_depends_on_content() {
    let (_temp, mut session, root) = common::project_session("tik-task-delete", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    project
        .create_task(soldier, "empty", Some(common::labels(&["Model"]).as_slice()), None)
        .expect("task")
        .done()
        .expect("created");
    let busy = project
        .create_task(soldier, "busy", Some(common::labels(&["Model"]).as_slice()), None)
        .expect("task")
        .done()
        .expect("created");
    busy.category("Model")
        .expect("model")
        .create_work("test", None, "", false)
        .expect("work")
        .done()
        .expect("created");

    assert!(matches!(
        project.delete_task(soldier, "empty").expect("delete"),
        Outcome::Done(())
    ));
    let database = root.join(DATABASE_DIR).join("Assets/Characters/Soldier");
    assert!(!database.join("empty.task").exists());
    assert!(!root.join(PURGATORY_DIR).join(DATABASE_DIR).join("Assets/Characters/Soldier/empty.task").exists());

    assert!(project.delete_task(soldier, "busy").expect("delete").is_done());
    assert!(!database.join("busy.task").exists());
    let purgatory = root.join(PURGATORY_DIR);
    assert!(purgatory
        .join(DATABASE_DIR)
        .join("Assets/Characters/Soldier/busy.task")
        .exists());
    assert!(purgatory
        .join("Assets/Characters/Soldier/busy/Model/test/test_v001.txt")
        .exists());

    let missing = project.delete_task(soldier, "busy").expect("delete");
    assert_eq!(missing.refusal().map(|r| r.kind), Some(RefusalKind::NotFound));
}

#[test]
fn subproject_categories_group_tasks_by_label() {
    let (_temp, mut session, _root) = common::project_session("tik-sub-categories", "demo");
    let project = session.project_mut().expect("project");
    let props = tik_core::SubprojectProps {
        categories: Some(common::labels(&["Model", "Rig"])),
        ..tik_core::SubprojectProps::default()
    };
    let assets = project
        .create_sub_project(project.root_id(), "Assets", props)
        .expect("sub")
        .done()
        .expect("assets");
    let prop = project
        .create_task(assets, "chair", None, None)
        .expect("task")
        .done()
        .expect("created");
    assert_eq!(prop.category_labels(), common::labels(&["Model", "Rig"]));
    project
        .create_task(assets, "lamp", Some(common::labels(&["Model"]).as_slice()), None)
        .expect("task")
        .done()
        .expect("created");

    let grouped = project.subproject_categories(assets).expect("categories");
    let counts: Vec<(&str, usize)> = grouped
        .iter()
        .map(|group| (group.label.as_str(), group.tasks.len()))
        .collect();
    assert_eq!(counts, vec![("Model", 2), ("Rig", 1)]);
}

#[test]
fn refused_edits_leave_the_task_untouched() {
    let (_temp, mut session, root) = common::project_session("tik-edit-atomic", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let labels = common::labels(&["Model", "Rig", "LookDev"]);
    let mut task = project
        .create_task(soldier, "superman", Some(labels.as_slice()), Some("asset"))
        .expect("task")
        .done()
        .expect("created");
    task.category("Rig")
        .expect("rig")
        .create_work("skeleton", None, "", false)
        .expect("work")
        .done()
        .expect("created");
    session
        .create_new_user("Lead", "ld", "pw", 2, Some(DEFAULT_PASSWORD), None)
        .expect("user")
        .done()
        .expect("created");
    session
        .set("Lead", Some("pw"), false, false)
        .expect("set")
        .done()
        .expect("lead");

    // LookDev is empty, Rig is not: a supervisor may drop neither at once.
    let keep = common::labels(&["Model"]);
    let refused = task
        .edit(None, Some("shot"), Some(keep.as_slice()))
        .expect("edit");
    assert_eq!(refused.refusal().map(|r| r.kind), Some(RefusalKind::NotAuthorized));
    let project = session.project().expect("project");
    let on_disk = project
        .find_task(soldier, "superman")
        .expect("find")
        .expect("task");
    assert_eq!(on_disk.category_labels(), labels);
    assert_eq!(on_disk.task_type(), Some("asset"));
    let skeleton = root.join("Assets/Characters/Soldier/superman/Rig/skeleton/skeleton_v001.txt");
    assert!(skeleton.exists());

    session
        .set(ADMIN_USER, Some(DEFAULT_PASSWORD), false, false)
        .expect("set")
        .done()
        .expect("admin");
    let mut task = on_disk;
    task.edit(None, Some("shot"), Some(keep.as_slice()))
        .expect("edit")
        .done()
        .expect("edited");
    assert_eq!(task.category_labels(), keep);
    assert_eq!(task.task_type(), Some("shot"));
    assert!(!skeleton.exists());
    assert!(root
        .join(PURGATORY_DIR)
        .join("Assets/Characters/Soldier/superman/Rig/skeleton/skeleton_v001.txt")
        .exists());
}
