mod common;

use std::fs::OpenOptions;
use std::sync::Arc;

use fs4::FileExt;
use tik_core::{
    Outcome, Project, RecordError, RefusalKind, SubprojectProps, SubprojectTree, DATABASE_DIR,
};
use tik_domain::{DEFAULT_PASSWORD, GENERIC_USER};

#[test]
fn structure_survives_reopen() {
    let (_temp, mut session, root) = common::project_session("tik-structure", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let props = SubprojectProps {
        fps: Some(30.0),
        mode: Some("shot".into()),
        categories: Some(common::labels(&["Layout", "Animation"])),
        ..SubprojectProps::default()
    };
    let shots = project
        .create_sub_project(project.root_id(), "Shots", props)
        .expect("create")
        .done()
        .expect("shots");

    let exported = project.tree().to_sub_tree();
    let rebuilt = SubprojectTree::from_sub_tree(&exported).expect("rebuild");
    assert_eq!(&rebuilt, project.tree());

    let guard = Arc::clone(project.guard());
    let reopened = Project::open(guard, &root).expect("reopen");
    assert_eq!(reopened.tree(), project.tree());
    let sub = reopened.find_sub_by_id(shots).expect("shots");
    assert!((sub.fps - 30.0).abs() < f64::EPSILON);
    assert_eq!(sub.categories, common::labels(&["Layout", "Animation"]));
    assert_eq!(
        reopened
            .find_sub_by_path("Assets/Characters/Soldier")
            .map(|sub| sub.id),
        Some(soldier)
    );
    assert!(root.join("Assets/Characters/Soldier").is_dir());
    assert!(root.join(DATABASE_DIR).join("Assets/Characters/Soldier").is_dir());
}

#[test]
fn duplicate_names_are_refused_without_side_effects() {
    let (_temp, mut session, root) = common::project_session("tik-dupes", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    let characters = project
        .find_sub_by_path("Assets/Characters")
        .map(|sub| sub.id)
        .expect("characters");
    let before = project.tree().clone();

    let refused = project
        .create_sub_project(characters, "Soldier", SubprojectProps::default())
        .expect("create");
    assert_eq!(refused.refusal().map(|r| r.kind), Some(RefusalKind::Duplicate));
    assert_eq!(project.tree(), &before);
    assert_eq!(
        project.guard().last_message().map(|r| r.kind),
        Some(RefusalKind::Duplicate)
    );

    project
        .create_task(soldier, "superman", None, None)
        .expect("task")
        .done()
        .expect("created");
    let again = project
        .create_task(soldier, "superman", None, None)
        .expect("task");
    assert_eq!(again.refusal().map(|r| r.kind), Some(RefusalKind::Duplicate));
    assert_eq!(project.scan_tasks(soldier).expect("scan").len(), 1);

    let invalid = project
        .create_sub_project(characters, "bad name!", SubprojectProps::default())
        .expect("create");
    assert_eq!(invalid.refusal().map(|r| r.kind), Some(RefusalKind::InvalidName));
    assert!(!root.join("bad name!").exists());
}

#[test]
fn viewers_and_unauthenticated_users_cannot_edit() {
    let (_temp, mut session, _root) = common::project_session("tik-perms", "demo");
    session
        .set(GENERIC_USER, Some(DEFAULT_PASSWORD), false, false)
        .expect("set")
        .done()
        .expect("generic");
    let project = session.project_mut().expect("project");
    let before = project.tree().clone();
    let refused = project
        .create_sub_project(project.root_id(), "Assets", SubprojectProps::default())
        .expect("create");
    assert_eq!(refused.refusal().map(|r| r.kind), Some(RefusalKind::NotAuthorized));
    assert_eq!(project.tree(), &before);

    // Admin by name, but no password and no stored login.
    session
        .set(tik_domain::ADMIN_USER, None, false, true)
        .expect("set")
        .done()
        .expect("admin");
    assert!(!session.is_authenticated());
    let project = session.project_mut().expect("project");
    let refused = project
        .create_sub_project(project.root_id(), "Assets", SubprojectProps::default())
        .expect("create");
    assert_eq!(
        refused.refusal().map(|r| r.kind),
        Some(RefusalKind::NotAuthenticated)
    );
    assert_eq!(project.tree(), &before);
}

#[test]
fn renaming_a_subproject_moves_folders_and_tasks() {
    let (_temp, mut session, root) = common::project_session("tik-rename-sub", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
    let project = session.project_mut().expect("project");
    project
        .create_task(soldier, "superman", Some(common::labels(&["Model"]).as_slice()), None)
        .expect("task")
        .done()
        .expect("created");

    project
        .edit_sub_project(soldier, Some("Trooper"), SubprojectProps::default())
        .expect("edit")
        .done()
        .expect("renamed");

    assert_eq!(
        project.find_sub_by_id(soldier).map(|sub| sub.path.as_str()),
        Some("Assets/Characters/Trooper")
    );
    assert!(root.join("Assets/Characters/Trooper").is_dir());
    assert!(!root.join("Assets/Characters/Soldier").exists());
    let task = project
        .find_task(soldier, "superman")
        .expect("find")
        .expect("task");
    assert_eq!(task.sub_path(), "Assets/Characters/Trooper");
    assert_eq!(task.path(), "Assets/Characters/Trooper/superman");
}

#[test]
fn deleting_subprojects_needs_more_rights_when_populated() {
    let (_temp, mut session, root) = common::project_session("tik-delete-sub", "demo");
    let soldier = common::character_sub(&mut session, "Soldier");
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

    let project = session.project_mut().expect("project");
    let characters = project
        .find_sub_by_path("Assets/Characters")
        .map(|sub| sub.id)
        .expect("characters");
    let refused = project.delete_sub_project(characters).expect("delete");
    assert_eq!(refused.refusal().map(|r| r.kind), Some(RefusalKind::NotAuthorized));
    assert!(project.find_sub_by_id(soldier).is_some());

    assert!(matches!(
        project.delete_sub_project(soldier).expect("delete"),
        Outcome::Done(())
    ));
    assert!(project.find_sub_by_id(soldier).is_none());
    assert!(!root.join("Assets/Characters/Soldier").exists());
    assert!(!root.join(DATABASE_DIR).join("Assets/Characters/Soldier").exists());
}

#[test]
fn wildcard_search_matches_paths() {
    let (_temp, mut session, _root) = common::project_session("tik-wildcard", "demo");
    common::character_sub(&mut session, "Soldier");
    common::character_sub(&mut session, "Sniper");
    let project = session.project().expect("project");
    let mut names: Vec<&str> = project
        .find_subs_by_wildcard("Assets/Characters/S*")
        .into_iter()
        .map(|sub| sub.name.as_str())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Sniper", "Soldier"]);
}

#[test]
fn a_busy_structure_save_can_be_retried() {
    let (_temp, mut session, root) = common::project_session("tik-busy-structure", "demo");
    let project = session.project_mut().expect("project");
    let parent = project.root_id();
    let before = project.tree().clone();

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(root.join(DATABASE_DIR).join("project_structure.json.lock"))
        .expect("open lock");
    lock_file.lock_exclusive().expect("lock structure");
    let err = project
        .create_sub_project(parent, "Assets", SubprojectProps::default())
        .expect_err("busy");
    assert!(matches!(
        err.downcast_ref::<RecordError>(),
        Some(RecordError::Busy { .. })
    ));
    assert_eq!(project.tree(), &before);
    FileExt::unlock(&lock_file).expect("unlock");

    let assets = project
        .create_sub_project(parent, "Assets", SubprojectProps::default())
        .expect("retry")
        .done()
        .expect("assets");
    let reopened = Project::open(Arc::clone(project.guard()), &root).expect("reopen");
    assert_eq!(
        reopened.find_sub_by_path("Assets").map(|sub| sub.id),
        Some(assets)
    );
}
