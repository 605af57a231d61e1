#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tik_core::{Config, Outcome, Session, StandaloneDcc, SubprojectProps};
use tik_domain::{ADMIN_USER, DEFAULT_PASSWORD};

pub fn config(temp: &Path) -> Config {
    Config::at(temp.join("user"), temp.join("commons")).with_lock_timeout(Duration::from_millis(200))
}

/// A session logged in as the authenticated Admin.
pub fn admin_session(prefix: &str) -> (TempDir, Session) {
    admin_session_with(prefix, Arc::new(StandaloneDcc::new()))
}

pub fn admin_session_with(prefix: &str, dcc: Arc<StandaloneDcc>) -> (TempDir, Session) {
    let temp = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("tempdir");
    let mut session = Session::with_dcc(&config(temp.path()), dcc).expect("session");
    session
        .set(ADMIN_USER, Some(DEFAULT_PASSWORD), false, false)
        .expect("set user")
        .done()
        .expect("admin login");
    (temp, session)
}

/// Admin session with a fresh empty project named `name`.
pub fn project_session(prefix: &str, name: &str) -> (TempDir, Session, PathBuf) {
    project_session_with(prefix, name, Arc::new(StandaloneDcc::new()))
}

pub fn project_session_with(
    prefix: &str,
    name: &str,
    dcc: Arc<StandaloneDcc>,
) -> (TempDir, Session, PathBuf) {
    let (temp, mut session) = admin_session_with(prefix, dcc);
    let root = temp.path().join("projects").join(name);
    session
        .create_project(&root, None, true)
        .expect("create project")
        .done()
        .expect("project created");
    (temp, session, root)
}

/// Creates `Assets/Characters/<leaf>` and returns the leaf id.
pub fn character_sub(session: &mut Session, leaf: &str) -> u32 {
    let project = session.project_mut().expect("project");
    let root = project.root_id();
    let assets = ensure_sub(project, root, "Assets");
    let characters = ensure_sub(project, assets, "Characters");
    ensure_sub(project, characters, leaf)
}

fn ensure_sub(project: &mut tik_core::Project, parent: u32, name: &str) -> u32 {
    if let Some(existing) = project
        .find_sub_by_id(parent)
        .and_then(|sub| sub.child(name))
    {
        return existing;
    }
    match project
        .create_sub_project(parent, name, SubprojectProps::default())
        .expect("create sub")
    {
        Outcome::Done(id) => id,
        Outcome::Refused(refusal) => panic!("sub {name} refused: {refusal}"),
    }
}

pub fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}
