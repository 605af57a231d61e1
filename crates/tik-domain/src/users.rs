use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::states::PermissionLevel;

pub const ADMIN_USER: &str = "Admin";
pub const GENERIC_USER: &str = "Generic";
pub const DEFAULT_PASSWORD: &str = "1234";

/// One account as stored in the commons `users.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub initials: String,
    #[serde(rename = "pass")]
    pub password_hash: String,
    #[serde(rename = "permissionLevel", default)]
    pub permission_level: u8,
    #[serde(default)]
    pub email: String,
}

impl UserEntry {
    #[must_use]
    pub fn new(initials: &str, password: &str, permission_level: u8, email: &str) -> Self {
        Self {
            initials: initials.to_string(),
            password_hash: hash_password(password),
            permission_level,
            email: email.to_string(),
        }
    }

    #[must_use]
    pub fn check_password(&self, password: &str) -> bool {
        self.password_hash == hash_password(password)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Users(IndexMap<String, UserEntry>);

impl Users {
    #[must_use]
    pub fn defaults() -> Self {
        let mut map = IndexMap::new();
        map.insert(
            ADMIN_USER.to_string(),
            UserEntry::new("adm", DEFAULT_PASSWORD, PermissionLevel::ADMIN, ""),
        );
        map.insert(
            GENERIC_USER.to_string(),
            UserEntry::new("gen", DEFAULT_PASSWORD, PermissionLevel::VIEWER, ""),
        );
        Self(map)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UserEntry> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut UserEntry> {
        self.0.get_mut(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: UserEntry) {
        self.0.insert(name.into(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<UserEntry> {
        self.0.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Built-in accounts survive every delete request.
#[must_use]
pub fn is_protected_user(name: &str) -> bool {
    name == ADMIN_USER || name == GENERIC_USER
}

#[must_use]
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_accounts_use_the_shared_password() {
        let users = Users::defaults();
        let admin = users.get(ADMIN_USER).expect("admin");
        assert_eq!(admin.permission_level, PermissionLevel::ADMIN);
        assert!(admin.check_password(DEFAULT_PASSWORD));
        assert!(!admin.check_password("nope"));
        assert_eq!(users.names().collect::<Vec<_>>(), vec!["Admin", "Generic"]);
    }

    #[test]
    fn entries_keep_the_commons_key_names() {
        let entry = UserEntry::new("tu", "pw", 2, "t@example.com");
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["permissionLevel"], 2);
        assert_eq!(json["pass"], hash_password("pw"));
        assert!(is_protected_user("Generic"));
        assert!(!is_protected_user("generic"));
    }
}
