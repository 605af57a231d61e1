use serde::{Deserialize, Serialize};

/// Permission levels stored with each user.
///
/// 0 can only browse, 1 can create works and publish, 2 can edit the
/// structure, 3 is an administrator.
pub struct PermissionLevel;

impl PermissionLevel {
    pub const VIEWER: u8 = 0;
    pub const ARTIST: u8 = 1;
    pub const SUPERVISOR: u8 = 2;
    pub const ADMIN: u8 = 3;

    #[must_use]
    pub fn clamp(level: i64) -> u8 {
        u8::try_from(level.clamp(0, i64::from(Self::ADMIN))).unwrap_or(Self::VIEWER)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkState {
    #[default]
    Working,
    Published,
    Omitted,
}

impl WorkState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Published => "published",
            Self::Omitted => "omitted",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    #[default]
    Idle,
    Passed,
    Failed,
    Ignored,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    #[default]
    Idle,
    Extracted,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_permission_levels() {
        assert_eq!(PermissionLevel::clamp(-4), 0);
        assert_eq!(PermissionLevel::clamp(2), 2);
        assert_eq!(PermissionLevel::clamp(99), 3);
    }

    #[test]
    fn states_serialize_lowercase() {
        let json = serde_json::to_string(&ValidationState::Ignored).expect("serialize");
        assert_eq!(json, "\"ignored\"");
        let state: WorkState = serde_json::from_str("\"omitted\"").expect("deserialize");
        assert_eq!(state, WorkState::Omitted);
    }
}
