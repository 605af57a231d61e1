use serde::{Deserialize, Serialize};
pub use tik_domain::Severity;

/// Why a business rule turned an operation down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalKind {
    NotAuthorized,
    NotAuthenticated,
    Duplicate,
    NotFound,
    InvalidName,
    WrongLength,
    ForeignLabel,
    DccVersionMismatch,
    Protected,
    WrongPassword,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refusal {
    pub kind: RefusalKind,
    pub severity: Severity,
    pub message: String,
}

impl Refusal {
    pub fn warning(kind: RefusalKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(kind: RefusalKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of an operation that may be refused by a business rule.
///
/// Refusals are expected control flow: the system stays usable and the
/// caller branches on them. I/O trouble and programmer errors travel through
/// `anyhow::Result` instead.
#[must_use]
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Refused(Refusal),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused(_))
    }

    pub fn refusal(&self) -> Option<&Refusal> {
        match self {
            Self::Refused(refusal) => Some(refusal),
            Self::Done(_) => None,
        }
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Refused(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Done(value) => Outcome::Done(f(value)),
            Self::Refused(refusal) => Outcome::Refused(refusal),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Self::Done(value) => f(value),
            Self::Refused(refusal) => Outcome::Refused(refusal),
        }
    }
}

/// Early-return the refusal of an `Outcome`, yielding the value otherwise.
///
/// Used inside functions returning `anyhow::Result<Outcome<_>>`.
#[macro_export]
macro_rules! proceed {
    ($outcome:expr) => {
        match $outcome {
            $crate::outcome::Outcome::Done(value) => value,
            $crate::outcome::Outcome::Refused(refusal) => {
                return Ok($crate::outcome::Outcome::Refused(refusal));
            }
        }
    };
}

/// Misuse of the API that no retry can fix.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("file format '{format}' is not supported by {dcc} (expected one of {supported:?})")]
    UnsupportedFormat {
        format: String,
        dcc: String,
        supported: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halve(value: u32) -> anyhow::Result<Outcome<u32>> {
        let even = proceed!(if value % 2 == 0 {
            Outcome::Done(value)
        } else {
            Outcome::Refused(Refusal::warning(RefusalKind::InvalidName, "odd"))
        });
        Ok(Outcome::Done(even / 2))
    }

    #[test]
    fn proceed_forwards_refusals() {
        assert_eq!(halve(8).expect("halve").done(), Some(4));
        let refused = halve(3).expect("halve");
        assert_eq!(refused.refusal().map(|r| r.kind), Some(RefusalKind::InvalidName));
    }

    #[test]
    fn refusals_serialize_for_ui_layers() {
        let refusal = Refusal::error(RefusalKind::WrongLength, "wrong length");
        let json = serde_json::to_value(&refusal).expect("serialize");
        assert_eq!(json["kind"], "wrong_length");
        assert_eq!(json["severity"], "error");
    }
}
