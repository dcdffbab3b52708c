//! Error types for the group membership seam.

use std::fmt;

/// Errors from a `GroupMembership` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMembershipError {
    /// The external membership directory could not be reached.
    Unavailable { reason: String },
    /// The group name or user reference was not recognized.
    NotFound { reference: String },
}

impl fmt::Display for GroupMembershipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "group membership directory unavailable: {reason}"),
            Self::NotFound { reference } => write!(f, "group membership reference not found: {reference}"),
        }
    }
}

impl std::error::Error for GroupMembershipError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display() {
        let err = GroupMembershipError::Unavailable {
            reason: "timeout".into(),
        };
        assert!(err.to_string().contains("timeout"));
    }
}
