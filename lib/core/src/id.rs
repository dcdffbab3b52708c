//! Strongly-typed ID types for domain entities.
//!
//! Internally engine-generated correlation IDs use ULID (ordered, prefixed)
//! the way the rest of this codebase always has. IDs whose wire format is
//! normatively a UUID (namespaces, nodes, executions, approvals) use a
//! parallel UUID-backed wrapper instead of forcing ULID onto a contract
//! that specifies UUID v4.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed ID wrapper around ULID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let prefix_with_underscore = concat!($prefix, "_");
                let ulid_str = if let Some(stripped) = s.strip_prefix(prefix_with_underscore) {
                    stripped
                } else {
                    s
                };

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl From<$name> for Ulid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Macro to generate a strongly-typed ID wrapper around UUID.
///
/// Used for entities whose external contract specifies a UUID rather than
/// a ULID (exec-IDs, namespaces, nodes, approvals).
macro_rules! define_uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new, random (v4) ID.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for a user (approver, trigger actor, credential owner).
    UserId,
    "usr"
);

define_id!(
    /// Unique identifier for a stored credential.
    CredentialId,
    "cred"
);

define_uuid_id!(
    /// Unique identifier for a tenant boundary. Every flow, node, credential,
    /// execution, and membership references exactly one namespace.
    NamespaceId
);

define_uuid_id!(
    /// Unique identifier for a target compute host. An "empty" node (no
    /// name) denotes local execution and is not itself identified by one
    /// of these — see [`crate::NodeRef`].
    NodeId
);

define_uuid_id!(
    /// Unique identifier for one execution (run) of a flow. Generated at
    /// enqueue time; the single correlation key across queue, execution
    /// log, log stream, approvals, and artifacts.
    ExecId
);

define_uuid_id!(
    /// Unique identifier for an approval request gating one (exec, action) pair.
    ApprovalId
);

/// Monotonic identifier for a row in the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Wraps a raw queue row ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw row ID.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stable, author-assigned ID of an action within a flow.
///
/// Unlike the other IDs in this module these are not generated by the
/// engine: they are declared in the flow definition and must match
/// `^[A-Za-z0-9_]+$` and be unique within their flow (validated at parse
/// time by `flowctl_flow::definition`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Wraps a raw action identifier without validation.
    ///
    /// Prefer `flowctl_flow::definition::Flow::validate` to check the
    /// `^[A-Za-z0-9_]+$` invariant before trusting a value constructed this
    /// way from untrusted input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the action ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The stable, author-assigned slug ID of a flow, plus its internal numeric
/// database ID. The slug is what flow YAML and external callers address;
/// the numeric ID is an internal foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId {
    /// Human-chosen stable slug, e.g. `"nightly-backup"`.
    pub slug: String,
    /// Internal numeric database ID.
    pub db_id: i64,
}

impl FlowId {
    /// Creates a flow ID from a slug and its internal numeric ID.
    #[must_use]
    pub fn new(slug: impl Into<String>, db_id: i64) -> Self {
        Self {
            slug: slug.into(),
            db_id,
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_display_format() {
        let id = UserId::new();
        let display = id.to_string();
        assert!(display.starts_with("usr_"));
    }

    #[test]
    fn credential_id_display_format() {
        let id = CredentialId::new();
        assert!(id.to_string().starts_with("cred_"));
    }

    #[test]
    fn parse_with_prefix() {
        let id = UserId::new();
        let display = id.to_string();
        let parsed: UserId = display.parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_without_prefix() {
        let ulid = Ulid::new();
        let id: UserId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn parse_invalid_ulid() {
        let result: Result<UserId, _> = "not_a_ulid".parse();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.id_type, "UserId");
    }

    #[test]
    fn id_equality() {
        let ulid = Ulid::new();
        let id1 = UserId::from_ulid(ulid);
        let id2 = UserId::from_ulid(ulid);
        assert_eq!(id1, id2);
    }

    #[test]
    fn id_hash() {
        use std::collections::HashSet;

        let id1 = UserId::new();
        let id2 = UserId::new();

        let mut set = HashSet::new();
        set.insert(id1);
        set.insert(id2);
        set.insert(id1);

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn id_serde_roundtrip() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        let parsed: UserId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }

    #[test]
    fn uuid_id_display_is_bare_uuid() {
        let id = ExecId::new();
        let display = id.to_string();
        assert_eq!(display, id.as_uuid().to_string());
    }

    #[test]
    fn uuid_id_roundtrip_through_string() {
        let id = NamespaceId::new();
        let parsed: NamespaceId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn uuid_id_serde_roundtrip() {
        let id = ApprovalId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        let parsed: ApprovalId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_display() {
        let id = JobId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_i64(), 42);
    }

    #[test]
    fn action_id_from_str_and_display() {
        let id: ActionId = "deploy_step".into();
        assert_eq!(id.as_str(), "deploy_step");
        assert_eq!(id.to_string(), "deploy_step");
    }

    #[test]
    fn flow_id_display_is_slug() {
        let id = FlowId::new("nightly-backup", 7);
        assert_eq!(id.to_string(), "nightly-backup");
        assert_eq!(id.db_id, 7);
    }
}
