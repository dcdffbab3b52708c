//! Flow definition types: the declarative, versionless source of truth for
//! what a flow does. Parsed directly from the YAML surface (`serde_yaml`) or
//! constructed in-memory; both paths produce the same `Flow` value.

use crate::error::DefinitionError;
use flowctl_core::{ActionId, FlowId, NamespaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Closed set of input types a `Flow` may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    Number,
    Bool,
    File,
    Select,
    Datetime,
    Password,
    SliceString,
    SliceNumber,
}

/// One input descriptor a flow accepts at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// Matches `^[A-Za-z0-9_]+$`.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub input_type: InputType,
    /// Display label.
    pub label: Option<String>,
    /// Description shown alongside the label.
    pub description: Option<String>,
    /// Free-form validation hint (e.g. a regex), opaque to this crate.
    pub validation: Option<String>,
    /// Whether submission fails without this input.
    #[serde(default)]
    pub required: bool,
    /// Default value serialized as a string.
    pub default: Option<String>,
    /// Maximum upload size in bytes, for `file`-typed inputs.
    pub max_file_size: Option<u64>,
}

impl Input {
    /// Creates a required input with no default or validation.
    #[must_use]
    pub fn new(name: impl Into<String>, input_type: InputType) -> Self {
        Self {
            name: name.into(),
            input_type,
            label: None,
            description: None,
            validation: None,
            required: true,
            default: None,
            max_file_size: None,
        }
    }

    fn validate_name(&self) -> Result<(), DefinitionError> {
        let valid = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(DefinitionError::InvalidInputName {
                name: self.name.clone(),
            })
        }
    }
}

/// Closed set of executor kinds. Execution semantics live behind the
/// `Executor` seam; this crate only routes by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Script,
    Docker,
}

/// A single variable binding: a name paired with a template string that may
/// contain `{{ ... }}` placeholders evaluated against `{inputs, secrets,
/// outputs}` at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name, exposed to the action's executor.
    pub name: String,
    /// Template string; non-template strings pass through unchanged.
    pub template: String,
}

/// One step of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Stable ID, unique within the owning flow. Alphanumeric + underscore.
    pub id: ActionId,
    /// Display name.
    pub name: String,
    /// Executor kind selecting how `with` is interpreted.
    pub executor: ExecutorKind,
    /// Opaque configuration handed to the executor seam unmodified.
    pub with: serde_json::Value,
    /// Whether this action requires an approved `ApprovalRequest` before running.
    #[serde(default)]
    pub approval: bool,
    /// Allow-list for `approval`, in the same `group:<name>`-or-literal
    /// mini-language as `NotifyBinding::receivers`. Ignored when `approval`
    /// is false.
    #[serde(default)]
    pub approvers: Vec<String>,
    /// Variable bindings interpolated before dispatch.
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Target node names. Empty and `[""]` both mean local-only.
    #[serde(default)]
    pub on: Vec<String>,
    /// Declared artifacts this action may push or pull, for documentation;
    /// transfer itself is driven by the artifact directory convention.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl Action {
    /// The target node names this action fans out to, defaulting to one
    /// empty (local) node when none are declared.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        if self.on.is_empty() {
            vec![String::new()]
        } else {
            self.on.clone()
        }
    }
}

/// A cron-triggered schedule attached to a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// 5-field cron expression.
    pub cron: String,
    /// IANA timezone name; defaults to UTC if absent.
    pub timezone: Option<String>,
}

/// A notification binding: which channel, who to notify, and on what events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyBinding {
    /// Messenger channel identifier (e.g. `"slack"`, `"email"`).
    pub channel: String,
    /// Receiver strings in the `group:<name>` or literal mini-language.
    pub receivers: Vec<String>,
    /// Execution statuses that trigger this notification.
    pub events: Vec<String>,
}

/// A complete, declarative flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Stable slug identifier, human-assigned, unique within a namespace.
    pub slug: String,
    /// Numeric database ID; absent for an as-yet-unpersisted definition.
    pub db_id: Option<i64>,
    /// Owning namespace.
    pub namespace_id: NamespaceId,
    /// Human-readable name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Declared inputs, in submission order.
    #[serde(default)]
    pub inputs: Vec<Input>,
    /// Ordered action list; actions run in this declaration order.
    pub actions: Vec<Action>,
    /// Cron schedules.
    #[serde(default)]
    pub scheduling: Vec<Schedule>,
    /// Notification bindings.
    #[serde(default)]
    pub notify: Vec<NotifyBinding>,
    /// Whether a second execution may start while one is already running.
    #[serde(default)]
    pub allow_overlap: bool,
}

impl Flow {
    /// Resolves this flow's identity pair for use as a `FlowId`.
    ///
    /// # Panics
    ///
    /// Panics if `db_id` is unset; only persisted flows have a `FlowId`.
    #[must_use]
    pub fn flow_id(&self) -> FlowId {
        FlowId {
            slug: self.slug.clone(),
            db_id: self.db_id.expect("flow must be persisted to have a FlowId"),
        }
    }

    /// Looks up an action by ID.
    #[must_use]
    pub fn action(&self, id: &ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.id == id)
    }

    /// Index of an action by ID, for `starting_action_idx` resolution.
    #[must_use]
    pub fn action_index(&self, id: &ActionId) -> Option<usize> {
        self.actions.iter().position(|a| &a.id == id)
    }

    /// Validates the invariants from the data model: unique action IDs,
    /// unique input names, well-formed input names.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen_actions = HashSet::new();
        for action in &self.actions {
            if !seen_actions.insert(action.id.clone()) {
                return Err(DefinitionError::DuplicateActionId {
                    action_id: action.id.clone(),
                });
            }
        }

        let mut seen_inputs = HashSet::new();
        for input in &self.inputs {
            input.validate_name()?;
            if !seen_inputs.insert(input.name.clone()) {
                return Err(DefinitionError::DuplicateInputName {
                    name: input.name.clone(),
                });
            }
        }

        Ok(())
    }
}
