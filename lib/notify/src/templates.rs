//! Status-dependent subject/body templates.
//!
//! Unlike `flowctl_flow::interpolation`'s closed variable evaluator (which
//! restricts handlebars to plain `{{ variable }}` lookups because its
//! templates come from user-authored action definitions), these templates
//! are fixed at build time, so conditionals (`{{#if error}}`) are fine.

use crate::error::NotifyError;
use handlebars::Handlebars;
use serde_json::json;

const DEFAULT_SUBJECT: &str = "[{{flow_name}}] {{status}}";
const DEFAULT_BODY: &str =
    "Execution {{exec_id}} of \"{{flow_name}}\" is {{status}}.{{#if error}} Error: {{error}}{{/if}}";

const COMPLETED_SUBJECT: &str = "[{{flow_name}}] completed";
const COMPLETED_BODY: &str = "Execution {{exec_id}} of \"{{flow_name}}\" completed successfully.";

const ERRORED_SUBJECT: &str = "[{{flow_name}}] FAILED";
const ERRORED_BODY: &str =
    "Execution {{exec_id}} of \"{{flow_name}}\" failed.{{#if error}}\n\n{{error}}{{/if}}";

const CANCELLED_SUBJECT: &str = "[{{flow_name}}] cancelled";
const CANCELLED_BODY: &str = "Execution {{exec_id}} of \"{{flow_name}}\" was cancelled.";

const PENDING_APPROVAL_SUBJECT: &str = "[{{flow_name}}] awaiting approval";
const PENDING_APPROVAL_BODY: &str =
    "Execution {{exec_id}} of \"{{flow_name}}\" is waiting on an approval gate.";

const KNOWN_STATUSES: &[(&str, &str, &str)] = &[
    ("completed", COMPLETED_SUBJECT, COMPLETED_BODY),
    ("errored", ERRORED_SUBJECT, ERRORED_BODY),
    ("cancelled", CANCELLED_SUBJECT, CANCELLED_BODY),
    ("pending_approval", PENDING_APPROVAL_SUBJECT, PENDING_APPROVAL_BODY),
];

/// The fields a rendered notification template may reference.
pub struct NotificationContext<'a> {
    pub flow_id: &'a str,
    pub flow_name: &'a str,
    pub exec_id: &'a str,
    pub status: &'a str,
    pub error: Option<&'a str>,
}

/// Holds the registered subject/body template pairs, keyed by status, with
/// a `default` fallback for any status without a dedicated template.
pub struct TemplateSet {
    registry: Handlebars<'static>,
}

impl TemplateSet {
    /// Builds the built-in status-dependent template set.
    ///
    /// # Panics
    ///
    /// Panics if a built-in template fails to register; these are fixed,
    /// compile-time strings, so that would indicate a bug in this module.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry
            .register_template_string("default_subject", DEFAULT_SUBJECT)
            .expect("built-in template is valid");
        registry
            .register_template_string("default_body", DEFAULT_BODY)
            .expect("built-in template is valid");
        for (status, subject, body) in KNOWN_STATUSES {
            registry
                .register_template_string(&format!("{status}_subject"), *subject)
                .expect("built-in template is valid");
            registry
                .register_template_string(&format!("{status}_body"), *body)
                .expect("built-in template is valid");
        }
        Self { registry }
    }

    /// Renders the subject and body for `ctx.status`, falling back to the
    /// default template set if no status-specific pair is registered.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Render` if rendering fails.
    pub fn render(&self, ctx: &NotificationContext<'_>) -> Result<(String, String), NotifyError> {
        let subject_key = if self.registry.has_template(&format!("{}_subject", ctx.status)) {
            format!("{}_subject", ctx.status)
        } else {
            "default_subject".to_string()
        };
        let body_key = if self.registry.has_template(&format!("{}_body", ctx.status)) {
            format!("{}_body", ctx.status)
        } else {
            "default_body".to_string()
        };

        let data = json!({
            "flow_id": ctx.flow_id,
            "flow_name": ctx.flow_name,
            "exec_id": ctx.exec_id,
            "status": ctx.status,
            "error": ctx.error,
        });

        let subject = self
            .registry
            .render(&subject_key, &data)
            .map_err(|e| NotifyError::Render { reason: e.to_string() })?;
        let body = self
            .registry
            .render(&body_key, &data)
            .map_err(|e| NotifyError::Render { reason: e.to_string() })?;
        Ok((subject, body))
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_uses_its_dedicated_template() {
        let templates = TemplateSet::new();
        let ctx = NotificationContext {
            flow_id: "deploy",
            flow_name: "Deploy",
            exec_id: "exec-1",
            status: "completed",
            error: None,
        };
        let (subject, body) = templates.render(&ctx).unwrap();
        assert_eq!(subject, "[Deploy] completed");
        assert!(body.contains("completed successfully"));
    }

    #[test]
    fn errored_includes_the_error_message() {
        let templates = TemplateSet::new();
        let ctx = NotificationContext {
            flow_id: "deploy",
            flow_name: "Deploy",
            exec_id: "exec-1",
            status: "errored",
            error: Some("node unreachable"),
        };
        let (subject, body) = templates.render(&ctx).unwrap();
        assert_eq!(subject, "[Deploy] FAILED");
        assert!(body.contains("node unreachable"));
    }

    #[test]
    fn unknown_status_falls_back_to_default() {
        let templates = TemplateSet::new();
        let ctx = NotificationContext {
            flow_id: "deploy",
            flow_name: "Deploy",
            exec_id: "exec-1",
            status: "retrying",
            error: None,
        };
        let (subject, body) = templates.render(&ctx).unwrap();
        assert_eq!(subject, "[Deploy] retrying");
        assert!(body.contains("is retrying"));
    }
}
