//! Closed variable-interpolation expression evaluator.
//!
//! Templates are evaluated against the three-map environment `{inputs,
//! secrets, outputs}`. No assignment, I/O, or unbounded iteration is
//! permitted: this restricts `handlebars` to plain `{{ variable }}` lookups,
//! rejecting block helpers (`{{#...}}`) and partials (`{{> ...}}`) outright
//! rather than trying to sandbox them.

use handlebars::Handlebars;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Errors from evaluating a variable template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    /// The template used a block helper or partial, which this evaluator
    /// does not permit.
    DisallowedConstruct { template: String },
    /// The underlying render failed (malformed `{{ }}` syntax, etc).
    RenderFailed { reason: String },
}

impl fmt::Display for InterpolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisallowedConstruct { template } => {
                write!(f, "template uses a disallowed construct: {template}")
            }
            Self::RenderFailed { reason } => write!(f, "template render failed: {reason}"),
        }
    }
}

impl std::error::Error for InterpolationError {}

/// The three-map environment variable templates evaluate against.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub inputs: HashMap<String, JsonValue>,
    pub secrets: HashMap<String, JsonValue>,
    pub outputs: HashMap<String, JsonValue>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn to_render_context(&self) -> JsonValue {
        serde_json::json!({
            "inputs": self.inputs,
            "secrets": self.secrets,
            "outputs": self.outputs,
        })
    }
}

fn reject_block_constructs(template: &str) -> Result<(), InterpolationError> {
    if template.contains("{{#") || template.contains("{{>") || template.contains("{{!") {
        return Err(InterpolationError::DisallowedConstruct {
            template: template.to_string(),
        });
    }
    Ok(())
}

/// Evaluates `template` against `env`.
///
/// Non-template strings (no `{{ }}` placeholders) pass through unchanged.
/// A placeholder resolving to `null` or to a missing key renders as the
/// empty string; handlebars' non-strict mode already gives this behavior.
///
/// # Errors
///
/// Returns `InterpolationError::DisallowedConstruct` if the template
/// contains a block helper, partial, or comment construct, and
/// `InterpolationError::RenderFailed` if the template is otherwise
/// malformed.
pub fn evaluate(template: &str, env: &Environment) -> Result<String, InterpolationError> {
    reject_block_constructs(template)?;

    let mut registry = Handlebars::new();
    registry.set_strict_mode(false);

    registry
        .render_template(template, &env.to_render_context())
        .map_err(|e| InterpolationError::RenderFailed {
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(inputs: &[(&str, JsonValue)], outputs: &[(&str, JsonValue)]) -> Environment {
        let mut env = Environment::new();
        for (k, v) in inputs {
            env.inputs.insert((*k).to_string(), v.clone());
        }
        for (k, v) in outputs {
            env.outputs.insert((*k).to_string(), v.clone());
        }
        env
    }

    #[test]
    fn non_template_string_passes_through_unchanged() {
        let env = Environment::new();
        assert_eq!(evaluate("plain text", &env).unwrap(), "plain text");
    }

    #[test]
    fn interpolates_input_value() {
        let env = env_with(&[("host", JsonValue::String("db-1".into()))], &[]);
        assert_eq!(evaluate("target: {{inputs.host}}", &env).unwrap(), "target: db-1");
    }

    #[test]
    fn interpolates_prior_output_value() {
        let env = env_with(&[], &[("build_id", JsonValue::String("abc123".into()))]);
        assert_eq!(
            evaluate("artifact-{{outputs.build_id}}.tar", &env).unwrap(),
            "artifact-abc123.tar"
        );
    }

    #[test]
    fn missing_lookup_resolves_to_empty_string() {
        let env = Environment::new();
        assert_eq!(evaluate("[{{inputs.missing}}]", &env).unwrap(), "[]");
    }

    #[test]
    fn null_value_resolves_to_empty_string() {
        let env = env_with(&[("maybe", JsonValue::Null)], &[]);
        assert_eq!(evaluate("[{{inputs.maybe}}]", &env).unwrap(), "[]");
    }

    #[test]
    fn block_helper_is_rejected() {
        let env = Environment::new();
        let err = evaluate("{{#each outputs}}{{this}}{{/each}}", &env).unwrap_err();
        assert!(matches!(err, InterpolationError::DisallowedConstruct { .. }));
    }

    #[test]
    fn partial_is_rejected() {
        let env = Environment::new();
        let err = evaluate("{{> some_partial}}", &env).unwrap_err();
        assert!(matches!(err, InterpolationError::DisallowedConstruct { .. }));
    }
}
