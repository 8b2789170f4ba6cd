//! Error types for the execution core.
//!
//! Errors are split by where they originate: configuration validation,
//! graph construction, variable resolution, and provider calls. Sibling
//! errors that should all reach the user (validation diagnostics,
//! unknown-value findings) aggregate into [`Error::Multi`] instead of
//! short-circuiting on the first one.

use thiserror::Error;

/// Errors that can occur while planning or applying infrastructure.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration failed structural validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The dependency graph could not be built
    #[error("failed to build dependency graph: {0}")]
    GraphBuild(String),

    /// A variable referenced a resource that does not exist
    #[error("resource '{resource}' not found for variable '{variable}'")]
    UnknownResource {
        /// Id of the resource the variable points at
        resource: String,
        /// Full key of the offending variable
        variable: String,
    },

    /// A variable referenced an attribute the resource does not carry
    #[error("resource '{resource}' has no attribute '{attribute}' for variable '{variable}'")]
    UnknownAttribute {
        /// Id of the resource the variable points at
        resource: String,
        /// The missing attribute
        attribute: String,
        /// Full key of the offending variable
        variable: String,
    },

    /// A provider call failed
    #[error("provider error for '{id}': {source}")]
    Provider {
        /// Resource id (or provider key) the call was made for
        id: String,
        /// Underlying error as reported by the provider
        #[source]
        source: anyhow::Error,
    },

    /// An unknown-value sentinel survived into an apply result
    #[error("Attribute with unknown value: {0}")]
    UnknownValue(String),

    /// The diff recomputed during apply no longer matches the planned diff
    #[error("diff for '{id}' changed between plan and apply: {reason}")]
    DiffMismatch {
        /// Resource id whose diff drifted
        id: String,
        /// What differed
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Several sibling errors, in the order they were found
    #[error("{} errors occurred: {}", .0.len(), format_multi(.0))]
    Multi(Vec<Error>),
}

impl Error {
    /// Collapse a list of errors into one.
    ///
    /// A single error is returned as itself; more than one becomes
    /// [`Error::Multi`]. Must not be called with an empty list.
    pub fn multi(mut errors: Vec<Error>) -> Error {
        debug_assert!(!errors.is_empty());
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Error::Multi(errors)
        }
    }

    /// Flatten this error into its leaves, unnesting [`Error::Multi`].
    pub fn flatten(self) -> Vec<Error> {
        match self {
            Error::Multi(errs) => errs.into_iter().flat_map(Error::flatten).collect(),
            other => vec![other],
        }
    }

    /// Whether this error came out of variable resolution.
    pub fn is_interpolation(&self) -> bool {
        matches!(
            self,
            Error::UnknownResource { .. } | Error::UnknownAttribute { .. }
        )
    }

    /// Whether this error was reported by a provider. Partial state is
    /// still written back when a provider fails mid-walk.
    pub fn is_provider(&self) -> bool {
        matches!(self, Error::Provider { .. })
    }
}

fn format_multi(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_value_display() {
        let err = Error::UnknownValue("foo".to_string());
        assert_eq!(err.to_string(), "Attribute with unknown value: foo");
    }

    #[test]
    fn test_multi_collapses_single() {
        let err = Error::multi(vec![Error::Config("bad".into())]);
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_multi_display() {
        let err = Error::multi(vec![
            Error::UnknownValue("a".into()),
            Error::UnknownValue("b".into()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 errors occurred"));
        assert!(msg.contains("Attribute with unknown value: a"));
        assert!(msg.contains("Attribute with unknown value: b"));
    }

    #[test]
    fn test_flatten_unnests() {
        let err = Error::Multi(vec![
            Error::Config("x".into()),
            Error::Multi(vec![Error::UnknownValue("y".into())]),
        ]);
        let leaves = err.flatten();
        assert_eq!(leaves.len(), 2);
    }

    #[test]
    fn test_category_helpers() {
        let err = Error::UnknownAttribute {
            resource: "aws_instance.foo".into(),
            attribute: "ip".into(),
            variable: "aws_instance.foo.ip".into(),
        };
        assert!(err.is_interpolation());
        assert!(!err.is_provider());

        let err = Error::Provider {
            id: "aws_instance.foo".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(err.is_provider());
        assert!(!err.is_interpolation());
    }
}
