//! Error types for hosting context operations.
//!
//! Every error maps to an [`ErrorKind`], which is what verification outcomes
//! record and what the CLI reports per target.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for hostkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Kinds of failure, as reported per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    ContextNotFound,
    ParseError,
    UnknownContextType,
    NoContextsFound,
    ServiceUnavailable,
    ExtensionHookError,
    RenderError,
    WriteError,
    InvalidDefinition,
    UnknownService,
    HasDependents,
    Io,
    Config,
}

impl ErrorKind {
    /// Whether an error of this kind aborts the whole command.
    ///
    /// Discovery and parsing errors mean no target can be resolved; every
    /// other kind is local to one artifact or one target.
    #[must_use]
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::ParseError | Self::UnknownContextType | Self::NoContextsFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors that can occur while loading, generating or verifying contexts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No context with this name exists in the registry.
    #[error("Context not found with name: {name}")]
    ContextNotFound {
        /// Requested name.
        name: String,
    },

    /// A registry entry identifier is not `<type>.<name>`.
    #[error("malformed context identifier '{identifier}': {message}")]
    Parse {
        /// Offending identifier (file name without extension).
        identifier: String,
        /// What is wrong with it.
        message: String,
    },

    /// The `<type>` segment names no known context variant.
    #[error("unknown context type '{context_type}' (expected server, platform or site)")]
    UnknownContextType {
        /// Offending type name.
        context_type: String,
    },

    /// The registry holds no contexts at all.
    #[error("No contexts found. Use `provision save` to create one.")]
    NoContextsFound,

    /// No control executable was found for a service post-action.
    #[error("no {service} control executable found, falling back to {fallback}")]
    ServiceUnavailable {
        /// Service id.
        service: String,
        /// Path used instead.
        fallback: PathBuf,
    },

    /// An extension contributor failed.
    #[error("contributor '{contributor}' failed on hook {hook}: {message}")]
    ExtensionHook {
        /// Contributor name.
        contributor: String,
        /// Hook name.
        hook: String,
        /// Failure message.
        message: String,
    },

    /// A template could not be rendered.
    #[error("failed to render template {template}: {message}")]
    Render {
        /// Template id.
        template: String,
        /// Failure message.
        message: String,
    },

    /// An artifact could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A context definition is structurally valid YAML but semantically wrong.
    #[error("invalid definition for {name}: {message}")]
    InvalidDefinition {
        /// Context name.
        name: String,
        /// What is wrong.
        message: String,
    },

    /// A binding names a service the registry does not know.
    #[error("unknown service '{subtype}' for capability '{capability}'")]
    UnknownService {
        /// Capability key (http, db).
        capability: String,
        /// Service id.
        subtype: String,
    },

    /// A context cannot be removed while others reference it.
    #[error("cannot remove {name}: still referenced by {}", dependents.join(", "))]
    HasDependents {
        /// Context name.
        name: String,
        /// Names of referencing contexts.
        dependents: Vec<String>,
    },

    /// IO error while reading or writing the registry.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A YAML document could not be read or written.
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        /// Path involved in the error.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
}

impl Error {
    /// Create an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a write error with path context.
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Create a render error.
    pub fn render(template: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Render {
            template: template.into(),
            message: message.to_string(),
        }
    }

    /// Create an identifier parse error.
    pub fn parse(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-definition error.
    pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Get the reporting kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ContextNotFound { .. } => ErrorKind::ContextNotFound,
            Error::Parse { .. } => ErrorKind::ParseError,
            Error::UnknownContextType { .. } => ErrorKind::UnknownContextType,
            Error::NoContextsFound => ErrorKind::NoContextsFound,
            Error::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Error::ExtensionHook { .. } => ErrorKind::ExtensionHookError,
            Error::Render { .. } => ErrorKind::RenderError,
            Error::Write { .. } => ErrorKind::WriteError,
            Error::InvalidDefinition { .. } => ErrorKind::InvalidDefinition,
            Error::UnknownService { .. } => ErrorKind::UnknownService,
            Error::HasDependents { .. } => ErrorKind::HasDependents,
            Error::Io { .. } => ErrorKind::Io,
            Error::Yaml { .. } => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_errors_are_fatal_to_run() {
        assert!(ErrorKind::ParseError.is_fatal_to_run());
        assert!(ErrorKind::UnknownContextType.is_fatal_to_run());
        assert!(ErrorKind::NoContextsFound.is_fatal_to_run());
        assert!(!ErrorKind::RenderError.is_fatal_to_run());
        assert!(!ErrorKind::WriteError.is_fatal_to_run());
        assert!(!ErrorKind::ExtensionHookError.is_fatal_to_run());
    }

    #[test]
    fn test_error_kinds() {
        let err = Error::write("/srv/site/services.yml", io::Error::other("read-only"));
        assert_eq!(err.kind(), ErrorKind::WriteError);

        let err = Error::render("apache_vhost", "missing key site.uri");
        assert_eq!(err.kind(), ErrorKind::RenderError);

        let err = Error::parse("site", "expected <type>.<name>");
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_error_display() {
        let err = Error::ContextNotFound {
            name: "example".to_string(),
        };
        assert_eq!(err.to_string(), "Context not found with name: example");

        let err = Error::HasDependents {
            name: "web1".to_string(),
            dependents: vec!["d10".to_string(), "d11".to_string()],
        };
        assert!(err.to_string().contains("d10, d11"));
    }
}
