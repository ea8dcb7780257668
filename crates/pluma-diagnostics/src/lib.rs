//! Error reporting for Pluma.
//!
//! Uses miette so every failure the CLI surfaces carries a code and, where
//! the user can act on it, a hint.

// These fields are used by thiserror/miette derive macros
#![allow(unused_assignments)]

pub use miette::{Diagnostic, Report, Result};
use thiserror::Error;

/// A Pluma error with rich diagnostics.
#[derive(Error, Diagnostic, Debug)]
pub enum PlumaError {
    #[error("{message}")]
    #[diagnostic(
        code(pluma::plugin::not_found),
        help("Run `pluma plugin list` to see the plugins your discovery sources offer")
    )]
    PluginNotFound { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(pluma::plugin::ambiguous),
        help("Several plugins are named '{name}'; pass `--target k8s` or `--target tmc`")
    )]
    AmbiguousPlugin { name: String, message: String },

    #[error("{message}")]
    #[diagnostic(
        code(pluma::trust::untrusted),
        help("If you trust this registry, add it to PLUMA_ALLOWED_REGISTRY")
    )]
    Untrusted { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(pluma::trust::digest_mismatch),
        help("The downloaded binary does not match its published digest; nothing was installed")
    )]
    DigestMismatch { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(pluma::discovery::unsupported),
        help("Supported discovery source types are local, oci and rest")
    )]
    UnsupportedSource { message: String },

    #[error("{message}")]
    #[diagnostic(code(pluma::plugin::malformed))]
    Malformed { message: String },

    #[error("{message}")]
    #[diagnostic(code(pluma::io))]
    Io { message: String },

    #[error("{count} plugins failed")]
    #[diagnostic(code(pluma::plugin::several_failed))]
    Aggregate {
        count: usize,
        #[related]
        failures: Vec<PlumaError>,
    },

    #[error("Refusing to delete plugin '{name}' without confirmation")]
    #[diagnostic(
        code(pluma::plugin::confirm),
        help("Pass --yes to delete without prompting")
    )]
    ConfirmationRequired { name: String },

    #[error("{0}")]
    #[diagnostic(code(pluma::generic))]
    Generic(String),
}

impl PlumaError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::PluginNotFound {
            message: message.into(),
        }
    }

    pub fn ambiguous(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AmbiguousPlugin {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn untrusted(message: impl Into<String>) -> Self {
        Self::Untrusted {
            message: message.into(),
        }
    }

    pub fn digest_mismatch(message: impl Into<String>) -> Self {
        Self::DigestMismatch {
            message: message.into(),
        }
    }

    pub fn unsupported_source(message: impl Into<String>) -> Self {
        Self::UnsupportedSource {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Bundle several failures; a single one is returned as is.
    pub fn aggregate(mut failures: Vec<PlumaError>) -> Self {
        if failures.len() == 1 {
            if let Some(single) = failures.pop() {
                return single;
            }
        }
        Self::Aggregate {
            count: failures.len(),
            failures,
        }
    }
}

/// Setup miette for pretty error output.
pub fn setup() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let err = PlumaError::ambiguous("cluster", "unable to uniquely identify plugin 'cluster'");
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("pluma::plugin::ambiguous")
        );
        assert!(err.help().unwrap().to_string().contains("--target"));
    }

    #[test]
    fn test_aggregate() {
        let single = PlumaError::aggregate(vec![PlumaError::not_found("unable to find plugin 'a'")]);
        assert!(matches!(single, PlumaError::PluginNotFound { .. }));

        let many = PlumaError::aggregate(vec![
            PlumaError::not_found("unable to find plugin 'a'"),
            PlumaError::digest_mismatch("digest mismatch for 'b'"),
        ]);
        assert_eq!(many.to_string(), "2 plugins failed");
        assert_eq!(many.related().map(|r| r.count()), Some(2));
    }
}
