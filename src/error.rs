//! Error types for the Noesis kernel.
//!
//! All errors are strongly typed using thiserror and value-returned;
//! the kernel never uses panics as control flow. This enables pattern
//! matching on specific error conditions and provides clear messages.

use thiserror::Error;

/// Errors produced while parsing rule text.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unexpected end of input while parsing {context}")]
    UnexpectedEnd {
        context: &'static str,
    },

    #[error("Unexpected token '{found}' at offset {offset}: expected {expected}")]
    UnexpectedToken {
        found: String,
        offset: usize,
        expected: &'static str,
    },

    #[error("Production body must start with 'sp', found '{found}'")]
    NotAProduction {
        found: String,
    },

    #[error("Missing '-->' separator in production '{name}'")]
    MissingArrow {
        name: String,
    },

    #[error("Invalid number literal '{literal}' at offset {offset}")]
    InvalidNumber {
        literal: String,
        offset: usize,
    },

    #[error("Unterminated string literal starting at offset {offset}")]
    UnterminatedString {
        offset: usize,
    },

    #[error("Unknown right-hand-side function '{name}'")]
    UnknownRhsFunction {
        name: String,
    },

    #[error("Unknown preference specifier '{found}' in production '{name}'")]
    UnknownPreference {
        found: String,
        name: String,
    },
}

/// Structural violations detected when compiling a production.
///
/// A production that fails structural validation is rejected and never
/// installed in the match network.
#[derive(Debug, Error)]
pub enum ProductionError {
    #[error("Production '{name}' has no conditions")]
    NoConditions {
        name: String,
    },

    #[error("Production '{name}' has no actions")]
    NoActions {
        name: String,
    },

    #[error("Production '{name}': first condition must be positive")]
    NegativeFirstCondition {
        name: String,
    },

    #[error("Production '{name}': variable <{variable}> in a negated condition is not bound by an earlier positive condition")]
    UnboundNegatedVariable {
        name: String,
        variable: String,
    },

    #[error("Production '{name}': action identifier <{variable}> is not bound on the left-hand side")]
    UnboundActionIdentifier {
        name: String,
        variable: String,
    },

    #[error("Production '{name}': preference {preference} requires a referent")]
    MissingReferent {
        name: String,
        preference: String,
    },

    #[error("Production '{name}': preference {preference} does not take a referent")]
    UnexpectedReferent {
        name: String,
        preference: String,
    },

    #[error("A production named '{name}' is already loaded")]
    DuplicateName {
        name: String,
    },
}

/// Working-memory API misuse.
///
/// These are local errors: they report a failed call and have no
/// agent-wide effect.
#[derive(Debug, Error)]
pub enum WmError {
    #[error("Unknown identifier: {id}")]
    UnknownIdentifier {
        id: String,
    },

    #[error("No working memory element with timetag {timetag}")]
    NotFound {
        timetag: u64,
    },
}

/// Runtime conditions raised while the decision cycle executes.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Preference conflict on ({id} ^{attr}): {reason}")]
    PreferenceConflict {
        id: String,
        attr: String,
        reason: String,
    },

    #[error("Resource bound reached: {bound} (limit {limit})")]
    ResourceExhausted {
        bound: &'static str,
        limit: u64,
    },

    #[error("Production not found: {name}")]
    ProductionNotFound {
        name: String,
    },

    #[error("Agent not found: {id}")]
    AgentNotFound {
        id: String,
    },

    #[error("Trace stream disconnected")]
    TraceDisconnected,

    #[error("Trace receive timed out after {duration_ms}ms")]
    TraceTimeout {
        duration_ms: u64,
    },

    #[error("Internal invariant violated: {message}")]
    Internal {
        message: String,
    },
}

/// Top-level error type for the Noesis kernel.
///
/// This enum encompasses all possible errors that can occur when
/// embedding the kernel.
#[derive(Debug, Error)]
pub enum NoesisError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid production: {0}")]
    Production(#[from] ProductionError),

    #[error("Working memory error: {0}")]
    Wm(#[from] WmError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl NoesisError {
    /// Creates an internal invariant-violation error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Runtime(RuntimeError::Internal {
            message: message.into(),
        })
    }

    /// Returns true if this is a parse error.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Returns true if this is a structural production error.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production(_))
    }

    /// Returns true if this is a working-memory error.
    #[must_use]
    pub const fn is_wm(&self) -> bool {
        matches!(self, Self::Wm(_))
    }

    /// Returns true if the condition is non-fatal: the decision cycle
    /// continues after reporting it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Parse(_) | Self::Production(_) | Self::Wm(_) => true,
            Self::Runtime(e) => matches!(
                e,
                RuntimeError::PreferenceConflict { .. }
                    | RuntimeError::ResourceExhausted { .. }
                    | RuntimeError::ProductionNotFound { .. }
                    | RuntimeError::TraceTimeout { .. }
            ),
        }
    }
}

/// Result type alias for kernel operations.
pub type NoesisResult<T> = Result<T, NoesisError>;
