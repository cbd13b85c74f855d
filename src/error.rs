//! Rich diagnostic error types for bnserve.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! so an operator reading a log line or a CLI report gets an error code and a
//! hint about what to do next.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for bnserve.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ServeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Evidence(#[from] EvidenceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Case(#[from] CaseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("inference engine failed to initialize: {code} - {message}")]
    #[diagnostic(
        code(bnserve::engine::init),
        help(
            "The backend refused to start. Check the license string and that \
             no other process holds the engine."
        )
    )]
    InitFailed { code: i32, message: String },

    #[error("inference engine failed to shut down: {message}")]
    #[diagnostic(code(bnserve::engine::shutdown))]
    ShutdownFailed { message: String },

    #[error("inference engine has already been shut down")]
    #[diagnostic(
        code(bnserve::engine::shut_down),
        help("The engine handle is torn down once at process exit; no calls are accepted afterwards.")
    )]
    ShutDown,

    #[error("in {operation}: {messages}")]
    #[diagnostic(
        code(bnserve::engine::reported),
        help("The inference engine reported errors while performing this operation.")
    )]
    Reported {
        operation: &'static str,
        messages: String,
    },

    #[error("network \"{name}\" has been closed")]
    #[diagnostic(
        code(bnserve::engine::closed),
        help("Nodes obtained from a network become invalid once the network is closed.")
    )]
    NetworkClosed { name: String },
}

// ---------------------------------------------------------------------------
// Load errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("failed to read network file {path}")]
    #[diagnostic(
        code(bnserve::load::io),
        help("Check that the file exists and is readable by the server process.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("network source \"{source_name}\" was rejected: {reason}")]
    #[diagnostic(
        code(bnserve::load::rejected),
        help(
            "The engine could not parse or compile this network definition. \
             Fix the definition and restart the server."
        )
    )]
    Rejected {
        source_name: String,
        reason: String,
    },

    #[error("network named \"{name}\" already loaded (from \"{source_name}\")")]
    #[diagnostic(
        code(bnserve::load::duplicate),
        help("Network names must be unique across the served directory. Rename one of them.")
    )]
    DuplicateName { name: String, source_name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Lookup errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LookupError {
    #[error("network \"{id}\" not found")]
    #[diagnostic(
        code(bnserve::lookup::network),
        help("Networks are addressed by their registered name or their 0-based index.")
    )]
    NetworkNotFound { id: String },

    #[error("node \"{id}\" not defined for network \"{network}\"")]
    #[diagnostic(
        code(bnserve::lookup::node),
        help("Nodes are addressed by name or by their index in the name-sorted node list.")
    )]
    NodeNotFound { network: String, id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Evidence errors
// ---------------------------------------------------------------------------

/// Failure to apply one piece of evidence to one node.
#[derive(Debug, Error, Diagnostic)]
pub enum EvidenceError {
    #[error("state \"{state}\" not defined for node \"{node}\"")]
    #[diagnostic(
        code(bnserve::evidence::unknown_state),
        help("Use one of the node's state names, `#<index>`, or a numeric value.")
    )]
    UnknownState { node: String, state: String },

    #[error("state index {index} out of range for node \"{node}\" ({count} states)")]
    #[diagnostic(code(bnserve::evidence::range))]
    StateOutOfRange {
        node: String,
        index: usize,
        count: usize,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Inference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InferError {
    #[error("undefined expected value for node \"{node}\"")]
    #[diagnostic(
        code(bnserve::infer::undefined_value),
        help("Only nodes with numeric levels have an expected value.")
    )]
    UndefinedValue { node: String },

    #[error("node \"{node}\" has no states to infer")]
    #[diagnostic(code(bnserve::infer::no_states))]
    NoStates { node: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Case errors
// ---------------------------------------------------------------------------

/// Failure to enter a whole case. All findings on the network have been
/// retracted by the time this error is returned.
#[derive(Debug, Error, Diagnostic)]
pub enum CaseError {
    #[error("evidence \"{token}\" for node \"{node}\": {source}")]
    #[diagnostic(code(bnserve::case::evidence))]
    Evidence {
        node: String,
        token: String,
        #[source]
        source: EvidenceError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(bnserve::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(bnserve::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("invalid value for {key}: \"{value}\"")]
    #[diagnostic(code(bnserve::config::invalid))]
    Invalid { key: String, value: String },
}

/// Convenience alias for functions returning bnserve results.
pub type ServeResult<T> = std::result::Result<T, ServeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_converts_to_serve_error() {
        let err = EngineError::Reported {
            operation: "compile",
            messages: "6 - cycle".into(),
        };
        let top: ServeError = err.into();
        assert!(matches!(top, ServeError::Engine(EngineError::Reported { .. })));
    }

    #[test]
    fn case_error_keeps_node_and_cause() {
        let err = CaseError::Evidence {
            node: "Smoker".into(),
            token: "maybe".into(),
            source: EvidenceError::UnknownState {
                node: "Smoker".into(),
                state: "maybe".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("Smoker"));
        assert!(msg.contains("maybe"));
        assert!(msg.contains("not defined"));
    }

    #[test]
    fn reported_message_names_operation() {
        let err = EngineError::Reported {
            operation: "enter finding",
            messages: "12 - findings are inconsistent".into(),
        };
        assert_eq!(
            err.to_string(),
            "in enter finding: 12 - findings are inconsistent"
        );
    }
}
