//! Backend error types

use luascript_error::{Diagnostic, ErrorCode};
use luascript_ir::NodeId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("{backend}: cannot compile {kind} (node {id}): {reason}")]
    Unsupported {
        backend: &'static str,
        kind: &'static str,
        id: NodeId,
        reason: String,
    },

    #[error("{backend}: node {id} is missing from the module")]
    InvalidModule { backend: &'static str, id: NodeId },

    #[error("unknown target `{name}` (known targets: {})", known.join(", "))]
    UnknownTarget { name: String, known: Vec<String> },

    #[error("IR transform failed: {0}")]
    Transform(String),

    #[error("{backend}: encoding failed: {message}")]
    Encoding { backend: &'static str, message: String },
}

impl BackendError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BackendError::Unsupported { .. } => ErrorCode::UNSUPPORTED_NODE,
            BackendError::UnknownTarget { .. } => ErrorCode::UNKNOWN_TARGET,
            BackendError::InvalidModule { .. }
            | BackendError::Transform(_)
            | BackendError::Encoding { .. } => ErrorCode::BACKEND_FAILURE,
        }
    }

    /// Node the error is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            BackendError::Unsupported { id, .. } | BackendError::InvalidModule { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl From<&BackendError> for Diagnostic {
    fn from(error: &BackendError) -> Self {
        let diagnostic = Diagnostic::error(error.to_string()).with_code(error.code());
        match error {
            BackendError::UnknownTarget { known, .. } => {
                diagnostic.with_note(format!("registered targets: {}", known.join(", ")))
            }
            _ => diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_kind_and_id() {
        let error = BackendError::Unsupported {
            backend: "wasm",
            kind: "StringLiteral",
            id: NodeId(12),
            reason: "only numbers are supported".into(),
        };
        assert_eq!(
            error.to_string(),
            "wasm: cannot compile StringLiteral (node 12): only numbers are supported"
        );
        assert_eq!(error.node(), Some(NodeId(12)));
        assert_eq!(Diagnostic::from(&error).code, Some(ErrorCode::UNSUPPORTED_NODE));
    }

    #[test]
    fn test_unknown_target_lists_known() {
        let error = BackendError::UnknownTarget {
            name: "jvm".into(),
            known: vec!["lua".into(), "wasm".into()],
        };
        assert_eq!(error.to_string(), "unknown target `jvm` (known targets: lua, wasm)");
        assert_eq!(error.code(), ErrorCode::UNKNOWN_TARGET);
    }
}
