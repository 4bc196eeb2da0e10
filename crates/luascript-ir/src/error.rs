//! Error types of the IR layer

use crate::node::{Category, NodeId};
use luascript_error::{Diagnostic, ErrorCode, Span};
use thiserror::Error;

/// A malformed construction request. Always fatal for the current build.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuilderError {
    #[error("{kind}.{field} references missing node #{missing}")]
    DanglingReference {
        kind: &'static str,
        field: String,
        missing: NodeId,
    },

    #[error("{kind}.{field} expects {expected}, found {found} (#{target})")]
    ShapeMismatch {
        kind: &'static str,
        field: String,
        expected: Category,
        found: &'static str,
        target: NodeId,
    },

    #[error("node #{0} was reserved but never filled")]
    Unfilled(NodeId),

    #[error("node #{0} is already defined")]
    AlreadyDefined(NodeId),

    #[error("node #{0} does not exist")]
    UnknownNode(NodeId),

    #[error("invalid {kind}: {message}")]
    InvalidNode { kind: &'static str, message: String },

    #[error("node ids exhausted")]
    IdsExhausted,

    #[error("module failed validation with {} error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),
}

impl BuilderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BuilderError::DanglingReference { .. } | BuilderError::UnknownNode(_) => {
                ErrorCode::DANGLING_REFERENCE
            }
            BuilderError::ShapeMismatch { .. } => ErrorCode::SHAPE_MISMATCH,
            BuilderError::Unfilled(_) | BuilderError::AlreadyDefined(_) => ErrorCode::UNFILLED_NODE,
            BuilderError::InvalidNode { .. } | BuilderError::IdsExhausted => ErrorCode::INVALID_NODE,
            BuilderError::Validation(_) => ErrorCode::INVARIANT_VIOLATION,
        }
    }
}

/// An AST shape the lowering pass cannot translate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoweringError {
    #[error("no lowering rule for {kind}")]
    Unhandled { kind: String, span: Option<Span> },

    #[error("malformed {kind}: {message}")]
    Malformed {
        kind: String,
        message: String,
        span: Option<Span>,
    },

    #[error(transparent)]
    Builder(#[from] BuilderError),
}

impl LoweringError {
    pub fn unhandled(kind: impl Into<String>, span: Option<Span>) -> Self {
        LoweringError::Unhandled {
            kind: kind.into(),
            span,
        }
    }

    pub fn malformed(kind: impl Into<String>, message: impl Into<String>, span: Option<Span>) -> Self {
        LoweringError::Malformed {
            kind: kind.into(),
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            LoweringError::Unhandled { span, .. } | LoweringError::Malformed { span, .. } => *span,
            LoweringError::Builder(_) => None,
        }
    }
}

impl From<&LoweringError> for Diagnostic {
    fn from(err: &LoweringError) -> Self {
        let code = match err {
            LoweringError::Unhandled { .. } => ErrorCode::UNHANDLED_SYNTAX,
            LoweringError::Malformed { .. } => ErrorCode::MALFORMED_SYNTAX,
            LoweringError::Builder(inner) => inner.code(),
        };
        Diagnostic::error(err.to_string())
            .with_code(code)
            .with_optional_label(err.span(), "while lowering this")
    }
}

/// Failure to read or write the JSON form of a module.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("invalid IR JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported schemaVersion `{found}` (this build reads {supported})")]
    IncompatibleSchema { found: String, supported: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = BuilderError::DanglingReference {
            kind: "BinaryExpression",
            field: "left".into(),
            missing: NodeId(42),
        };
        assert_eq!(err.to_string(), "BinaryExpression.left references missing node #42");

        let err = LoweringError::unhandled("WithStatement", None);
        assert_eq!(err.to_string(), "no lowering rule for WithStatement");
    }

    #[test]
    fn test_lowering_error_to_diagnostic() {
        let err = LoweringError::malformed("BreakStatement", "labels are not supported", None);
        let diagnostic = Diagnostic::from(&err);
        assert_eq!(diagnostic.code, Some(ErrorCode::MALFORMED_SYNTAX));
        assert!(diagnostic.labels.is_empty());
    }
}
