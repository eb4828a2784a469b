//! Error types and reporting

use crate::ast::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, CompileError>;

/// Compile error
///
/// Every failure anywhere in the pipeline is one of these five kinds. The
/// library seam collapses them all into the fallback sentinel; the CLI
/// reports them individually.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Syntax error at {span}: {message}")]
    Syntax { message: String, span: Span },

    #[error("Type error at {span}: {message}")]
    Type { message: String, span: Span },

    #[error("Bounds error at {span}: {message}")]
    Bounds { message: String, span: Span },

    #[error("Duplicate definition at {span}: {message}")]
    DuplicateDefinition { message: String, span: Span },

    #[error("Name error at {span}: {message}")]
    Name { message: String, span: Span },
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::Type {
            message: message.into(),
            span,
        }
    }

    pub fn bounds(message: impl Into<String>, span: Span) -> Self {
        Self::Bounds {
            message: message.into(),
            span,
        }
    }

    pub fn duplicate(message: impl Into<String>, span: Span) -> Self {
        Self::DuplicateDefinition {
            message: message.into(),
            span,
        }
    }

    pub fn name(message: impl Into<String>, span: Span) -> Self {
        Self::Name {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Syntax { span, .. }
            | Self::Type { span, .. }
            | Self::Bounds { span, .. }
            | Self::DuplicateDefinition { span, .. }
            | Self::Name { span, .. } => *span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { message, .. }
            | Self::Type { message, .. }
            | Self::Bounds { message, .. }
            | Self::DuplicateDefinition { message, .. }
            | Self::Name { message, .. } => message,
        }
    }
}

/// Report error with ariadne
pub fn report_error(filename: &str, source: &str, error: &CompileError) {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let kind = match error {
        CompileError::Syntax { .. } => "Syntax",
        CompileError::Type { .. } => "Type",
        CompileError::Bounds { .. } => "Bounds",
        CompileError::DuplicateDefinition { .. } => "Duplicate definition",
        CompileError::Name { .. } => "Name",
    };

    let span = error.span();
    Report::build(ReportKind::Error, (filename, span.start..span.end))
        .with_message(format!("{kind} error"))
        .with_label(
            Label::new((filename, span.start..span.end))
                .with_message(error.message())
                .with_color(Color::Red),
        )
        .finish()
        .print((filename, Source::from(source)))
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_carries_span_and_message() {
        let err = CompileError::type_error("unknown type: Foo", Span::new(4, 7));
        assert_eq!(err.span(), Span::new(4, 7));
        assert_eq!(err.message(), "unknown type: Foo");
    }

    #[test]
    fn test_error_display_includes_kind() {
        let err = CompileError::bounds("value not in range", Span::new(0, 3));
        let text = format!("{err}");
        assert!(text.starts_with("Bounds error"));
        assert!(text.contains("value not in range"));
    }

    #[test]
    fn test_duplicate_constructor() {
        let err = CompileError::duplicate("struct Point already defined", Span::new(10, 15));
        assert!(matches!(err, CompileError::DuplicateDefinition { .. }));
    }
}
