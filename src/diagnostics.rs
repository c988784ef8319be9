//! # Diagnostics
//!
//! The diagnostic sink for the definite-initialization pass. Each violation
//! produces one error diagnostic carrying the qualified element name and a
//! related span pointing at the allocation that defined the variable.

use chumsky::span::SimpleSpan;
use std::fmt;

/// A diagnostic message from IR analysis
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: DiagnosticCode,
    pub message: String,
    /// Source span where this diagnostic applies
    pub span: SimpleSpan<usize>,
    /// Related spans for additional context, e.g. the defining allocation
    pub related_spans: Vec<(SimpleSpan<usize>, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Note => write!(f, "note"),
        }
    }
}

/// Initialization-checking diagnostic kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    UsedBeforeInitialized,
    InOutBeforeInitialized,
    EscapeBeforeInitialized,
    DestroyedBeforeInitialized,
    InitializedOnSomePaths,
    StructNotFullyInitialized,
    GlobalFunctionUseUninitialized,
    VariableDefinedHere,
}

impl From<DiagnosticCode> for u32 {
    fn from(code: DiagnosticCode) -> Self {
        match code {
            DiagnosticCode::UsedBeforeInitialized => 3001,
            DiagnosticCode::InOutBeforeInitialized => 3002,
            DiagnosticCode::EscapeBeforeInitialized => 3003,
            DiagnosticCode::DestroyedBeforeInitialized => 3004,
            DiagnosticCode::InitializedOnSomePaths => 3005,
            DiagnosticCode::StructNotFullyInitialized => 3006,
            DiagnosticCode::GlobalFunctionUseUninitialized => 3007,
            DiagnosticCode::VariableDefinedHere => 3100,
        }
    }
}

impl Diagnostic {
    /// Creates an error diagnostic
    pub fn error(code: DiagnosticCode, message: String) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            code,
            message,
            span: SimpleSpan::from(0..0),
            related_spans: Vec::new(),
        }
    }

    /// Adds location information
    pub const fn with_location(mut self, span: SimpleSpan<usize>) -> Self {
        self.span = span;
        self
    }

    /// Adds a related span with a context message
    pub fn with_related_span(mut self, span: SimpleSpan<usize>, message: String) -> Self {
        self.related_spans.push((span, message));
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        write!(f, " (at {}:{})", self.span.start, self.span.end)?;
        for (span, message) in &self.related_spans {
            write!(f, "\n  note: {} (at {}:{})", message, span.start, span.end)?;
        }
        Ok(())
    }
}

/// Collection of diagnostics from an analysis run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiagnosticCollection {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a diagnostic to the collection
    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// All diagnostics, in emission order
    pub fn all(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Only error diagnostics
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.diagnostics.iter()
    }
}

impl IntoIterator for DiagnosticCollection {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_creation_and_display() {
        let diag = Diagnostic::error(
            DiagnosticCode::UsedBeforeInitialized,
            "variable 'x' used before being initialized".to_string(),
        )
        .with_location(SimpleSpan::from(10..20))
        .with_related_span(SimpleSpan::from(2..5), "variable defined here".to_string());

        let display = format!("{diag}");
        assert!(display.contains("error"));
        assert!(display.contains("'x'"));
        assert!(display.contains("variable defined here"));
        assert_eq!(u32::from(diag.code), 3001);
    }

    #[test]
    fn collection_tracks_errors() {
        let mut collection = DiagnosticCollection::new();
        assert!(collection.is_empty());
        collection.add(Diagnostic::error(
            DiagnosticCode::DestroyedBeforeInitialized,
            "variable 'y' destroyed before being initialized".to_string(),
        ));
        assert_eq!(collection.len(), 1);
        assert!(collection.has_errors());
        assert_eq!(collection.errors().len(), 1);
    }
}
