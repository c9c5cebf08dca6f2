//! Compiler output to LSP diagnostics
//!
//! The compiler prints `{"diagnostics": [{"range": ..., "message": ...}]}`
//! with ranges already in editor coordinates. Only the first entry is
//! forwarded.

use lsp_types::{Diagnostic, DiagnosticSeverity, Range};
use serde::Deserialize;

/// `source` of every published diagnostic
pub const DIAGNOSTIC_SOURCE: &str = "lpyth";

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("Malformed compiler output: {0}")]
    MalformedOutput(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CompilerReport {
    diagnostics: Option<Vec<CompilerDiagnostic>>,
}

#[derive(Debug, Deserialize)]
struct CompilerDiagnostic {
    range: Range,
    message: String,
}

/// Translate one compiler report.
///
/// An absent or empty list gives no diagnostics, which clears whatever the
/// editor showed before.
pub fn translate(output: &str) -> Result<Vec<Diagnostic>, TranslateError> {
    let report: CompilerReport = serde_json::from_str(output)?;

    let diagnostics = report
        .diagnostics
        .unwrap_or_default()
        .into_iter()
        .take(1)
        .map(|entry| Diagnostic {
            range: entry.range,
            severity: Some(DiagnosticSeverity::ERROR),
            source: Some(DIAGNOSTIC_SOURCE.to_string()),
            message: entry.message,
            ..Diagnostic::default()
        })
        .collect();

    Ok(diagnostics)
}
