//! Structured Feedback Module
//!
//! Turns resolver diagnostics into reports for people and for tools:
//! - text rendering with a caret under the offending type reference
//! - JSON reports with fix suggestions
//! - check statistics

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::frontend::unit::LoadedUnit;
use crate::utils::Error;

// ==================== Structured Error Report ====================

/// A structured diagnostic report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error code (e.g., "E0001")
    pub code: String,

    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    pub location: Option<Location>,

    /// Suggested fixes, most confident first
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// Where in the unit a diagnostic points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// `module::decl` owning the text
    pub origin: String,
    /// The type reference or constant expression as written
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// Description of the fix
    pub message: String,

    /// The replacement text
    pub replacement: Option<String>,

    /// Confidence in this suggestion (0.0 - 1.0)
    pub confidence: f64,
}

impl Suggestion {
    fn new(message: impl Into<String>, replacement: Option<String>, confidence: f64) -> Self {
        Self {
            message: message.into(),
            replacement,
            confidence,
        }
    }
}

// ==================== Check Feedback ====================

/// Complete result of checking a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckFeedback {
    pub success: bool,

    /// Unit file that was checked
    pub source_file: String,

    /// All errors and warnings
    pub diagnostics: Vec<ErrorReport>,

    /// Resolved declaration types, when requested
    pub types: Option<Vec<TypeEntry>>,

    pub stats: CheckStats,
}

/// One resolved declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeEntry {
    /// `module::name`
    pub name: String,
    /// Declaration kind, e.g. "struct"
    pub kind: String,
    /// Canonical type name, or `None` when the declaration has no type
    #[serde(rename = "type")]
    pub ty: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckStats {
    pub module_count: usize,
    pub decl_count: usize,
    /// Canonical types interned by the end of resolution
    pub type_count: usize,
    pub load_time_ms: u64,
    pub resolve_time_ms: u64,
    pub total_time_ms: u64,
}

// ==================== Error Conversion ====================

impl ErrorReport {
    /// Create a report from a resolver error
    pub fn from_error(error: &Error, unit: &LoadedUnit) -> Self {
        let location = error.span().and_then(|span| {
            unit.source(&span).map(|source| Location {
                origin: source.origin.clone(),
                text: source.text.clone(),
                start: span.start,
                end: span.end,
            })
        });
        let severity = match error {
            Error::Unsupported { .. } => Severity::Warning,
            _ => Severity::Error,
        };

        let mut report = Self {
            code: error.code().to_string(),
            severity,
            message: error.to_string(),
            location,
            suggestions: generate_suggestions(error),
        };
        report.sort_suggestions();
        report
    }

    /// Sort suggestions by confidence (highest first)
    pub fn sort_suggestions(&mut self) {
        self.suggestions.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Human-readable rendering, with a caret line when the location is known
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let _ = writeln!(out, "{}[{}]: {}", level, self.code, self.message);
        if let Some(loc) = &self.location {
            let _ = writeln!(out, "  --> {}", loc.origin);
            let _ = writeln!(out, "   | {}", loc.text);
            let width = loc.end.saturating_sub(loc.start).max(1);
            let _ = writeln!(out, "   | {}{}", " ".repeat(loc.start), "^".repeat(width));
        }
        for suggestion in &self.suggestions {
            match &suggestion.replacement {
                Some(replacement) => {
                    let _ = writeln!(out, "   = help: {} (`{}`)", suggestion.message, replacement);
                }
                None => {
                    let _ = writeln!(out, "   = help: {}", suggestion.message);
                }
            }
        }
        out
    }
}

/// Fix suggestions for the errors that have an obvious remedy
fn generate_suggestions(error: &Error) -> Vec<Suggestion> {
    match error {
        Error::UnknownType { name, .. } => {
            let mut suggestions: Vec<Suggestion> = get_common_typos(name)
                .into_iter()
                .map(|correct| Suggestion::new(format!("Did you mean '{}'?", correct), Some(correct.to_string()), 0.8))
                .collect();
            suggestions.push(Suggestion::new(
                "Declare the type, or import the module that defines it",
                None,
                0.4,
            ));
            suggestions
        }

        Error::AmbiguousType { name, first, second, .. } => vec![
            Suggestion::new(
                format!("Use the type from '{}'", first),
                Some(format!("{}::{}", first, name)),
                0.6,
            ),
            Suggestion::new(
                format!("Use the type from '{}'", second),
                Some(format!("{}::{}", second, name)),
                0.6,
            ),
        ],

        Error::RecursiveDefinition { name, .. } => vec![Suggestion::new(
            format!("Store '{}' behind a pointer", name),
            Some(format!("{}*", name)),
            0.9,
        )],

        Error::CircularDependency { name, .. } => vec![Suggestion::new(
            format!("Break the cycle through '{}' with a pointer or a literal size", name),
            None,
            0.5,
        )],

        Error::NegativeArraySize { .. } => vec![Suggestion::new("Use a length of zero or more", None, 0.7)],

        Error::ExpectedConstant { .. } => vec![Suggestion::new(
            "Array lengths must fold at compile time; use a literal or a const",
            None,
            0.6,
        )],

        _ => vec![],
    }
}

/// Common misspellings of builtin type names
fn get_common_typos(name: &str) -> Vec<&'static str> {
    let patterns = [
        ("integer", "int"),
        ("boolean", "bool"),
        ("int32", "i32"),
        ("int64", "i64"),
        ("uint8", "u8"),
        ("float32", "f32"),
        ("float64", "f64"),
        ("str", "string"),
    ];

    patterns
        .iter()
        .filter(|(wrong, _)| *wrong == name)
        .map(|&(_, correct)| correct)
        .collect()
}

impl CheckFeedback {
    pub fn new(source_file: String, diagnostics: Vec<ErrorReport>, stats: CheckStats) -> Self {
        let success = diagnostics.iter().all(|d| d.severity != Severity::Error);
        Self {
            success,
            source_file,
            diagnostics,
            types: None,
            stats,
        }
    }

    /// Output as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Output as compact JSON (for programmatic use)
    pub fn to_json_compact(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::unit::SourceText;
    use crate::utils::Span;
    use pretty_assertions::assert_eq;

    fn unit_with(text: &str) -> LoadedUnit {
        LoadedUnit {
            decls: vec![],
            sources: vec![SourceText {
                origin: "main::List".to_string(),
                text: text.to_string(),
            }],
        }
    }

    #[test]
    fn test_report_location_and_caret() {
        let unit = unit_with("Node[4]");
        let err = Error::UnknownType {
            name: "Node".to_string(),
            span: Span::new(0, 4, 1),
        };
        let report = ErrorReport::from_error(&err, &unit);
        assert_eq!(report.code, "E0001");
        assert_eq!(report.severity, Severity::Error);
        assert_eq!(
            report.location,
            Some(Location {
                origin: "main::List".to_string(),
                text: "Node[4]".to_string(),
                start: 0,
                end: 4,
            })
        );
        let text = report.render_text();
        assert!(text.contains("error[E0001]: Unknown type 'Node'."));
        assert!(text.contains("   | Node[4]\n   | ^^^^\n"));
    }

    #[test]
    fn test_dummy_span_has_no_location() {
        let err = Error::DuplicateDefinition {
            name: "x".to_string(),
            span: Span::dummy(),
        };
        let report = ErrorReport::from_error(&err, &unit_with("int"));
        assert_eq!(report.location, None);
        assert!(report.suggestions.is_empty());
    }

    #[test]
    fn test_typo_suggestions() {
        let err = Error::UnknownType {
            name: "integer".to_string(),
            span: Span::dummy(),
        };
        let report = ErrorReport::from_error(&err, &LoadedUnit::default());
        assert_eq!(report.suggestions[0].replacement.as_deref(), Some("int"));
        assert_eq!(report.suggestions.len(), 2);
    }

    #[test]
    fn test_ambiguity_suggests_both_modules() {
        let err = Error::AmbiguousType {
            name: "Vec".to_string(),
            first: "geo".to_string(),
            second: "math".to_string(),
            span: Span::dummy(),
        };
        let report = ErrorReport::from_error(&err, &LoadedUnit::default());
        let replacements: Vec<_> = report.suggestions.iter().filter_map(|s| s.replacement.clone()).collect();
        assert_eq!(replacements, vec!["geo::Vec".to_string(), "math::Vec".to_string()]);
    }

    #[test]
    fn test_unsupported_is_a_warning() {
        let err = Error::Unsupported {
            feature: "Struct values".to_string(),
            span: None,
        };
        let report = ErrorReport::from_error(&err, &LoadedUnit::default());
        assert_eq!(report.severity, Severity::Warning);

        let feedback = CheckFeedback::new("u.json".to_string(), vec![report], CheckStats::default());
        assert!(feedback.success);
        let json: serde_json::Value = serde_json::from_str(&feedback.to_json()).unwrap();
        assert_eq!(json["diagnostics"][0]["code"], "E0100");
        assert_eq!(json["types"], serde_json::Value::Null);
    }
}
