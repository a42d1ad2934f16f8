//! Result of static safety analysis.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a construct was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ViolationKind {
    /// The source could not be parsed at all.
    SyntaxError,
    /// An import of a module outside the allowed set.
    ProhibitedImport,
    /// A call whose target is not an allowed callable, or cannot be resolved.
    ProhibitedCall,
    /// Access to a private or dunder attribute.
    ProhibitedAttribute,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SyntaxError => "SyntaxError",
            Self::ProhibitedImport => "ProhibitedImport",
            Self::ProhibitedCall => "ProhibitedCall",
            Self::ProhibitedAttribute => "ProhibitedAttribute",
        };
        f.write_str(name)
    }
}

/// A single rejected construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Violation {
    pub kind: ViolationKind,
    /// The offending name or construct, e.g. `os` or `open`.
    pub construct: String,
    /// 1-based source line.
    pub line: usize,
    /// Human-readable reason for the rejection.
    pub reason: String,
}

impl Violation {
    pub fn new(
        kind: ViolationKind,
        construct: impl Into<String>,
        line: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            construct: construct.into(),
            line,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (line {}): {}", self.kind, self.construct, self.line, self.reason)
    }
}

/// Ordered list of violations found in one source unit. Produced once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AnalysisReport {
    pub violations: Vec<Violation>,
}

impl AnalysisReport {
    #[must_use]
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }

    /// `true` when the only problem is that the source does not parse.
    #[must_use]
    pub fn is_syntax_error(&self) -> bool {
        !self.violations.is_empty()
            && self.violations.iter().all(|v| v.kind == ViolationKind::SyntaxError)
    }

    #[must_use]
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    /// All violation descriptions joined with `"; "`.
    #[must_use]
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_safe() {
        let report = AnalysisReport::default();
        assert!(report.is_safe());
        assert!(!report.is_syntax_error());
        assert_eq!(report.summary(), "");
    }

    #[test]
    fn summary_joins_violations_in_order() {
        let report = AnalysisReport::new(vec![
            Violation::new(ViolationKind::ProhibitedImport, "os", 1, "module 'os' is not allowed"),
            Violation::new(ViolationKind::ProhibitedCall, "open", 2, "'open' is not an allowed callable"),
        ]);
        assert!(!report.is_safe());
        assert!(report.has(ViolationKind::ProhibitedCall));
        let summary = report.summary();
        let import_pos = summary.find("ProhibitedImport").unwrap_or(usize::MAX);
        let call_pos = summary.find("ProhibitedCall").unwrap_or(0);
        assert!(import_pos < call_pos, "violations must keep source order: {summary}");
    }
}
