//! The gate token passed from the analyzer to the executor.

use quarry_core::{ContentHash, Program};

/// Source text that passed static analysis, together with its parsed tree.
///
/// Only [`crate::vet`] can construct one, so holding a `VettedProgram` is
/// proof that the analyzer ran and reported no violations.
#[derive(Debug, Clone)]
pub struct VettedProgram {
    source: String,
    program: Program,
    hash: ContentHash,
}

impl VettedProgram {
    pub(crate) fn new(source: &str, program: Program) -> Self {
        Self {
            source: source.to_owned(),
            program,
            hash: ContentHash::of(source.as_bytes()),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// SHA-256 of the vetted source text.
    #[must_use]
    pub fn source_hash(&self) -> ContentHash {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use quarry_core::CapabilitySet;

    #[test]
    fn vetted_program_keeps_source_and_tree() {
        let vetted = match crate::vet("x = 1\nx", &CapabilitySet::default()) {
            Ok(v) => v,
            Err(report) => panic!("expected safe source: {}", report.summary()),
        };
        assert_eq!(vetted.source(), "x = 1\nx");
        assert_eq!(vetted.program().body.len(), 2);
        assert_eq!(vetted.program().trailing_bare_name(), Some("x"));
        assert_eq!(vetted.source_hash(), quarry_core::ContentHash::of(b"x = 1\nx"));
    }
}
