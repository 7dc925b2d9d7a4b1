use std::path::PathBuf;

/// Failure kinds surfaced by the curation stages.
///
/// Only [`CurationError::MissingInput`] (and bad configuration) stops a stage;
/// every other kind is recovered locally and shows up as a counter in the
/// stage's stats.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CurationError {
    #[error("required input is missing: {}", path.display())]
    MissingInput { path: PathBuf },
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("reply {child} references unknown parent {parent}")]
    ReferenceResolution { child: String, parent: String },
    #[error("classification failed: {0}")]
    Classification(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CurationError {
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        CurationError::MissingInput { path: path.into() }
    }

    /// Whether this error aborts the stage that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CurationError::MissingInput { .. } | CurationError::InvalidConfig(_)
        )
    }
}

/// Returns `MissingInput` unless `path` exists. Run before any output is opened.
pub fn require_input(path: &std::path::Path) -> anyhow::Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(CurationError::missing(path).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_input_and_config_are_fatal() {
        assert!(CurationError::missing("/nope").is_fatal());
        assert!(CurationError::InvalidConfig("x".into()).is_fatal());
        assert!(!CurationError::MalformedRecord {
            line: 3,
            reason: "eof".into()
        }
        .is_fatal());
        assert!(!CurationError::Classification("timeout".into()).is_fatal());
    }

    #[test]
    fn require_input_downcasts_to_missing() {
        let err = require_input(std::path::Path::new("/definitely/not/here.jsonl")).unwrap_err();
        let kind = err.downcast_ref::<CurationError>().unwrap();
        assert!(matches!(kind, CurationError::MissingInput { .. }));
        assert!(err.to_string().contains("/definitely/not/here.jsonl"));
    }
}
