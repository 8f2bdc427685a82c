use thiserror::Error;

/// Failures that callers may want to tell apart.
///
/// Functions return `anyhow::Result`; these values travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Debug, Error)]
pub enum StatError {
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: Box<str>,
        expected: usize,
        found: usize,
    },

    #[error("dataset `{dataset}` has no `{key}`; compute it before this step")]
    MissingKey { dataset: Box<str>, key: Box<str> },

    #[error("degenerate input: {0}")]
    DegenerateInput(Box<str>),
}

impl StatError {
    pub fn shape(what: &str, expected: usize, found: usize) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected,
            found,
        }
    }

    pub fn missing(dataset: &str, key: impl std::fmt::Display) -> Self {
        Self::MissingKey {
            dataset: dataset.into(),
            key: key.to_string().into_boxed_str(),
        }
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateInput(msg.into().into_boxed_str())
    }
}

/// `anyhow::ensure!` for shapes
pub fn ensure_shape(what: &str, expected: usize, found: usize) -> anyhow::Result<()> {
    if expected != found {
        return Err(StatError::shape(what, expected, found).into());
    }
    Ok(())
}
