#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    AllBatchesFailed {
        label: String,
        batches: usize,
        last_error: Option<String>,
    },
    Combination {
        label: String,
        reason: String,
    },
    AllFoldsFailed {
        folds: usize,
    },
    MissingEntities(Vec<String>),
    MissingColumns(Vec<String>),
    UnknownEntity(String),
    InvalidInput(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::AllBatchesFailed {
                label,
                batches,
                last_error,
            } => {
                write!(f, "all {batches} batch(es) failed for fit '{label}'")?;
                if let Some(err) = last_error {
                    write!(f, " (last error: {err})")?;
                }
                Ok(())
            }
            PipelineError::Combination { label, reason } => {
                write!(f, "failed to combine batch results for fit '{label}': {reason}")
            }
            PipelineError::AllFoldsFailed { folds } => {
                write!(f, "cross-validation failed: all {folds} fold(s) failed")
            }
            PipelineError::MissingEntities(ids) => {
                write!(f, "missing required entities: {}", ids.join(", "))
            }
            PipelineError::MissingColumns(cols) => {
                write!(f, "missing required columns: {}", cols.join(", "))
            }
            PipelineError::UnknownEntity(id) => {
                write!(f, "entity '{id}' has no metadata in the entity catalog")
            }
            PipelineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<PipelineError> for String {
    fn from(err: PipelineError) -> Self {
        err.to_string()
    }
}
