use serde_json::json;

/// Failures that reject a submission as a whole. Row-level problems never
/// surface here; they become `RowError`s.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("batch size exceeds {max} records")]
    BatchTooLarge { count: usize, max: usize },

    #[error("batch payload is too large")]
    PayloadTooLarge { bytes: usize, max: usize },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::BatchTooLarge { .. } => "batch_too_large",
            PipelineError::PayloadTooLarge { .. } => "payload_too_large",
            PipelineError::Database(_) => "db_query_failed",
            PipelineError::Serialize(_) => "internal",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            PipelineError::BatchTooLarge { count, max } => {
                Some(json!({ "count": count, "max": max }))
            }
            PipelineError::PayloadTooLarge { bytes, max } => {
                Some(json!({ "bytes": bytes, "max": max }))
            }
            _ => None,
        }
    }
}
