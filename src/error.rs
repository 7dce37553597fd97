use {
    crate::{Interval, runtime::NodeId},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ChunkError {
    /// Interval with `from > to`.
    #[error("Invalid range: [{from},{to})")]
    InvalidRange { from: i64, to: i64 },

    /// Inserted range overlaps a range which is already present.
    #[error("Range {inserted} overlaps existing range {existing}")]
    Overlap { existing: Interval, inserted: Interval },

    /// Access outside of a range, view or list.
    #[error("Index {0} is out of range")]
    IndexOutOfRange(i64),

    /// Required input is missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Range overlaps a range already staged for relocation.
    #[error("Range {requested} conflicts with staged range {staged}")]
    Conflict { staged: Interval, requested: Interval },

    /// One-sided manager asked to ship to a node it is not bound to.
    #[error("Destination {requested} is not authorized, manager is bound to {bound}")]
    UnauthorizedDestination { bound: NodeId, requested: NodeId },

    /// One or more tasks failed, all causes are preserved.
    #[error("{} task(s) failed", .0.len())]
    AggregatedTask(Vec<ChunkError>),

    /// Worker task panicked.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Peer or channel is gone.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ChunkError {
    /// Folds collected failures into a single result.
    ///
    /// No failures means success, otherwise all of them are wrapped into
    /// [`ChunkError::AggregatedTask`].
    pub fn aggregate(errors: Vec<ChunkError>) -> ChunkResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ChunkError::AggregatedTask(errors))
        }
    }

    /// Returns the underlying causes, flattening nested aggregates.
    pub fn causes(&self) -> Vec<&ChunkError> {
        match self {
            ChunkError::AggregatedTask(errors) => errors.iter().flat_map(|e| e.causes()).collect(),
            other => vec![other],
        }
    }
}

pub type ChunkResult<T> = Result<T, ChunkError>;
