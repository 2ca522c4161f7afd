#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} client is not initialized")]
    ServiceUnavailable(&'static str),

    #[error("failed to fetch message {id}: {source}")]
    RemoteFetch {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("remote update failed for message {id}: {source}")]
    RemoteMutation {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("message {id} was trashed remotely but is still cached locally: {source}")]
    LocalInconsistency {
        id: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("inference error: {0}")]
    Inference(#[source] anyhow::Error),

    #[error("vector dimension mismatch: query has {query}, stored vector has {stored}")]
    DimensionMismatch { query: usize, stored: usize },

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("background queue is closed")]
    QueueClosed,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
