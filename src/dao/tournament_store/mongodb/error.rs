use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Error label attached by the server to writes that lost a transaction race.
const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";
/// Server error code for `WriteConflict`.
const WRITE_CONFLICT_CODE: i32 = 112;
/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: String,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB session/transaction failure")]
    Session {
        #[source]
        source: MongoError,
    },
    #[error("failed to read from `{collection}`")]
    Read {
        collection: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write to `{collection}`")]
    Write {
        collection: String,
        #[source]
        source: MongoError,
    },
    #[error("stored identifier `{value}` is not a UUID")]
    InvalidId {
        value: String,
        #[source]
        source: uuid::Error,
    },
    #[error("transaction conflict on `{key}`")]
    Conflict { key: String },
    #[error("document `{key}` not found")]
    MissingDocument { key: String },
}

impl MongoDaoError {
    /// Classify a failed transactional write, turning lost races into [`MongoDaoError::Conflict`].
    ///
    /// A unique index violation counts as a lost race: another writer inserted the same
    /// `waiting` queue entry first.
    pub fn from_write(collection: &str, key: &str, source: MongoError) -> Self {
        if is_write_conflict(&source) || is_duplicate_key(&source) {
            MongoDaoError::Conflict {
                key: key.to_owned(),
            }
        } else {
            MongoDaoError::Write {
                collection: collection.to_owned(),
                source,
            }
        }
    }

    /// Classify a failed commit.
    pub fn from_commit(source: MongoError) -> Self {
        if is_write_conflict(&source) {
            MongoDaoError::Conflict {
                key: "commit".into(),
            }
        } else {
            MongoDaoError::Session { source }
        }
    }
}

fn is_write_conflict(err: &MongoError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
        || matches!(
            err.kind.as_ref(),
            ErrorKind::Command(command) if command.code == WRITE_CONFLICT_CODE
        )
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}
