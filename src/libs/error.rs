use thiserror::Error as ThisError;

pub type OrmResult<T> = Result<T, OrmError>;

pub type DriverResult<T> = Result<T, StorageError>;

///
/// DefinitionError
///
/// Raised while declaring fields; fatal to that declaration only.
///

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("unknown field kind `{0}`")]
    UnknownKind(String),

    #[error("unknown key role `{0}`")]
    UnknownKeyRole(String),
}

///
/// CallerError
///
/// Invalid arguments handed to the core. Never retried.
///

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum CallerError {
    #[error("record type `{0}` has not been compiled")]
    UnknownRecordType(String),

    #[error("record type `{record}` has no field `{field}`")]
    UnknownField { record: String, field: String },

    #[error("record type `{record}` has no relation `{relation}`")]
    UnknownRelation { record: String, relation: String },

    #[error("primary key `{field}` of `{record}` cannot be assigned directly")]
    PrimaryKeyImmutable { record: String, field: String },

    #[error("relation `{relation}` is {actual}, not {expected}")]
    RelationKindMismatch {
        relation: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("many-to-many relation `{0}` cannot be resolved")]
    UnsupportedRelation(String),

    #[error("delete_all requires a non-empty list of ids")]
    EmptyIdList,

    #[error("delete_all requires a sequence of ids, got {0}")]
    NotASequence(String),

    #[error("invalid record identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("invalid ordering `{0}`")]
    InvalidOrdering(String),

    #[error("record data must be a mapping of field names to values, got {0}")]
    InvalidRecordData(String),

    #[error("filter must be a mapping of field names to values, got {0}")]
    InvalidFilter(String),
}

///
/// StorageError
///
/// Anything that went wrong below the core, inside the storage driver.
///

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("cannot decode column `{column}`: {reason}")]
    Decode { column: String, reason: String },

    #[error("insert into `{0}` did not yield a generated key")]
    MissingGeneratedKey(String),

    #[error("row of `{record}` cannot be turned into a record: {reason}")]
    InvalidRow { record: String, reason: String },

    #[error("driver returned a dry-run statement for a live call")]
    UnexpectedDryRun,

    #[error("driver executed a statement requested as dry-run")]
    UnexpectedExecution,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

///
/// OrmError
///

#[derive(Debug, ThisError)]
pub enum OrmError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Caller(#[from] CallerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Sqlx(err))
    }
}

impl OrmError {
    /// True for failures that originate in the storage driver.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
