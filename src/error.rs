use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    Mapping,
    NotFound,
    Cancelled,
    Conflict,
    Query,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "Config",
            ErrorKind::Connection => "Connection",
            ErrorKind::Mapping => "Mapping",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Query => "Query",
            ErrorKind::Internal => "Internal",
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

pub fn classify_error(err: &anyhow::Error) -> ErrorKind {
    if let Some(app) = err.downcast_ref::<AppError>() {
        return app.kind;
    }
    if let Some(cmp) = err.downcast_ref::<ComparisonError>() {
        return cmp.kind();
    }
    if let Some(conn) = err.downcast_ref::<ConnectionError>() {
        return conn.kind();
    }
    if let Some(schema) = err.downcast_ref::<SchemaError>() {
        return schema.kind();
    }
    if err.downcast_ref::<RowStreamError>().is_some() {
        return ErrorKind::Query;
    }
    if let Some(job) = err.downcast_ref::<JobError>() {
        return job.kind();
    }
    ErrorKind::Internal
}

/// Failure to establish or validate a database session.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("{connection}: host unreachable: {detail}")]
    Unreachable { connection: String, detail: String },

    #[error("{connection}: authentication rejected: {detail}")]
    AuthRejected { connection: String, detail: String },

    #[error("unsupported database type '{database_type}'")]
    UnsupportedType { database_type: String },
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::UnsupportedType { .. } => ErrorKind::Config,
            _ => ErrorKind::Connection,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("{connection}: table '{table}' not found")]
    TableNotFound { connection: String, table: String },

    #[error("{connection}: catalog query failed: {detail}")]
    QueryFailed { connection: String, detail: String },
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::TableNotFound { .. } => ErrorKind::NotFound,
            SchemaError::QueryFailed { .. } => ErrorKind::Query,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RowStreamError {
    #[error("{connection}: query on '{table}' failed: {detail}")]
    QueryFailed {
        connection: String,
        table: String,
        detail: String,
    },

    #[error("'{table}'.'{column}' at row {row}: cannot read value: {detail}")]
    TypeCoercionFailed {
        table: String,
        column: String,
        row: String,
        detail: String,
    },

    #[error("'{table}': key {key} arrived after {previous}; rows are not in ascending key order")]
    KeyOrderViolated {
        table: String,
        key: String,
        previous: String,
    },

    #[error("'{table}': key {key} is not unique")]
    DuplicateKey { table: String, key: String },
}

#[derive(Debug, Clone, Error)]
pub enum ComparisonError {
    #[error("invalid column mapping: {0}")]
    InvalidMapping(String),

    #[error("comparison cancelled")]
    Cancelled,

    #[error("unknown connection '{0}'")]
    ConnectionNotFound(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Stream(#[from] RowStreamError),
}

impl ComparisonError {
    pub fn invalid_mapping(message: impl Into<String>) -> Self {
        Self::InvalidMapping(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ComparisonError::InvalidMapping(_) => ErrorKind::Mapping,
            ComparisonError::Cancelled => ErrorKind::Cancelled,
            ComparisonError::ConnectionNotFound(_) => ErrorKind::NotFound,
            ComparisonError::Connection(err) => err.kind(),
            ComparisonError::Schema(err) => err.kind(),
            ComparisonError::Stream(_) => ErrorKind::Query,
        }
    }
}

/// Lookups against the job registry.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("job '{0}' is still running")]
    Running(String),

    #[error("job '{0}' was cancelled")]
    Cancelled(String),

    #[error("job '{id}' failed: {message}")]
    Failed {
        id: String,
        kind: ErrorKind,
        message: String,
    },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::NotFound(_) => ErrorKind::NotFound,
            JobError::Running(_) => ErrorKind::Conflict,
            JobError::Cancelled(_) => ErrorKind::Cancelled,
            JobError::Failed { kind, .. } => *kind,
        }
    }
}
