use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Document '{0}' has no pages")]
    EmptyDocument(String),

    #[error("Processing already started for document '{0}'")]
    AlreadyStarted(String),

    #[error("Document '{document_id}' is {status}, expected {expected}")]
    NotReady {
        document_id: String,
        status: String,
        expected: String,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{job_id}' is {status}, only pending jobs can be submitted")]
    NotPending { job_id: String, status: String },

    #[error("Dispatcher is shut down")]
    Shutdown,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Stage '{stage}' failed: {reason}")]
    Failed { stage: String, reason: String },

    #[error("Worker request failed: {0}")]
    Http(String),

    #[error("Worker returned an invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, StructaError>;
