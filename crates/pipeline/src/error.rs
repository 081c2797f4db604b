//! Error types for the pipeline builder

use std::fmt;
use thiserror::Error;

use crate::state::State;

/// Which side of an adjacent pair could not be resolved while linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Source,
    Child,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Source => f.write_str("source"),
            LinkRole::Child => f.write_str("child"),
        }
    }
}

/// Failure reported by the media runtime itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Pipeline-specific error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage not found: {name}")]
    StageNotFound { name: String },

    #[error("Failed to link stages: could not find {role} stage by name: {name}")]
    UnresolvedLink { role: LinkRole, name: String },

    #[error("Stage '{name}' already exists in the pipeline")]
    DuplicateStage { name: String },

    #[error("Failed to create stage '{name}' of type '{stage_type}': {source}")]
    Construction {
        stage_type: String,
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to parse filter for stage '{name}' from '{spec}': {source}")]
    FilterParse {
        name: String,
        spec: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to link {src} to {dst}{}: {source}", filter_suffix(.filter))]
    Link {
        src: String,
        dst: String,
        filter: Option<String>,
        #[source]
        source: BackendError,
    },

    #[error("Failed to set property '{property}' on stage '{stage}': {source}")]
    Property {
        stage: String,
        property: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to connect signal '{signal}' on stage '{stage}': {source}")]
    Signal {
        stage: String,
        signal: String,
        #[source]
        source: BackendError,
    },

    #[error("State change of '{target}' to {state} was rejected: {source}")]
    StateChange {
        target: String,
        state: State,
        #[source]
        source: BackendError,
    },

    #[error("Failed to place pipeline '{name}' in an outer container: {source}")]
    ContainerAdd {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("Runtime initialization failed: {0}")]
    Init(BackendError),

    #[error("Pipeline was created without a main loop")]
    NoMainLoop,

    #[error("Invalid pipeline configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Invalid property value: {message}")]
    InvalidValue { message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn filter_suffix(filter: &Option<String>) -> String {
    match filter {
        Some(caps) => format!(" with caps: {caps}"),
        None => String::new(),
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
