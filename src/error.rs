//! Error types for synthesizing and deploying a hosted site

use std::path::PathBuf;

use thiserror::Error;

/// Errors caught locally, before any provisioning call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid domain configuration: {0}")]
    InvalidDomainConfig(String),

    #[error("Invalid bucket name {name:?}\n{reason}")]
    InvalidBucketName { name: String, reason: String },

    #[error("Invalid stack context: {0}")]
    InvalidStackContext(String),

    #[error("Invalid site configuration: {0}")]
    InvalidSiteConfig(String),

    #[error("Web asset path {0:?} does not exist or is not a directory")]
    AssetPathNotFound(PathBuf),

    #[error("Resource with logical id '{0}' was declared twice")]
    DuplicateResource(String),

    #[error("Resource '{0}' is part of a dependency cycle")]
    DependencyCycle(String),

    #[error("Failed to parse {what}\n{message}")]
    Parse { what: String, message: String },

    #[error("Failed to read {path:?}\n{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize template\n{0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced while talking to the provisioning engine.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Hosted zone '{0}' was not found in this account")]
    ZoneNotFound(String),

    #[error("{operation} failed\n{message}")]
    Aws { operation: &'static str, message: String },

    #[error("Stack {stack} failed: {reason}")]
    StackFailed { stack: String, reason: String },

    #[error("Stack {stack} is missing output '{output}'")]
    MissingOutput { stack: String, output: String },

    #[error("Failed to read asset {path:?}\n{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    /// wraps any sdk error. the debug representation is kept because the
    /// display impl of sdk errors usually hides the service message.
    pub fn aws<E: std::fmt::Debug>(operation: &'static str, err: E) -> Self {
        DeployError::Aws { operation, message: format!("{:#?}", err) }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DeployResult<T> = Result<T, DeployError>;
