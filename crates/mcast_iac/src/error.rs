//! Error types for infrastructure declaration and synthesis.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for IaC operations.
pub type IacResult<T> = Result<T, IacError>;

/// Errors that can occur while declaring or synthesizing stacks.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("Unable to read UserData script {path:?}: {source}")]
    Bootstrap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid Transit Gateway ASN {0}: must be in 64512-65534 or 4200000000-4294967294")]
    InvalidAsn(u32),

    #[error("Multicast domain needs at least {required} private subnets, network has {found}")]
    InsufficientSubnets { required: usize, found: usize },

    #[error("Invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("Address space exhausted: cannot carve {count} /{prefix} subnets from {cidr}")]
    AddressSpaceExhausted { cidr: String, prefix: u8, count: usize },

    #[error("Invalid logical ID: {0}")]
    InvalidLogicalId(String),

    #[error("Invalid stack name: {0}")]
    InvalidStackName(String),

    #[error("Duplicate resource {logical_id} in stack {stack}")]
    DuplicateResource { stack: String, logical_id: String },

    #[error("Reference to undeclared resource {logical_id} in stack {stack}")]
    DanglingReference { stack: String, logical_id: String },

    #[error("Unknown stack referenced: {0}")]
    UnknownStack(String),

    #[error("Stack dependency cycle involving: {0}")]
    DependencyCycle(String),

    #[error("Deployment validation failed: {0}")]
    ValidationFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
