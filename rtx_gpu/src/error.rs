use ash::vk;
use std::{io, path::PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced while setting up scenes and ray tracing pipelines.
///
/// None of these are retried. Anything created before the failure is released
/// by its owner and the caller is expected to abort the load.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{call} failed for {name}: {result}")]
    BackendCreateFailure {
        call: &'static str,
        name: String,
        result: vk::Result,
    },

    #[error("{call} ran out of resources for {name}")]
    ResourceExhaustion { call: &'static str, name: String },

    #[error("no physical device supports ray tracing")]
    NoSuitableDevice,

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("mesh {mesh} has invalid geometry: {reason}")]
    InvalidGeometry { mesh: String, reason: String },

    #[error("building mesh {index} failed: {source}")]
    Mesh {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("could not read shader {path:?}: {source}")]
    ShaderResource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn backend(call: &'static str, name: impl Into<String>, result: vk::Result) -> Self {
        let name = name.into();
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_TOO_MANY_OBJECTS => Error::ResourceExhaustion { call, name },
            result => Error::BackendCreateFailure { call, name, result },
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Error::PreconditionViolation(message.into())
    }

    /// The backend call that failed, looking through mesh wrappers.
    pub fn failed_call(&self) -> Option<&'static str> {
        match self {
            Error::BackendCreateFailure { call, .. } | Error::ResourceExhaustion { call, .. } => {
                Some(call)
            }
            Error::Mesh { source, .. } => source.failed_call(),
            _ => None,
        }
    }
}
