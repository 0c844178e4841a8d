//! Renderer error types.

use ash::vk;
use thiserror::Error;

/// Errors that can occur while building or driving the renderer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Any device, memory, view, pipeline or layout creation call failed.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    #[error("out of device memory: {0}")]
    OutOfDeviceMemory(String),
    /// Upload command recording, submission or fence wait failed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),
    /// Acquire or present reported a suboptimal or out-of-date surface.
    #[error("surface is stale and must be recreated")]
    SurfaceStale,
    /// Frame submission, presentation or a frame fence wait failed.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    #[error("asset load failed: {0}")]
    AssetLoadFailed(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Only a stale surface is retried; everything else unwinds to the top level.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SurfaceStale)
    }

    /// Map a failed creation call, keeping memory exhaustion distinguishable.
    pub fn creation(what: &str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfDeviceMemory(format!("{what}: {result:?}"))
            }
            _ => Self::ResourceCreationFailed(format!("Failed to create {what}: {result:?}")),
        }
    }

    pub fn transfer(what: &str, result: vk::Result) -> Self {
        Self::TransferFailed(format!("{what}: {result:?}"))
    }

    pub fn submission(what: &str, result: vk::Result) -> Self {
        Self::SubmissionFailed(format!("{what}: {result:?}"))
    }

    pub fn allocation(what: &str, error: gpu_allocator::AllocationError) -> Self {
        match error {
            gpu_allocator::AllocationError::OutOfMemory => {
                Self::OutOfDeviceMemory(format!("allocating {what}"))
            }
            other => {
                Self::ResourceCreationFailed(format!("Failed to allocate memory for {what}: {other}"))
            }
        }
    }
}
