//! Error types for the rendering layer
//!
//! Fallible native calls are wrapped in [`RenderError::Api`]; conditions the
//! caller is expected to recover from (an out-of-date or suboptimal
//! swapchain) are surfaced through `FrameStatus` flags instead and never
//! appear here.

use crate::queue::QueueCapabilities;
use ash::vk;
use thiserror::Error;

/// Rendering layer error types
#[derive(Error, Debug)]
pub enum RenderError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Context or device initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for an allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// No queue family on the device satisfies the requested capabilities
    #[error("No queue with capabilities {capability:?}")]
    MissingQueue {
        /// The capability set that could not be satisfied
        capability: QueueCapabilities,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A fixed-capacity pool has handed out every slot it was sized for
    #[error("Pool capacity exhausted: {capacity} slots")]
    OutOfPoolCapacity {
        /// Total slot count the pool was created with
        capacity: usize,
    },

    /// A handle referenced a resource that was already destroyed
    #[error("Stale resource handle: {kind}")]
    StaleHandle {
        /// Resource kind the handle pointed at
        kind: &'static str,
    },
}

/// Result type for rendering layer operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = RenderError::Api(vk::Result::ERROR_DEVICE_LOST);
        assert!(format!("{err}").contains("ERROR_DEVICE_LOST"));
    }

    #[test]
    fn test_missing_queue_names_capability() {
        let err = RenderError::MissingQueue {
            capability: QueueCapabilities::TRANSFER,
        };
        assert!(format!("{err}").contains("TRANSFER"));
    }

    #[test]
    fn test_pool_capacity_message() {
        let err = RenderError::OutOfPoolCapacity { capacity: 8 };
        assert_eq!(format!("{err}"), "Pool capacity exhausted: 8 slots");
    }
}
