//! Exposes the deimos error type.
//!
//! Only recoverable conditions appear here; invariant violations (writing an immutable
//! resource after initialisation, decoding a handle with unknown type bits, disposing a
//! resource twice, slicing out of range) are programmer errors and panic at the site of
//! the violation instead.

use thiserror::Error;

/// Error type that deimos can return.
#[derive(Error, Debug)]
pub enum Error {
    /// The backend failed to allocate memory for a resource. The frame that triggered the
    /// allocation is skipped.
    #[error("Backend failed to materialise resource: `{0}`")]
    AllocationFailed(String),
    /// Command buffer submission failed. Reported through the completion callback of the
    /// affected command buffer as well.
    #[error("Command buffer submission failed: `{0}`")]
    SubmitFailed(String),
    /// Pass dependencies contain a cycle and no valid execution order exists.
    #[error("Pass graph contains a cycle.")]
    GraphHasCycle,
    /// No queue was registered for the requested queue type. Did you forget to request it?
    #[error("No queue registered for the requested queue type.")]
    NoCapableQueue,
    /// CPU access was requested on a buffer without host-visible backing memory.
    #[error("Buffer does not have host visible memory and cannot be mapped.")]
    UnmappableBuffer,
    /// A single upload exceeds the uploader's whole byte budget and can never be staged.
    #[error("Upload of {requested} bytes exceeds the staging budget of {budget} bytes.")]
    UploadTooLarge {
        requested: u64,
        budget: u64,
    },
    /// An operation was attempted through an invalid handle.
    #[error("Operation on an invalid resource handle.")]
    InvalidHandle,
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}
