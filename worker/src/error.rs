use thiserror::Error;

/// Errors originating from the worker's own driver loops, as opposed
/// to queue errors, which are propagated from `pagecast_common::error::QueueError`
/// directly.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a queue error occurred: {0}")]
    Queue(#[from] pagecast_common::error::QueueError),

    #[error("failed to initialize the render collaborator: {0}")]
    RendererInit(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
