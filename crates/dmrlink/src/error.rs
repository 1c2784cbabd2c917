use thiserror::Error;

/// Errors that stop the relay or one of its startup steps.
#[derive(Error, Debug)]
pub enum DmrlinkError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The network configuration is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// An ACL string in the configuration did not parse.
    #[error("acl error: {0}")]
    Acl(#[from] dmr_common::AclError),
    /// HBP frame encoding or decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] dmr_common::FrameError),
    /// OpenBridge decoding or authentication error.
    #[error("openbridge error: {0}")]
    OpenBridge(#[from] dmr_common::ObpError),
    /// Subscriber map or snapshot serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// A scheduled task failed and the relay must stop.
    #[error("task {task} failed: {reason}")]
    Fatal {
        /// Name of the failing task.
        task: &'static str,
        /// What went wrong.
        reason: String,
    },
}
