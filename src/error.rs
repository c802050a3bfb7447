use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum FleetError {
    #[error("Delivery channel closed")]
    ChannelClosed,

    #[error("WebSocket transport error: {0}")]
    Transport(String),

    #[error("Send retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
