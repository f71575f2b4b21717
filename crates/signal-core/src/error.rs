use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
