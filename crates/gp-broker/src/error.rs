use thiserror::Error;

use crate::destination::DestinationKind;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connect(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Destination '{name}' is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: DestinationKind,
        actual: DestinationKind,
    },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}
