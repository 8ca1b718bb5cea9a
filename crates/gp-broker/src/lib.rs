//! Broker connection abstraction and pub/sub wrappers.
//!
//! Every service talks to the message broker through this crate:
//! - [`BrokerConnection`] owns one connection+channel pair with a fallback to a
//!   process-local in-memory broker when the network broker is unreachable.
//! - [`Publisher`] sends text payloads to a named [`Destination`].
//! - [`Subscriber`] registers an async [`MessageHandler`] invoked per inbound
//!   message on a dedicated delivery task.
//! - [`stage`] carries the stage-change event contract between services.
//!
//! Delivery is best-effort, at-most-once: messages are non-persistent and a
//! topic message published while nobody is listening is simply lost.

mod connection;
mod destination;
mod error;
mod inproc;
mod publisher;
mod subscriber;

pub mod stage;

pub use connection::{BrokerConnection, ConnectionState};
pub use destination::{Destination, DestinationKind};
pub use error::BrokerError;
pub use publisher::Publisher;
pub use stage::{observe_stage, CurrentStage, StageBroadcaster, StageObserver};
pub use subscriber::{InboundMessage, MessageHandler, Subscriber};

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broadcast destination carrying stage-change events.
pub const STAGE_TOPIC: &str = "stage";

/// Point-to-point destination feeding the alert fan-out process.
pub const ALERT_QUEUE: &str = "alert";

/// Sentinel broker URI selecting the in-process broker. Any other value is
/// treated as a literal AMQP URI.
pub const LOCAL_BROKER_URI: &str = "local";
