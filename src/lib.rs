#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod token;
pub mod transport;

use crate::error::Error;

pub use self::backoff::BackoffPolicy;
pub use self::config::{Config, ReconnectConfig};
pub use self::endpoint::{Endpoint, EndpointResolver};
pub use self::gateway::{Delegate, GatewayConnection, Phase};
pub use self::protocol::{Envelope, Identify, Intents, OpCode};
pub use self::transport::{ConnectionState, EventSink, Transport, TransportEvent};
#[cfg(feature = "ws")]
pub use self::transport::TungsteniteTransport;

pub type Result<T> = std::result::Result<T, Error>;
