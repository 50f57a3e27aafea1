pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod subscriber;

pub use client::Client;
pub use codec::{DecodeMode, FrameCodec};
pub use command::Command;
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use error::Error;
pub use frame::Frame;
pub use subscriber::{Message, Subscriber, SubscriptionListener};

pub type Result<T> = std::result::Result<T, Error>;
