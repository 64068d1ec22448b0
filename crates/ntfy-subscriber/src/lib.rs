//! ntfy real-time subscriber with command dispatch.
//!
//! Subscribes to one ntfy topic over WebSocket and routes each notification
//! to user handlers:
//!
//! - **parsers** run for every notification, in registration order;
//! - **commands** run when the first word of the message matches their
//!   name, receiving the remaining words as arguments.
//!
//! # Features
//! - Bearer-token or basic authentication
//! - Automatic reconnection with capped exponential backoff
//! - Keepalive-based connection liveness detection
//! - Optional replay of messages missed while reconnecting (`since=`)
//! - Handler failures, panics and timeouts are contained and logged
//! - Built-in handlers that run allow-listed programs
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), ntfy_subscriber::Error> {
//! use ntfy_subscriber::{Client, ClientConfig};
//!
//! let client = Client::new(ClientConfig::new("ntfy.sh", "my-topic", "tk_mytoken"))?;
//!
//! client.registry().register_parser("log", |n| {
//!     println!("{}: {}", n.id, n.message);
//!     Ok(())
//! });
//! client.registry().register_command("ping", |args, n| {
//!     println!("ping from {} with {args:?}", n.id);
//!     Ok(())
//! });
//!
//! // Runs until `client.stop()` is called from another task.
//! client.start().await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod connection;
mod dispatch;
pub mod protocol;
mod registry;
mod shell;
mod tokenize;
mod types;

pub use client::Client;
pub use dispatch::{DispatchSummary, Dispatcher};
pub use protocol::{Frame, decode, decode_frame};
pub use registry::{Command, Parser, Registry};
pub use shell::{ShellAlias, ShellCommand};
pub use tokenize::{CommandLine, tokenize};
pub use types::{
    BoxError, ClientConfig, ConnectionState, Credential, DecodeError, Error, Notification,
    TimingConfig,
};
