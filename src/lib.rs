// MIT License - Copyright (c) 2026 Peter Wright
// Cloud relay for remote security panel sites
//
//! # sec-ctl
//!
//! Server side of a remote alarm-panel service. Each site runs a small
//! agent next to its panel that keeps one TCP connection open to the
//! cloud. Over that connection the site reports its state and events, and
//! receives user commands.
//!
//! The crate provides:
//!
//! - the wire codec ([`protocol`], [`transport`]) and the tagged messages
//!   carried in it ([`message`]);
//! - [`SiteConnection`], one live session per site;
//! - [`SiteRegistry`], which tracks live sessions and relays commands to
//!   whichever process holds them via a [`CommandRelay`];
//! - [`Store`], durable users, sites, tokens and event logs on SQLite.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sec_ctl::{MemoryRelay, SiteRegistry, SiteServer, SqliteStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::connect("sqlite://sec-ctl.db").await?);
//!     let registry = SiteRegistry::start(store.clone(), Arc::new(MemoryRelay::new())).await?;
//!     let server =
//!         SiteServer::bind("0.0.0.0:9754", registry.clone(), store, Duration::from_secs(10))
//!             .await?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(server.run(cancel.clone()));
//!
//!     tokio::signal::ctrl_c().await?;
//!     cancel.cancel();
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod command;
pub mod config;
pub mod connection;
pub mod constants;
pub mod devices;
pub mod error;
pub mod event;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use auth::{Subject, SubjectKind};
pub use command::{PanicTarget, UserCommand, UserCommandCode};
pub use config::CloudConfig;
pub use connection::{ConnectionState, SiteConnection};
pub use devices::{Partition, PartitionStatus, StateChange, SystemState, Zone, ZoneStatus};
pub use error::{Result, SecCtlError};
pub use event::{Event, EventLevel};
pub use message::{ControlMessage, SiteMessage};
pub use protocol::Frame;
pub use registry::SiteRegistry;
pub use relay::{CommandRelay, MemoryRelay, MqttRelay, MqttRelayOptions, RelaySubscription};
pub use server::SiteServer;
pub use store::{Site, SiteEvent, SqliteStore, Store, User};
pub use transport::{FrameReader, MessageReader, MessageWriter};
