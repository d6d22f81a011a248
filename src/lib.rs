//! # liftrelay - Relay bridge for time-travel stores
//!
//! liftrelay connects a lifted store (one that records every dispatched action
//! and the state computed from it) to an external observer that can only be
//! reached through structured message passing. It forwards history to the
//! observer and applies the observer's replay, import, and control commands.
//!
//! ## Core Concepts
//!
//! - **Bridge**: owns one relay session; instruments a store and pumps commands
//! - **FilterRule**: allow/deny patterns deciding which actions are exposed
//! - **SerializationGate**: falls back to encoded payloads once a value cannot
//!   be carried natively, and stays there
//! - **HistoryTracker**: the sticky excess flag and the error latch
//! - **Transport**: the message boundary between the page and the observer
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use liftrelay::{Bridge, BridgeConfig, LocalTransport};
//!
//! let transport = Arc::new(LocalTransport::new());
//! let bridge = Bridge::builder(transport)
//!     .config(BridgeConfig::new().with_name("counter").with_blacklist(["TICK"]))
//!     .build()?;
//!
//! bridge.enhance(store)?;
//! loop {
//!     bridge.pump();
//!     bridge.run_deferred()?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod action;
pub mod error;
pub mod history;

// Configuration and filtering
pub mod config;
pub mod filter;

// Wire protocol
pub mod codec;
pub mod protocol;
pub mod transport;

// Relay session
pub mod bridge;
pub mod env;
pub mod gate;
pub mod relay;
pub mod store;
pub mod tracker;

pub use action::{Action, INIT_ACTION, IMPORT_STATE, PERFORM_ACTION, STORE_INIT_ACTION};
pub use bridge::{Attachment, Bridge, BridgeBuilder, Phase};
pub use config::{AllowAll, BridgeConfig, DenyAll, GlobalOptions, OptionsSource, Permission, SharedOptions};
pub use env::{Environment, LifecycleHooks, StaticEnvironment};
pub use error::{CodecError, ConfigError, RelayError, RelayResult, TransportError};
pub use filter::{is_excluded, project_history, FilterRule};
pub use gate::{Delivery, GateState, SerializationGate};
pub use history::{ActionId, ComputedState, HistoryRecord, LiftedActionEntry};
pub use protocol::{InboundCommand, MessageKind, RelayMessage, Wire, PAGE_SOURCE, PEER_SOURCE};
pub use relay::{Outbound, RelayChannel};
pub use store::{LiftedStore, StoreObserver};
pub use tracker::HistoryTracker;
pub use transport::{ContextId, InboundEvent, Listener, ListenerId, LocalTransport, Transport};
