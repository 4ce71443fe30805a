//! # Session Server Library
//!
//! This library hosts authoritative multiplayer sessions for small arcade
//! games. A game is described once as a [`GameDefinition`](definition::GameDefinition)
//! (tick rate, capacity, bot seats and lifecycle hooks) and the server runs
//! any number of independent sessions of it, each keyed by the world and
//! scene its players arrive from.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Each session owns its entities and players. Inputs are queued per player
//! in sequence order and applied at the start of the next tick, or right
//! away for event-driven games that have no tick rate.
//!
//! ### Admission
//! Joins carry a set of string fields that are validated into a
//! [`JoinRequest`](arcade_shared::JoinRequest) before a session is looked up
//! or created. Capacity only counts humans; bots make room for them.
//!
//! ### Bots
//! Sessions below their fill target get bot players whose behaviors produce
//! input through the same path human input takes.
//!
//! ### Deferred Effects
//! Rewards, records and effects on the host platform are queued on a
//! per-session [`DeferQueue`](defer::DeferQueue) with retries, keeping slow
//! external calls off the tick.
//!
//! ## Architecture Design
//!
//! ### One Task per Session
//! A session is owned by a single tokio task and driven through a command
//! channel ([`rooms::SessionHandle`]). Hook failures and panics are logged
//! and contained to the hook that raised them.
//!
//! ### UDP-Based Communication
//! [`network::Server`] receives bincode packets on one UDP socket, routes
//! them to sessions and broadcasts each session's state snapshots to the
//! addresses playing in it.
//!
//! ## Module Organization
//!
//! - `schema`-backed entities: [`entity`] and [`collection`]
//! - Players and input queues: [`player`]
//! - Game description: [`definition`], bots in [`bot`]
//! - Runtime: [`session`], [`rooms`], [`network`]
//! - External effects: [`defer`], [`platform`]
//! - Testing: [`harness`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use arcade_server::games::grazer::{self, GrazerSettings};
//! use arcade_server::network::Server;
//! use arcade_server::platform::LoggingPlatform;
//! use arcade_server::rooms::RoomDirectory;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let (mut directory, events) = RoomDirectory::new();
//!     directory.register_game(
//!         grazer::definition(GrazerSettings::default())?,
//!         Arc::new(LoggingPlatform::default()),
//!     );
//!
//!     let mut server = Server::new("127.0.0.1:8080", directory, events, Duration::from_secs(5)).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod collection;
pub mod defer;
pub mod definition;
pub mod entity;
pub mod games;
pub mod harness;
pub mod network;
pub mod platform;
pub mod player;
pub mod rooms;
pub mod session;
