//! # Session Client Library
//!
//! Client-side half of the session server: everything needed to play in a
//! session over UDP without a renderer.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Local input is packaged with a sequence number and applied to our own
//! entity right away. When the server reports which sequence it processed
//! last, the confirmed inputs are dropped and the remaining ones are
//! replayed on top of the server's state. A misprediction is blended out
//! over a few frames instead of snapping.
//!
//! ### Interpolation
//! Every other entity is rendered a fixed buffer behind the newest state so
//! there are usually two real snapshots to blend between.
//!
//! ## Module Organization
//!
//! - `input`: sequencing and confirmation of local input
//! - `interpolation`: per-entity snapshot buffers
//! - `prediction`: replay and correction smoothing for the local entity
//! - `game`: the [`game::ClientWorld`] tying the three together
//! - `network`: headless UDP client
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use arcade_client::game::ClientWorld;
//! use arcade_client::interpolation::InterpolationConfig;
//! use arcade_client::network::{grazer_steering, Client};
//! use arcade_client::prediction::{Predictor, DEFAULT_SMOOTHING_FRAMES};
//! use arcade_shared::JoinRequest;
//! use std::f32::consts::TAU;
//!
//! # async fn play(request: JoinRequest) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let world = ClientWorld::new(
//!     Predictor::new(grazer_steering, DEFAULT_SMOOTHING_FRAMES),
//!     InterpolationConfig::default().angular("heading", TAU),
//! );
//!
//! let mut client = Client::new("127.0.0.1:8080", "grazer", request, world, 0).await?;
//! let exit = client.run(None).await?;
//! println!("stopped: {:?}", exit);
//! # Ok(())
//! # }
//! ```

pub mod game;
pub mod input;
pub mod interpolation;
pub mod network;
pub mod prediction;
