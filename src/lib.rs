//! Spotdrain: drains the local Nomad node when its EC2 spot instance is
//! about to be reclaimed.
//!
//! The daemon checks once that it runs on spot capacity and that the
//! instance is a registered Nomad node, then polls the instance metadata
//! service for an interruption notice. The first notice triggers a node
//! drain and a Datadog event, after which the process exits.

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod metadata;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;
pub mod types;

pub use crate::error::{Error, Result};
pub use crate::lifecycle::{Controller, ControllerSettings, ExitStatus, Outcome};
