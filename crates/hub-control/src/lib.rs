//! hub-control - control-plane collaborators for the MCP hub
//!
//! The gateway core only knows the collaborator traits from `hub-core`.
//! This crate supplies the production implementations:
//!
//! - [`ControlPlaneClient`] talks to the management API over HTTP and
//!   implements all five traits, caching registry and flag fetches for a
//!   short TTL.
//! - [`StaticRegistry`] reads backends and features from a TOML file for
//!   deployments without a control plane.
//! - [`TracingToolLog`] writes tool invocations to the log.

mod cache;
mod client;
mod error;
mod log_sink;
mod static_registry;
pub mod wire;

pub use cache::{TtlCache, DEFAULT_TTL};
pub use client::{ControlPlaneClient, ControlPlaneConfig, DEFAULT_API_BASE_URL};
pub use error::{ControlPlaneError, Result};
pub use log_sink::TracingToolLog;
pub use static_registry::StaticRegistry;
