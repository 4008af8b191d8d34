//! hub-core - Core types and traits for the MCP hub
//!
//! This crate provides the pieces every other hub crate agrees on:
//!
//! - [`protocol`]: JSON-RPC envelopes and the MCP result shapes the gateway
//!   rewrites or forwards
//! - [`descriptor`]: backend descriptors and the session keys derived from them
//! - [`routing`]: namespacing of backend-native names
//! - [`collaborators`]: the narrow traits through which the gateway talks to
//!   its registry, feature flags, telemetry and log sinks
//! - [`error`]: the gateway error taxonomy
//! - [`testing`]: in-memory collaborators for tests

pub mod collaborators;
pub mod descriptor;
pub mod error;
pub mod protocol;
pub mod routing;
pub mod testing;

pub use collaborators::{
    BackendRegistry, Disabled, FeatureFlags, GatewayFeature, InactiveFlagSet, InactiveTools,
    TelemetrySink, ToolLogSink, ToolReport,
};
pub use descriptor::{BackendDescriptor, BackendStatus, SessionKey, TransportSpec};
pub use error::{GatewayError, GatewayResult, TargetKind};
pub use protocol::*;
