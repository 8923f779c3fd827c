//! Connection management.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | [`ClientConfig`] and its validating builder |
//! | `backoff` | [`ReconnectPolicy`]: bounded exponential backoff with jitter |
//! | `state` | [`ConnectionState`] |
//! | `manager` | [`ConnectionManager`]: negotiation, reconnection, dispatch |
//! | `facade` | [`RealtimeClient`]: the application-facing API |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect backoff policy.
pub mod backoff;

/// Client configuration.
pub mod config;

/// Public client façade.
pub mod facade;

/// Connection manager.
pub mod manager;

/// Connection state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::ReconnectPolicy;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use facade::{RealtimeClient, RoomMembership, Subscription};
pub use manager::ConnectionManager;
pub use state::ConnectionState;
