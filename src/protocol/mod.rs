//! Wire protocol types.
//!
//! This module defines the frame format exchanged with the server and the
//! event type handed to consumers.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`Frame`] | Both | `{event, payload}` JSON text frame |
//! | `join_room` / `leave_room` | Local → Server | Room membership control |
//! | [`InboundEvent`] | Router → Handlers | Server frame or pseudo-event |
//! | [`PseudoEvent`] | Manager → Handlers | Connectivity change |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame and control frames |
//! | `event` | Inbound and pseudo-events |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound event and pseudo-event types.
pub mod event;

/// Frame wire format.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{
    CONNECTED, DISCONNECTED, InboundEvent, PSEUDO_EVENTS, PseudoEvent, RECONNECT_FAILED,
    RECONNECTING, is_pseudo_event, is_reserved,
};
pub use frame::{Frame, JOIN_ROOM, LEAVE_ROOM, is_control_event};
