//! # mentorlink-core
//!
//! Connection tracking, room membership, and message routing for the
//! mentorlink realtime gateway.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionRegistry** - At-most-one live connection per identity
//! - **RoomManager** - Ephemeral named groups, deleted when empty
//! - **Router** - Inbound dispatch and outbound send operations
//! - **Identity traits** - Collaborator boundaries for credential
//!   verification and profile lookup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │  Connection │────▶│   Router    │────▶│ ConnectionRegistry│
//! └─────────────┘     └─────────────┘     └──────────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ RoomManager │
//!                     └─────────────┘
//! ```

pub mod identity;
pub mod registry;
pub mod rooms;
pub mod router;

pub use identity::{
    AuthError, DirectoryError, IdentityVerifier, ProfileDirectory, Role, VerifiedIdentity,
};
pub use registry::{
    ConnectionHandle, ConnectionRegistry, Outbound, OutboundReceiver, OutboundSender, SendOutcome,
};
pub use rooms::RoomManager;
pub use router::{GatewayStats, Router};
