//! webtime Protocol - Wire protocol for daemon communication
//!
//! This crate provides the newline-delimited JSON messages exchanged between
//! the daemon and its two kinds of clients: browser hosts, which report tab,
//! focus and idle events and receive rule/notification directives, and the
//! presentation layer, which issues control requests. It also defines the
//! versioned export document used for backup and restore.

pub mod message;
pub mod snapshot;
pub mod version;

pub use message::{
    ClientMessage, DaemonMessage, ErrorCode, FocusState, IdleState, MessageType, TrackingView,
};
pub use snapshot::{Snapshot, SnapshotData, SnapshotError, SNAPSHOT_VERSION};
pub use version::{ProtocolVersion, VersionError};
