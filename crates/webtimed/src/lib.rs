//! webtime daemon - per-site time tracking and limit enforcement
//!
//! - `engine` - single-owner actor holding the session, policy cache and
//!   reminder state
//! - `store` - SQLite persistence behind the [`store::Store`] trait
//! - `host` - side effects requested from the browser host
//! - `server` - Unix socket server for hosts and the control surface
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      webtimed                            │
//! │                                                          │
//! │  ┌───────────────┐   EngineCommand   ┌────────────────┐  │
//! │  │ DaemonServer  │──────────────────▶│  EngineActor   │  │
//! │  │ (Unix socket) │                   │                │  │
//! │  └───────▲───────┘                   └───┬────────┬───┘  │
//! │          │ HostDirective                 │        │      │
//! │          │                               ▼        ▼      │
//! │  ┌───────┴───────┐               ┌─────────┐ ┌─────────┐ │
//! │  │  broadcaster  │◀──────────────│  Host   │ │  Store  │ │
//! │  └───────────────┘               └─────────┘ └─────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//!   outside tests
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cli;
pub mod config;
pub mod engine;
pub mod host;
pub mod server;
pub mod store;
