//! # ama-server
//!
//! Axum HTTP + `WebSocket` server for live Q&A rooms.
//!
//! - REST endpoints for rooms, messages, reactions and answers
//! - `GET /subscribe/{room_id}` upgrades to a room subscription
//! - Per-room subscriber registry with fire-and-forget broadcast after writes
//! - Graceful shutdown via `CancellationToken`

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ConfigError, ServerSettings};
pub use error::{ApiError, ServerError};
pub use server::{AmaServer, AppState};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
