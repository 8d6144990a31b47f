//! BirdNET Bridge Library
//!
//! Read-only bridge from a BirdNET detections database to a REST query API
//! and an MQTT stream of newly-appeared detections.
//!
//! ## Architecture
//!
//! 1. SchemaAdapter - detects the physical layout (V2 / Legacy) and maps rows
//! 2. DetectionRepository - read-only query surface over the adapted schema
//! 3. CursorStore - durable last-delivered-id, survives restarts
//! 4. ChangeTracker / BridgeLoop - poll, deliver in order, advance the cursor
//! 5. Publisher - MQTT delivery with its own reconnect policy
//! 6. WebAPI - REST endpoints over DetectionRepository
//!
//! ## Design Principles
//!
//! - The source database is never written; it belongs to the producer
//! - The detection id is the only ordering key; timestamps are display-only
//! - The cursor advances only after confirmed delivery, durably first

pub mod bridge_loop;
pub mod cursor_store;
pub mod detection_repository;
pub mod error;
pub mod models;
pub mod publisher;
pub mod schema_adapter;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
