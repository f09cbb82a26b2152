//! Caravan - multi-city campaign orchestration with live telemetry.
//!
//! # Overview
//!
//! Caravan runs many concurrent "campaigns", each bound to a city-scoped
//! browsing identity, and pushes their live status to any number of
//! observers over a persistent WebSocket channel. The core is deliberately
//! small: it manages identities, campaign lifecycle and telemetry fan-out,
//! and treats the workers doing the actual per-campaign work as opaque
//! external processes.
//!
//! # Guarantees
//!
//! - One immutable identity per city; campaigns for unknown cities are
//!   rejected, never defaulted.
//! - All campaign mutations are serialized behind a single registry lock,
//!   and telemetry events are published atomically with the mutation they
//!   describe.
//! - A slow or dead observer can never stall the core or other observers;
//!   it loses old events and resyncs with a fresh snapshot on reconnect.
//! - Campaign records survive backend restarts via write-behind SQLite
//!   persistence.
//!
//! # Modules
//!
//! - [`model`]: shared data types and wire shapes
//! - [`identity`]: per-city identity store
//! - [`registry`]: campaign lifecycle registry
//! - [`telemetry`]: observer fan-out channel and reconnect contract
//! - [`stats`]: rollup counter aggregation
//! - [`worker`]: external worker boundary
//! - [`storage`]: SQLite persistence for restart recovery
//! - [`orchestrator`]: composition root
//! - [`api`]: HTTP handlers and the telemetry WebSocket

pub mod api;
pub mod identity;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod stats;
pub mod storage;
pub mod telemetry;
pub mod worker;
