//! maproom — authoritative real-time session server for a shared virtual
//! tabletop.
//!
//! ARCHITECTURE
//! ============
//! One process owns the in-memory session model (battlemaps, floors, covers,
//! tokens). Clients connect over a single WebSocket endpoint, mutations are
//! validated and applied under one write lock, deltas fan out to every
//! connected client, and a background worker persists full entity snapshots
//! to Postgres without ever blocking the real-time path.

pub mod db;
pub mod protocol;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
