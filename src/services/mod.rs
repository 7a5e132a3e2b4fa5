//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the session mutations and persistence concerns so
//! the websocket handler can stay focused on protocol translation and
//! audience selection.

pub mod battlemap;
pub mod broadcast;
pub mod grid;
pub mod persistence;
pub mod presence;
