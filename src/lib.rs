//! A lock-free, linearizable concurrent hash map built around a single
//! open-addressed slot array and cooperative incremental migration: no
//! operation ever blocks on a resize, because every thread that touches a
//! table mid-migration helps copy a chunk of it before doing its own work.
//!
//! The map is exposed through [`Map`]; `Map::pin` hands back an epoch
//! guard that borrowed references (`get`, `insert`'s previous value, ...)
//! stay valid for.

mod counter;
mod error;
mod map;
mod sync;
mod table;

pub use error::{MapError, MapResult};
pub use map::{Map, MapConfig, Match, Specialization};
pub use table::hash::{KeyCapability, StdCapability};
