//! Maker-checker change control
//!
//! Proposals are stored as pending changes; the engine drives their single
//! review transition and applies approved ones.

mod apply;
mod engine;
mod models;
mod postgres;
mod store;

pub use engine::{ChangeControlEngine, EngineOptions, PENDING_CHANGE_ENTITY};
pub use models::*;
pub use postgres::PgPendingChangeStore;
pub use store::{InMemoryPendingChangeStore, PendingChangeStore};
