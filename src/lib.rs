//! Poll voting with one active vote per identity, admin release, and an
//! append-only audit trail.
//!
//! [`engine::VotingEngine`] is the only writer. It runs against any
//! [`store::Store`]: [`memory::MemoryStore`] for tests and local runs, or
//! [`db::PgStore`] for Postgres. Vote counts are always projected from the
//! ledger by [`poll::compute_results`].

pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod history;
pub mod memory;
pub mod models;
pub mod poll;
pub mod routes;
pub mod store;

pub use engine::{Transition, VotingEngine};
pub use error::{VoteError, VoteResult};
pub use memory::MemoryStore;
pub use store::Store;
