//! HTTP service for the vocabulary tutor.
//!
//! Persists users, chat rooms, and notebook entries in Postgres and runs
//! each chat turn through the dispatch workflow in `vocab-core`.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
