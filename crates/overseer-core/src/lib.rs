//! Core types, the supervisor lifecycle engine and the store abstraction for
//! Overseer, the teaching-supervision administration service.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod effect;
pub mod engine;
pub mod error;
pub mod event;
pub mod group;
pub mod ledger;
pub mod memory;
pub mod role;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod term;
pub mod user;

pub use error::{Classify, Error, ErrorKind, Result};
