//! mocktest-core: Exam session engine.
//!
//! This crate defines the data model, answer normalisation, negative-marking
//! scoring, the session store and the controller that keeps a live session in
//! step with the remote attempt service.

pub mod classify;
pub mod controller;
pub mod error;
pub mod label;
pub mod model;
pub mod parser;
pub mod scoring;
pub mod session;
pub mod statistics;
pub mod store;
pub mod timer;
pub mod traits;
