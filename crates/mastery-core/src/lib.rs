//! Core types, rating math and the adaptive mastery engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement [`store::RatingStore`] and [`store::ContentCatalog`];
//! [`engine::MasteryEngine`] runs the update, selection and scheduling
//! policies on top of them.

pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod rating;
pub mod review;
pub mod selector;
pub mod store;

pub use engine::{EngineConfig, MasteryEngine};
pub use error::{Error, Result};
