//! Domain types shared by the sketch-to-render pipeline.
//!
//! Nothing in this crate performs I/O. The engine-facing crates consume
//! these types and return [`outcome::GenerateResult`] to the caller.

pub mod bitmap;
pub mod error;
pub mod outcome;
pub mod request;
pub mod types;
