#![doc = "apim-migrate-core: migration and indexing logic for apim-migrate."]

//! This crate holds the resumable export driver, its checkpoint store, the
//! archive writer and the bulk upload pipeline. It never talks HTTP itself:
//! remote services are reached through the traits in [`contract`], which the
//! CLI crate implements with `reqwest`.
//!
//! # Usage
//! Add this as a dependency for anything that drives an export or an upload.
//! With the default `test-export-mocks` feature the `mockall` mocks of the
//! contract traits are exported for downstream tests.

pub mod archive;
pub mod artifact;
pub mod checkpoint;
pub mod config;
pub mod contract;
pub mod export;
pub mod pagination;
pub mod retry;
pub mod upload;
