#![doc = "pulp-squeezer-core: reconciliation logic shared by every pulp-squeezer module."]

//! This crate holds everything that does not talk HTTP: the entity-context contract,
//! the desired-state reconciler, the local file-content pre-checks and the report shape.
//! The concrete Pulp client and contexts live in the `pulp-squeezer` crate.
//!
//! # Usage
//! Implement [`contract::EntityContext`] for an entity type and hand it to
//! [`reconcile::process`] together with a natural key and the desired attributes.

pub mod config;
pub mod contract;
pub mod error;
pub mod file_content;
pub mod params;
pub mod reconcile;
pub mod report;

pub use error::SqueezerError;
