#![doc = "media-relay-core: core logic library for media-relay."]

//! This crate contains the pipeline that relays a customer's Instagram media
//! into WordPress posts, together with the collaborators it is composed from.
//!
//! # Usage
//! The CLI crate wires concrete clients into [`synchronise::SyncOrchestrator`];
//! tests wire the `Mock*` types exported from [`contract`] instead.

pub mod access;
pub mod accounts;
pub mod batch;
pub mod config;
pub mod contract;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod notify;
pub mod retry;
pub mod stage;
pub mod synchronise;
#[cfg(test)]
pub(crate) mod test_http;
pub mod wordpress;
