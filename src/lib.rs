//! Read-only container registries whose images are produced on demand.
//!
//! A request for `/v2/<name>/manifests/<tag>` is resolved by a
//! [`strategy::Strategy`] into a cache key. Cache hits are redirected to a
//! write-once [`store::ContentStore`]; misses run the strategy's
//! transformation, persist the result through the [`materialize::Materializer`]
//! and are then served the same way.

pub mod cache_key;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod materialize;
pub mod oci;
pub mod reference;
pub mod serve;
pub mod store;
pub mod strategy;
pub mod types;
pub mod ui;
pub mod upstream;
