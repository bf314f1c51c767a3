//! Core data models for the log partitioner.
//!
//! Buckets and objects map to the metadata tables of the local object store;
//! producer types, partition keys and query executions describe the routing
//! and promotion pipeline.

pub mod bucket;
pub mod event;
pub mod object;
pub mod partition;
pub mod producer;
pub mod query;
