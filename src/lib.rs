//! This crate explores climate model ensembles stored as Zarr hierarchies in S3-compatible object
//! stores or on the local filesystem, and renders a set of standard analyses as PNG figures.
//!
//! Variables are opened lazily: selections, reductions, anomalies, resampling and seasonal
//! grouping compose a graph of [lazy::LazyArray] nodes without reading any chunk. Only when an
//! analysis is materialised by the [executor::Executor] are the chunks it needs fetched, decoded
//! and reduced, within the limits of the [resource_manager::ResourceManager].
//!
//! The explorer is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [AWS SDK for S3](aws-sdk-s3) is used to interact with S3-compatible object stores.
//! * [Serde](serde) performs (de)serialisation of Zarr metadata and intake catalogs.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used in numerical
//!   computation.
//! * [Rayon](rayon) optionally runs CPU-bound kernels on a thread pool.

pub mod analysis;
pub mod app;
pub mod app_state;
pub mod array;
pub mod catalog;
pub mod chunk_store;
pub mod cli;
pub mod compression;
pub mod coords;
pub mod data_array;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod filter_pipeline;
pub mod filters;
pub mod lazy;
pub mod metadata;
pub mod metrics;
pub mod object_store;
pub mod operations;
pub mod render;
pub mod resample;
pub mod resource_manager;
pub mod s3_client;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
