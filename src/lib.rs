//! Podcast feed ingestion for a static site build.
//!
//! A run fetches every configured feed concurrently, merges the results into
//! a single `build_info.json`, and downloads channel covers one at a time.
//! See [`pipeline::run`] for the end-to-end flow.

pub mod aggregate;
pub mod artifact;
pub mod config;
pub mod cover;
pub mod feed;
pub mod pipeline;
pub mod sink;
pub mod sources;
pub mod util;
