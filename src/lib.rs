//! strato: a tag-addressable, partitioned cache store for web render
//! pipelines, with pluggable blob backends, build-aware eviction, and
//! best-effort edge purge propagation.

pub mod cache;
pub mod config;
pub mod http;
pub mod telemetry;
