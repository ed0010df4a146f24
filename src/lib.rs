//! Scan orchestration service.
//!
//! Drives long-running scan-all jobs on a remote worker, tracks per-item
//! upload and ingestion pipelines, and exposes both over HTTP.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
