//! formsync - Replicates paginated form submissions into tabular destinations
//!
//! This crate pulls form records page by page from a REST source, flattens
//! and sanitizes them, and replaces one destination table per form type.
//! Runs are triggered over HTTP, on a schedule, or once from the command line.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod otel;
pub mod server;
pub mod sink;
pub mod sync;
