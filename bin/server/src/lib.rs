//! waypoint HTTP server.
//!
//! Loads a workflow definition, wires the workflow manager to storage, the
//! webhook sink, and the history monitor, and exposes it over HTTP.

pub mod app;
pub mod config;
pub mod error;
pub mod i18n;
pub mod routes;
