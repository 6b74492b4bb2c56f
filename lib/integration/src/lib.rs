//! Outbound integrations for waypoint workflows.
//!
//! - **Webhook sink**: posts each applied transition as JSON over HTTP

pub mod webhook;

pub use webhook::{DEFAULT_WEBHOOK_TIMEOUT, HttpWebhookSink};
