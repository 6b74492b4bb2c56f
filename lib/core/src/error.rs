//! Error handling foundation for waypoint.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error enums
//! and wraps them in a rootcause `Report` at its public boundary, so callers
//! can add their own layer of context with `.context()`.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
