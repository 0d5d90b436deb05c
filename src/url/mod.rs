//! URL handling module for Gemini-Ripple
//!
//! Only absolute `gemini://` URLs with a host ever reach the frontier or the
//! cache. Everything that enters the crawl goes through [`normalize`] (links
//! found on pages) or [`parse_seed`] (start URLs).

mod normalize;

pub use normalize::{normalize, parse_seed};

/// The only protocol this crawler follows
pub const SCHEME: &str = "gemini";

/// Default Gemini port, used when a URL does not name one
pub const DEFAULT_PORT: u16 = 1965;
