//! Utility functions shared by the parser, the cover pipeline and config loading.
//!
//! - **URL handling**: SSRF-aware validation of configured feed URLs, query
//!   stripping for cover URLs, host and extension extraction
//! - **Text cleanup**: control-character removal for text pulled out of feeds
//!
//! # Examples
//!
//! ```
//! use castsnap::util::{strip_query, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml", false).unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! assert_eq!(strip_query("https://cdn.example.com/a.jpg?w=300"), "https://cdn.example.com/a.jpg");
//! ```

mod text;
mod url_validator;

pub use text::clean_text;
pub use url_validator::{file_extension, host_of, strip_query, validate_url, UrlValidationError};
