//! Utility functions for common operations.
//!
//! - **Server URLs**: validation and normalisation of the Nextcloud root URL
//! - **Text processing**: by-lines, relative ages, HTML cleanup and
//!   width-aware truncation for terminal output
//!
//! # Examples
//!
//! ```
//! use ocsync::util::{by_line, clean_string, normalize_server_url};
//!
//! let url = normalize_server_url("https://cloud.example.com").unwrap();
//! assert_eq!(url.path(), "/");
//!
//! assert_eq!(clean_string("<b>Rust</b> &amp; friends"), "Rust & friends");
//! assert_eq!(by_line("LWN", Some("corbet")), "By corbet from LWN");
//! ```

mod server_url;
mod text;

pub use server_url::{normalize_server_url, ServerUrlError};
pub use text::{by_line, clean_string, strip_control_chars, time_span, truncate_to_width};
