//! # ocsync
//!
//! A headless client for the Nextcloud News API.
//!
//! ```text
//! SyncService → Api (v2) → HTTP ─┐
//!                   ↓            │
//!             PreferenceStore    │
//!                   ↓            ↓
//!               Database (SQLite) ← response applied in one transaction
//! ```
//!
//! - [`api`]: versioned REST client and wire types
//! - [`sync`]: sync requests and the service that serializes them
//! - [`storage`]: SQLite store for folders, feeds, items, user and preferences
//! - [`preferences`]: typed settings layered over `config.toml`
//! - [`login_error`]: user-facing messages for API failures

pub mod api;
pub mod config;
pub mod login_error;
pub mod preferences;
pub mod storage;
pub mod sync;
pub mod util;
