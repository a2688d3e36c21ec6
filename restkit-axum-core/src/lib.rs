//! Core types for restkit-axum.
//!
//! This crate holds everything that does not depend on a particular HTTP
//! framework:
//!
//! ## Modules
//!
//! - [`error`]: [`ApiError`], the structured error payload
//! - [`codec`]: [`Encoder`]/[`Decoder`] traits and the JSON, XML and form codecs
//! - [`registry`]: [`Codecs`], the ordered encoder list and decoder map
//! - [`negotiate`]: `Accept` and `Content-Type` negotiation
//! - [`safe`]: [`SafeEncoder`], fallback handling for failed encodes

pub mod codec;
pub mod error;
pub mod negotiate;
pub mod registry;
pub mod safe;

pub use codec::*;
pub use error::*;
pub use negotiate::*;
pub use registry::*;
pub use safe::*;

pub use erased_serde;
