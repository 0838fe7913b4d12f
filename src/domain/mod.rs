//! Domain layer - pure types with no I/O.
//!
//! This layer contains the core concepts and invariants of request governance:
//! - Rate limiting policies and presets
//! - Fixed window alignment and admission decisions
//! - Request metadata used for key derivation
//! - Cached responses and their invalidation tags
//!
//! All types in this layer are pure and easily testable.

pub mod cache_entry;
pub mod policy;
pub mod request;
pub mod window;
