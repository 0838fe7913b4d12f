//! Cached responses and their invalidation tags.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response, StatusCode};
use std::collections::BTreeSet;
use std::time::Duration;

/// Tag naming one entity of a type, e.g. `listings:42`.
pub fn entity_tag(entity_type: &str, entity_id: &str) -> String {
    format!("{entity_type}:{entity_id}")
}

/// The replayable part of a response: status, content type and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Response status
    pub status: StatusCode,
    /// `content-type` header, if the response had one
    pub content_type: Option<HeaderValue>,
    /// Response body
    pub body: Bytes,
}

impl CachedResponse {
    /// Capture a response for caching.
    pub fn from_response(response: &Response<Bytes>) -> Self {
        Self {
            status: response.status(),
            content_type: response.headers().get(CONTENT_TYPE).cloned(),
            body: response.body().clone(),
        }
    }

    /// Rebuild the response verbatim.
    pub fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        if let Some(content_type) = &self.content_type {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, content_type.clone());
        }
        response
    }
}

/// A stored response with its tags and expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The stored response
    pub response: CachedResponse,
    /// Invalidation tags
    pub tags: BTreeSet<String>,
    /// When the entry was stored, milliseconds since the clock epoch
    pub stored_at_ms: u64,
    /// Time-to-live
    pub ttl: Duration,
}

impl CacheEntry {
    /// Create an entry stored at `stored_at_ms`.
    pub fn new(
        response: CachedResponse,
        tags: BTreeSet<String>,
        stored_at_ms: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            response,
            tags,
            stored_at_ms,
            ttl,
        }
    }

    /// When the entry stops being served, milliseconds since the clock epoch.
    pub fn expires_at_ms(&self) -> u64 {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        self.stored_at_ms.saturating_add(ttl_ms)
    }

    /// Whether the entry may satisfy a lookup at `now_ms`.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms()
    }

    /// Whether the entry carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}
