//! Key and tag derivation.
//!
//! Pure functions mapping request metadata to rate-limit keys, cache keys and
//! default invalidation tags.

use crate::domain::cache_entry::entity_tag;
use crate::domain::policy::RateLimitPolicy;
use crate::domain::request::RequestMeta;
use std::collections::BTreeSet;

/// Derives rate-limit keys, cache keys and default tags from requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver;

impl KeyDeriver {
    /// Rate-limit key for a request under `policy`.
    ///
    /// Uses the policy's key generator when present, otherwise the client IP
    /// (or `unknown`) joined with the normalized path, so distinct routes do
    /// not share quota.
    pub fn rate_limit_key(policy: &RateLimitPolicy, meta: &RequestMeta) -> String {
        match policy.key_generator() {
            Some(generator) => generator(meta),
            None => Self::default_rate_limit_key(meta),
        }
    }

    /// `{ip}:{path}`, with `unknown` standing in for a missing IP.
    pub fn default_rate_limit_key(meta: &RequestMeta) -> String {
        let path = normalize_path(meta.path());
        match meta.client_ip() {
            Some(ip) => format!("{ip}:{path}"),
            None => format!("unknown:{path}"),
        }
    }

    /// Default cache key: `{prefix}{METHOD}{path}?{sorted query}`.
    ///
    /// Query pairs are sorted so parameter order does not split the cache.
    /// The `?` is omitted when there is no query.
    ///
    /// # Example
    /// ```
    /// use http::Method;
    /// use request_governor::{KeyDeriver, RequestMeta};
    ///
    /// let meta = RequestMeta::new(Method::GET, "/api/hotels/").with_query("sort=asc&city=oslo");
    /// assert_eq!(
    ///     KeyDeriver::cache_key(&meta, "v1:"),
    ///     "v1:GET/api/hotels?city=oslo&sort=asc"
    /// );
    /// ```
    pub fn cache_key(meta: &RequestMeta, prefix: &str) -> String {
        let path = normalize_path(meta.path());
        let query = meta.query().map(sorted_query).unwrap_or_default();
        if query.is_empty() {
            format!("{prefix}{}{path}", meta.method())
        } else {
            format!("{prefix}{}{path}?{query}", meta.method())
        }
    }

    /// Default invalidation tags for a resource path.
    ///
    /// Leading `api` and version (`v1`, `v2`, ...) segments are skipped. The
    /// next segment is the entity type; a following segment is its id.
    /// `/api/v1/hotels/42/rooms` yields `{"hotels", "hotels:42"}`.
    pub fn derive_tags(path: &str) -> BTreeSet<String> {
        let mut segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .skip_while(|segment| *segment == "api" || is_version(segment));

        let mut tags = BTreeSet::new();
        if let Some(entity_type) = segments.next() {
            if let Some(entity_id) = segments.next() {
                tags.insert(entity_tag(entity_type, entity_id));
            }
            tags.insert(entity_type.to_string());
        }
        tags
    }
}

/// Collapse repeated slashes and drop a trailing slash (root stays `/`).
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

fn sorted_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|pair| !pair.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

fn is_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}
