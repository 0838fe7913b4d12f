//! Request attributes relevant to governance decisions.
//!
//! Handlers receive full `http::Request`s; keys and predicates only see a
//! [`RequestMeta`] extracted from them. Hosts attach the peer address and the
//! authenticated identity as request extensions ([`ClientAddr`], [`Identity`]).

use http::{HeaderMap, Method, Request};
use std::net::IpAddr;

/// Peer address of the connection, inserted by the host as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Authenticated caller, inserted by the host as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// The parts of a request that keys, tags and predicates are derived from.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    method: Method,
    path: String,
    query: Option<String>,
    client_ip: Option<IpAddr>,
    identity: Option<String>,
    headers: HeaderMap,
}

impl RequestMeta {
    /// Metadata for a bare method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            client_ip: None,
            identity: None,
            headers: HeaderMap::new(),
        }
    }

    /// Extract metadata from a request.
    ///
    /// The client IP comes from the [`ClientAddr`] extension, then from the
    /// first `x-forwarded-for` hop, then from `x-real-ip`.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers().clone();
        let client_ip = request
            .extensions()
            .get::<ClientAddr>()
            .map(|addr| addr.0)
            .or_else(|| forwarded_ip(&headers));

        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request
                .uri()
                .query()
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            client_ip,
            identity: request
                .extensions()
                .get::<Identity>()
                .map(|identity| identity.0.clone()),
            headers,
        }
    }

    /// Set the raw query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    /// Set the client IP.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Set the authenticated identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path, without query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, if non-empty.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Client IP, if known.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Authenticated identity, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the method is safe to serve from cache.
    pub fn is_cacheable_method(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let from_forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    from_forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_from_request_prefers_extension() {
        let mut request = Request::builder()
            .uri("/api/listings?page=2")
            .header("x-forwarded-for", "10.0.0.9")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ClientAddr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        request
            .extensions_mut()
            .insert(Identity("user-7".to_string()));

        let meta = RequestMeta::from_request(&request);
        assert_eq!(meta.path(), "/api/listings");
        assert_eq!(meta.query(), Some("page=2"));
        assert_eq!(
            meta.client_ip(),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)))
        );
        assert_eq!(meta.identity(), Some("user-7"));
    }

    #[test]
    fn test_forwarded_headers() {
        let request = Request::builder()
            .uri("/x")
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(
            RequestMeta::from_request(&request).client_ip(),
            Some("203.0.113.5".parse().unwrap())
        );

        let request = Request::builder()
            .uri("/x")
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(
            RequestMeta::from_request(&request).client_ip(),
            Some("198.51.100.2".parse().unwrap())
        );

        let request = Request::builder().uri("/x").body(()).unwrap();
        assert_eq!(RequestMeta::from_request(&request).client_ip(), None);
    }

    #[test]
    fn test_empty_query_is_none() {
        let request = Request::builder().uri("/x?").body(()).unwrap();
        assert_eq!(RequestMeta::from_request(&request).query(), None);
        assert_eq!(RequestMeta::new(Method::GET, "/x").with_query("").query(), None);
    }

    #[test]
    fn test_cacheable_methods() {
        assert!(RequestMeta::new(Method::GET, "/").is_cacheable_method());
        assert!(RequestMeta::new(Method::HEAD, "/").is_cacheable_method());
        assert!(!RequestMeta::new(Method::POST, "/").is_cacheable_method());
        assert!(!RequestMeta::new(Method::DELETE, "/").is_cacheable_method());
    }
}
