//! Caller key derivation.
//!
//! A caller key names the budget a request draws from. The default policy
//! identifies callers by network address, prefixed with a per-policy
//! namespace so one address holds an independent budget under each policy.

use std::collections::HashMap;

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Header carrying a single client address set by the edge proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Address used when the request carries no usable address header.
///
/// Every unidentified caller shares the budget behind this sentinel.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Read access to the request metadata a key policy needs.
pub trait RequestMetadata {
    /// Value of the header `name`, compared case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;
}

impl RequestMetadata for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// An owned list of request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    headers: Vec<(String, String)>,
}

impl RequestHeaders {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl RequestMetadata for RequestHeaders {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Resolve the client address of a request.
///
/// Prefers the first hop of `X-Forwarded-For`, then `X-Real-IP`, then the
/// [`UNKNOWN_ADDRESS`] sentinel. Blank values count as absent.
pub fn client_address(request: &dyn RequestMetadata) -> &str {
    let forwarded = request
        .header(FORWARDED_FOR_HEADER)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty());

    if let Some(addr) = forwarded {
        return addr;
    }

    request
        .header(REAL_IP_HEADER)
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .unwrap_or(UNKNOWN_ADDRESS)
}

/// Derives the caller key for a request.
///
/// Implementations must be pure: identical metadata yields identical keys.
pub trait KeyDeriver: Send + Sync {
    /// Build the key for `request`.
    fn derive_key(&self, request: &dyn RequestMetadata) -> String;
}

impl<F> KeyDeriver for F
where
    F: Fn(&dyn RequestMetadata) -> String + Send + Sync,
{
    fn derive_key(&self, request: &dyn RequestMetadata) -> String {
        self(request)
    }
}

/// Keys callers by client address under a namespace, e.g. `auth:10.0.0.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddressKey {
    namespace: String,
}

impl ClientAddressKey {
    /// Create a key policy for `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace prepended to every key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl KeyDeriver for ClientAddressKey {
    fn derive_key(&self, request: &dyn RequestMetadata) -> String {
        format!("{}:{}", self.namespace, client_address(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let request = RequestHeaders::new()
            .with("X-Forwarded-For", "203.0.113.7, 10.0.0.2, 10.0.0.3")
            .with("X-Real-IP", "10.0.0.9");

        assert_eq!(client_address(&request), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_fallback() {
        let request = RequestHeaders::new().with("x-real-ip", " 198.51.100.4 ");
        assert_eq!(client_address(&request), "198.51.100.4");
    }

    #[test]
    fn test_blank_forwarded_for_falls_through() {
        let request = RequestHeaders::new()
            .with("x-forwarded-for", " , 10.0.0.2")
            .with("x-real-ip", "198.51.100.4");
        assert_eq!(client_address(&request), "198.51.100.4");
    }

    #[test]
    fn test_missing_headers_use_sentinel() {
        let request = RequestHeaders::new().with("user-agent", "curl/8.0");
        assert_eq!(client_address(&request), UNKNOWN_ADDRESS);

        let key = ClientAddressKey::new("auth");
        assert_eq!(key.derive_key(&request), "auth:unknown");
    }

    #[test]
    fn test_namespace_separates_policies() {
        let request = RequestHeaders::new().with("x-forwarded-for", "192.0.2.1");

        let auth = ClientAddressKey::new("auth").derive_key(&request);
        let api = ClientAddressKey::new("api").derive_key(&request);

        assert_eq!(auth, "auth:192.0.2.1");
        assert_eq!(api, "api:192.0.2.1");
        assert_ne!(auth, api);
    }

    #[test]
    fn test_derivation_is_repeatable() {
        let request = RequestHeaders::new().with("x-forwarded-for", "192.0.2.1");
        let policy = ClientAddressKey::new("api");

        let first = policy.derive_key(&request);
        for _ in 0..10 {
            assert_eq!(policy.derive_key(&request), first);
        }
    }

    #[test]
    fn test_map_metadata_is_case_insensitive() {
        let mut map = HashMap::new();
        map.insert("X-Real-IP".to_string(), "10.1.1.1".to_string());
        assert_eq!(client_address(&map), "10.1.1.1");

        map.insert("X-FORWARDED-FOR".to_string(), "10.2.2.2".to_string());
        assert_eq!(client_address(&map), "10.2.2.2");
    }

    #[test]
    fn test_closure_key_deriver() {
        let by_token = |request: &dyn RequestMetadata| {
            format!("token:{}", request.header("authorization").unwrap_or("anonymous"))
        };
        let request = RequestHeaders::new().with("Authorization", "abc123");

        assert_eq!(by_token.derive_key(&request), "token:abc123");
        assert_eq!(by_token.derive_key(&RequestHeaders::new()), "token:anonymous");
    }
}
