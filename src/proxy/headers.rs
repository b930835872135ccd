//! Hop-by-hop header handling for forwarded messages.

use http::header::{self, HeaderMap, HeaderName};
use std::collections::HashSet;

// RFC 7230 Section 6.1: hop-by-hop headers are not forwarded by proxies.
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed = connection_tokens(headers);

    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str(), &listed))
        .cloned()
        .collect();

    for name in doomed {
        headers.remove(&name);
    }
}

// Lowercased tokens of every Connection header value.
fn connection_tokens(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_hop_by_hop(name: &str, listed: &HashSet<String>) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name) || listed.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    #[test]
    fn test_static_hop_by_hop_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn test_connection_listed_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, X-Trace-Hop"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert("x-end-to-end", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);

        assert!(!headers.contains_key("x-trace-hop"));
        assert!(!headers.contains_key("connection"));
        assert!(headers.contains_key("x-end-to-end"));
    }

    #[test]
    fn test_side_channel_headers_are_end_to_end() {
        let mut headers = HeaderMap::new();
        headers.insert("x-lantern-host", HeaderValue::from_static("example.com"));
        headers.insert("x-lantern-scheme", HeaderValue::from_static("https"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
    }
}
