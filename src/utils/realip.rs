//! Client address behind proxies and CDNs.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// Checked in this order; the first header holding a valid address wins.
const FORWARD_HEADERS: [&str; 4] = ["cf-connecting-ip", "true-client-ip", "x-real-ip", "x-forwarded-for"];

pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    forwarded_ip(headers).unwrap_or_else(|| peer.ip()).to_string()
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let raw = FORWARD_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()).filter(|v| !v.trim().is_empty()))?;
    // X-Forwarded-For may carry a chain; the client is the first hop
    let first = raw.split(',').next()?.trim();
    first.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.9:5555".parse().unwrap()
    }

    #[test]
    fn falls_back_to_peer_address() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "192.0.2.9");
    }

    #[test]
    fn cdn_header_wins_over_forwarded_chain() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1, 10.0.0.1"));
        assert_eq!(client_ip(&h, peer()), "203.0.113.1");

        h.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(client_ip(&h, peer()), "198.51.100.7");
    }

    #[test]
    fn garbage_header_is_ignored() {
        let mut h = HeaderMap::new();
        h.insert("x-real-ip", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&h, peer()), "192.0.2.9");
    }
}
