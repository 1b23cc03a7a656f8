//! Client context extracted from request headers
//!
//! Sessions record where and on what device they were issued or refreshed.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

/// IP, device and coarse location of the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub device: Option<String>,
    pub location: Option<String>,
}

impl ClientContext {
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self {
            ip: client_ip(headers, peer),
            device: header(headers, "user-agent").map(|ua| describe_user_agent(&ua)),
            location: header(headers, "cf-ipcountry").filter(|c| c != "XX"),
        }
    }
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_parts(&parts.headers, peer))
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `CF-Connecting-IP` > `X-Real-Ip` > first of `X-Forwarded-For` > socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header(headers, "cf-connecting-ip")
        .or_else(|| header(headers, "x-real-ip"))
        .or_else(|| {
            header(headers, "x-forwarded-for").and_then(|v| {
                v.split(',')
                    .next()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
        })
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Render a user agent as `{browser} on {os}`
pub fn describe_user_agent(ua: &str) -> String {
    // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari
    let browser = if ua.contains("Edg/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        "Chrome"
    } else if ua.contains("Safari/") {
        "Safari"
    } else if ua.starts_with("curl/") {
        "curl"
    } else {
        "Unknown browser"
    };

    let os = if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("CrOS") {
        "ChromeOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown OS"
    };

    format!("{} on {}", browser, os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_ip_precedence() {
        let peer: SocketAddr = "10.0.0.9:443".parse().unwrap();
        let all = headers(&[
            ("cf-connecting-ip", "1.1.1.1"),
            ("x-real-ip", "2.2.2.2"),
            ("x-forwarded-for", "3.3.3.3, 4.4.4.4"),
        ]);
        assert_eq!(client_ip(&all, Some(peer)).as_deref(), Some("1.1.1.1"));

        let no_cf = headers(&[("x-real-ip", "2.2.2.2"), ("x-forwarded-for", "3.3.3.3")]);
        assert_eq!(client_ip(&no_cf, Some(peer)).as_deref(), Some("2.2.2.2"));

        let forwarded = headers(&[("x-forwarded-for", "3.3.3.3, 4.4.4.4")]);
        assert_eq!(client_ip(&forwarded, Some(peer)).as_deref(), Some("3.3.3.3"));

        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("10.0.0.9")
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_describe_user_agent() {
        let cases = [
            (
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
                "Safari on macOS",
            ),
            (
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0",
                "Edge on Windows",
            ),
            (
                "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
                "Firefox on Linux",
            ),
            (
                "Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36",
                "Chrome on Android",
            ),
            ("curl/8.4.0", "curl on Unknown OS"),
        ];
        for (ua, expected) in cases {
            assert_eq!(describe_user_agent(ua), expected);
        }
    }

    #[test]
    fn test_location_from_country_header() {
        let ctx = ClientContext::from_parts(&headers(&[("cf-ipcountry", "DE")]), None);
        assert_eq!(ctx.location.as_deref(), Some("DE"));

        let unknown = ClientContext::from_parts(&headers(&[("cf-ipcountry", "XX")]), None);
        assert_eq!(unknown.location, None);
    }
}
