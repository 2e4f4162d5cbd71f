//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::request::Parts};

use crate::cli::ClientIpHeader;

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract the client IP for session metadata and rate-limit keying.
///
/// When a forwarded-IP header is configured (deployments behind a reverse
/// proxy), only that header is trusted; a missing or unreadable header
/// yields None rather than falling back to the socket address, which would
/// be the proxy's. Without a configured header, the socket address from
/// ConnectInfo is used.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    forwarded_header: Option<&ClientIpHeader>,
) -> Option<String> {
    match forwarded_header {
        Some(header) => {
            let value = source.headers().get(header.header_name())?.to_str().ok()?;
            // The header can carry a proxy chain; the first entry is the
            // original client.
            let ip = value.split(',').next()?.trim();
            if ip.is_empty() { None } else { Some(ip.to_string()) }
        }
        None => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string()),
    }
}
