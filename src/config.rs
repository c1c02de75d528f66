//! Proxy configuration
//! Holds the frozen public/upstream mapping shared by every exchange

use crate::error::ProxyError;
use std::time::Duration;
use url::Url;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on bodies buffered for rewriting (10 MiB)
const DEFAULT_MAX_REWRITE_BODY: usize = 10 * 1024 * 1024;

/// Process-wide proxy configuration
///
/// Constructed once at startup and shared read-only by every exchange.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Host name clients use to reach the proxy
    pub public_host: String,
    /// Scheme clients use to reach the proxy ("http" or "https")
    pub public_scheme: String,
    /// Path prefix under which the proxy is exposed publicly; empty when
    /// the proxy is mounted at the root. Normalized to a leading slash
    /// and no trailing slash.
    pub path_prefix: String,
    /// Upstream origin every request is forwarded to
    pub upstream: Url,
    /// Address the proxy listens on
    pub listen_addr: String,
    /// Timeout for establishing the upstream connection
    pub connect_timeout: Duration,
    /// Timeout for the full upstream request/response exchange
    pub request_timeout: Duration,
    /// Maximum response body size buffered for rewriting
    pub max_rewrite_body: usize,
}

impl ProxyConfig {
    pub fn new(
        public_host: &str,
        public_scheme: &str,
        path_prefix: &str,
        upstream: &str,
        listen_addr: &str,
    ) -> Result<Self, ProxyError> {
        let upstream: Url = upstream
            .parse()
            .map_err(|e| ProxyError::Config(format!("invalid upstream URL '{}': {}", upstream, e)))?;

        if upstream.host_str().is_none() {
            return Err(ProxyError::Config(format!(
                "upstream URL '{}' has no host",
                upstream
            )));
        }

        match upstream.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::Config(format!(
                    "unsupported upstream scheme '{}'",
                    other
                )));
            }
        }

        Ok(Self {
            public_host: public_host.to_string(),
            public_scheme: public_scheme.to_string(),
            path_prefix: normalize_prefix(path_prefix),
            upstream,
            listen_addr: listen_addr.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_rewrite_body: DEFAULT_MAX_REWRITE_BODY,
        })
    }

    /// Upstream host with its explicit port, if any ("example.com" or
    /// "example.com:3000"), as used in URL matching and the Host header
    pub fn upstream_host(&self) -> String {
        let host = self.upstream.host_str().unwrap_or_default();
        match self.upstream.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Strip the public path prefix from an incoming request path
    ///
    /// Stripping only happens at a path-segment boundary, so a prefix of
    /// `/app` matches `/app` and `/app/x` but not `/application`. An
    /// empty remainder normalizes to `/`.
    pub fn strip_path<'a>(&self, path: &'a str) -> &'a str {
        if self.path_prefix.is_empty() {
            return if path.is_empty() { "/" } else { path };
        }

        match path.strip_prefix(self.path_prefix.as_str()) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }
}

/// Normalize a path prefix: leading slash, no trailing slash, and `/`
/// alone collapses to the empty prefix
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Read-only view of the rewrite parameters for one response
///
/// Computed once per response from the frozen config so every
/// substitution in the exchange sees the same values.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// Upstream host with explicit port, if any (URL matching)
    pub upstream_host: String,
    /// Upstream host without port (cookie Domain matching)
    pub upstream_domain: String,
    /// "scheme://host[:port]" of the upstream
    pub upstream_origin: String,
    /// Host name clients use to reach the proxy
    pub public_host: String,
    /// "scheme://host" clients use to reach the proxy
    pub public_origin: String,
    /// Normalized public path prefix, possibly empty
    pub path_prefix: String,
    /// Whether rewritten cookies must carry the Secure attribute
    pub secure_cookies: bool,
}

impl RewriteContext {
    pub fn new(config: &ProxyConfig) -> Self {
        let upstream_host = config.upstream_host();
        Self {
            upstream_origin: format!("{}://{}", config.upstream.scheme(), upstream_host),
            upstream_domain: config.upstream.host_str().unwrap_or_default().to_string(),
            public_origin: format!("{}://{}", config.public_scheme, config.public_host),
            public_host: config.public_host.clone(),
            path_prefix: config.path_prefix.clone(),
            secure_cookies: config.public_scheme == "https",
            upstream_host,
        }
    }
}
