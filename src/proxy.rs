//! Proxy server implementation
//! Wires the rewrite pipeline into a hyper HTTP/1.1 transport

use crate::config::{ProxyConfig, RewriteContext};
use crate::error::ProxyError;
use crate::headers;
use crate::rewrite;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info};

/// Response body type produced by the pipeline
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Proxy server
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    tls: TlsConnector,
}

impl ProxyServer {
    /// Create a new proxy server from a frozen configuration
    pub fn new(config: ProxyConfig) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            config: Arc::new(config),
            tls: TlsConnector::from(Arc::new(tls)),
        }
    }

    /// Start the proxy server
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.listen_addr.parse()?;
        let listener = TcpListener::bind(addr).await?;

        info!("listening on {}", addr);
        info!(
            "public origin: {}://{}{}",
            self.config.public_scheme, self.config.public_host, self.config.path_prefix
        );
        info!("upstream: {}", self.config.upstream);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, remote_addr).await {
                    debug!("connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Handle a single client connection
    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> anyhow::Result<()> {
        let io = TokioIo::new(stream);
        let server = self.clone();

        http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req, remote_addr).await }
                }),
            )
            .await
            .map_err(|e| anyhow::anyhow!("HTTP service error: {}", e))
    }

    /// Handle one exchange; pipeline errors become a generic 502
    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match self.process_request(req, remote_addr).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("[{} {}] {}", method, path, e);
                Ok(error_response(StatusCode::BAD_GATEWAY, "Bad Gateway"))
            }
        }
    }

    /// Run one exchange through the pipeline: outbound rewrite, upstream
    /// dispatch, inbound rewrite
    async fn process_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let ctx = RewriteContext::new(&self.config);
        let method = req.method().clone();
        let original_path = req.uri().path().to_string();

        let upstream_req = self.build_upstream_request(req, remote_addr).await?;
        debug!(
            "[{}] {} -> {}{}",
            method,
            original_path,
            ctx.upstream_origin,
            upstream_req.uri()
        );

        let response = self.dispatch(upstream_req).await?;
        debug!(
            "[{}] {} {} from upstream",
            response.status().as_u16(),
            method,
            original_path
        );

        rewrite_response(response, &ctx, self.config.max_rewrite_body).await
    }

    /// Turn the client request into the outbound upstream request:
    /// prefix stripped, upstream addressing, forwarding headers
    async fn build_upstream_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Request<Full<Bytes>>, ProxyError> {
        let (parts, body) = req.into_parts();

        let stripped = self.config.strip_path(parts.uri.path()).to_string();
        let target = request_target(&stripped, parts.uri.query());
        let uri: Uri = target.parse().map_err(|e| {
            ProxyError::UpstreamUnreachable(format!("invalid request target '{}': {}", target, e))
        })?;

        let body_bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::BodyRead(format!("client request body: {}", e)))?
            .to_bytes();

        let original_host = parts
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or(&self.config.public_host)
            .to_string();

        let mut builder = Request::builder()
            .method(parts.method)
            .uri(uri)
            .version(Version::HTTP_11);

        for (key, value) in parts.headers.iter() {
            if key != HOST {
                builder = builder.header(key, value);
            }
        }

        builder = builder
            .header(HOST, self.config.upstream_host())
            .header("X-Forwarded-For", remote_addr.ip().to_string())
            .header("X-Forwarded-Host", &original_host)
            .header("X-Forwarded-Proto", &self.config.public_scheme);

        builder.body(Full::new(body_bytes)).map_err(|e| {
            ProxyError::UpstreamUnreachable(format!("failed to build upstream request: {}", e))
        })
    }

    /// Send the request to the upstream origin, over TLS when the
    /// upstream scheme is https
    async fn dispatch(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>, ProxyError> {
        let host = self.config.upstream.host_str().unwrap_or_default().to_string();
        let port = self
            .config
            .upstream
            .port()
            .unwrap_or(match self.config.upstream.scheme() {
                "https" => 443,
                _ => 80,
            });
        let addr = format!("{}:{}", host, port);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::UpstreamUnreachable(format!("connect timeout to {}", addr)))?
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("connect to {}: {}", addr, e)))?;

        if self.config.upstream.scheme() == "https" {
            let server_name = ServerName::try_from(host.clone()).map_err(|e| {
                ProxyError::UpstreamUnreachable(format!("invalid upstream host '{}': {}", host, e))
            })?;
            let tls_stream = self.tls.connect(server_name, stream).await.map_err(|e| {
                ProxyError::UpstreamUnreachable(format!("TLS handshake with {}: {}", addr, e))
            })?;
            self.exchange(TokioIo::new(tls_stream), req).await
        } else {
            self.exchange(TokioIo::new(stream), req).await
        }
    }

    /// Perform the HTTP/1.1 exchange over an established upstream stream
    async fn exchange<T>(
        &self,
        io: TokioIo<T>,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, ProxyError>
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("upstream connection error: {}", e);
            }
        });

        timeout(self.config.request_timeout, sender.send_request(req))
            .await
            .map_err(|_| ProxyError::UpstreamUnreachable("upstream response timeout".to_string()))?
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("request failed: {}", e)))
    }
}

/// Rewrite an upstream response for delivery to the client
///
/// Headers first (Location, Set-Cookie), then the body when the content
/// type is eligible. The rewritten body replaces the original together
/// with its length framing; non-eligible bodies are streamed through
/// untouched. Rewriting must complete before any byte reaches the
/// client, so a failed body read fails the whole exchange.
pub async fn rewrite_response(
    response: Response<Incoming>,
    ctx: &RewriteContext,
    max_rewrite_body: usize,
) -> Result<Response<ProxyBody>, ProxyError> {
    let status = response.status();
    let (mut parts, body) = response.into_parts();

    if let Some((old, new)) = headers::rewrite_location(&mut parts.headers, ctx) {
        info!("[{}] redirect: {} -> {}", status.as_u16(), old, new);
    }
    headers::rewrite_cookies(&mut parts.headers, ctx);

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if !rewrite::is_rewritable(content_type.as_deref()) {
        return Ok(Response::from_parts(parts, body.boxed()));
    }

    let bytes = Limited::new(body, max_rewrite_body)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                ProxyError::BodyRead(format!(
                    "response body exceeds rewrite limit of {} bytes",
                    max_rewrite_body
                ))
            } else {
                ProxyError::BodyRead(e.to_string())
            }
        })?
        .to_bytes();

    let body_bytes = match std::str::from_utf8(&bytes) {
        Ok(text) => {
            let (rewritten, len) = rewrite::rewrite_body(ctx, text);
            info!(
                "[{}] rewrote {} body ({} bytes)",
                status.as_u16(),
                content_type.as_deref().unwrap_or(""),
                len
            );
            Bytes::from(rewritten)
        }
        Err(_) => {
            // classifier false positive on a mislabeled binary body
            debug!("[{}] body is not valid UTF-8, passing through", status.as_u16());
            bytes
        }
    };

    // the buffered body is re-emitted with known length
    parts.headers.remove(TRANSFER_ENCODING);
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(body_bytes.len()));

    Ok(Response::from_parts(parts, full_body(body_bytes)))
}

/// Origin-form request target for the upstream request line
fn request_target(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    }
}

/// Create error response
fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(full_body(Bytes::from(message.to_string())))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

/// Create full body
fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Create empty body
fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}
