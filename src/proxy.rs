use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use log::{error, info};
use percent_encoding::percent_decode_str;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::{Error, ErrorSource, ErrorType, Result};
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{FailToProxy, ProxyHttp, Session};
use reqwest::Url;
use tokio::net::lookup_host;

use crate::router::{RouteDecision, Router};

const REJECT_BODY: &str = "Host does not match main backend target";
const UNAVAILABLE_BODY: &str = "Destination backend unavailable";
const BAD_GATEWAY_BODY: &str = "backend unavailable";

/// Where forwarded requests go, resolved once from the primary destination URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub address: String,
    pub tls: bool,
    pub sni: String,
    /// Path prefix of the destination URL, without a trailing slash.
    pub base_path: String,
    /// Query of the destination URL, merged into every forwarded request.
    pub base_query: Option<String>,
}

impl Upstream {
    pub fn parse(destination: &str) -> std::result::Result<Self, String> {
        let url = Url::parse(destination)
            .map_err(|e| format!("invalid destination '{}': {}", destination, e))?;

        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(format!("unsupported scheme '{}' in '{}'", other, destination)),
        };
        let host = url
            .host_str()
            .ok_or_else(|| format!("destination '{}' has no host", destination))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("destination '{}' has no port", destination))?;

        // host_str keeps the brackets around IPv6 literals, which is what host:port needs.
        let sni = host.trim_start_matches('[').trim_end_matches(']').to_string();

        Ok(Self {
            address: format!("{}:{}", host, port),
            tls,
            sni,
            base_path: url.path().trim_end_matches('/').to_string(),
            base_query: url.query().filter(|q| !q.is_empty()).map(str::to_string),
        })
    }

    fn rewrites_uri(&self) -> bool {
        !self.base_path.is_empty() || self.base_query.is_some()
    }

    /// Prefixes the request path with the destination's base path. The destination
    /// query comes first, joined to the request query with `&`.
    pub fn join_path(&self, path: &str, query: Option<&str>) -> String {
        let mut joined = String::with_capacity(self.base_path.len() + path.len() + 1);
        joined.push_str(&self.base_path);
        if !path.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(path);

        let query = query.filter(|q| !q.is_empty());
        match (self.base_query.as_deref(), query) {
            (Some(base), Some(query)) => {
                joined.push('?');
                joined.push_str(base);
                joined.push('&');
                joined.push_str(query);
            }
            (Some(only), None) | (None, Some(only)) => {
                joined.push('?');
                joined.push_str(only);
            }
            (None, None) => {}
        }
        joined
    }
}

/// Pingora service that gates each request through the [`Router`] and relays
/// forwarded ones to the primary destination.
pub struct WakeProxy {
    router: Router,
    upstream: Upstream,
}

impl WakeProxy {
    pub fn new(router: Router, upstream: Upstream) -> Self {
        WakeProxy { router, upstream }
    }
}

/// Host as the client sent it, port included. Falls back to the URI authority for HTTP/2.
pub fn request_host(req: &RequestHeader) -> &str {
    req.headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri.authority().map(|a| a.as_str()))
        .unwrap_or("")
}

/// Percent-decoded request path, the form ignored paths are written in.
pub fn request_path(req: &RequestHeader) -> String {
    percent_decode_str(req.uri.path())
        .decode_utf8_lossy()
        .into_owned()
}

async fn respond_text(session: &mut Session, status: u16, body: &'static str) -> Result<()> {
    let mut header = ResponseHeader::build(status, Some(2))?;
    header.insert_header("Content-Type", "text/plain; charset=utf-8")?;
    header.insert_header("Content-Length", body.len().to_string())?;
    session
        .write_response_header(Box::new(header), false)
        .await?;
    session
        .write_response_body(Some(Bytes::from_static(body.as_bytes())), true)
        .await
}

#[async_trait]
impl ProxyHttp for WakeProxy {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        let host = request_host(session.req_header()).to_string();
        let path = request_path(session.req_header());

        let client = session
            .client_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!("[{}] Request host={} path={}", client, host, path);

        match self.router.route(&host, &path).await {
            RouteDecision::Forward => Ok(false),
            RouteDecision::Reject => {
                respond_text(session, 200, REJECT_BODY).await?;
                Ok(true)
            }
            RouteDecision::Unavailable => {
                respond_text(session, 503, UNAVAILABLE_BODY).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        // HttpPeer::new resolves synchronously and panics on failure, so resolve here.
        let addr = lookup_host(self.upstream.address.as_str())
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| {
                Error::explain(
                    ErrorType::HTTPStatus(502),
                    format!("failed to resolve upstream {}", self.upstream.address),
                )
            })?;

        let peer = Box::new(HttpPeer::new(addr, self.upstream.tls, self.upstream.sni.clone()));
        Ok(peer)
    }

    fn fail_to_connect(
        &self,
        _session: &mut Session,
        _peer: &HttpPeer,
        _ctx: &mut Self::CTX,
        mut e: Box<Error>,
    ) -> Box<Error> {
        // A failed forward is reported once, never retried.
        e.set_retry(false);
        e
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        _ctx: &mut Self::CTX,
    ) -> Result<()> {
        if self.upstream.rewrites_uri() {
            let joined = self
                .upstream
                .join_path(upstream_request.uri.path(), upstream_request.uri.query());
            let uri = joined.parse::<Uri>().map_err(|e| {
                Error::because(ErrorType::InternalError, "failed to rewrite upstream uri", e)
            })?;
            upstream_request.set_uri(uri);
        }

        if let Some(client_addr) = session.client_addr().and_then(|a| a.as_inet()) {
            let client_ip = client_addr.ip().to_string();
            let forwarded = match upstream_request
                .headers
                .get("X-Forwarded-For")
                .and_then(|v| v.to_str().ok())
            {
                Some(existing) => format!("{}, {}", existing, client_ip),
                None => client_ip,
            };
            upstream_request.insert_header("X-Forwarded-For", forwarded)?;
        }

        Ok(())
    }

    async fn fail_to_proxy(&self, session: &mut Session, e: &Error, _ctx: &mut Self::CTX) -> FailToProxy
    where
        Self::CTX: Send + Sync,
    {
        let code = match e.etype() {
            ErrorType::HTTPStatus(code) => *code,
            _ => match e.esource() {
                ErrorSource::Upstream => 502,
                ErrorSource::Downstream => match e.etype() {
                    ErrorType::WriteError | ErrorType::ReadError | ErrorType::ConnectionClosed => 0,
                    _ => 400,
                },
                _ => 500,
            },
        };

        // 0 means the client is gone and there is nobody to answer.
        if code > 0 {
            let body = if code == 502 { BAD_GATEWAY_BODY } else { "" };
            if let Err(write_err) = respond_text(session, code, body).await {
                error!("failed to send error response downstream: {}", write_err);
            }
        }

        FailToProxy {
            error_code: code,
            can_reuse_downstream: false,
        }
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, _ctx: &mut Self::CTX) {
        if let Some(e) = e {
            let status = session
                .response_written()
                .map(|r| r.status.as_u16())
                .unwrap_or(0);
            error!(
                "proxy error forwarding {} to {}: {} (status {})",
                session.req_header().uri,
                self.router.config().general.destination,
                e,
                status
            );
        }
    }
}
