// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Access control for the HTTP channel.
//!
//! [`AuthLayer`] runs a list of [`AccessCheck`]s before any route except the bypassed ones
//! (the health path). The built-in checks are an IP/CIDR allow-list, which rejects with 403, and
//! a token allow-list accepting `Authorization: Bearer <token>` or `X-API-Key`, which rejects
//! with 401. Tokens are compared in constant time.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::warn;

use super::error::TransportError;
use crate::config::AuthConfig;

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Caller is not allowed to connect at all (403).
    Forbidden(String),
    /// Caller did not present valid credentials (401).
    Unauthorized(String),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Forbidden(m) | Self::Unauthorized(m) => m,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = json!({ "error": self.message(), "timestamp": Utc::now() });
        (status, Json(body)).into_response()
    }
}

/// A pluggable pre-routing check.
pub trait AccessCheck: Send + Sync {
    fn check(&self, request: &Request<Body>) -> Result<(), Rejection>;
}

/// Accepts requests carrying one of a fixed set of tokens.
pub struct TokenAllowList {
    tokens: Vec<Vec<u8>>,
}

impl TokenAllowList {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t| !t.is_empty())
                .map(String::into_bytes)
                .collect(),
        }
    }

    /// Tokens from config plus one token per line of the token file, skipping blank lines and
    /// `#` comments.
    pub fn from_config(config: &AuthConfig) -> Result<Self, TransportError> {
        let mut tokens = config.tokens.clone();
        if let Some(path) = &config.token_file {
            tokens.extend(read_token_file(path)?);
        }
        Ok(Self::new(tokens))
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn allows(&self, provided: &[u8]) -> bool {
        self.tokens
            .iter()
            .fold(false, |found, token| found | bool::from(token.ct_eq(provided)))
    }
}

fn read_token_file(path: &Path) -> Result<Vec<String>, TransportError> {
    let content = std::fs::read_to_string(path).map_err(|e| TransportError::TokenFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .map(str::trim)
}

impl AccessCheck for TokenAllowList {
    fn check(&self, request: &Request<Body>) -> Result<(), Rejection> {
        match presented_token(request.headers()) {
            None => Err(Rejection::Unauthorized("missing API token".to_string())),
            Some(token) if self.allows(token.as_bytes()) => Ok(()),
            Some(_) => Err(Rejection::Unauthorized("invalid API token".to_string())),
        }
    }
}

/// One allow-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRule {
    Any,
    Exact(IpAddr),
    Cidr { network: IpAddr, prefix: u8 },
}

impl IpRule {
    /// Parse `*`, an address, or `address/prefix`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::Any);
        }
        let Some((addr, prefix)) = raw.split_once('/') else {
            return raw
                .parse()
                .map(Self::Exact)
                .map_err(|_| format!("invalid IP address: {}", raw));
        };

        let network: IpAddr = addr
            .parse()
            .map_err(|_| format!("invalid CIDR network: {}", raw))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= max)
            .ok_or_else(|| format!("invalid CIDR prefix: {}", raw))?;
        Ok(Self::Cidr { network, prefix })
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        match *self {
            Self::Any => true,
            Self::Exact(allowed) => allowed.to_canonical() == ip,
            Self::Cidr { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
                    u32::from(net) & mask == u32::from(ip) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
                    u128::from(net) & mask == u128::from(ip) & mask
                }
                _ => false,
            },
        }
    }
}

/// Accepts requests whose client address matches an allow-list entry.
pub struct IpAllowList {
    rules: Vec<IpRule>,
    trust_proxy_headers: bool,
}

impl IpAllowList {
    pub fn parse<I, S>(entries: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = entries
            .into_iter()
            .map(|e| IpRule::parse(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            trust_proxy_headers: false,
        })
    }

    /// Take the client address from proxy headers instead of the socket peer.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.rules.iter().any(|rule| rule.matches(ip))
    }
}

impl AccessCheck for IpAllowList {
    fn check(&self, request: &Request<Body>) -> Result<(), Rejection> {
        if self.rules.contains(&IpRule::Any) {
            return Ok(());
        }
        match client_ip(request, self.trust_proxy_headers) {
            Some(ip) if self.allows(ip) => Ok(()),
            Some(ip) => Err(Rejection::Forbidden(format!("address {} is not allowed", ip))),
            None => Err(Rejection::Forbidden(
                "unable to determine client address".to_string(),
            )),
        }
    }
}

/// Client address. With `trust_proxy` the first `X-Forwarded-For` hop wins, then `X-Real-IP`;
/// otherwise only the socket peer counts.
pub fn client_ip(request: &Request<Body>, trust_proxy: bool) -> Option<IpAddr> {
    let peer = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    };
    if !trust_proxy {
        return peer();
    }

    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next().and_then(|hop| hop.trim().parse().ok()))
        .or_else(|| header("x-real-ip").and_then(|v| v.trim().parse().ok()))
        .or_else(peer)
}

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

/// A [`tower::Layer`] that wraps services with [`AuthMiddleware`].
#[derive(Clone)]
pub struct AuthLayer {
    checks: Arc<Vec<Box<dyn AccessCheck>>>,
    bypass: Arc<Vec<String>>,
    trust_proxy_headers: bool,
}

impl AuthLayer {
    pub fn new(checks: Vec<Box<dyn AccessCheck>>) -> Self {
        Self {
            checks: Arc::new(checks),
            bypass: Arc::new(Vec::new()),
            trust_proxy_headers: false,
        }
    }

    /// Let requests for `path` through without any check.
    pub fn bypass(mut self, path: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.bypass).push(path.into());
        self
    }

    /// IP allow-list first, then tokens if any are configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self, TransportError> {
        let mut checks: Vec<Box<dyn AccessCheck>> = Vec::new();
        if !config.allowed_ips.is_empty() {
            let ips = IpAllowList::parse(&config.allowed_ips)
                .map_err(TransportError::InvalidAuth)?
                .trust_proxy_headers(config.trust_proxy_headers);
            checks.push(Box::new(ips));
        }
        let tokens = TokenAllowList::from_config(config)?;
        if !tokens.is_empty() {
            checks.push(Box::new(tokens));
        }
        let mut layer = Self::new(checks);
        layer.trust_proxy_headers = config.trust_proxy_headers;
        Ok(layer)
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            checks: Arc::clone(&self.checks),
            bypass: Arc::clone(&self.bypass),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

/// The middleware service produced by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    checks: Arc<Vec<Box<dyn AccessCheck>>>,
    bypass: Arc<Vec<String>>,
    trust_proxy_headers: bool,
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let verdict = if self.bypass.iter().any(|p| p == req.uri().path()) {
            Ok(())
        } else {
            self.checks.iter().try_for_each(|check| check.check(&req))
        };

        // The clone is not guaranteed ready; swap so the ready one handles this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let trust_proxy = self.trust_proxy_headers;

        Box::pin(async move {
            match verdict {
                Ok(()) => inner.call(req).await,
                Err(rejection) => {
                    warn!(
                        path = %req.uri().path(),
                        client = ?client_ip(&req, trust_proxy),
                        reason = rejection.message(),
                        "Rejected request"
                    );
                    Ok(rejection.into_response())
                }
            }
        })
    }
}
