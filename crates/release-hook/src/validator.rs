//! Admission checks for `POST /release`, run in a fixed order.
//!
//! 1. network origin (only when an IP allow-list is configured)
//! 2. replay nonce
//! 3. HMAC signature over the raw body
//! 4. repository origin, after decoding (only when a repo allow-list is configured)
//!
//! Nothing is downloaded or written unless all four pass.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use tracing::warn;

use crate::allow_list::AllowList;
use crate::release::Release;
use crate::replay::ReplayGuard;
use crate::signature;

pub const NONCE_HEADER: &str = "x-build-nonce";
pub const SIGNATURE_HEADER: &str = "x-build-signature";

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OriginNotAllowed,
    /// Nonce header present but not visible ASCII.
    MalformedNonce,
    NonceReused,
    BadSignature,
    RepositoryNotAllowed,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OriginNotAllowed => write!(f, "client address is not allowed"),
            Self::MalformedNonce => write!(f, "nonce header is not visible ASCII"),
            Self::NonceReused => write!(f, "nonce has already been used"),
            Self::BadSignature => write!(f, "signature does not match"),
            Self::RepositoryNotAllowed => write!(f, "release repository is not allowed"),
        }
    }
}

impl std::error::Error for Rejection {}

pub struct RequestValidator {
    allow_list: AllowList,
    replay: ReplayGuard,
    secret: String,
}

impl RequestValidator {
    pub fn new(allow_list: AllowList, replay: ReplayGuard, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if secret.is_empty() {
            warn!("No API secret configured, request signatures will not be checked");
        }
        Self {
            allow_list,
            replay,
            secret,
        }
    }

    /// Steps 1 to 3. Must run on the exact bytes received, before decoding.
    ///
    /// The nonce is burned as soon as step 2 passes, even if the signature
    /// check that follows fails.
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        peer: SocketAddr,
        body: &[u8],
    ) -> Result<(), Rejection> {
        if self.allow_list.restricts_origin() && !self.allow_list.is_origin_allowed(headers, peer)
        {
            return Err(Rejection::OriginNotAllowed);
        }

        let nonce = match headers.get(NONCE_HEADER) {
            Some(value) => value.to_str().map_err(|_| Rejection::MalformedNonce)?,
            None => "",
        };
        if !self.replay.consume(nonce).await {
            return Err(Rejection::NonceReused);
        }

        let supplied = header_str(headers, SIGNATURE_HEADER);
        if !signature::verify(&self.secret, nonce, body, supplied) {
            return Err(Rejection::BadSignature);
        }

        Ok(())
    }

    /// Step 4.
    pub fn check_repository(&self, release: &Release) -> Result<(), Rejection> {
        if self.allow_list.restricts_repository() && !self.allow_list.is_repository_allowed(release)
        {
            return Err(Rejection::RepositoryNotAllowed);
        }
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
