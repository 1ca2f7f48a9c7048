//! Network-origin and repository-origin allow lists.
//!
//! Both lists mean "unrestricted" when empty. Network entries are literal
//! addresses or CIDR blocks; repository entries are `org/repo` or `*`.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::release::Release;

/// Proxy headers consulted for the client address, highest priority first.
const CLIENT_IP_HEADERS: [&str; 2] = ["x-real-ip", "x-forwarded-for"];

const WILDCARD_REPO: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRule {
    Exact(IpAddr),
    Cidr { network: IpAddr, prefix_len: u8 },
}

impl IpRule {
    /// Parses `10.0.0.0/8`, `::1` or `192.168.1.7`. Returns `None` for anything else.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        match entry.split_once('/') {
            Some((addr, len)) => {
                let network: IpAddr = addr.parse().ok()?;
                let prefix_len: u8 = len.parse().ok()?;
                let max = if network.is_ipv4() { 32 } else { 128 };
                (prefix_len <= max).then_some(Self::Cidr {
                    network,
                    prefix_len,
                })
            }
            None => entry
                .parse::<IpAddr>()
                .ok()
                .map(|addr| Self::Exact(addr.to_canonical())),
        }
    }

    pub fn matches(&self, addr: IpAddr) -> bool {
        match *self {
            Self::Exact(allowed) => allowed == addr,
            Self::Cidr {
                network,
                prefix_len,
            } => match (network, addr) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
                    u32::from(net) & mask == u32::from(ip) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    let mask = u128::MAX
                        .checked_shl(128 - u32::from(prefix_len))
                        .unwrap_or(0);
                    u128::from(net) & mask == u128::from(ip) & mask
                }
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ips: Vec<IpRule>,
    repos: Vec<String>,
    repo_base_url: String,
}

impl AllowList {
    /// Builds the evaluator from raw configuration entries.
    ///
    /// Unparseable IP entries are logged and skipped; they never match.
    pub fn new(
        ips: &[String],
        repos: &[String],
        repo_base_url: impl Into<String>,
    ) -> Self {
        let ips = ips
            .iter()
            .filter_map(|entry| {
                let rule = IpRule::parse(entry);
                if rule.is_none() {
                    warn!(entry = %entry, "Ignoring unparseable allow_ips entry");
                }
                rule
            })
            .collect();
        Self {
            ips,
            repos: repos.to_vec(),
            repo_base_url: repo_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn restricts_origin(&self) -> bool {
        !self.ips.is_empty()
    }

    pub fn restricts_repository(&self) -> bool {
        !self.repos.is_empty()
    }

    /// Whether the effective client address is permitted.
    ///
    /// Proxy headers take precedence over the transport peer address.
    pub fn is_origin_allowed(&self, headers: &HeaderMap, peer: SocketAddr) -> bool {
        if self.ips.is_empty() {
            return true;
        }
        let Some(addr) = client_addr(headers, peer) else {
            debug!("Client address could not be parsed");
            return false;
        };
        self.ips.iter().any(|rule| rule.matches(addr))
    }

    /// Whether every file of the release comes from an allowed repository.
    ///
    /// A release without files is never allowed.
    pub fn is_repository_allowed(&self, release: &Release) -> bool {
        if self.repos.is_empty() {
            return true;
        }
        !release.files.is_empty() && release.files.iter().all(|f| self.url_allowed(&f.url))
    }

    fn url_allowed(&self, url: &str) -> bool {
        self.repos.iter().any(|repo| {
            repo == WILDCARD_REPO
                || url.starts_with(&format!(
                    "{}/{}/releases/download",
                    self.repo_base_url, repo
                ))
        })
    }
}

/// Effective client address: `X-Real-IP`, then the left-most
/// `X-Forwarded-For` entry, then the peer address. IPv4-mapped IPv6
/// addresses come back as plain IPv4.
pub fn client_addr(headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    for name in CLIENT_IP_HEADERS {
        let value = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(value) = value {
            return value.parse::<IpAddr>().ok().map(|addr| addr.to_canonical());
        }
    }
    Some(peer.ip().to_canonical())
}
