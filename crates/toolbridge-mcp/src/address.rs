//! Endpoint address classification and validation.
//!
//! An address that starts with `<scheme>://` is a network endpoint; anything
//! else is a command line for a locally spawned process.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};

use url::{Host, Url};

use crate::error::{McpError, Result};

/// Schemes accepted for network endpoints.
const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Maximum length of the address-derived part of a connection id.
const SLUG_MAX_LEN: usize = 32;

static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// How an endpoint is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Request/response over HTTP.
    Network,
    /// Newline-delimited JSON over a subprocess's stdin/stdout.
    Stream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// A parsed, validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// HTTP(S) endpoint.
    Network {
        /// Validated URL.
        url: Url,
    },
    /// Local subprocess.
    Stream {
        /// Program to execute.
        program: String,
        /// Arguments passed to the program.
        args: Vec<String>,
    },
}

impl Endpoint {
    /// Classify and validate an address.
    ///
    /// Loop-back, private and link-local hosts are refused unless `dev_mode`
    /// is set.
    pub fn parse(address: &str, dev_mode: bool) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(McpError::invalid_address(address, "address is empty"));
        }

        if has_scheme_prefix(address) {
            Self::parse_network(address, dev_mode)
        } else {
            Self::parse_stream(address)
        }
    }

    fn parse_network(address: &str, dev_mode: bool) -> Result<Self> {
        let url = Url::parse(address)
            .map_err(|e| McpError::invalid_address(address, format!("invalid URL: {}", e)))?;

        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(McpError::invalid_address(
                address,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        let host = url
            .host()
            .ok_or_else(|| McpError::invalid_address(address, "URL has no host"))?;

        if !dev_mode && is_local_host(&host) {
            return Err(McpError::invalid_address(
                address,
                "local and private addresses are only allowed in development mode",
            ));
        }

        Ok(Self::Network { url })
    }

    fn parse_stream(address: &str) -> Result<Self> {
        let mut tokens = address.split_whitespace().map(str::to_string);
        let program = tokens
            .next()
            .ok_or_else(|| McpError::invalid_address(address, "no command given"))?;
        Ok(Self::Stream {
            program,
            args: tokens.collect(),
        })
    }

    /// The transport this endpoint needs.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Network { .. } => TransportKind::Network,
            Self::Stream { .. } => TransportKind::Stream,
        }
    }

    /// A short human label derived from the address.
    pub fn default_name(&self) -> String {
        match self {
            Self::Network { url } => url.host_str().unwrap_or("remote").to_string(),
            Self::Stream { program, .. } => std::path::Path::new(program)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| program.clone()),
        }
    }
}

/// Whether the address begins with `<scheme>://`.
fn has_scheme_prefix(address: &str) -> bool {
    match address.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn is_local_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_local_ipv4(ip),
        Host::Ipv6(ip) => is_local_ipv6(ip),
    }
}

fn is_local_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_local_ipv6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_local_ipv4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
}

/// Canonical form of an address, used as the dedup key.
pub fn normalize_address(address: &str) -> String {
    address.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Generate a connection id from the current time and the address.
///
/// A process-wide sequence number keeps ids unique even for two connects to
/// the same address within one millisecond.
pub fn generate_connection_id(address: &str) -> String {
    let mut slug = String::with_capacity(SLUG_MAX_LEN);
    let mut last_dash = true;
    for c in normalize_address(address).chars() {
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "endpoint" } else { slug };

    let seq = CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", slug, chrono::Utc::now().timestamp_millis(), seq)
}
