//! Resolution of user-supplied server addresses.
//!
//! Follows the vanilla client: an explicit port is used as-is, otherwise
//! a `_minecraft._tcp` SRV record is consulted before falling back to
//! the default port. Only the SRV step touches DNS; the host name itself is
//! passed to the proxy unresolved.

use std::{fmt, future::Future, net::IpAddr};
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

pub const DEFAULT_PORT: u16 = 25565;

/// A host name or IP literal plus a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("server address is empty")]
    Empty,
    #[error("too many colons in address '{0}'")]
    TooManyColons(String),
    #[error("missing ']' in address '{0}'")]
    MissingBracket(String),
    #[error("invalid port in address '{0}'")]
    InvalidPort(String),
}

/// Splits `host[:port]` (or `[v6]:port`) without any lookups.
///
/// A missing port, or port `0`, is returned as `None`.
pub fn split_address(address: &str) -> Result<(String, Option<u16>), ResolveError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ResolveError::Empty);
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| ResolveError::MissingBracket(address.to_owned()))?;
        let port = match rest {
            "" => None,
            _ => Some(
                rest.strip_prefix(':')
                    .ok_or_else(|| ResolveError::InvalidPort(address.to_owned()))?,
            ),
        };
        (host, port)
    } else {
        match address.split_once(':') {
            Some((_, port)) if port.contains(':') => {
                return Err(ResolveError::TooManyColons(address.to_owned()))
            }
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(ResolveError::Empty);
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| ResolveError::InvalidPort(address.to_owned()))?,
        None => 0,
    };
    Ok((host.to_owned(), (port != 0).then_some(port)))
}

/// Turns an address string into a connectable [`ServerAddress`].
///
/// The returned future is `Send` so that logins can run on spawned tasks.
pub trait Resolve {
    fn resolve(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<ServerAddress, ResolveError>> + Send;
}

/// Resolves with SRV lookups through the system-independent default
/// resolver configuration.
pub struct SrvResolver {
    resolver: TokioAsyncResolver,
}

impl SrvResolver {
    pub fn new() -> Self {
        Self::from_resolver(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        ))
    }

    pub fn from_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }

    async fn lookup_srv(&self, host: &str) -> Option<ServerAddress> {
        let name = ["_minecraft._tcp.", host].concat();
        let lookup = match self.resolver.srv_lookup(name.as_str()).await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::debug!("No SRV record for {host}: {e}");
                return None;
            }
        };
        let record = lookup.iter().min_by_key(|srv| srv.priority())?;
        let target = record.target().to_utf8();
        Some(ServerAddress::new(
            target.trim_end_matches('.'),
            record.port(),
        ))
    }
}

impl Default for SrvResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolve for SrvResolver {
    async fn resolve(&self, address: &str) -> Result<ServerAddress, ResolveError> {
        let (host, port) = split_address(address)?;
        if let Some(port) = port {
            return Ok(ServerAddress::new(host, port));
        }
        if host.parse::<IpAddr>().is_err() {
            if let Some(target) = self.lookup_srv(&host).await {
                tracing::debug!("SRV record redirects {host} to {target}");
                return Ok(target);
            }
        }
        Ok(ServerAddress::new(host, DEFAULT_PORT))
    }
}

/// Resolver for tests and for callers who already know where to go.
///
/// With a fixed target every address resolves to it; without one it only
/// applies the vanilla port default.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    target: Option<ServerAddress>,
}

impl StaticResolver {
    pub fn new(target: ServerAddress) -> Self {
        Self {
            target: Some(target),
        }
    }

    /// Parses addresses but never performs SRV lookups.
    pub fn port_default() -> Self {
        Self { target: None }
    }
}

impl Resolve for StaticResolver {
    async fn resolve(&self, address: &str) -> Result<ServerAddress, ResolveError> {
        match &self.target {
            Some(target) => Ok(target.clone()),
            None => {
                let (host, port) = split_address(address)?;
                Ok(ServerAddress::new(host, port.unwrap_or(DEFAULT_PORT)))
            }
        }
    }
}
