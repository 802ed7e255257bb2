use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use url::Url;

use crate::Result;
use crate::error::Error;

/// Where the transport should connect.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub path: String,
    pub port: u16,
    pub secure: bool,
}

impl Endpoint {
    /// Parse a `ws://` or `wss://` URL.
    ///
    /// The port defaults to 80/443 depending on the scheme, and an empty path becomes `/`.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input)?;

        let secure = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => return Err(Error::validation(format!("unsupported scheme `{other}`"))),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::validation(format!("missing host in `{input}`")))?
            .to_owned();

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::validation(format!("missing port in `{input}`")))?;

        let mut path = url.path().to_owned();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            path,
            port,
            secure,
        })
    }

    /// The URL the transport should open.
    #[must_use]
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        let default_port = if self.secure { 443 } else { 80 };

        write!(f, "{scheme}://{}", self.host)?;
        if self.port != default_port {
            write!(f, ":{}", self.port)?;
        }
        if !self.path.starts_with('/') {
            f.write_str("/")?;
        }
        f.write_str(&self.path)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Produces the endpoint for the next connection attempt.
///
/// Implementations typically fetch a fresh gateway URL (and whatever credentials it embeds) from
/// an external service. It is consulted once per attempt; an error counts as a failed attempt and
/// is retried with backoff like any other transport failure.
#[async_trait]
pub trait EndpointResolver: Send + Sync + 'static {
    async fn resolve(&self) -> Result<Endpoint>;
}

#[async_trait]
impl EndpointResolver for Endpoint {
    async fn resolve(&self) -> Result<Endpoint> {
        Ok(self.clone())
    }
}
