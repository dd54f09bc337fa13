use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;

/// Scheme derived from the greeting's method: `CONNECT` implies HTTPS
/// tunnelling, anything else is plaintext HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Immutable record populated once per accepted connection from the
/// first bytes of the client stream.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub method: String,
    pub scheme: Scheme,
    pub absolute_url: String,
    pub hostname: String,
    pub port: u16,
    pub raw: Vec<u8>,
}

static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\w+)").unwrap());
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\w+ (.+?) HTTP/\d\.\d").unwrap());
static HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?://)?(?:www\.)?([A-Za-z0-9.\-]+)").unwrap());
static PORT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(\d+)$").unwrap());

impl Greeting {
    /// Parses the first bytes of a client stream into a `Greeting`.
    ///
    /// Pure — does no I/O. Anchored only to the request line
    /// `METHOD SP TARGET SP HTTP/1.x`; non-ASCII bytes elsewhere (e.g. in
    /// headers not yet read) are tolerated since they're never inspected.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(raw);

        let method = METHOD_RE
            .captures(&text)
            .and_then(|c| c.get(1))
            .ok_or_else(|| anyhow!("malformed greeting: no method"))?
            .as_str()
            .to_ascii_uppercase();

        let scheme = if method == "CONNECT" {
            Scheme::Https
        } else {
            Scheme::Http
        };

        let absolute_url = URL_RE
            .captures(&text)
            .and_then(|c| c.get(1))
            .ok_or_else(|| anyhow!("malformed greeting: no request line"))?
            .as_str()
            .to_string();

        let hostname = HOST_RE
            .captures(&absolute_url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("malformed greeting: no hostname"))?;

        let port = match PORT_RE.captures(&absolute_url).and_then(|c| c.get(1)) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| anyhow!("malformed greeting: bad port"))?,
            None if scheme == Scheme::Https => 443,
            None => 80,
        };

        if port == 0 {
            return Err(anyhow!("malformed greeting: port out of range"));
        }

        Ok(Self {
            method,
            scheme,
            absolute_url,
            hostname,
            port,
            raw: raw.to_vec(),
        })
    }
}
