use std::{
    ops::{Deref, DerefMut},
    str::FromStr,
};

use sarge::{ArgumentType, prelude::*};

use crate::impl_deref_mut;

sarge! {
    #[derive(Debug)]
    pub Args,

    /// Port to accept proxy connections on (binds 127.0.0.1 and [::1]).
    #ok 'p' @METERPROXY_PORT pub port: Port = Port::from_str("8080").unwrap(),

    /// Path to the JSON policy config: {"black-list": [...], "limited": {...}}.
    #ok 'c' @METERPROXY_CONFIG pub config: FilePath = FilePath::from_str("proxy.json").unwrap(),

    /// HTML body served on the HTTP path when a connection is blocked.
    #ok 'b' @METERPROXY_BLOCK_PAGE pub block_page: FilePath = FilePath::from_str("block.html").unwrap(),

    /// HTML body served on the HTTP path when a connection's quota is exhausted.
    #ok 'L' @METERPROXY_LIMIT_PAGE pub limit_page: FilePath = FilePath::from_str("limit.html").unwrap(),

    /// log level: "" means no log, v - info, vv - debug, vvv - trace
    #ok 'v' @METERPROXY_LOG_LEVEL pub log_level:LogLevel = LogLevel("info".into()),

    /// log with color?
    #ok pub colored:bool = false,

    /// help
    #ok 'h' pub help: bool = false,
}

#[derive(Debug)]
pub struct LogLevel(String);

impl FromStr for LogLevel {
    type Err = core::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(String::from_str(s)?))
    }
}

impl ArgumentType for LogLevel {
    type Error = ArgParseError;
    fn from_value(val: Option<&str>) -> sarge::ArgResult<Self> {
        const VERBOSE_PAT: char = 'v';

        if let Some(v) = val {
            let level_str = match v.trim().to_ascii_lowercase().as_str() {
                "off" => "off",
                "err" | "error" => "error",
                "warn" | "warning" => "warn",
                "info" => "info",
                "debug" => "debug",
                "trace" => "trace",
                s => {
                    let count = s
                        .chars()
                        .filter(|c| c.eq_ignore_ascii_case(&VERBOSE_PAT))
                        .count();
                    match count {
                        0 => "off",
                        1 => "info",
                        2 => "debug",
                        3 => "trace",
                        _ => "trace",
                    }
                }
            };

            return Ok(LogLevel(level_str.into())).into();
        }

        Ok(LogLevel("info".into())).into()
    }
}

impl_deref_mut!(LogLevel(String));

/// A bare TCP port, independent of address family — the listener always
/// binds both `127.0.0.1` and `[::1]` on it. Must be in `1..=65535`; `0`
/// would silently hand the OS an ephemeral port instead of the one the
/// caller asked for, so it's rejected here rather than left to bind().
#[derive(Debug, Clone, Copy)]
pub struct Port(u16);

impl FromStr for Port {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let port: u16 = s.parse()?;
        if port == 0 {
            anyhow::bail!("port must be between 1 and 65535, got 0");
        }
        Ok(Self(port))
    }
}

impl ArgumentType for Port {
    type Error = ArgParseError;
    fn from_value(val: Option<&str>) -> sarge::ArgResult<Self> {
        if let Some(v) = val {
            let port: u16 = v.trim().parse().ok()?;
            if port == 0 {
                return None;
            }
            return Ok(Port(port)).into();
        }
        None
    }
}

impl Port {
    pub fn get(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct FilePath(String);

impl FromStr for FilePath {
    type Err = core::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl ArgumentType for FilePath {
    type Error = ArgParseError;
    fn from_value(val: Option<&str>) -> sarge::ArgResult<Self> {
        if let Some(v) = val {
            return Ok(FilePath(v.to_string())).into();
        }
        None
    }
}

impl_deref_mut!(FilePath(String));

impl FilePath {
    pub fn as_path(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}
