//! URI parser
//!
//! Handles the forms boot scripts and redirects actually use:
//! `scheme://host[:port]/path[?query]`, opaque `scheme:rest`, and relative
//! references resolved against a base.

use alloc::format;
use alloc::string::{String, ToString};
use core::fmt;

use crate::error::{Error, Result};

/// Parsed URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    /// Everything after `scheme:` for URIs without an authority
    pub opaque: Option<String>,
}

impl Uri {
    /// Parse an absolute URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let colon = uri.find(':').ok_or(Error::InvalidArgument)?;
        let scheme = &uri[..colon];
        if !is_valid_scheme(scheme) {
            return Err(Error::InvalidArgument);
        }
        let scheme = scheme.to_ascii_lowercase();
        let rest = &uri[colon + 1..];

        let Some(hier) = rest.strip_prefix("//") else {
            if rest.is_empty() {
                return Err(Error::InvalidArgument);
            }
            return Ok(Self {
                scheme,
                host: None,
                port: None,
                path: String::new(),
                query: None,
                opaque: Some(rest.to_string()),
            });
        };

        let authority_end = hier.find(|c| c == '/' || c == '?').unwrap_or(hier.len());
        let (authority, tail) = hier.split_at(authority_end);
        let (host, port) = split_authority(authority)?;
        let (path, query) = split_query(tail);

        Ok(Self {
            scheme,
            host,
            port,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query: query.map(ToString::to_string),
            opaque: None,
        })
    }

    /// Resolve a reference (e.g. a redirect target) against this URI.
    pub fn resolve(&self, reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Ok(self.clone());
        }
        if let Ok(absolute) = Self::parse(reference) {
            return Ok(absolute);
        }
        if reference.starts_with("//") {
            return Self::parse(&format!("{}:{}", self.scheme, reference));
        }
        if self.opaque.is_some() {
            return Err(Error::InvalidArgument);
        }

        let (path, query) = split_query(reference);
        let path = if path.is_empty() {
            self.path.clone()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            let dir_end = self.path.rfind('/').map_or(0, |i| i + 1);
            format!("{}{}", &self.path[..dir_end], path)
        };

        Ok(Self {
            path,
            query: query.map(ToString::to_string),
            ..self.clone()
        })
    }

    /// Port with default for scheme
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or(match self.scheme.as_str() {
            "http" => Some(80),
            "https" => Some(443),
            "tftp" => Some(69),
            "ftp" => Some(21),
            "iscsi" => Some(3260),
            "nbd" => Some(10809),
            _ => None,
        })
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(opaque) = &self.opaque {
            return write!(f, "{}", opaque);
        }
        write!(f, "//")?;
        if let Some(host) = &self.host {
            if host.contains(':') {
                write!(f, "[{}]", host)?;
            } else {
                write!(f, "{}", host)?;
            }
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_authority(authority: &str) -> Result<(Option<String>, Option<u16>)> {
    // Drop any userinfo
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    if authority.is_empty() {
        return Ok((None, None));
    }

    let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
        let (host, after) = v6.split_once(']').ok_or(Error::InvalidArgument)?;
        (host, after.strip_prefix(':'))
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    let port = match port {
        Some(p) if !p.is_empty() => Some(p.parse::<u16>().map_err(|_| Error::InvalidArgument)?),
        _ => None,
    };
    Ok((Some(host.to_string()), port))
}

fn split_query(s: &str) -> (&str, Option<&str>) {
    match s.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (s, None),
    }
}
