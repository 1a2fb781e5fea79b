//! Naming services: where a channel's backend addresses come from.
//!
//! Two schemes are understood:
//!
//! - `list://host:port,host:port`
//! - `file:///path/to/servers`, one address per line; blank lines and
//!   lines starting with `#` are skipped. The file is re-read on every
//!   [`NamingService::servers`] call so a reload picks up edits.

use crate::error::ClientError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A source of backend addresses.
pub trait NamingService: Send + Sync {
    /// Returns the current address list.
    fn servers(&self) -> Result<Vec<String>, ClientError>;
}

/// A fixed list of addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListNamingService {
    addrs: Vec<String>,
}

impl ListNamingService {
    pub fn new(addrs: Vec<String>) -> Result<Self, ClientError> {
        validate_addresses(&addrs)?;
        Ok(Self { addrs })
    }

    /// Parses the part after `list://`.
    pub fn parse(list: &str) -> Result<Self, ClientError> {
        Self::new(parse_address_list(list)?)
    }
}

impl NamingService for ListNamingService {
    fn servers(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.addrs.clone())
    }
}

/// Addresses read from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNamingService {
    path: PathBuf,
}

impl FileNamingService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NamingService for FileNamingService {
    fn servers(&self) -> Result<Vec<String>, ClientError> {
        let content = std::fs::read_to_string(&self.path)?;
        let addrs: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        validate_addresses(&addrs)?;
        Ok(addrs)
    }
}

/// Builds the naming service for `url`.
pub fn from_url(url: &str) -> Result<Box<dyn NamingService>, ClientError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| ClientError::InvalidAddressList(format!("missing scheme in '{}'", url)))?;

    match scheme {
        "list" => Ok(Box::new(ListNamingService::parse(rest)?)),
        "file" => {
            if rest.is_empty() {
                return Err(ClientError::InvalidAddressList("empty file path".into()));
            }
            Ok(Box::new(FileNamingService::new(rest)))
        }
        other => Err(ClientError::InvalidAddressList(format!(
            "unsupported naming scheme '{}'",
            other
        ))),
    }
}

/// Splits a comma separated address list.
pub fn parse_address_list(list: &str) -> Result<Vec<String>, ClientError> {
    let addrs: Vec<String> = list.split(',').map(|a| a.trim().to_string()).collect();
    validate_addresses(&addrs)?;
    Ok(addrs)
}

/// Checks that `addrs` is non-empty, well formed and free of duplicates.
pub fn validate_addresses<S: AsRef<str>>(addrs: &[S]) -> Result<(), ClientError> {
    if addrs.is_empty() {
        return Err(ClientError::InvalidAddressList("no addresses".into()));
    }
    let mut seen = HashSet::new();
    for addr in addrs {
        let addr = addr.as_ref();
        validate_address(addr)?;
        if !seen.insert(addr) {
            return Err(ClientError::InvalidAddressList(format!(
                "duplicate address '{}'",
                addr
            )));
        }
    }
    Ok(())
}

/// Checks that `addr` looks like `host:port`.
pub fn validate_address(addr: &str) -> Result<(), ClientError> {
    let invalid = || ClientError::InvalidAddressList(format!("malformed address '{}'", addr));
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}
