//! Backend selection strategies.

use crate::error::ClientError;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which strategy a channel uses to pick a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadBalancerKind {
    #[default]
    RoundRobin,
    Random,
    /// Rendezvous hashing over a content key.
    ConsistentHash,
}

impl LoadBalancerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerKind::RoundRobin => "rr",
            LoadBalancerKind::Random => "random",
            LoadBalancerKind::ConsistentHash => "c_hash",
        }
    }
}

impl fmt::Display for LoadBalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancerKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rr" | "round_robin" | "roundrobin" => Ok(LoadBalancerKind::RoundRobin),
            "random" | "rand" => Ok(LoadBalancerKind::Random),
            "c_hash" | "c_md5" | "consistent_hash" => Ok(LoadBalancerKind::ConsistentHash),
            _ => Err(ClientError::UnknownLoadBalancer(s.to_string())),
        }
    }
}

/// A strategy plus the state it needs.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    kind: LoadBalancerKind,
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(kind: LoadBalancerKind) -> Self {
        Self {
            kind,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> LoadBalancerKind {
        self.kind
    }

    /// Picks an index into `ids`, or `None` when `ids` is empty.
    ///
    /// `key` only matters for [`LoadBalancerKind::ConsistentHash`]; a missing
    /// key hashes as empty.
    pub fn select<T: AsRef<str>>(&self, ids: &[T], key: Option<&[u8]>) -> Option<usize> {
        if ids.is_empty() {
            return None;
        }
        let index = match self.kind {
            LoadBalancerKind::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % ids.len(),
            LoadBalancerKind::Random => rand::thread_rng().gen_range(0..ids.len()),
            LoadBalancerKind::ConsistentHash => rendezvous(ids, key.unwrap_or_default()),
        };
        Some(index)
    }
}

/// Highest-random-weight choice; ties go to the lowest index.
fn rendezvous<T: AsRef<str>>(ids: &[T], key: &[u8]) -> usize {
    let key_hash = crc32c::crc32c(key);
    let mut best = 0;
    let mut best_weight = 0;
    for (i, id) in ids.iter().enumerate() {
        let weight = weight(crc32c::crc32c(id.as_ref().as_bytes()), key_hash);
        if i == 0 || weight > best_weight {
            best = i;
            best_weight = weight;
        }
    }
    best
}

/// Mixes the backend and key checksums into one weight.
///
/// CRC is linear over XOR, so comparing raw checksums would let the key's
/// bit pattern alone decide the winner. The splitmix64 finalizer breaks that.
fn weight(id_hash: u32, key_hash: u32) -> u64 {
    let mut z = (u64::from(id_hash) << 32) | u64::from(key_hash);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
