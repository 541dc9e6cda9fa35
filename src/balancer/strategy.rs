/// Backend selection algorithms
///
/// Every algorithm receives the candidate set (healthy, under capacity,
/// sorted by ID) and returns an index into it.
use crate::core::Backend;
use crate::utils::stable_hash;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Selection algorithm trait
pub trait SelectionAlgorithm: Send + Sync {
    /// Select a backend from the candidates; `key` is the session or client key
    fn select_backend(&self, backends: &[&Backend], key: Option<&str>) -> Option<usize>;
}

/// Named selection strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    WeightedLeastConnections,
    IpHash,
    LeastResponseTime,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::RoundRobin,
        Strategy::LeastConnections,
        Strategy::WeightedRoundRobin,
        Strategy::WeightedLeastConnections,
        Strategy::IpHash,
        Strategy::LeastResponseTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::LeastConnections => "least-connections",
            Strategy::WeightedRoundRobin => "weighted-round-robin",
            Strategy::WeightedLeastConnections => "weighted-least-connections",
            Strategy::IpHash => "ip-hash",
            Strategy::LeastResponseTime => "least-response-time",
        }
    }

    /// Parse a strategy name, falling back to round-robin for unknown names
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::debug!("Unknown strategy '{}', using round-robin", name);
            Strategy::RoundRobin
        })
    }

    fn algorithm(&self) -> &'static dyn SelectionAlgorithm {
        match self {
            Strategy::RoundRobin => &RoundRobin,
            Strategy::LeastConnections => &LeastConnections,
            Strategy::WeightedRoundRobin => &WeightedRoundRobin,
            Strategy::WeightedLeastConnections => &WeightedLeastConnections,
            Strategy::IpHash => &IpHash,
            Strategy::LeastResponseTime => &LeastResponseTime,
        }
    }

    pub fn select(&self, backends: &[&Backend], key: Option<&str>) -> Option<usize> {
        self.algorithm().select_backend(backends, key)
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::RoundRobin
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .iter()
            .find(|strategy| strategy.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown load balancing strategy: {}", s))
    }
}

/// "Round-robin" as a randomized rotation: a uniformly random candidate.
///
/// There is no shared cursor; over many calls every candidate receives an
/// equal share of traffic but consecutive picks are independent.
pub struct RoundRobin;

impl SelectionAlgorithm for RoundRobin {
    fn select_backend(&self, backends: &[&Backend], _key: Option<&str>) -> Option<usize> {
        if backends.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..backends.len()))
    }
}

/// Fewest open connections, first candidate wins ties
pub struct LeastConnections;

impl SelectionAlgorithm for LeastConnections {
    fn select_backend(&self, backends: &[&Backend], _key: Option<&str>) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (index, backend) in backends.iter().enumerate() {
            match best {
                Some((_, connections)) if backend.current_connections >= connections => {}
                _ => best = Some((index, backend.current_connections)),
            }
        }
        best.map(|(index, _)| index)
    }
}

/// Random draw proportional to weight
pub struct WeightedRoundRobin;

impl SelectionAlgorithm for WeightedRoundRobin {
    fn select_backend(&self, backends: &[&Backend], _key: Option<&str>) -> Option<usize> {
        if backends.is_empty() {
            return None;
        }

        let total_weight: u64 = backends.iter().map(|b| b.weight as u64).sum();
        if total_weight == 0 {
            return RoundRobin.select_backend(backends, None);
        }

        let mut draw = rand::thread_rng().gen_range(0..total_weight);
        for (index, backend) in backends.iter().enumerate() {
            let weight = backend.weight as u64;
            if draw < weight {
                return Some(index);
            }
            draw -= weight;
        }

        Some(backends.len() - 1)
    }
}

/// Lowest `connections / weight`, first candidate wins ties
pub struct WeightedLeastConnections;

impl SelectionAlgorithm for WeightedLeastConnections {
    fn select_backend(&self, backends: &[&Backend], _key: Option<&str>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, backend) in backends.iter().enumerate() {
            let load = backend.current_connections as f64 / backend.weight.max(1) as f64;
            match best {
                Some((_, lowest)) if load >= lowest => {}
                _ => best = Some((index, load)),
            }
        }
        best.map(|(index, _)| index)
    }
}

/// Stable hash of the client key modulo candidate count
pub struct IpHash;

impl SelectionAlgorithm for IpHash {
    fn select_backend(&self, backends: &[&Backend], key: Option<&str>) -> Option<usize> {
        if backends.is_empty() {
            return None;
        }
        match key {
            Some(key) => Some((stable_hash(key) % backends.len() as u64) as usize),
            None => RoundRobin.select_backend(backends, None),
        }
    }
}

/// Lowest last measured probe latency; unmeasured backends sort last
pub struct LeastResponseTime;

impl SelectionAlgorithm for LeastResponseTime {
    fn select_backend(&self, backends: &[&Backend], _key: Option<&str>) -> Option<usize> {
        let mut best: Option<(usize, Duration)> = None;
        for (index, backend) in backends.iter().enumerate() {
            let latency = backend.last_response_time.unwrap_or(Duration::MAX);
            match best {
                Some((_, fastest)) if latency >= fastest => {}
                _ => best = Some((index, latency)),
            }
        }
        best.map(|(index, _)| index)
    }
}
