//! Read/write routing for split topologies.
//!
//! Writes always go to the primary. Reads go to one replica chosen by a
//! [`ReplicaPolicy`]; there is no failover, so an unavailable replica
//! surfaces as a request-level error.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use super::error::ConnectionError;

/// Which pool of a topology served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Replica(usize),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Replica(index) => write!(f, "replica-{index}"),
        }
    }
}

/// Replica selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaPolicy {
    /// Uniformly random replica per read.
    #[default]
    Random,
}

const POLICIES: &[(&str, ReplicaPolicy)] = &[("random", ReplicaPolicy::Random)];

impl FromStr for ReplicaPolicy {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Ok(Self::default());
        }
        POLICIES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, policy)| *policy)
            .ok_or_else(|| ConnectionError::UnsupportedPolicy(s.to_string()))
    }
}

/// A non-empty set of replicas and the policy used to pick among them.
#[derive(Debug)]
pub struct ReadRouter<T> {
    replicas: Vec<T>,
    policy: ReplicaPolicy,
}

impl<T> ReadRouter<T> {
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoReplicas`] when `replicas` is empty.
    pub fn new(replicas: Vec<T>, policy: ReplicaPolicy) -> Result<Self, ConnectionError> {
        if replicas.is_empty() {
            return Err(ConnectionError::NoReplicas);
        }
        Ok(Self { replicas, policy })
    }

    /// Picks the replica for the next read.
    #[must_use]
    pub fn pick(&self) -> (Role, &T) {
        let index = match self.policy {
            ReplicaPolicy::Random => rand::rng().random_range(0..self.replicas.len()),
        };
        (Role::Replica(index), &self.replicas[index])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    #[must_use]
    pub fn policy(&self) -> ReplicaPolicy {
        self.policy
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &T)> {
        self.replicas
            .iter()
            .enumerate()
            .map(|(index, replica)| (Role::Replica(index), replica))
    }
}
