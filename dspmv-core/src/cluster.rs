//! Static description of where every rank in a distributed run listens for
//! halo-exchange connections, in the spirit of the teacher's
//! `hypervisor::config::Config` (a `serde`-deserialized document listing the
//! partitions and channels of a run).
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::error::{ResultExt, SystemError, TypedResult};

/// `rank -> host:port` for every process participating in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub ranks: HashMap<usize, SocketAddr>,
}

impl ClusterConfig {
    pub fn world_size(&self) -> usize {
        self.ranks.len()
    }

    pub fn addr_of(&self, rank: usize) -> TypedResult<SocketAddr> {
        self.ranks
            .get(&rank)
            .copied()
            .ok_or_else(|| anyhow!("cluster config has no address for rank {rank}"))
            .typ(SystemError::Config)
    }

    pub fn from_yaml_str(s: &str) -> TypedResult<Self> {
        serde_yaml::from_str(s)
            .context("parsing cluster config")
            .typ(SystemError::Config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> TypedResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading {}", path.as_ref().display()))
            .typ(SystemError::Io)?;
        Self::from_yaml_str(&text)
    }
}
