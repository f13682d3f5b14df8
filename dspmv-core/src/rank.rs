//! This process's identity within the cluster, read from the environment the
//! launcher provides — the same pattern the teacher's `partition` crate uses
//! for `NAME_ENV`/`PERIOD_ENV`/`IDENTIFIER_ENV`, generalized to fail through a
//! `TypedResult` instead of panicking at first access.
use once_cell::sync::Lazy;

use crate::error::{ResultExt, SystemError, TypedResult};

pub const RANK_ENV: &str = "DSPMV_RANK";
pub const CLUSTER_ENV: &str = "DSPMV_CLUSTER";

static RANK_FROM_ENV: Lazy<Option<usize>> =
    Lazy::new(|| std::env::var(RANK_ENV).ok().and_then(|s| s.parse().ok()));

static CLUSTER_PATH_FROM_ENV: Lazy<Option<String>> =
    Lazy::new(|| std::env::var(CLUSTER_ENV).ok());

/// This process's rank, as given by `DSPMV_RANK`.
pub fn rank_from_env() -> TypedResult<usize> {
    RANK_FROM_ENV
        .ok_or_else(|| anyhow::anyhow!("{RANK_ENV} is not set or is not a valid rank"))
        .typ(SystemError::Config)
}

/// Path to the cluster config document, as given by `DSPMV_CLUSTER`.
pub fn cluster_path_from_env() -> TypedResult<String> {
    CLUSTER_PATH_FROM_ENV
        .clone()
        .ok_or_else(|| anyhow::anyhow!("{CLUSTER_ENV} is not set"))
        .typ(SystemError::Config)
}
