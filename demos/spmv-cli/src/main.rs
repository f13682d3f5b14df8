#[macro_use]
extern crate log;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use clap::Parser;
use dspmv_core::cluster::ClusterConfig;
use dspmv_core::kernel::{RayonExternalKernel, RayonInternalKernel};
use dspmv_core::matrix::GlobalMatrix;
use dspmv_core::partition_file::PartitionFile;
use dspmv_core::rank::{cluster_path_from_env, rank_from_env};
use dspmv_core::transport::TcpHaloTransport;
use dspmv_engine::driver::Driver;
use dspmv_engine::loader;

/// Runs one distributed SpMV call for this process's rank, against a
/// partition file produced by `partition`.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Shared basename-and-directory prefix of the `.part` files, e.g.
    /// `out/mymatrix`.
    partition_prefix: String,
    /// Optional matrix-market file to verify the gathered result against, on
    /// rank 0.
    verify_matrix_file: Option<std::path::PathBuf>,
}

fn main() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    std::env::set_var("RUST_LOG", &level);
    pretty_env_logger::formatted_builder()
        .parse_filters(&level)
        .filter_module("polling", log::LevelFilter::Off)
        .format_timestamp_secs()
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    match run(args) {
        Ok(()) => {}
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let rank = rank_from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    let cluster = ClusterConfig::from_path(cluster_path_from_env().map_err(|e| anyhow::anyhow!("{e}"))?)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let world_size = cluster.world_size();

    let path = PartitionFile::file_name(&args.partition_prefix, world_size, rank);
    let sparse = loader::load(&path, rank, world_size).map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        "rank {rank}: loaded {path} ({} owned rows, {} halo)",
        sparse.local_rows,
        sparse.halo_len()
    );

    let neighbors: HashSet<usize> = sparse
        .send_schedule
        .iter()
        .map(|e| e.neighbor)
        .chain(sparse.recv_schedule.iter().map(|e| e.neighbor))
        .collect();
    let transport = TcpHaloTransport::connect(rank, &cluster, neighbors).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut driver = Driver::new(transport, RayonInternalKernel, RayonExternalKernel);

    let mut x = sparse.initial_x();
    let mut y = vec![0.0; sparse.local_rows];
    driver.step(&sparse, &mut x, &mut y).map_err(|e| anyhow::anyhow!("{e}"))?;
    info!("rank {rank}: SpMV complete");

    write_result(&args.partition_prefix, world_size, rank, &sparse, &y)?;

    if let Some(verify_path) = args.verify_matrix_file {
        if rank == 0 {
            verify(&args.partition_prefix, world_size, &verify_path)?;
        }
    }
    Ok(())
}

/// Writes this rank's owned rows' result as `<row> <value>` lines, so rank 0
/// can gather every rank's contribution for verification without a separate
/// wire protocol (the halo transport only connects neighbors, not every
/// pair, so it cannot carry a full gather).
fn write_result(
    prefix: &str,
    p: usize,
    rank: usize,
    sparse: &dspmv_core::sparse::SparseMatrix,
    y: &[f64],
) -> anyhow::Result<()> {
    use std::fmt::Write as _;
    let mut out = String::new();
    for (local, &val) in y.iter().enumerate() {
        writeln!(out, "{} {:?}", sparse.local2global[local], val)?;
    }
    std::fs::write(format!("{prefix}-{p}-{rank}.result"), out)?;
    Ok(())
}

/// Polls for every rank's result file (bounded by a 10s timeout, since this
/// is a demo convenience rather than a synchronization primitive the core
/// engine depends on), merges them into global row order, and reports any
/// component whose relative error exceeds 1e-8.
fn verify(prefix: &str, p: usize, verify_matrix_file: &std::path::Path) -> anyhow::Result<()> {
    let matrix = GlobalMatrix::read_matrix_market(verify_matrix_file).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut gathered = vec![f64::NAN; matrix.n];

    let deadline = Instant::now() + Duration::from_secs(10);
    for rank in 0..p {
        let path = format!("{prefix}-{p}-{rank}.result");
        loop {
            if let Ok(text) = std::fs::read_to_string(&path) {
                for line in text.lines() {
                    let mut fields = line.split_whitespace();
                    let row: usize = fields.next().ok_or_else(|| anyhow::anyhow!("malformed result line"))?.parse()?;
                    let val: f64 = fields.next().ok_or_else(|| anyhow::anyhow!("malformed result line"))?.parse()?;
                    gathered[row] = val;
                }
                break;
            }
            if Instant::now() > deadline {
                anyhow::bail!("timed out waiting for {path}");
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    let reference = matrix.reference_multiply_canonical_x();
    let mut mismatches = 0;
    for (row, (&got, &want)) in gathered.iter().zip(&reference).enumerate() {
        let rel_err = (got - want).abs() / want.abs().max(1e-30);
        if rel_err > 1e-8 {
            mismatches += 1;
            warn!("verification mismatch at row {row}: expected {want}, got {got}, relative error {rel_err:e}");
        }
    }
    if mismatches == 0 {
        info!("verification passed: {} rows match within 1e-8", reference.len());
    } else {
        warn!("verification failed: {mismatches} of {} rows mismatched", reference.len());
    }
    Ok(())
}
