#[macro_use]
extern crate log;

use clap::Parser;
use dspmv_core::matrix::GlobalMatrix;
use dspmv_partitioner::hypergraph::Hypergraph;
use dspmv_partitioner::partitioner_trait::{GreedyConnectivityPartitioner, HypergraphPartitioner};
use dspmv_partitioner::plan::{derive_partition_files, write_partition_files};

/// Partitions a global sparse matrix into `P` per-process partition files.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Matrix-market coordinate file to partition.
    matrix_file: std::path::PathBuf,
    /// Number of processes to partition for.
    p: usize,
    /// Directory the `<basename>-<P>-<rank>.part` files are written into.
    out_dir: std::path::PathBuf,
}

fn main() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    std::env::set_var("RUST_LOG", &level);
    pretty_env_logger::formatted_builder()
        .parse_filters(&level)
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
    if args.p < 2 {
        anyhow::bail!("P must be at least 2, got {}", args.p);
    }
    let basename = args
        .matrix_file
        .file_stem()
        .ok_or_else(|| anyhow::anyhow!("matrix file has no usable basename"))?
        .to_string_lossy()
        .into_owned();

    let matrix = GlobalMatrix::read_matrix_market(&args.matrix_file)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    info!("loaded {} with {} rows, {} nonzeros", args.matrix_file.display(), matrix.n, matrix.elements.len());

    let hg = Hypergraph::from_matrix(&matrix);
    let partitioner = GreedyConnectivityPartitioner::default();
    let assign = partitioner
        .partition(&hg, args.p)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    info!("partitioned into {} parts, connectivity={}", args.p, hg.connectivity(&assign));

    let files = derive_partition_files(&matrix, &assign, args.p, &basename)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    std::fs::create_dir_all(&args.out_dir)?;
    write_partition_files(&files, &args.out_dir).map_err(|e| anyhow::anyhow!("{e}"))?;
    info!("wrote {} partition files to {}", files.len(), args.out_dir.display());
    Ok(())
}
