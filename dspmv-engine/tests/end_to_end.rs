//! End-to-end scenarios from `spec.md` §8, run against `ThreadHaloTransport`
//! so no real OS processes are spawned.
use std::collections::HashMap;

use dspmv_core::kernel::{RayonExternalKernel, RayonInternalKernel};
use dspmv_core::matrix::{Element, GlobalMatrix};
use dspmv_core::sparse::SparseMatrix;
use dspmv_core::transport::thread_cluster;
use dspmv_engine::driver::Driver;
use dspmv_engine::loader;
use dspmv_partitioner::plan::derive_partition_files;

fn identity(n: usize) -> GlobalMatrix {
    let elements = (0..n).map(|i| Element { row: i, col: i, val: 1.0 }).collect();
    GlobalMatrix { n, elements }
}

fn tridiagonal(n: usize) -> GlobalMatrix {
    let mut elements = Vec::new();
    for i in 0..n {
        elements.push(Element { row: i, col: i, val: 2.0 });
        if i + 1 < n {
            elements.push(Element { row: i, col: i + 1, val: -1.0 });
            elements.push(Element { row: i + 1, col: i, val: -1.0 });
        }
    }
    GlobalMatrix { n, elements }
}

fn dense(n: usize) -> GlobalMatrix {
    let mut elements = Vec::new();
    for r in 0..n {
        for c in 0..n {
            elements.push(Element { row: r, col: c, val: (r * n + c + 1) as f64 });
        }
    }
    GlobalMatrix { n, elements }
}

/// Runs one SpMV call on every rank concurrently (each rank's `wait_recv`
/// blocks until its peers have posted their sends) and returns each rank's
/// `(x, y)`.
fn run_all(matrix: &GlobalMatrix, assign: &[usize], p: usize, basename: &str) -> Vec<(Vec<f64>, Vec<f64>)> {
    let files = derive_partition_files(matrix, assign, p, basename).unwrap();
    let matrices: Vec<SparseMatrix> = files.into_iter().map(|f| loader::build(f).unwrap()).collect();
    let transports = thread_cluster(p);

    let mut xs: Vec<Vec<f64>> = matrices.iter().map(|m| m.initial_x()).collect();
    let mut ys: Vec<Vec<f64>> = matrices.iter().map(|m| vec![0.0; m.local_rows]).collect();

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for ((matrix, transport), (x, y)) in matrices
            .iter()
            .zip(transports)
            .zip(xs.iter_mut().zip(ys.iter_mut()))
        {
            let mut driver = Driver::new(transport, RayonInternalKernel, RayonExternalKernel);
            handles.push(scope.spawn(move || {
                driver.step(matrix, x, y).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    });

    xs.into_iter().zip(ys).collect()
}

#[test]
fn identity_on_2() {
    let matrix = identity(4);
    let assign = vec![0, 0, 1, 1];
    let files = derive_partition_files(&matrix, &assign, 2, "identity").unwrap();
    assert!(files[0].send.is_empty() && files[0].recv.is_empty());
    assert!(files[1].send.is_empty() && files[1].recv.is_empty());

    let results = run_all(&matrix, &assign, 2, "identity");
    let y: Vec<f64> = results.iter().flat_map(|(_, y)| y.iter().copied()).collect();
    assert_eq!(y, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn tridiagonal_on_2() {
    let matrix = tridiagonal(4);
    let assign = vec![0, 0, 1, 1];
    let results = run_all(&matrix, &assign, 2, "tri");
    let reference = matrix.reference_multiply_canonical_x();
    assert_eq!(results[0].1, vec![reference[0], reference[1]]);
    assert_eq!(results[1].1, vec![reference[2], reference[3]]);
}

#[test]
fn dense_3x3_on_3() {
    let matrix = dense(3);
    let assign = vec![0, 1, 2];
    let results = run_all(&matrix, &assign, 3, "dense");
    let reference = matrix.reference_multiply_canonical_x();
    for (rank, (_, y)) in results.iter().enumerate() {
        assert_eq!(y, &vec![reference[rank]]);
    }
}

#[test]
fn all_owned_by_one() {
    let matrix = tridiagonal(4);
    let assign = vec![0, 0, 0, 0];
    let results = run_all(&matrix, &assign, 3, "allone");
    let reference = matrix.reference_multiply_canonical_x();
    assert_eq!(results[0].1, reference);
    assert!(results[1].1.is_empty());
    assert!(results[2].1.is_empty());
}

#[test]
fn file_round_trip_10x10_banded_p4() {
    let n = 10;
    let mut elements = Vec::new();
    for i in 0..n {
        elements.push(Element { row: i, col: i, val: 3.0 });
        if i + 2 < n {
            elements.push(Element { row: i, col: i + 2, val: -1.0 });
            elements.push(Element { row: i + 2, col: i, val: -1.0 });
        }
    }
    let matrix = GlobalMatrix { n, elements };
    let assign = vec![0, 0, 0, 1, 1, 1, 2, 2, 3, 3];

    let files = derive_partition_files(&matrix, &assign, 4, "banded").unwrap();
    let dir = tempfile::tempdir().unwrap();
    for file in &files {
        let path = dir.path().join(dspmv_core::partition_file::PartitionFile::file_name(
            &file.basename,
            file.p,
            file.rank,
        ));
        file.write(&path).unwrap();
    }

    let mut matrices = Vec::new();
    for rank in 0..4 {
        let path = dir.path().join(format!("banded-4-{rank}.part"));
        matrices.push(loader::load(&path, rank, 4).unwrap());
    }

    let transports = thread_cluster(4);
    let mut xs: Vec<Vec<f64>> = matrices.iter().map(|m| m.initial_x()).collect();
    let mut ys: Vec<Vec<f64>> = matrices.iter().map(|m| vec![0.0; m.local_rows]).collect();
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for ((matrix, transport), (x, y)) in matrices
            .iter()
            .zip(transports)
            .zip(xs.iter_mut().zip(ys.iter_mut()))
        {
            let mut driver = Driver::new(transport, RayonInternalKernel, RayonExternalKernel);
            handles.push(scope.spawn(move || driver.step(matrix, x, y).unwrap()));
        }
        for h in handles {
            h.join().unwrap();
        }
    });

    let reference = matrix.reference_multiply_canonical_x();
    let gathered: Vec<f64> = ys.into_iter().flatten().collect();
    assert_eq!(gathered, reference);
}

#[test]
fn halo_equals_owner_after_spmv() {
    let matrix = tridiagonal(6);
    let assign = vec![0, 0, 1, 1, 2, 2];
    let files = derive_partition_files(&matrix, &assign, 3, "halo").unwrap();
    let matrices: Vec<SparseMatrix> = files.into_iter().map(|f| loader::build(f).unwrap()).collect();
    let transports = thread_cluster(3);

    let mut xs: Vec<Vec<f64>> = matrices.iter().map(|m| m.initial_x()).collect();
    let mut ys: Vec<Vec<f64>> = matrices.iter().map(|m| vec![0.0; m.local_rows]).collect();
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for ((matrix, transport), (x, y)) in matrices
            .iter()
            .zip(transports)
            .zip(xs.iter_mut().zip(ys.iter_mut()))
        {
            let mut driver = Driver::new(transport, RayonInternalKernel, RayonExternalKernel);
            handles.push(scope.spawn(move || driver.step(matrix, x, y).unwrap()));
        }
        for h in handles {
            h.join().unwrap();
        }
    });

    // Build owner_x[p][global_row] for lookup.
    let owner_x: Vec<HashMap<usize, f64>> = matrices
        .iter()
        .zip(&xs)
        .map(|(m, x)| {
            (0..m.local_rows)
                .map(|local| (m.local2global[local], x[local]))
                .collect()
        })
        .collect();

    for (rank, matrix) in matrices.iter().enumerate() {
        for i in matrix.local_rows..matrix.local_cols() {
            let global_col = matrix.local2global[i];
            let owner = assign[global_col];
            let owner_value = owner_x[owner][&global_col];
            assert_eq!(xs[rank][i], owner_value, "halo mismatch on rank {rank} for column {global_col}");
        }
    }
}
