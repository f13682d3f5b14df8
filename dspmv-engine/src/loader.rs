//! Loads one partition file into a [`SparseMatrix`], per `spec.md` §4.2.
use std::collections::HashMap;
use std::path::Path;

use anyhow::anyhow;
use dspmv_core::error::{ResultExt, SystemError, TypedResult};
use dspmv_core::partition_file::PartitionFile;
use dspmv_core::sparse::{Csr, ScheduleEntry, SparseMatrix};

/// Reads the partition file for `rank` out of `world_size` at `path` and
/// builds the [`SparseMatrix`] it describes.
///
/// Asserts the file's recorded process count matches `world_size`; this is
/// the only cross-check the loader can make without reading every other
/// rank's file.
pub fn load(path: impl AsRef<Path>, rank: usize, world_size: usize) -> TypedResult<SparseMatrix> {
    let file = PartitionFile::read(path, rank)?;
    if file.p != world_size {
        return Err(anyhow!(
            "partition file declares P={}, but this run has world size {world_size}",
            file.p
        ))
        .typ(SystemError::Invariant);
    }
    build(file)
}

/// Translates a parsed [`PartitionFile`] into a [`SparseMatrix`], rewriting
/// global row/column indices into local ones and building both CSR
/// sub-matrices by the row-cursor fill technique.
pub fn build(file: PartitionFile) -> TypedResult<SparseMatrix> {
    let global2local: HashMap<usize, usize> = file
        .local2global
        .iter()
        .enumerate()
        .map(|(local, &global)| (global, local))
        .collect();

    let internal = fill_csr(&file.internal, file.local_rows, &global2local)?;
    let external = fill_csr(&file.external, file.local_rows, &global2local)?;

    let send_schedule = file
        .send
        .into_iter()
        .map(|(neighbor, local_indices)| ScheduleEntry { neighbor, local_indices })
        .collect();
    let recv_schedule = file
        .recv
        .into_iter()
        .map(|(neighbor, local_indices)| ScheduleEntry { neighbor, local_indices })
        .collect();

    let matrix = SparseMatrix {
        local_rows: file.local_rows,
        local2global: file.local2global,
        global2local,
        internal,
        external,
        send_schedule,
        recv_schedule,
    };
    matrix
        .check_local_invariants()
        .map_err(|e| anyhow!(e))
        .typ(SystemError::Invariant)?;
    Ok(matrix)
}

/// Builds a CSR sub-matrix from row-sorted global `(row, col, val)` triples,
/// translating both indices to local ones and filling `row_ptr` by a
/// cursor that advances to `local_row` whenever a nonzero is seen there.
fn fill_csr(
    triples: &[(usize, usize, f64)],
    local_rows: usize,
    global2local: &HashMap<usize, usize>,
) -> TypedResult<Csr> {
    let mut csr = Csr::with_rows(local_rows);
    let mut cursor = 0usize;
    for &(row, col, val) in triples {
        let local_row = *global2local
            .get(&row)
            .ok_or_else(|| anyhow!("row {row} has no local index"))
            .typ(SystemError::Invariant)?;
        if local_row >= local_rows {
            return Err(anyhow!("row {row} does not resolve to an owned local row")).typ(SystemError::Invariant);
        }
        if local_row < cursor {
            return Err(anyhow!("sub-matrix triples are not row-sorted")).typ(SystemError::Invariant);
        }
        while cursor < local_row {
            cursor += 1;
            csr.row_ptr[cursor] = csr.col_idx.len();
        }
        let local_col = *global2local
            .get(&col)
            .ok_or_else(|| anyhow!("column {col} has no local index (not referenced by local2global)"))
            .typ(SystemError::Invariant)?;
        csr.col_idx.push(local_col);
        csr.values.push(val);
    }
    while cursor < local_rows {
        cursor += 1;
        csr.row_ptr[cursor] = csr.col_idx.len();
    }
    Ok(csr)
}

#[cfg(test)]
mod test {
    use super::*;
    use dspmv_core::matrix::{Element, GlobalMatrix};
    use dspmv_partitioner::plan::derive_partition_files;

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

    #[test]
    fn builds_matrix_with_correct_shapes() {
        let matrix = tridiagonal(4);
        let assign = vec![0, 0, 1, 1];
        let files = derive_partition_files(&matrix, &assign, 2, "t").unwrap();
        let loaded = build(files[0].clone()).unwrap();
        assert_eq!(loaded.local_rows, 2);
        assert_eq!(loaded.halo_len(), 1);
        assert_eq!(loaded.internal.nnz(), 4); // (0,0) (0,1) (1,0) (1,1)
        assert_eq!(loaded.external.nnz(), 1); // (1,2)
    }

    #[test]
    fn rejects_world_size_mismatch() {
        let matrix = tridiagonal(4);
        let assign = vec![0, 0, 1, 1];
        let files = derive_partition_files(&matrix, &assign, 2, "t").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t-2-0.part");
        files[0].write(&path).unwrap();
        let err = load(&path, 0, 3).unwrap_err();
        assert_eq!(err.kind(), SystemError::Invariant);
    }

    #[test]
    fn zero_row_process_loads_cleanly() {
        let matrix = tridiagonal(4);
        let assign = vec![0, 0, 2, 2];
        let files = derive_partition_files(&matrix, &assign, 3, "t").unwrap();
        let loaded = build(files[1].clone()).unwrap();
        assert_eq!(loaded.local_rows, 0);
        assert_eq!(loaded.internal.row_ptr, vec![0]);
    }
}
