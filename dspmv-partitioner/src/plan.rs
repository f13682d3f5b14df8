//! Per-process artifact derivation: turns a global matrix plus a row
//! assignment into one [`PartitionFile`] per process, per `spec.md` §4.1.
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::anyhow;
use dspmv_core::error::{ResultExt, SystemError, TypedResult};
use dspmv_core::matrix::GlobalMatrix;
use dspmv_core::partition_file::PartitionFile;

/// Derives the [`PartitionFile`] for every process `0..p` from a row
/// assignment. `assign[i]` must be the owning rank of global row/column `i`.
pub fn derive_partition_files(
    matrix: &GlobalMatrix,
    assign: &[usize],
    p: usize,
    basename: &str,
) -> TypedResult<Vec<PartitionFile>> {
    if assign.len() != matrix.n {
        return Err(anyhow!(
            "assignment has {} entries, matrix has {} rows",
            assign.len(),
            matrix.n
        ))
        .typ(SystemError::Invariant);
    }
    if assign.iter().any(|&a| a >= p) {
        return Err(anyhow!("assignment references a rank >= P={p}")).typ(SystemError::Invariant);
    }

    // Group this process's rows' nonzeros by owning row, once, so every
    // per-rank pass below is a single scan instead of a full matrix scan.
    let mut rows_by_owner: Vec<Vec<usize>> = vec![Vec::new(); p];
    for row in 0..matrix.n {
        rows_by_owner[assign[row]].push(row);
    }
    let mut nnz_by_row: Vec<Vec<(usize, f64)>> = vec![Vec::new(); matrix.n];
    for e in &matrix.elements {
        nnz_by_row[e.row].push((e.col, e.val));
    }

    let mut files = Vec::with_capacity(p);
    for rank in 0..p {
        let internal_col: Vec<usize> = rows_by_owner[rank].clone(); // already row order == sorted

        // Step 2: build the receive set (keyed by neighbor, i.e. the owner
        // of the halo column) and the send set (keyed by the rank that owns
        // the row referencing one of this rank's columns).
        let mut recv_set: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        let mut send_set: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for &row in &internal_col {
            for &(col, _) in &nnz_by_row[row] {
                let owner = assign[col];
                if owner != rank {
                    recv_set.entry(owner).or_default().insert(col);
                }
            }
        }
        for other_row in 0..matrix.n {
            if assign[other_row] == rank {
                continue;
            }
            for &(col, _) in &nnz_by_row[other_row] {
                if assign[col] == rank {
                    send_set.entry(assign[other_row]).or_default().insert(col);
                }
            }
        }

        // Step 3/4: external columns are every column this rank must
        // receive, deduplicated and sorted; local indices lay the internal
        // block first, external block second.
        let external_col: Vec<usize> = recv_set.values().flatten().copied().collect::<BTreeSet<_>>().into_iter().collect();

        let mut local2global = Vec::with_capacity(internal_col.len() + external_col.len());
        local2global.extend_from_slice(&internal_col);
        local2global.extend_from_slice(&external_col);

        let mut global2local = BTreeMap::new();
        for (local, &global) in local2global.iter().enumerate() {
            global2local.insert(global, local);
        }

        // Step 5: split this rank's nonzeros into internal/external blocks,
        // both row-sorted since `internal_col` is already in row order.
        let mut internal = Vec::new();
        let mut external = Vec::new();
        for &row in &internal_col {
            for &(col, val) in &nnz_by_row[row] {
                if assign[col] == rank {
                    internal.push((row, col, val));
                } else {
                    external.push((row, col, val));
                }
            }
        }

        // Step 6: emit send/recv schedules using local indices. Send
        // entries reference positions in the internal block (0..R_p);
        // recv entries reference positions in the external block
        // (R_p..C_p).
        let send: Vec<(usize, Vec<usize>)> = send_set
            .into_iter()
            .map(|(dst, cols)| {
                let mut idx: Vec<usize> = cols.iter().map(|c| global2local[c]).collect();
                idx.sort_unstable();
                (dst, idx)
            })
            .collect();
        let recv: Vec<(usize, Vec<usize>)> = recv_set
            .into_iter()
            .map(|(src, cols)| {
                let mut idx: Vec<usize> = cols.iter().map(|c| global2local[c]).collect();
                idx.sort_unstable();
                (src, idx)
            })
            .collect();

        files.push(PartitionFile {
            n: matrix.n,
            m: matrix.elements.len(),
            p,
            rank,
            basename: basename.to_string(),
            assign: assign.to_vec(),
            local2global,
            local_rows: internal_col.len(),
            internal,
            external,
            send,
            recv,
        });
    }

    Ok(files)
}

/// Writes every derived [`PartitionFile`] to `dir`, using the standard
/// `<basename>-<P>-<rank>.part` naming.
pub fn write_partition_files(files: &[PartitionFile], dir: impl AsRef<Path>) -> TypedResult<()> {
    for file in files {
        let name = PartitionFile::file_name(&file.basename, file.p, file.rank);
        file.write(dir.as_ref().join(name))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use dspmv_core::matrix::Element;

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
    fn schedules_are_symmetric() {
        let matrix = tridiagonal(6);
        let assign = vec![0, 0, 1, 1, 2, 2];
        let files = derive_partition_files(&matrix, &assign, 3, "t").unwrap();

        for file in &files {
            for (dst, idx) in &file.send {
                let peer = &files[*dst];
                let matching = peer.recv.iter().find(|(src, _)| *src == file.rank);
                assert!(matching.is_some(), "no matching recv for send {}->{}", file.rank, dst);
                assert_eq!(matching.unwrap().1.len(), idx.len());
            }
        }
    }

    #[test]
    fn zero_row_process_has_no_internal_block() {
        let matrix = tridiagonal(4);
        // rank 1 gets nothing.
        let assign = vec![0, 0, 2, 2];
        let files = derive_partition_files(&matrix, &assign, 3, "t").unwrap();
        let empty = &files[1];
        assert_eq!(empty.local_rows, 0);
        assert!(empty.internal.is_empty());
    }

    #[test]
    fn diagonal_matrix_has_no_communication() {
        let n = 5;
        let elements: Vec<Element> = (0..n).map(|i| Element { row: i, col: i, val: 1.0 }).collect();
        let matrix = GlobalMatrix { n, elements };
        let assign = vec![0, 0, 1, 1, 1];
        let files = derive_partition_files(&matrix, &assign, 2, "d").unwrap();
        for file in &files {
            assert!(file.send.is_empty());
            assert!(file.recv.is_empty());
            assert!(file.external.is_empty());
        }
    }

    #[test]
    fn rejects_mismatched_assignment_length() {
        let matrix = tridiagonal(4);
        let assign = vec![0, 0, 1];
        let err = derive_partition_files(&matrix, &assign, 2, "t").unwrap_err();
        assert_eq!(err.kind(), SystemError::Invariant);
    }
}
