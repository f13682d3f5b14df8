//! The per-process data model: [`SparseMatrix`], its two CSR sub-matrices, and
//! the send/receive schedules exchanged between neighboring processes.
use std::collections::HashMap;

/// A CSR (compressed sparse row) sub-matrix over a process's `R_p` local rows.
///
/// `row_ptr` has length `R_p + 1` and is monotone non-decreasing; row `i` occupies
/// `col_idx[row_ptr[i]..row_ptr[i + 1]]` (and the matching slice of `values`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Csr {
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl Csr {
    pub fn with_rows(num_rows: usize) -> Self {
        Self {
            row_ptr: vec![0; num_rows + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }
}

/// One entry of a send or receive schedule: a neighboring rank and the local
/// column indices (into the internal block for sends, the external block for
/// receives) exchanged with it, in the order they are packed/scattered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub neighbor: usize,
    pub local_indices: Vec<usize>,
}

/// A process's local view of the global matrix: its owned rows, the CSR
/// sub-matrices over them, the local/global column index table, and the
/// communication schedules with neighboring processes.
///
/// See `spec.md` §3 for the full invariants this type must satisfy.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    /// `R_p`: number of rows owned by this process.
    pub local_rows: usize,
    /// `local2global[0..local_rows)` is the internal block (rows owned by this
    /// process, row `i` <-> global row `local2global[i]`); the remainder is the
    /// external block (halo columns referenced by, but not owned by, this
    /// process).
    pub local2global: Vec<usize>,
    /// Inverse of `local2global`, defined on exactly its entries.
    pub global2local: HashMap<usize, usize>,
    /// Sub-matrix whose columns lie in the internal block: `col_idx[k] < local_rows`.
    pub internal: Csr,
    /// Sub-matrix whose columns lie in the external block: `local_rows <= col_idx[k] < local_cols()`.
    pub external: Csr,
    pub send_schedule: Vec<ScheduleEntry>,
    pub recv_schedule: Vec<ScheduleEntry>,
}

impl SparseMatrix {
    /// `C_p`: total local columns (internal block + external/halo block).
    pub fn local_cols(&self) -> usize {
        self.local2global.len()
    }

    /// `E_p = C_p - R_p`: size of the halo region.
    pub fn halo_len(&self) -> usize {
        self.local_cols() - self.local_rows
    }

    pub fn total_send(&self) -> usize {
        self.send_schedule.iter().map(|e| e.local_indices.len()).sum()
    }

    pub fn total_recv(&self) -> usize {
        self.recv_schedule.iter().map(|e| e.local_indices.len()).sum()
    }

    pub fn num_send_neighbors(&self) -> usize {
        self.send_schedule.len()
    }

    pub fn num_recv_neighbors(&self) -> usize {
        self.recv_schedule.len()
    }

    /// Allocates the local `x` vector (owned block + halo), filled with the
    /// deterministic test payload `x[i] = local2global[i] + 1` for owned
    /// entries and zero for the as-yet-unfilled halo. See `spec.md` §4.2.
    pub fn initial_x(&self) -> Vec<f64> {
        let mut x = vec![0.0; self.local_cols()];
        for i in 0..self.local_rows {
            x[i] = (self.local2global[i] + 1) as f64;
        }
        x
    }

    /// Checks the structural invariants of `spec.md` §3/§8 that can be verified
    /// from this matrix alone (cross-process invariants, like the symmetric
    /// closure of send/recv schedules, require comparing matrices of several
    /// processes and are checked by the planner's tests instead).
    pub fn check_local_invariants(&self) -> Result<(), String> {
        if self.internal.row_ptr.len() != self.local_rows + 1 {
            return Err("internal.row_ptr length must be local_rows + 1".into());
        }
        if self.external.row_ptr.len() != self.local_rows + 1 {
            return Err("external.row_ptr length must be local_rows + 1".into());
        }
        for w in self.internal.row_ptr.windows(2) {
            if w[0] > w[1] {
                return Err("internal.row_ptr must be monotone non-decreasing".into());
            }
        }
        for w in self.external.row_ptr.windows(2) {
            if w[0] > w[1] {
                return Err("external.row_ptr must be monotone non-decreasing".into());
            }
        }
        if self.internal.row_ptr.first() != Some(&0) {
            return Err("internal.row_ptr[0] must be 0".into());
        }
        if self.internal.row_ptr.last() != Some(&self.internal.nnz()) {
            return Err("internal.row_ptr[R_p] must equal numInternal".into());
        }
        if self.external.row_ptr.last() != Some(&self.external.nnz()) {
            return Err("external.row_ptr[R_p] must equal numExternal".into());
        }
        if self.internal.col_idx.iter().any(|&c| c >= self.local_rows) {
            return Err("internal column indices must lie in [0, R_p)".into());
        }
        let c_p = self.local_cols();
        if self
            .external
            .col_idx
            .iter()
            .any(|&c| c < self.local_rows || c >= c_p)
        {
            return Err("external column indices must lie in [R_p, C_p)".into());
        }
        for entry in &self.recv_schedule {
            if entry.local_indices.iter().any(|&i| i < self.local_rows || i >= c_p) {
                return Err("recv schedule indices must lie in [R_p, C_p)".into());
            }
        }
        for entry in &self.send_schedule {
            if entry.local_indices.iter().any(|&i| i >= self.local_rows) {
                return Err("send schedule indices must lie in [0, R_p)".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tiny() -> SparseMatrix {
        // two owned rows (global 2, 3), one halo column (global 1)
        let mut global2local = HashMap::new();
        global2local.insert(2, 0);
        global2local.insert(3, 1);
        global2local.insert(1, 2);
        SparseMatrix {
            local_rows: 2,
            local2global: vec![2, 3, 1],
            global2local,
            internal: Csr {
                row_ptr: vec![0, 1, 2],
                col_idx: vec![0, 1],
                values: vec![2.0, 2.0],
            },
            external: Csr {
                row_ptr: vec![0, 1, 1],
                col_idx: vec![2],
                values: vec![-1.0],
            },
            send_schedule: vec![],
            recv_schedule: vec![ScheduleEntry {
                neighbor: 0,
                local_indices: vec![2],
            }],
        }
    }

    #[test]
    fn local_and_halo_sizes() {
        let m = tiny();
        assert_eq!(m.local_cols(), 3);
        assert_eq!(m.halo_len(), 1);
        assert_eq!(m.total_recv(), 1);
        assert_eq!(m.num_recv_neighbors(), 1);
        assert_eq!(m.total_send(), 0);
    }

    #[test]
    fn initial_x_matches_test_payload() {
        let m = tiny();
        let x = m.initial_x();
        assert_eq!(x, vec![3.0, 4.0, 0.0]);
    }

    #[test]
    fn invariants_hold() {
        assert!(tiny().check_local_invariants().is_ok());
    }
}
