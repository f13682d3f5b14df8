//! Local SpMV kernels (`spec.md` §4.4).
//!
//! Exposed as capability traits rather than free functions, per the teacher's
//! Design Note on CPU/accelerator dispatch: "model as an explicit kernel
//! capability with implementations selected at construction time... do not
//! rely on compile-time switches scattered through kernel code." A
//! [`crate::sparse::SparseMatrix`] is paired with one [`InternalKernel`] and
//! one [`ExternalKernel`] object when the driver is constructed.
use rayon::prelude::*;

use crate::sparse::Csr;

/// `y[i] = sum_k internal[i, k] * x[k]` for `k` in the internal block,
/// writing every row of `y` from scratch.
pub trait InternalKernel: Send + Sync {
    fn multiply(&self, csr: &Csr, x: &[f64], y: &mut [f64]);
}

/// `y[i] += sum_k external[i, k] * x[k]` for `k` in the external (halo) block,
/// accumulating into the `y` left behind by the internal kernel.
pub trait ExternalKernel: Send + Sync {
    fn multiply(&self, csr: &Csr, x: &[f64], y: &mut [f64]);
}

/// Row-parallel internal kernel backed by `rayon`'s work-stealing pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonInternalKernel;

impl InternalKernel for RayonInternalKernel {
    fn multiply(&self, csr: &Csr, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(y.len(), csr.num_rows());
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            let start = csr.row_ptr[i];
            let end = csr.row_ptr[i + 1];
            *yi = csr.col_idx[start..end]
                .iter()
                .zip(&csr.values[start..end])
                .fold(0.0, |acc, (&col, &val)| acc + val * x[col]);
        });
    }
}

/// Row-parallel external kernel backed by `rayon`'s work-stealing pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonExternalKernel;

impl ExternalKernel for RayonExternalKernel {
    fn multiply(&self, csr: &Csr, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(y.len(), csr.num_rows());
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            let start = csr.row_ptr[i];
            let end = csr.row_ptr[i + 1];
            *yi += csr.col_idx[start..end]
                .iter()
                .zip(&csr.values[start..end])
                .fold(0.0, |acc, (&col, &val)| acc + val * x[col]);
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tridiagonal_internal() -> Csr {
        // rows {0, 1} of the 4x4 tridiagonal matrix (2 on diag, -1 off), internal block = {0, 1}
        Csr {
            row_ptr: vec![0, 2, 4],
            col_idx: vec![0, 1, 0, 1],
            values: vec![2.0, -1.0, -1.0, 2.0],
        }
    }

    #[test]
    fn internal_kernel_writes_from_scratch() {
        let csr = tridiagonal_internal();
        let x = vec![1.0, 2.0];
        let mut y = vec![f64::NAN, f64::NAN];
        RayonInternalKernel.multiply(&csr, &x, &mut y);
        assert_eq!(y, vec![0.0, 0.0]);
    }

    #[test]
    fn external_kernel_accumulates() {
        // row 1 has one external entry referencing halo column 2 (local index 2, value -1)
        let csr = Csr {
            row_ptr: vec![0, 0, 1],
            col_idx: vec![2],
            values: vec![-1.0],
        };
        let x = vec![0.0, 0.0, 4.0];
        let mut y = vec![0.0, 0.0];
        RayonInternalKernel.multiply(&tridiagonal_internal(), &[1.0, 2.0], &mut y);
        RayonExternalKernel.multiply(&csr, &x, &mut y);
        assert_eq!(y, vec![0.0, -4.0]);
    }
}
