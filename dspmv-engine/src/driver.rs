//! The SpMV driver (`spec.md` §4.5). Two variants share the same kernels but
//! not the same control flow: [`Driver::step`] overlaps communication with
//! the internal kernel and never blocks on peers outside `wait_recv`;
//! [`Driver::step_measured`] runs the same four phases one at a time,
//! separated by [`HaloTransport::barrier`] calls, to attribute time cleanly.
use dspmv_core::error::TypedResult;
use dspmv_core::kernel::{ExternalKernel, InternalKernel};
use dspmv_core::measurement::{MeasurementSink, Phase};
use dspmv_core::sparse::SparseMatrix;
use dspmv_core::transport::HaloTransport;

/// Bundles the capabilities a process needs to run SpMV: the transport, and
/// one kernel of each kind. Constructed once per process and reused across
/// every call to [`Driver::step`] / [`Driver::step_measured`].
pub struct Driver<T, I, E> {
    transport: T,
    internal_kernel: I,
    external_kernel: E,
}

impl<T, I, E> Driver<T, I, E>
where
    T: HaloTransport,
    I: InternalKernel,
    E: ExternalKernel,
{
    pub fn new(transport: T, internal_kernel: I, external_kernel: E) -> Self {
        Self {
            transport,
            internal_kernel,
            external_kernel,
        }
    }

    /// The asynchronous/production path of `spec.md` §4.5: pack, begin halo
    /// exchange, run the internal kernel while communication is in flight,
    /// wait for the halo, run the external kernel. No barriers; the only
    /// suspension point is the wait inside `wait_recv`.
    pub fn step(&mut self, sparse: &SparseMatrix, x: &mut [f64], y: &mut [f64]) -> TypedResult<()> {
        debug_assert_eq!(y.len(), sparse.local_rows);

        self.transport.pack(sparse, x)?;
        self.transport.post_recv(sparse)?;
        self.transport.post_send(sparse)?;
        self.internal_kernel.multiply(&sparse.internal, x, y);
        self.transport.wait_recv(sparse, x)?;
        self.external_kernel.multiply(&sparse.external, x, y);

        Ok(())
    }

    /// The synchronous measurement path of `spec.md` §4.5,
    /// `SpMV_measurement_once`: the same four phases as [`Driver::step`]
    /// (communication here is the combined begin+wait, not split around the
    /// internal kernel), but separated by full barriers so each phase's
    /// timer reflects only that phase and phases never overlap. Used solely
    /// to attribute time; not used on the production path.
    pub fn step_measured(
        &mut self,
        sparse: &SparseMatrix,
        x: &mut [f64],
        y: &mut [f64],
        sink: &mut dyn MeasurementSink,
    ) -> TypedResult<()> {
        debug_assert_eq!(y.len(), sparse.local_rows);

        let t0 = std::time::Instant::now();
        self.transport.pack(sparse, x)?;
        self.transport.barrier()?;
        sink.record(Phase::Packing, t0.elapsed());

        let t1 = std::time::Instant::now();
        self.transport.post_recv(sparse)?;
        self.transport.post_send(sparse)?;
        self.transport.wait_recv(sparse, x)?;
        self.transport.barrier()?;
        sink.record(Phase::Communication, t1.elapsed());

        let t2 = std::time::Instant::now();
        self.internal_kernel.multiply(&sparse.internal, x, y);
        self.transport.barrier()?;
        sink.record(Phase::InternalComputation, t2.elapsed());

        let t3 = std::time::Instant::now();
        self.external_kernel.multiply(&sparse.external, x, y);
        self.transport.barrier()?;
        sink.record(Phase::ExternalComputation, t3.elapsed());

        Ok(())
    }
}
