//! Per-iteration timing samples, passed into the driver as a capability
//! rather than accumulated in a process-wide singleton.
//!
//! The original implementation kept a single global `timingTemp` vector
//! (`original_source/src/main.cpp`) that every phase of `SpMV_measurement_once`
//! wrote into directly. The teacher's Design Note on global mutable state
//! applies directly here: "pass a measurement-collector capability into the
//! SpMV driver and have kernels append samples through it; no module-level
//! singletons."
use std::time::Duration;

/// One phase of a single `SpMV_measurement_once` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Packing,
    Communication,
    InternalComputation,
    ExternalComputation,
}

/// Receives one timing sample per phase, per call.
pub trait MeasurementSink {
    fn record(&mut self, phase: Phase, elapsed: Duration);
}

/// Discards every sample; used on the production (`SpMV`) path, which does
/// not measure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMeasurementSink;

impl MeasurementSink for NullMeasurementSink {
    fn record(&mut self, _phase: Phase, _elapsed: Duration) {}
}

/// Appends every sample to a `Vec`, in call order. Used by tests and the
/// measurement-mode demo CLI.
#[derive(Debug, Default)]
pub struct VecMeasurementSink {
    pub samples: Vec<(Phase, Duration)>,
}

impl MeasurementSink for VecMeasurementSink {
    fn record(&mut self, phase: Phase, elapsed: Duration) {
        self.samples.push((phase, elapsed));
    }
}

impl VecMeasurementSink {
    pub fn total_of(&self, phase: Phase) -> Duration {
        self.samples
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, d)| *d)
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vec_sink_records_in_order() {
        let mut sink = VecMeasurementSink::default();
        sink.record(Phase::Packing, Duration::from_millis(1));
        sink.record(Phase::Communication, Duration::from_millis(2));
        assert_eq!(sink.samples.len(), 2);
        assert_eq!(sink.total_of(Phase::Packing), Duration::from_millis(1));
    }
}
