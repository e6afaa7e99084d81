//! Caller-supplied instrumentation for tree tensor operations.
//!
//! Operations that simplify, cut or truncate the network report what they did
//! to a [`Diagnostics`] sink. The plain entry points (`contract`, `trace`,
//! `optimize`) use [`NoDiagnostics`]; the `*_with` variants accept any sink.

/// Event sink for structural simplifications and approximations.
///
/// Every method defaults to a no-op.
pub trait Diagnostics {
    /// A Simplify pass finished after `merges` node merges.
    fn on_simplify(&mut self, _merges: usize) {}

    /// A loop of `cycle_len` nodes was cut using the given error-budget correction.
    fn on_cut(&mut self, _cycle_len: usize, _correction: f64) {}

    /// A truncated SVD discarded this relative weight.
    fn on_truncation(&mut self, _discarded: f64) {}

    /// Link optimization changed the stored size.
    fn on_optimize(&mut self, _size_before: usize, _size_after: usize) {}
}

/// Sink that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {}

/// Sink that counts events and sums truncation errors.
///
/// `aggregate_error` is the plain sum of every local relative error; it is an
/// upper-bound style indicator, not a rigorous global error estimate.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DiagnosticCounters {
    pub simplify_merges: usize,
    pub cuts: usize,
    pub cut_corrections: Vec<f64>,
    pub truncations: usize,
    pub aggregate_error: f64,
    pub optimize_passes: usize,
    pub last_optimize: Option<(usize, usize)>,
}

impl DiagnosticCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Diagnostics for DiagnosticCounters {
    fn on_simplify(&mut self, merges: usize) {
        self.simplify_merges += merges;
    }

    fn on_cut(&mut self, _cycle_len: usize, correction: f64) {
        self.cuts += 1;
        self.cut_corrections.push(correction);
    }

    fn on_truncation(&mut self, discarded: f64) {
        self.truncations += 1;
        self.aggregate_error += discarded;
    }

    fn on_optimize(&mut self, size_before: usize, size_after: usize) {
        self.optimize_passes += 1;
        self.last_optimize = Some((size_before, size_after));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut diag = DiagnosticCounters::new();
        diag.on_simplify(3);
        diag.on_simplify(2);
        diag.on_cut(4, 2.0);
        diag.on_truncation(1e-4);
        diag.on_truncation(2e-4);
        diag.on_optimize(100, 60);

        assert_eq!(diag.simplify_merges, 5);
        assert_eq!(diag.cuts, 1);
        assert_eq!(diag.cut_corrections, vec![2.0]);
        assert_eq!(diag.truncations, 2);
        assert!((diag.aggregate_error - 3e-4).abs() < 1e-15);
        assert_eq!(diag.last_optimize, Some((100, 60)));
    }

    #[test]
    fn test_no_diagnostics_is_silent() {
        let mut diag = NoDiagnostics;
        diag.on_cut(3, 1.0);
        diag.on_truncation(0.5);
    }
}
