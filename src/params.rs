//! Per-slot top-K/top-P parameters and the rules that resolve them.

use log::warn;

/// Largest `top_k` the sampling kernel supports.
pub const TOP_K_MAX: i32 = 1024;

/// `top_k` used when a setup call carries none.
pub const DEFAULT_TOP_K: i32 = 0;

/// `top_p` used when a setup call carries none.
pub const DEFAULT_TOP_P: f32 = 0.0;

/// Upper bound of the effective top-P the kernel works with.
pub const MAX_TOP_P: f32 = 1.0;

/// Resolved parameters of one slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlotParameters {
    pub top_k: i32,
    pub top_p: f32,
    /// This layer leaves the slot alone (`top_k == 0`).
    pub skip: bool,
}

impl Default for SlotParameters {
    /// An unconfigured slot: skipped until a setup call covers it.
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            top_p: DEFAULT_TOP_P,
            skip: true,
        }
    }
}

impl SlotParameters {
    /// Resolve an already clamped `(k, p)` pair.
    pub fn resolve(top_k: i32, top_p: f32) -> Self {
        let (top_k, top_p) = apply_legacy_equivalence(top_k, top_p);
        Self {
            top_k,
            top_p,
            skip: top_k == 0,
        }
    }
}

/// Map the request shapes of the former standalone top-K and greedy paths
/// onto the unified top-K + top-P layer. Order matters: the greedy rewrite
/// feeds the second rule.
///
/// - `k == 0 && p == 0` is greedy: top-P alone cannot express it, so `k = 1`.
/// - `k > 0 && p == 0` is plain top-K: `p = 1` makes the top-P filter inert.
#[allow(clippy::float_cmp)]
pub fn apply_legacy_equivalence(mut top_k: i32, mut top_p: f32) -> (i32, f32) {
    if top_k == 0 && top_p == 0.0 {
        top_k = 1;
    }
    if top_k > 0 && top_p == 0.0 {
        top_p = 1.0;
    }
    (top_k, top_p)
}

/// Clamp `top_p` into `[0, 1]`, warning when the input was out of range.
/// NaN counts as out of range and becomes `1.0`.
pub fn clamp_top_p(top_p: f32) -> f32 {
    if top_p.is_nan() {
        warn!("TopP ({}) is not a number. Clip to {}.", top_p, MAX_TOP_P);
        return MAX_TOP_P;
    }
    if !(0.0..=MAX_TOP_P).contains(&top_p) {
        let clamped = top_p.clamp(0.0, MAX_TOP_P);
        warn!(
            "TopP ({}) is out of range ([0.0, {}]). Clip to closest number {}.",
            top_p, MAX_TOP_P, clamped
        );
        return clamped;
    }
    top_p
}

/// Clamp `top_k` into `[0, TOP_K_MAX]`, warning when the input was out of
/// range.
pub fn clamp_top_k(top_k: i32) -> i32 {
    if !(0..=TOP_K_MAX).contains(&top_k) {
        let clamped = top_k.clamp(0, TOP_K_MAX);
        warn!(
            "TopK ({}) is out of range ([0, {}]). Clip to closest number {}.",
            top_k, TOP_K_MAX, clamped
        );
        return clamped;
    }
    top_k
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;

    thread_local! {
        static WARNINGS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    /// Keeps warnings per test thread so parallel tests do not mix.
    struct CaptureWarnings;

    impl log::Log for CaptureWarnings {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                WARNINGS.with(|w| w.borrow_mut().push(record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: CaptureWarnings = CaptureWarnings;

    fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
        // Only the first test to get here installs it; later calls are no-ops.
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Warn);
        WARNINGS.with(|w| w.borrow_mut().clear());
        let result = f();
        (result, WARNINGS.with(|w| w.take()))
    }

    #[test]
    fn test_greedy_becomes_top_1() {
        let p = SlotParameters::resolve(0, 0.0);
        assert_eq!(p.top_k, 1);
        assert_eq!(p.top_p, 1.0);
        assert!(!p.skip);
    }

    #[test]
    fn test_plain_top_k_gets_inert_top_p() {
        let p = SlotParameters::resolve(40, 0.0);
        assert_eq!(p.top_k, 40);
        assert_eq!(p.top_p, 1.0);
        assert!(!p.skip);
    }

    #[test]
    fn test_top_p_only_is_skipped() {
        let p = SlotParameters::resolve(0, 0.9);
        assert_eq!(p.top_k, 0);
        assert_eq!(p.top_p, 0.9);
        assert!(p.skip);
    }

    #[test]
    fn test_top_k_top_p_untouched() {
        assert_eq!(apply_legacy_equivalence(8, 0.5), (8, 0.5));
    }

    #[test]
    fn test_default_slot_is_skipped() {
        let p = SlotParameters::default();
        assert!(p.skip);
        assert_eq!(p.top_k, 0);
    }

    #[test]
    fn test_clamp_top_p() {
        assert_eq!(clamp_top_p(1.5), 1.0);
        assert_eq!(clamp_top_p(-0.25), 0.0);
        assert_eq!(clamp_top_p(0.3), 0.3);
        assert_eq!(clamp_top_p(f32::NAN), 1.0);
    }

    #[test]
    fn test_out_of_range_top_p_warns() {
        let (clamped, warnings) = capture_warnings(|| clamp_top_p(1.5));
        assert_eq!(clamped, 1.0);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("TopP (1.5) is out of range"));

        let (_, warnings) = capture_warnings(|| clamp_top_p(0.9));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_out_of_range_top_k_warns() {
        let (clamped, warnings) = capture_warnings(|| clamp_top_k(TOP_K_MAX + 1));
        assert_eq!(clamped, TOP_K_MAX);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("TopK (1025) is out of range"));
    }

    #[test]
    fn test_clamp_top_k() {
        assert_eq!(clamp_top_k(TOP_K_MAX + 1), TOP_K_MAX);
        assert_eq!(clamp_top_k(-3), 0);
        assert_eq!(clamp_top_k(50), 50);
    }

    proptest! {
        #[test]
        fn prop_skip_iff_zero_k(k in -10i32..2000, p in -1.0f32..2.0) {
            let params = SlotParameters::resolve(clamp_top_k(k), clamp_top_p(p));
            prop_assert_eq!(params.skip, params.top_k == 0);
            prop_assert!((0..=TOP_K_MAX).contains(&params.top_k));
            prop_assert!((0.0..=1.0).contains(&params.top_p));
        }

        #[test]
        fn prop_positive_k_with_zero_p_is_plain_top_k(k in 1i32..=TOP_K_MAX) {
            let params = SlotParameters::resolve(k, 0.0);
            prop_assert_eq!(params.top_k, k);
            prop_assert_eq!(params.top_p, 1.0);
            prop_assert!(!params.skip);
        }

        #[test]
        fn prop_zero_k_with_positive_p_skips(p in 0.0001f32..=1.0) {
            prop_assert!(SlotParameters::resolve(0, p).skip);
        }
    }
}
