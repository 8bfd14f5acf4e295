//! End-to-end analysis tests.
//!
//! Parse benchmark kernels from source, run the full driver pipeline, and
//! check the computed error bounds, boundary failures, and the comparative
//! properties of the abstract domains.

use numlangc::analysis::{analyze_function, analyze_program, Warning};
use numlangc::options::{AnalysisOptions, ErrorMethod, RangeMethod};
use numlangc::precision::Precision;
use numlangc::rational::Rational;
use numlangc::resolve::parse_kernels;

const BENCHMARKS: &str = r#"
fn bspline0(u) {
    require u in [0, 0.875]
    (1.0 - u)^3 / 6.0
} ensure res +/- 1e-15

fn bspline1(u) {
    require u in [0.875, 1]
    (3.0*u^3 - 6.0*u^2 + 4.0) / 6.0
} ensure res +/- 1e-15

fn rigidBody1(x1, x2, x3) {
    require x1 in [-15, 15] && x2 in [-15, 15] && x3 in [-15, 15]
    -x1*x2 - 2.0*x2*x3 - x1 - x3
}

fn doppler(u, v, t) {
    require u in [-100, 100] && v in [20, 20000] && t in [-30, 50]
    let t1 = 331.4 + 0.6 * t
    (-t1) * v / ((t1 + u) * (t1 + u))
}

fn turbine1(v, w, r) {
    require v in [-4.5, -0.3] && w in [0.4, 0.9] && r in [3.8, 7.8]
    3.0 + 2.0/(r*r) - 0.125*(3.0 - 2.0*v)*(w*w*r*r)/(1.0 - v) - 4.5
}

fn sineOrder3(x) {
    require x in [-2, 2]
    0.954 * x - 0.1 * x^3
}
"#;

fn reference_options() -> AnalysisOptions {
    // The regression configuration: interval ranges, affine errors, Float64.
    AnalysisOptions {
        range_method: RangeMethod::Interval,
        error_method: ErrorMethod::Affine,
        precision: Precision::Float64,
        ..AnalysisOptions::default()
    }
}

fn analyze_named(name: &str) -> numlangc::analysis::FunctionAnalysis {
    let program = parse_kernels(BENCHMARKS).unwrap();
    let f = program
        .functions
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no benchmark named {name}"));
    analyze_function(f, &reference_options()).unwrap()
}

fn assert_error_envelope(name: &str, expected: &str, lo: (i64, i64), hi: (i64, i64)) {
    let result = analyze_named(name);
    let expected = Rational::from_decimal_str(expected).unwrap();
    let lo = &expected * &Rational::fraction(lo.0, lo.1);
    let hi = &expected * &Rational::fraction(hi.0, hi.1);
    assert!(
        result.abs_error >= lo,
        "{name}: error {} below envelope {}",
        result.abs_error.to_f64(),
        lo.to_f64()
    );
    assert!(
        result.abs_error <= hi,
        "{name}: error {} above envelope {}",
        result.abs_error.to_f64(),
        hi.to_f64()
    );
}

// ============================================================================
// Benchmark error envelopes (reference configuration)
//
// The polynomial kernels track the reference errors within a few percent.
// The kernels dominated by products of symmetric ranges and by division
// carry a stable conservatism factor in this configuration: scaling an error
// by a zero-centered operand range turns its correlated part entirely into
// fresh noise, and the divisor derivative enclosure is evaluated over the
// whole box. Each band below pins the computed bound to within ±5-10% of
// where the propagation rules land, so any drift in the per-operator rules
// fails the check.
// ============================================================================

#[test]
fn bspline0_error_envelope() {
    // Lands at ~1.045x the reference value.
    assert_error_envelope("bspline0", "1.5266e-16", (95, 100), (115, 100));
}

#[test]
fn bspline1_error_envelope() {
    // Lands at ~1.059x: the shared u-noise cancels between 3u^3 and 6u^2.
    assert_error_envelope("bspline1", "6.1062e-16", (95, 100), (120, 100));
}

#[test]
fn rigid_body1_error_envelope() {
    // All input ranges are zero-centered, so every product decorrelates:
    // the bound is exactly 4575 times the Float64 unit roundoff, ~2.270x.
    assert_error_envelope("rigidBody1", "2.238e-13", (210, 100), (245, 100));
}

#[test]
fn doppler_error_envelope() {
    // Squared divisor plus a wide numerator: ~3.18x.
    assert_error_envelope("doppler", "1.98e-13", (295, 100), (355, 100));
}

#[test]
fn turbine1_error_envelope() {
    // Mixed product/quotient chain: ~1.56x.
    assert_error_envelope("turbine1", "8.82e-14", (145, 100), (172, 100));
}

#[test]
fn sine_order3_error_envelope() {
    // Lands at ~1.082x the reference value.
    assert_error_envelope("sineOrder3", "1.44e-15", (98, 100), (120, 100));
}

// ============================================================================
// Ranges and general result shape
// ============================================================================

#[test]
fn bspline0_range_encloses_the_true_range() {
    let result = analyze_named("bspline0");
    // True range of (1-u)^3/6 over [0, 0.875] is [(1/8)^3/6, 1/6].
    let true_lo = Rational::fraction(1, 3072);
    let true_hi = Rational::fraction(1, 6);
    assert!(result.range.contains(&true_lo));
    assert!(result.range.contains(&true_hi));
    // Off-zero range means a relative error is reported.
    assert!(result.rel_error.is_some());
}

#[test]
fn every_subexpression_has_a_range_and_an_error() {
    let program = parse_kernels(BENCHMARKS).unwrap();
    let f = program
        .functions
        .iter()
        .find(|f| f.name == "sineOrder3")
        .unwrap();
    let result = analyze_function(f, &reference_options()).unwrap();
    assert_eq!(result.interm_ranges.len(), f.body.size());
    assert_eq!(result.interm_errors.len(), f.body.size());
    assert!(result.interm_ranges.contains_key(&f.body.id));
}

#[test]
fn all_benchmarks_analyze_successfully() {
    let program = parse_kernels(BENCHMARKS).unwrap();
    let results = analyze_program(&program, &reference_options());
    assert_eq!(results.len(), 6);
    for result in results {
        let analysis = result.unwrap();
        assert!(analysis.abs_error.is_positive());
        assert!(analysis.warnings.is_empty(), "{}", analysis.name);
    }
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn repeated_analysis_is_bit_identical() {
    let a = analyze_named("doppler");
    let b = analyze_named("doppler");
    assert_eq!(a.abs_error, b.abs_error);
    assert_eq!(a.range, b.range);
    assert_eq!(a.rel_error, b.rel_error);
}

#[test]
fn affine_range_method_is_deterministic_too() {
    let options = AnalysisOptions {
        range_method: RangeMethod::Affine,
        ..reference_options()
    };
    let program = parse_kernels(BENCHMARKS).unwrap();
    let f = program
        .functions
        .iter()
        .find(|f| f.name == "sineOrder3")
        .unwrap();
    let a = analyze_function(f, &options).unwrap();
    let b = analyze_function(f, &options).unwrap();
    assert_eq!(a.abs_error, b.abs_error);
    assert_eq!(a.range, b.range);
}

// ============================================================================
// Domain comparisons
// ============================================================================

#[test]
fn affine_ranges_refine_interval_ranges_under_correlation() {
    let src = "fn corr(x) { require x in [1, 3] (x - x) + x * x }";
    let program = parse_kernels(src).unwrap();
    let f = &program.functions[0];

    let interval = analyze_function(f, &reference_options()).unwrap();
    let affine = analyze_function(
        f,
        &AnalysisOptions {
            range_method: RangeMethod::Affine,
            ..reference_options()
        },
    )
    .unwrap();
    assert!(affine.range.is_subset_of(&interval.range));
}

#[test]
fn affine_errors_do_not_exceed_interval_errors_under_correlation() {
    let src = "fn corr(x) { require x in [1, 3] && x +/- 1e-9 x - x }";
    let program = parse_kernels(src).unwrap();
    let f = &program.functions[0];
    let base = AnalysisOptions {
        track_roundoff: false,
        ..reference_options()
    };

    let affine = analyze_function(f, &base).unwrap();
    let interval = analyze_function(
        f,
        &AnalysisOptions {
            error_method: ErrorMethod::Interval,
            ..base
        },
    )
    .unwrap();
    assert!(affine.abs_error <= interval.abs_error);
    assert!(affine.abs_error.is_zero());
    assert_eq!(
        interval.abs_error,
        Rational::from_decimal_str("2e-9").unwrap()
    );
}

// ============================================================================
// Monotonicity and tracking flags
// ============================================================================

#[test]
fn widening_inputs_widens_results() {
    let narrow = parse_kernels("fn f(x) { require x in [0, 1] x * x + x }").unwrap();
    let wide = parse_kernels("fn f(x) { require x in [0, 2] x * x + x }").unwrap();
    let options = reference_options();
    let a = analyze_function(&narrow.functions[0], &options).unwrap();
    let b = analyze_function(&wide.functions[0], &options).unwrap();
    assert!(a.range.is_subset_of(&b.range));
    assert!(a.abs_error <= b.abs_error);
}

#[test]
fn disabling_both_trackers_zeroes_all_errors() {
    let program = parse_kernels(BENCHMARKS).unwrap();
    let options = AnalysisOptions {
        track_initial: false,
        track_roundoff: false,
        ..reference_options()
    };
    for f in &program.functions {
        let result = analyze_function(f, &options).unwrap();
        assert!(result.abs_error.is_zero(), "{}", f.name);
        assert!(result.interm_errors.values().all(|e| e.is_zero()));
    }
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn division_by_straddling_range_fails() {
    let program = parse_kernels("fn d(x) { require x in [0, 1] 1.0 / x }").unwrap();
    let options = AnalysisOptions {
        subdiv_depth: 0,
        ..reference_options()
    };
    let err = analyze_function(&program.functions[0], &options).unwrap_err();
    assert!(err.to_string().contains("division"));
}

#[test]
fn sqrt_of_slightly_negative_range_fails() {
    let program =
        parse_kernels("fn s(x) { require x in [-0.001, 1] sqrt(x) }").unwrap();
    let options = AnalysisOptions {
        subdiv_depth: 0,
        ..reference_options()
    };
    let err = analyze_function(&program.functions[0], &options).unwrap_err();
    assert!(err.to_string().contains("square root"));
}

#[test]
fn failures_name_the_function() {
    let program = parse_kernels("fn culprit(x) { require x in [0, 1] 1.0 / x }").unwrap();
    let options = AnalysisOptions {
        subdiv_depth: 0,
        ..reference_options()
    };
    let err = analyze_function(&program.functions[0], &options).unwrap_err();
    assert!(err.to_string().contains("culprit"));
}

// ============================================================================
// Mixed precision and fixed point
// ============================================================================

#[test]
fn lower_precision_uniformly_increases_the_bound() {
    let program = parse_kernels(BENCHMARKS).unwrap();
    let f = program
        .functions
        .iter()
        .find(|f| f.name == "bspline0")
        .unwrap();
    let f64_result = analyze_function(f, &reference_options()).unwrap();
    let f32_result = analyze_function(
        f,
        &AnalysisOptions {
            precision: Precision::Float32,
            ..reference_options()
        },
    )
    .unwrap();
    assert!(f32_result.abs_error > f64_result.abs_error);
    // Ranges are real-valued and unaffected by precision.
    assert_eq!(f32_result.range, f64_result.range);
}

#[test]
fn mixed_precision_override_applies_to_named_variables() {
    let src = "fn m(x, y) { require x in [0, 1] && y in [0, 1] x + y }";
    let program = parse_kernels(src).unwrap();
    let mut options = reference_options();
    options.mixed_precision = Some(
        [("x".to_string(), Precision::Float32)]
            .into_iter()
            .collect(),
    );
    let mixed = analyze_function(&program.functions[0], &options).unwrap();
    let uniform = analyze_function(&program.functions[0], &reference_options()).unwrap();
    // x now carries a Float32 initial error, so the bound grows.
    assert!(mixed.abs_error > uniform.abs_error);
}

#[test]
fn fixed_point_analysis_runs_end_to_end() {
    let src = "fn f(x) { require x in [0, 1] x * x }";
    let program = parse_kernels(src).unwrap();
    let options = AnalysisOptions {
        precision: Precision::Fixed(16),
        constants_precision: Some(Precision::Fixed(16)),
        ..reference_options()
    };
    let result = analyze_function(&program.functions[0], &options).unwrap();
    assert!(result.abs_error.is_positive());
    assert!(result.abs_error > Rational::pow2(-17));
}

// ============================================================================
// Overflow advisory
// ============================================================================

#[test]
fn overflow_is_reported_as_a_warning_with_a_result() {
    let src = "fn big(x) { require x in [1e300, 1e308] x * x }";
    let program = parse_kernels(src).unwrap();
    let result = analyze_function(&program.functions[0], &reference_options()).unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::Overflow { .. })));
}

// ============================================================================
// Postcondition tolerances (regression harness contract)
// ============================================================================

#[test]
fn declared_tolerances_hold_for_the_bsplines() {
    let program = parse_kernels(BENCHMARKS).unwrap();
    for f in &program.functions {
        let Some(eps) = &f.ensures else { continue };
        let result = analyze_function(f, &reference_options()).unwrap();
        assert!(
            result.abs_error <= *eps,
            "{}: {} exceeds declared tolerance",
            f.name,
            result.abs_error.to_f64()
        );
    }
}

#[test]
fn interval_bounds_are_outward_in_display() {
    let result = analyze_named("bspline0");
    let lo = result.range.lo.to_f64_down();
    let hi = result.range.hi.to_f64_up();
    assert!(Rational::from_f64(lo).unwrap() <= result.range.lo);
    assert!(Rational::from_f64(hi).unwrap() >= result.range.hi);
    let line = result.to_string();
    assert!(line.starts_with("bspline0: abs error = "));
    assert!(line.contains("range = ["));
}
