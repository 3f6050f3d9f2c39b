//! Test helpers shared by the unit and integration tests.

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Largest absolute entry-wise difference of two equally long slices.
pub fn max_abs_difference(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "slices must have the same length");
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Whether the values never increase by more than `tol` from one entry to the next.
pub fn is_non_increasing(values: &[f64], tol: f64) -> bool {
    values.windows(2).all(|w| w[1] <= w[0] + tol)
}

/// Whether the values never decrease by more than `tol` from one entry to the next.
pub fn is_non_decreasing(values: &[f64], tol: f64) -> bool {
    values.windows(2).all(|w| w[1] >= w[0] - tol)
}

/// Sorts `(coordinate, value)` samples by coordinate and returns the values.
pub fn values_sorted_by_coordinate(mut samples: Vec<(f64, f64)>) -> Vec<f64> {
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
    samples.into_iter().map(|(_, value)| value).collect()
}
