//! Convenience wrappers around methods from the approx crate for comparing floating point values.

use approx::AbsDiffEq;

/// Default absolute tolerance for comparing rates and probabilities.
pub const ACC: f64 = 10e-11;

/// Compares if two floats are close via `approx::abs_diff_eq` using a maximum absolute difference
/// (epsilon) of `acc`.
#[must_use]
pub fn almost_eq(a: f64, b: f64, acc: f64) -> bool {
    if a.is_infinite() && b.is_infinite() {
        return a == b;
    }
    a.abs_diff_eq(&b, acc)
}

/// Whether `p` is a probability.
#[must_use]
pub fn is_probability(p: f64) -> bool {
    (0.0..=1.0).contains(&p)
}
