use crate::{CoreError, CoreResult};

/// Floating point type used throughout the system
pub type Real = f64;

/// Absolute + relative tolerance pair
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> CoreResult<Real> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}

/// Finite and strictly greater than zero.
pub fn ensure_positive(v: Real, what: &'static str) -> CoreResult<Real> {
    let v = ensure_finite(v, what)?;
    if v > 0.0 {
        Ok(v)
    } else {
        Err(CoreError::NonPositive { what, value: v })
    }
}

/// Finite and strictly inside `(lo, hi)`.
pub fn ensure_open_interval(
    v: Real,
    lo: Real,
    hi: Real,
    what: &'static str,
) -> CoreResult<Real> {
    let v = ensure_finite(v, what)?;
    if v > lo && v < hi {
        Ok(v)
    } else {
        Err(CoreError::OutOfRange {
            what,
            value: v,
            lo,
            hi,
        })
    }
}

/// Raise `v` in magnitude to at least `floor`, keeping its sign.
///
/// Zero stays zero.
pub fn clamp_magnitude_min(v: Real, floor: Real) -> Real {
    if v > 0.0 && v < floor {
        floor
    } else if v < 0.0 && v > -floor {
        -floor
    } else {
        v
    }
}
