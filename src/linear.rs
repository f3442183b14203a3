use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

use crate::error::MdpError;

/// Pivots smaller than this, relative to the largest entry of `a`, mark the
/// system as singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Solve `a * x = b` exactly with an LU decomposition.
///
/// Fails with `MdpError::Singular` when `a` has no inverse, or is so close to
/// singular that the answer would be meaningless.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, MdpError> {
    let n = b.len();
    if a.dim() != (n, n) {
        return Err(MdpError::Singular { size: n });
    }
    if n == 0 {
        return Ok(Array1::zeros(0));
    }
    let m = DMatrix::from_fn(n, n, |i, j| a[[i, j]]);
    let rhs = DVector::from_iterator(n, b.iter().copied());

    let scale = m.amax();
    let lu = m.lu();
    let min_pivot = lu.u().diagonal().amin();
    if !lu.is_invertible() || min_pivot <= PIVOT_TOLERANCE * scale {
        return Err(MdpError::Singular { size: n });
    }
    let x = lu.solve(&rhs).ok_or(MdpError::Singular { size: n })?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(MdpError::Singular { size: n });
    }
    Ok(x.iter().copied().collect())
}
