//! Row-packed storage for symmetric matrices.
//!
//! A symmetric `n×n` matrix is stored as its lower triangle, row by row, in a
//! vector of length `n(n+1)/2`: element `(r, c)` with `c ≤ r` lives at
//! `r(r+1)/2 + c`. Storing one packed matrix per row of an `Array2` turns a
//! weighted sum of many symmetric matrices into a single matrix product
//! (e.g. `Σᵢ γᵢ Uᵢ = Uᵀ γ`), which is how the extractor and the accumulator
//! batch their quadratic terms.
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Length of the packed representation of an `n×n` symmetric matrix.
pub fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Offset of element `(r, c)` in the packed vector (order of `r`, `c` is free).
#[inline]
pub fn packed_index(r: usize, c: usize) -> usize {
    let (hi, lo) = if r >= c { (r, c) } else { (c, r) };
    hi * (hi + 1) / 2 + lo
}

/// Recover `n` from a packed length, if `len` is a triangular number.
pub fn packed_dim(len: usize) -> Option<usize> {
    let mut n = ((2.0 * len as f64).sqrt()) as usize;
    while packed_len(n) < len {
        n += 1;
    }
    while n > 0 && packed_len(n) > len {
        n -= 1;
    }
    if packed_len(n) == len { Some(n) } else { None }
}

/// Pack the lower triangle of a square matrix.
pub fn pack_symmetric(a: ArrayView2<f64>) -> Array1<f64> {
    let n = a.nrows();
    let mut out = Array1::<f64>::zeros(packed_len(n));
    for r in 0..n {
        for c in 0..=r {
            out[packed_index(r, c)] = a[[r, c]];
        }
    }
    out
}

/// Expand a packed vector into a full symmetric `n×n` matrix.
pub fn unpack_symmetric(p: ArrayView1<f64>, n: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n, n));
    add_packed_to(p, 1.0, &mut out);
    out
}

/// `a += scale · unpack(p)`; `a` must be `n×n` with `p.len() == n(n+1)/2`.
pub fn add_packed_to(p: ArrayView1<f64>, scale: f64, a: &mut Array2<f64>) {
    let n = a.nrows();
    for r in 0..n {
        for c in 0..r {
            let v = scale * p[packed_index(r, c)];
            a[[r, c]] += v;
            a[[c, r]] += v;
        }
        a[[r, r]] += scale * p[packed_index(r, r)];
    }
}

/// Packed `v vᵀ`.
pub fn packed_outer(v: ArrayView1<f64>) -> Array1<f64> {
    let n = v.len();
    let mut out = Array1::<f64>::zeros(packed_len(n));
    for r in 0..n {
        for c in 0..=r {
            out[packed_index(r, c)] = v[r] * v[c];
        }
    }
    out
}

/// `tr(A B)` for two symmetric matrices given in packed form.
///
/// Off-diagonal products appear twice in the trace, diagonal ones once.
pub fn trace_packed_product(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = packed_dim(a.len()).unwrap_or(0);
    let mut diag = 0.0;
    let mut off = 0.0;
    for r in 0..n {
        for c in 0..r {
            let k = packed_index(r, c);
            off += a[k] * b[k];
        }
        let k = packed_index(r, r);
        diag += a[k] * b[k];
    }
    diag + 2.0 * off
}
