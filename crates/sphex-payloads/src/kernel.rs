//! Cubic-spline SPH kernel in three dimensions.
//!
//! Compact support `h`: the kernel vanishes for `r >= h`. Normalised so
//! that its volume integral is one. With `u = r / h`:
//!
//! ```text
//! W(u) = 8/(pi h^3) * (1 - 6u^2 + 6u^3)    0   <= u < 1/2
//!      = 16/(pi h^3) * (1 - u)^3            1/2 <= u < 1
//! ```

use std::f64::consts::PI;

const NORM: f64 = 8.0 / PI;

/// Kernel value at separation `r` for support `h`.
pub fn cubic_spline(r: f64, h: f64) -> f64 {
    let u = r / h;
    let hinv3 = 1.0 / (h * h * h);
    if u < 0.5 {
        hinv3 * NORM * (1.0 + 6.0 * (u - 1.0) * u * u)
    } else if u < 1.0 {
        let v = 1.0 - u;
        hinv3 * 2.0 * NORM * v * v * v
    } else {
        0.0
    }
}

/// `dW/dr` at separation `r` for support `h`.
pub fn cubic_spline_dr(r: f64, h: f64) -> f64 {
    let u = r / h;
    let hinv4 = 1.0 / (h * h * h * h);
    if u < 0.5 {
        hinv4 * NORM * u * (18.0 * u - 12.0)
    } else if u < 1.0 {
        let v = 1.0 - u;
        hinv4 * -6.0 * NORM * v * v
    } else {
        0.0
    }
}

/// `dW/dh` at separation `r` for support `h`.
///
/// `W = h^-3 f(r/h)` gives `dW/dh = -(3 W / h + (r / h) dW/dr)`.
pub fn cubic_spline_dh(r: f64, h: f64) -> f64 {
    -(3.0 * cubic_spline(r, h) / h + (r / h) * cubic_spline_dr(r, h))
}

/// Kernel-weighted neighbour count `(4 pi / 3) h^3 sum W`.
pub fn effective_neighbors(weight_sum: f64, h: f64) -> f64 {
    4.0 * PI / 3.0 * h * h * h * weight_sum
}
