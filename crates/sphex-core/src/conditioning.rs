//! Local moment matrices and their conditioning.
//!
//! Payloads that build a second-moment matrix from the neighbour set use
//! its condition number as a feedback signal: an ill-conditioned matrix
//! asks the bracket solver for more neighbours.

use std::ops::AddAssign;

/// Relative determinant below which a matrix counts as singular.
const SINGULAR_DET: f64 = 1e-12;

/// Dense 3x3 matrix, row-major.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Matrix3(pub [[f64; 3]; 3]);

/// Inverse of a moment matrix plus its conditioning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Conditioned {
    /// The inverse, or identity if the matrix was singular.
    pub inverse: Matrix3,
    /// `|M|_F * |M^-1|_F / 3`; infinite for a singular matrix.
    pub condition_number: f64,
    /// The identity was substituted.
    pub singular: bool,
}

impl Matrix3 {
    /// The zero matrix.
    pub const ZERO: Self = Self([[0.0; 3]; 3]);

    /// The identity matrix.
    pub const IDENTITY: Self = Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Add `weight * v v^T`.
    pub fn add_outer(&mut self, v: [f64; 3], weight: f64) {
        for (i, row) in self.0.iter_mut().enumerate() {
            for (j, m) in row.iter_mut().enumerate() {
                *m += weight * v[i] * v[j];
            }
        }
    }

    /// Determinant.
    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Frobenius norm.
    pub fn frobenius(&self) -> f64 {
        self.0
            .iter()
            .flat_map(|row| row.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    /// Inverse via the adjugate, or `None` if (relatively) singular.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        let scale = self.frobenius();
        if !det.is_finite() || scale == 0.0 || det.abs() <= SINGULAR_DET * scale.powi(3) {
            return None;
        }
        let m = &self.0;
        let inv_det = 1.0 / det;
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                // Cofactor of (j, i) gives the adjugate entry (i, j).
                let (r0, r1) = others(j);
                let (c0, c1) = others(i);
                let minor = m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
                let sign = if (i + j) % 2 == 0 { 1.0 } else { -1.0 };
                *v = sign * minor * inv_det;
            }
        }
        Some(Self(out))
    }

    /// Invert and measure conditioning, substituting the identity when
    /// the matrix is singular.
    pub fn condition(&self) -> Conditioned {
        match self.inverse() {
            Some(inverse) => Conditioned {
                condition_number: self.frobenius() * inverse.frobenius() / 3.0,
                inverse,
                singular: false,
            },
            None => Conditioned {
                inverse: Self::IDENTITY,
                condition_number: f64::INFINITY,
                singular: true,
            },
        }
    }

    /// Matrix product.
    pub fn mul(&self, other: &Self) -> Self {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (0..3).map(|k| self.0[i][k] * other.0[k][j]).sum();
            }
        }
        Self(out)
    }
}

impl AddAssign<&Matrix3> for Matrix3 {
    fn add_assign(&mut self, rhs: &Matrix3) {
        for (row, rrow) in self.0.iter_mut().zip(rhs.0.iter()) {
            for (v, r) in row.iter_mut().zip(rrow.iter()) {
                *v += r;
            }
        }
    }
}

fn others(k: usize) -> (usize, usize) {
    match k {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}
