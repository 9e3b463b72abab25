use num::BigUint;
use rand::Rng;
use std::fmt;

use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::errors::{Error, Result};

/// A guardian's secret polynomial `P(x) = a_0 + a_1 x + ... + a_{k-1} x^{k-1}` over `Z_Q`.
/// `a_0` is the guardian's secret key.
#[derive(Clone)]
pub struct SecretPolynomial {
    coefficients: Vec<ElementModQ>,
}

impl fmt::Debug for SecretPolynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretPolynomial(degree {})", self.coefficients.len() - 1)
    }
}

impl SecretPolynomial {
    /// A random polynomial with `quorum` coefficients (so, degree `quorum - 1`).  No coefficient
    /// is zero.
    pub fn random<R: Rng + ?Sized>(group: &Group, quorum: usize, rng: &mut R) -> SecretPolynomial {
        SecretPolynomial {
            coefficients: (0..quorum.max(1))
                .map(|_| group.rand_range_q(rng, 1))
                .collect(),
        }
    }

    pub fn from_coefficients(coefficients: Vec<ElementModQ>) -> Result<SecretPolynomial> {
        if coefficients.is_empty() {
            return Err(Error::Ceremony(
                "a polynomial needs at least one coefficient".to_owned(),
            ));
        }
        Ok(SecretPolynomial { coefficients })
    }

    pub fn coefficients(&self) -> &[ElementModQ] {
        &self.coefficients
    }

    pub fn secret(&self) -> &ElementModQ {
        &self.coefficients[0]
    }

    /// `P(x) mod Q`, by Horner's rule.
    pub fn evaluate(&self, group: &Group, x: u32) -> ElementModQ {
        let x = group.q_from_u64(u64::from(x));
        self.coefficients
            .iter()
            .rev()
            .fold(group.zero_q(), |acc, a| group.a_plus_bc_q(a, &acc, &x))
    }

    /// `K_j = g^{a_j}` for every coefficient.
    pub fn commitments(&self, group: &Group) -> Vec<ElementModP> {
        self.coefficients.iter().map(|a| group.g_pow_p(a)).collect()
    }
}

/// `g^{P(x)}`, computed in the exponent from the public commitments: `∏_j K_j^{x^j}`.  This is
/// what a share `P(x)` must match, and it is the public key behind a compensated decryption.
pub fn commitment_at(group: &Group, commitments: &[ElementModP], x: u32) -> ElementModP {
    let x = group.q_from_u64(u64::from(x));
    let mut x_pow = group.one_q();
    let mut result = group.one_p();
    for k in commitments {
        result = group.mult_p(&result, &group.pow_p(k, &x_pow));
        x_pow = group.mul_q(&x_pow, &x);
    }
    result
}

/// The Lagrange coefficient `w_i = ∏_{j≠i} x_j / (x_j - x_i) mod Q` for interpolating at zero
/// from the points `x_i` and `others`.
pub fn lagrange_coefficient(group: &Group, x_i: u32, others: &[u32]) -> Result<ElementModQ> {
    if x_i == 0 || others.iter().filter(|&&x| x == x_i).count() > 1 {
        return Err(Error::Ceremony(format!(
            "x-coordinate {} is zero or appears more than once",
            x_i
        )));
    }
    let xi = group.q_from_u64(u64::from(x_i));
    let mut numerator = group.one_q();
    let mut denominator = group.one_q();
    for &x_j in others.iter().filter(|&&x_j| x_j != x_i) {
        let xj = group.q_from_u64(u64::from(x_j));
        numerator = group.mul_q(&numerator, &xj);
        denominator = group.mul_q(&denominator, &group.sub_q(&xj, &xi));
    }
    if denominator.is_zero() || numerator.is_zero() {
        return Err(Error::Ceremony(
            "x-coordinates must be distinct and non-zero".to_owned(),
        ));
    }
    Ok(group.div_q(&numerator, &denominator))
}

/// Interpolate `P(0)` from shares `(x_i, P(x_i))`.  Used only to cross-check the exponent-side
/// reconstruction in tests and by callers that hold plaintext shares.
pub fn interpolate_at_zero(group: &Group, points: &[(u32, ElementModQ)]) -> Result<ElementModQ> {
    let xs: Vec<u32> = points.iter().map(|(x, _)| *x).collect();
    let mut acc = group.zero_q();
    for (x, y) in points {
        let w = lagrange_coefficient(group, *x, &xs)?;
        acc = group.a_plus_bc_q(&acc, &w, y);
    }
    Ok(acc)
}

/// Parse a share value received as bytes.
pub(crate) fn share_from_bytes(group: &Group, bytes: &[u8]) -> Result<ElementModQ> {
    group.elem_q(BigUint::from_bytes_be(bytes))
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed(group: &Group) -> SecretPolynomial {
        // P(x) = 5 + 3x + 2x^2
        SecretPolynomial::from_coefficients(vec![
            group.q_from_u64(5),
            group.q_from_u64(3),
            group.q_from_u64(2),
        ])
        .unwrap()
    }

    #[test]
    fn evaluate_small() {
        let group = Group::testing();
        let p = fixed(&group);
        assert_eq!(p.evaluate(&group, 0), group.q_from_u64(5));
        assert_eq!(p.evaluate(&group, 1), group.q_from_u64(10));
        assert_eq!(p.evaluate(&group, 4), group.q_from_u64(49));
    }

    #[test]
    fn commitments_match_evaluation() {
        let group = Group::testing();
        let mut rng = StdRng::seed_from_u64(11);
        let p = SecretPolynomial::random(&group, 3, &mut rng);
        let commitments = p.commitments(&group);
        for x in 1..=5 {
            assert_eq!(
                commitment_at(&group, &commitments, x),
                group.g_pow_p(&p.evaluate(&group, x))
            );
        }
    }

    #[test]
    fn any_quorum_interpolates_secret() {
        let group = Group::testing();
        let mut rng = StdRng::seed_from_u64(12);
        let p = SecretPolynomial::random(&group, 3, &mut rng);
        for subset in &[[1_u32, 2, 3], [2, 4, 5], [1, 3, 5]] {
            let points: Vec<_> = subset.iter().map(|&x| (x, p.evaluate(&group, x))).collect();
            assert_eq!(&interpolate_at_zero(&group, &points).unwrap(), p.secret());
        }
    }

    #[test]
    fn too_few_points_miss_secret() {
        let group = Group::testing();
        let mut rng = StdRng::seed_from_u64(13);
        let p = SecretPolynomial::random(&group, 3, &mut rng);
        let points: Vec<_> = [1_u32, 2].iter().map(|&x| (x, p.evaluate(&group, x))).collect();
        assert_ne!(&interpolate_at_zero(&group, &points).unwrap(), p.secret());
    }

    #[test]
    fn zero_coordinate_rejected() {
        let group = Group::testing();
        assert!(lagrange_coefficient(&group, 1, &[0, 1, 2]).is_err());
        assert!(lagrange_coefficient(&group, 1, &[1, 2, 2]).is_ok());
        assert!(lagrange_coefficient(&group, 2, &[1, 2, 2]).is_err());
    }
}
