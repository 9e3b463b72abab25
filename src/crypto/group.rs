use lazy_static::*;
use num::bigint::RandBigInt;
use num::traits::{Num, One, Zero};
use num::BigUint;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::serialize::element::fixed_width;

/// Width of the canonical big-endian encoding of every group value.  This bounds the size of the
/// large prime a `Group` will accept.
pub const ELEMENT_BYTES: usize = 512;

/// An element of the multiplicative group of integers modulo the large prime `P`.
///
/// Elements produced by `Group` arithmetic are always members of the prime-order subgroup.
/// Elements that come from outside (deserialization) must go through `Group::validate_p` or
/// `serialize::from_json` before they are trusted.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementModP {
    #[serde(with = "crate::serialize::element")]
    element: BigUint,
}

/// An exponent: an integer in `[0, Q)`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementModQ {
    #[serde(with = "crate::serialize::element")]
    exponent: BigUint,
}

impl ElementModP {
    /// Construct an element without checking group membership: this is unsafe!
    pub(crate) fn unchecked(element: BigUint) -> ElementModP {
        ElementModP { element }
    }

    pub fn as_uint(&self) -> &BigUint {
        &self.element
    }

    /// Fixed-width big-endian bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        fixed_width(&self.element)
    }
}

impl ElementModQ {
    /// Construct an exponent without checking it is below `Q`: this is unsafe!
    pub(crate) fn unchecked(exponent: BigUint) -> ElementModQ {
        ElementModQ { exponent }
    }

    pub fn as_uint(&self) -> &BigUint {
        &self.exponent
    }

    pub fn is_zero(&self) -> bool {
        self.exponent.is_zero()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        fixed_width(&self.exponent)
    }
}

/// The public parameters that fix the group: large prime `P`, small prime `Q`, cofactor `R` with
/// `P = Q R + 1`, and a generator `G` of the order-`Q` subgroup.  Stored as big-endian bytes, and
/// compared by content.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ElectionConstants {
    pub name: String,
    #[serde(with = "crate::serialize::hex_bytes")]
    pub large_prime: Vec<u8>,
    #[serde(with = "crate::serialize::hex_bytes")]
    pub small_prime: Vec<u8>,
    #[serde(with = "crate::serialize::hex_bytes")]
    pub cofactor: Vec<u8>,
    #[serde(with = "crate::serialize::hex_bytes")]
    pub generator: Vec<u8>,
}

impl ElectionConstants {
    pub fn new(
        name: &str,
        large_prime: &BigUint,
        small_prime: &BigUint,
        cofactor: &BigUint,
        generator: &BigUint,
    ) -> ElectionConstants {
        ElectionConstants {
            name: name.to_owned(),
            large_prime: large_prime.to_bytes_be(),
            small_prime: small_prime.to_bytes_be(),
            cofactor: cofactor.to_bytes_be(),
            generator: generator.to_bytes_be(),
        }
    }

    /// The 4096-bit MODP group of [IETF RFC 3526](https://tools.ietf.org/html/rfc3526),
    /// restricted to its quadratic residues: `Q = (P - 1) / 2`, `R = 2`, `G = 4`.
    pub fn standard() -> ElectionConstants {
        STANDARD_GROUP.constants().clone()
    }

    /// A 256-bit group with a 127-bit subgroup, for tests and demonstrations.  It offers no
    /// security whatsoever.
    pub fn testing() -> ElectionConstants {
        TESTING_GROUP.constants().clone()
    }
}

/// The group every election computation happens in.  Cloning is cheap: all clones share one
/// immutable set of parsed constants.
#[derive(Clone)]
pub struct Group {
    inner: Arc<Inner>,
}

struct Inner {
    constants: ElectionConstants,
    p: BigUint,
    q: BigUint,
    r: BigUint,
    g: ElementModP,
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.inner.constants.name)
            .field("bits", &self.inner.p.bits())
            .finish()
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Group) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.constants == other.inner.constants
    }
}

impl Eq for Group {}

lazy_static! {
    static ref STANDARD_GROUP: Group = {
        let p = parse_biguint_hex_or_panic(PRIME_HEX_4096);
        let q = (&p - BigUint::one()) / BigUint::from(2_u8);
        Group::from_parts("RFC 3526 MODP 4096", p, q, BigUint::from(2_u8), BigUint::from(4_u8))
    };

    static ref TESTING_GROUP: Group = Group::from_parts(
        "testing 256",
        parse_biguint_hex_or_panic(TESTING_HEX_P),
        parse_biguint_hex_or_panic(TESTING_HEX_Q),
        parse_biguint_hex_or_panic(TESTING_HEX_R),
        parse_biguint_hex_or_panic(TESTING_HEX_G),
    );
}

impl Group {
    /// Build a group from published constants, checking that they describe a subgroup of prime
    /// order `Q` generated by `G`.  Primality of `P` and `Q` is taken on trust.
    pub fn new(constants: ElectionConstants) -> Result<Group> {
        let p = BigUint::from_bytes_be(&constants.large_prime);
        let q = BigUint::from_bytes_be(&constants.small_prime);
        let r = BigUint::from_bytes_be(&constants.cofactor);
        let g = BigUint::from_bytes_be(&constants.generator);
        let invalid = |msg: &str| Err(Error::InvalidConfig(format!("{}: {}", constants.name, msg)));

        if p.bits() > (ELEMENT_BYTES * 8) as u64 {
            return invalid("large prime is wider than 4096 bits");
        }
        if q <= BigUint::one() || q >= p {
            return invalid("small prime is not in (1, P)");
        }
        if &q * &r + BigUint::one() != p {
            return invalid("P != Q R + 1");
        }
        if g <= BigUint::one() || g >= p || g.modpow(&q, &p) != BigUint::one() {
            return invalid("generator does not have order Q");
        }

        Ok(Group::with_constants(constants, p, q, r, g))
    }

    /// The RFC 3526 4096-bit group.  See `ElectionConstants::standard`.
    pub fn standard() -> Group {
        STANDARD_GROUP.clone()
    }

    /// The insecure 256-bit testing group.  See `ElectionConstants::testing`.
    pub fn testing() -> Group {
        TESTING_GROUP.clone()
    }

    fn from_parts(name: &str, p: BigUint, q: BigUint, r: BigUint, g: BigUint) -> Group {
        let constants = ElectionConstants::new(name, &p, &q, &r, &g);
        Group::with_constants(constants, p, q, r, g)
    }

    fn with_constants(
        constants: ElectionConstants,
        p: BigUint,
        q: BigUint,
        r: BigUint,
        g: BigUint,
    ) -> Group {
        Group {
            inner: Arc::new(Inner {
                constants,
                p,
                q,
                r,
                g: ElementModP::unchecked(g),
            }),
        }
    }

    pub fn constants(&self) -> &ElectionConstants {
        &self.inner.constants
    }

    pub fn p(&self) -> &BigUint {
        &self.inner.p
    }

    pub fn q(&self) -> &BigUint {
        &self.inner.q
    }

    pub fn r(&self) -> &BigUint {
        &self.inner.r
    }

    /// The generator `G`.
    pub fn generator(&self) -> &ElementModP {
        &self.inner.g
    }

    pub fn one_p(&self) -> ElementModP {
        ElementModP::unchecked(BigUint::one())
    }

    pub fn zero_q(&self) -> ElementModQ {
        ElementModQ::unchecked(BigUint::zero())
    }

    pub fn one_q(&self) -> ElementModQ {
        ElementModQ::unchecked(BigUint::one())
    }

    // Construction and validation

    /// Accept `x` as a group element only if it lies in the prime-order subgroup.
    pub fn elem_p(&self, x: BigUint) -> Result<ElementModP> {
        let e = ElementModP::unchecked(x);
        self.validate_p(&e, "value")?;
        Ok(e)
    }

    /// Accept `x` as an exponent only if it lies in `[0, Q)`.
    pub fn elem_q(&self, x: BigUint) -> Result<ElementModQ> {
        let e = ElementModQ::unchecked(x);
        self.validate_q(&e, "value")?;
        Ok(e)
    }

    /// Reduce an arbitrary integer modulo `Q`.
    pub fn reduce_q(&self, x: BigUint) -> ElementModQ {
        ElementModQ::unchecked(x % self.q())
    }

    pub fn q_from_u64(&self, x: u64) -> ElementModQ {
        self.reduce_q(BigUint::from(x))
    }

    /// `0 < x < P` and `x^Q mod P == 1`.
    pub fn is_valid_residue(&self, x: &ElementModP) -> bool {
        let x = x.as_uint();
        !x.is_zero() && x < self.p() && x.modpow(self.q(), self.p()).is_one()
    }

    pub fn is_in_bounds_q(&self, x: &ElementModQ) -> bool {
        x.as_uint() < self.q()
    }

    pub fn validate_p(&self, x: &ElementModP, what: &str) -> Result<()> {
        if self.is_valid_residue(x) {
            Ok(())
        } else {
            Err(Error::InvalidGroupElement(format!(
                "{} is not in the order-Q subgroup of {}",
                what,
                self.constants().name
            )))
        }
    }

    pub fn validate_q(&self, x: &ElementModQ, what: &str) -> Result<()> {
        if self.is_in_bounds_q(x) {
            Ok(())
        } else {
            Err(Error::InvalidGroupElement(format!(
                "{} is not below Q of {}",
                what,
                self.constants().name
            )))
        }
    }

    // Multiplicative group operations.  These trust their operands; the checked forms are
    // `power`, `multiply` and `inverse` below.

    pub fn mult_p(&self, a: &ElementModP, b: &ElementModP) -> ElementModP {
        ElementModP::unchecked(a.as_uint() * b.as_uint() % self.p())
    }

    pub fn mult_p_all<'a>(&self, xs: impl IntoIterator<Item = &'a ElementModP>) -> ElementModP {
        xs.into_iter()
            .fold(self.one_p(), |acc, x| self.mult_p(&acc, x))
    }

    /// Raise `base` to an exponent; exponents live mod `Q` since every element has order `Q`.
    pub fn pow_p(&self, base: &ElementModP, exp: &ElementModQ) -> ElementModP {
        ElementModP::unchecked(base.as_uint().modpow(exp.as_uint(), self.p()))
    }

    pub fn g_pow_p(&self, exp: &ElementModQ) -> ElementModP {
        self.pow_p(self.generator(), exp)
    }

    /// Multiplicative inverse.
    pub fn inv_p(&self, a: &ElementModP) -> ElementModP {
        // https://en.wikipedia.org/wiki/Modular_multiplicative_inverse#Using_Euler's_theorem
        // "In the special case where m is a prime, ϕ(m) = m-1, and a modular inverse is given by
        // a^-1 = a^(m-2) (mod m)."
        ElementModP::unchecked(a.as_uint().modpow(&(self.p() - 2_u8), self.p()))
    }

    pub fn div_p(&self, a: &ElementModP, b: &ElementModP) -> ElementModP {
        self.mult_p(a, &self.inv_p(b))
    }

    pub fn power(&self, base: &ElementModP, exp: &ElementModQ) -> Result<ElementModP> {
        self.validate_p(base, "base")?;
        self.validate_q(exp, "exponent")?;
        Ok(self.pow_p(base, exp))
    }

    pub fn multiply(&self, a: &ElementModP, b: &ElementModP) -> Result<ElementModP> {
        self.validate_p(a, "left operand")?;
        self.validate_p(b, "right operand")?;
        Ok(self.mult_p(a, b))
    }

    pub fn inverse(&self, a: &ElementModP) -> Result<ElementModP> {
        self.validate_p(a, "operand")?;
        Ok(self.inv_p(a))
    }

    // Additive exponent operations, mod `Q`

    pub fn add_q(&self, a: &ElementModQ, b: &ElementModQ) -> ElementModQ {
        ElementModQ::unchecked((a.as_uint() + b.as_uint()) % self.q())
    }

    pub fn sub_q(&self, a: &ElementModQ, b: &ElementModQ) -> ElementModQ {
        // `a + q - b` keeps the intermediate value from going negative.
        ElementModQ::unchecked((a.as_uint() % self.q() + self.q() - b.as_uint() % self.q()) % self.q())
    }

    pub fn mul_q(&self, a: &ElementModQ, b: &ElementModQ) -> ElementModQ {
        ElementModQ::unchecked(a.as_uint() * b.as_uint() % self.q())
    }

    pub fn neg_q(&self, a: &ElementModQ) -> ElementModQ {
        ElementModQ::unchecked((self.q() - a.as_uint() % self.q()) % self.q())
    }

    /// `a + b c mod Q`, the shape of every proof response.
    pub fn a_plus_bc_q(&self, a: &ElementModQ, b: &ElementModQ, c: &ElementModQ) -> ElementModQ {
        ElementModQ::unchecked((a.as_uint() + b.as_uint() * c.as_uint()) % self.q())
    }

    /// Multiplicative inverse mod `Q`.  The inverse of zero is zero.
    pub fn inv_q(&self, a: &ElementModQ) -> ElementModQ {
        ElementModQ::unchecked(a.as_uint().modpow(&(self.q() - 2_u8), self.q()))
    }

    pub fn div_q(&self, a: &ElementModQ, b: &ElementModQ) -> ElementModQ {
        self.mul_q(a, &self.inv_q(b))
    }

    pub fn sum_q<'a>(&self, xs: impl IntoIterator<Item = &'a ElementModQ>) -> ElementModQ {
        xs.into_iter().fold(self.zero_q(), |acc, x| self.add_q(&acc, x))
    }

    // Randomness

    /// A uniformly random exponent in `[0, Q)`.
    pub fn rand_q<R: Rng + ?Sized>(&self, rng: &mut R) -> ElementModQ {
        ElementModQ::unchecked(rng.gen_biguint_below(self.q()))
    }

    /// A uniformly random exponent in `[min, Q)`; used where zero (or a tiny value) is not an
    /// acceptable nonce.
    pub fn rand_range_q<R: Rng + ?Sized>(&self, rng: &mut R, min: u64) -> ElementModQ {
        ElementModQ::unchecked(rng.gen_biguint_range(&BigUint::from(min), self.q()))
    }
}


/// Parse a hex string (which might contain spaces, tabs, or newlines) into a
/// BigUint or panic if it can't be done (this is meant to be used for
/// hard-coded constants)
fn parse_biguint_hex_or_panic(hex: &str) -> BigUint {
    BigUint::from_str_radix(
        &hex.replace(" ", "").replace("\n", "").replace("\t", ""),
        16,
    )
    .expect("Invalid hex input for parse_biguint_hex_or_panic")
}

const TESTING_HEX_P: &str = "80000000 00000000 00000000 00000082 FFFFFFFF FFFFFFFF FFFFFFFF FFFFFEF9";
const TESTING_HEX_Q: &str = "7FFFFFFF FFFFFFFF FFFFFFFF FFFFFFFF";
const TESTING_HEX_R: &str = "1 00000000 00000000 00000000 00000108";
const TESTING_HEX_G: &str = "279F519E 8A2DB10C E1777A5A 415DB566 4C0EDF69 A42B3732 161762D4 E65DFA76";

/// The prime modulus for the 4096-bit group
const PRIME_HEX_4096: &str = "FFFFFFFF FFFFFFFF C90FDAA2 2168C234 C4C6628B 80DC1CD1
     29024E08 8A67CC74 020BBEA6 3B139B22 514A0879 8E3404DD
     EF9519B3 CD3A431B 302B0A6D F25F1437 4FE1356D 6D51C245
     E485B576 625E7EC6 F44C42E9 A637ED6B 0BFF5CB6 F406B7ED
     EE386BFB 5A899FA5 AE9F2411 7C4B1FE6 49286651 ECE45B3D
     C2007CB8 A163BF05 98DA4836 1C55D39A 69163FA8 FD24CF5F
     83655D23 DCA3AD96 1C62F356 208552BB 9ED52907 7096966D
     670C354E 4ABC9804 F1746C08 CA18217C 32905E46 2E36CE3B
     E39E772C 180E8603 9B2783A2 EC07A28F B5C55DF0 6F4C52C9
     DE2BCBF6 95581718 3995497C EA956AE5 15D22618 98FA0510
     15728E5A 8AAAC42D AD33170D 04507A33 A85521AB DF1CBA64
     ECFB8504 58DBEF0A 8AEA7157 5D060C7D B3970F85 A6E1E4C7
     ABF5AE8C DB0933D7 1E8C94E0 4A25619D CEE3D226 1AD2EE6B
     F12FFA06 D98A0864 D8760273 3EC86A64 521F2B18 177B200C
     BBE11757 7A615D6C 770988C0 BAD946E2 08E24FA0 74E5AB31
     43DB5BFC E0FD108E 4B82D120 A9210801 1A723C12 A787E6D7
     88719A10 BDBA5B26 99C32718 6AF4E23C 1A946834 B6150BDA
     2583E9CA 2AD44CE8 DBBBC2DB 04DE8EF9 2E8EFC14 1FBECAA6
     287C5947 4E6BC05D 99B2964F A090C3A2 233BA186 515BE7ED
     1F612970 CEE2D7AF B81BDD76 2170481C D0069127 D5B05AA9
     93B4EA98 8D8FDDC1 86FFB7DC 90A6C08F 4DF435C9 34063199
     FFFFFFFF FFFFFFFF";
