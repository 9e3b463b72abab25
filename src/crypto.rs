//! The cryptographic building blocks: group arithmetic, hashing, ElGamal and the proofs built
//! on top of them.  Everything here is pure computation over immutable inputs.

pub mod chaum_pedersen;
pub mod elgamal;
pub mod group;
pub mod hash;
pub mod hashed_elgamal;
pub mod nonce;
pub mod schnorr;
