//! Post-quantum primitives
//!
//! CRYSTALS-Dilithium for record signatures, CRYSTALS-Kyber for group key
//! encapsulation. Parameter sets are pinned to level 5 / 1024 because the
//! wire formats carry fixed-width keys, signatures and ciphertexts.

pub mod dilithium;
pub mod kyber;
