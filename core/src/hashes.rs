// Hash implementations and the per-network proof-of-work hash selector

use borsh::{BorshDeserialize, BorshSerialize};
use groestl::Groestl512;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use sha3::{Keccak256, Sha3_256};

use crate::error::{EnvelopeError, Result};

pub fn calculate_double_sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(input);
    let result = hasher.finalize_reset();
    hasher.update(result);
    hasher.finalize().into()
}

pub fn calculate_sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(input);
    hasher.finalize().into()
}

/// Double-SHA256 of two concatenated nodes, as used by Bitcoin-style merkle trees
pub fn hash_pair(left: [u8; 32], right: [u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(left);
    hasher.update(right);
    let first = hasher.finalize_reset();
    hasher.update(first);
    hasher.finalize().into()
}

/// Scrypt with N=1024, r=1, p=1, using the input as both password and salt
pub fn calculate_scrypt(input: &[u8]) -> Result<[u8; 32]> {
    let params = scrypt::Params::new(10, 1, 1, 32)
        .map_err(|_| EnvelopeError::UnsupportedHash("scrypt"))?;
    let mut out = [0u8; 32];
    scrypt::scrypt(input, input, &params, &mut out)
        .map_err(|_| EnvelopeError::UnsupportedHash("scrypt"))?;
    Ok(out)
}

/// First 32 bytes of Groestl512(Groestl512(input))
pub fn calculate_double_groestl512_trunc(input: &[u8]) -> [u8; 32] {
    let first = Groestl512::digest(input);
    let second = Groestl512::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second[..32]);
    out
}

/// First 32 bytes of SHA512(SHA512(input))
pub fn calculate_double_sha512_trunc(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha512::default();
    hasher.update(input);
    let first = hasher.finalize_reset();
    hasher.update(first);
    let second = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&second[..32]);
    out
}

/// Byte-hashing function a network uses for block-header proof of work.
///
/// The codec only ever calls [`PowHash::pow_hash`]; it never inspects which
/// algorithm sits behind it.
pub trait PowHash {
    fn pow_hash(&self, input: &[u8]) -> Result<[u8; 32]>;
}

/// Plain functions can be injected directly as the hash of a network.
impl PowHash for fn(&[u8]) -> [u8; 32] {
    fn pow_hash(&self, input: &[u8]) -> Result<[u8; 32]> {
        Ok(self(input))
    }
}

/// Hash families observed across the supported networks.
///
/// Several families (the X11/X13/X15 chains, BLAKE-256) are
/// known by name so networks can declare them, but have no implementation:
/// hashing through them fails with [`EnvelopeError::UnsupportedHash`] instead
/// of producing a wrong answer.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    DoubleSha256,
    Sha3_256,
    Keccak256,
    Blake3,
    DoubleSha512Trunc,
    Scrypt,
    Groestl,
    X11,
    X13,
    X15,
    Blake256,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::DoubleSha256 => "double-sha256",
            HashAlgorithm::Sha3_256 => "sha3-256",
            HashAlgorithm::Keccak256 => "keccak-256",
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::DoubleSha512Trunc => "double-sha512-trunc",
            HashAlgorithm::Scrypt => "scrypt",
            HashAlgorithm::Groestl => "groestl",
            HashAlgorithm::X11 => "x11",
            HashAlgorithm::X13 => "x13",
            HashAlgorithm::X15 => "x15",
            HashAlgorithm::Blake256 => "blake256",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            HashAlgorithm::DoubleSha256
                | HashAlgorithm::Sha3_256
                | HashAlgorithm::Keccak256
                | HashAlgorithm::Blake3
                | HashAlgorithm::DoubleSha512Trunc
                | HashAlgorithm::Scrypt
                | HashAlgorithm::Groestl
        )
    }

    pub fn hash(&self, input: &[u8]) -> Result<[u8; 32]> {
        match self {
            HashAlgorithm::DoubleSha256 => Ok(calculate_double_sha256(input)),
            HashAlgorithm::Sha3_256 => Ok(Sha3_256::digest(input).into()),
            HashAlgorithm::Keccak256 => Ok(Keccak256::digest(input).into()),
            HashAlgorithm::Blake3 => Ok(*blake3::hash(input).as_bytes()),
            HashAlgorithm::DoubleSha512Trunc => Ok(calculate_double_sha512_trunc(input)),
            HashAlgorithm::Scrypt => calculate_scrypt(input),
            HashAlgorithm::Groestl => Ok(calculate_double_groestl512_trunc(input)),
            other => Err(EnvelopeError::UnsupportedHash(other.name())),
        }
    }
}

impl PowHash for HashAlgorithm {
    fn pow_hash(&self, input: &[u8]) -> Result<[u8; 32]> {
        self.hash(input)
    }
}
