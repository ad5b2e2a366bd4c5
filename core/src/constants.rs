// Envelope Constants
// ==================
//
// This module defines the wire-level constant values shared by the envelope
// formats. They are the markers and bit positions the decoder keys off when
// deciding which optional sections follow.

/// Witness bit of the optional-data flag byte
///
/// In an extended (witness-carrying) transaction serialization, an empty input
/// list is followed by a flag byte. Bit 0 of that byte signals that one witness
/// stack per input follows the output list. Any other bit is unknown optional
/// data and fails the decode.
pub const WITNESS_FLAG: u8 = 0x01;

/// No-dummy-input compatibility bit of the transaction version
///
/// A transaction with zero inputs is otherwise ambiguous with the
/// "empty dummy input list + flag byte" witness marker. Encoders set this bit in
/// the serialized version when the transaction has no inputs and at least one
/// output, so decoders know to read the output list directly.
pub const NO_DUMMY_INPUT: u32 = 1 << 27;

/// Version bit announcing an AuxPow (merge-mining) trailer after the header
pub const AUXPOW_VERSION_BIT: u32 = 1 << 8;

/// Type tag of a normal (non-special) transaction
pub const TRANSACTION_NORMAL: u16 = 0;

/// Size of a standard fixed-width block header
pub const BLOCK_HEADER_SIZE: usize = 80;

/// Number of reserved 32-bit words in the Equihash-style extended header
pub const EQUIHASH_RESERVED_WORDS: usize = 7;

/// Upper bound on elements pre-allocated from an untrusted count prefix.
///
/// The count still governs how many records are read; this only caps the
/// up-front `Vec::with_capacity`.
pub const MAX_PREALLOCATION: usize = 1024;

/// Signature hash types
pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Mask selecting the base sighash type (ALL / NONE / SINGLE)
pub const SIGHASH_BASE_MASK: u32 = 0x1f;

/// The value signed when the requested input or output does not exist: the
/// 256-bit integer `1`, little-endian.
pub const SIGHASH_ONE: [u8; 32] = {
    let mut one = [0u8; 32];
    one[0] = 1;
    one
};

/// Serialization types of a dual-tree transaction (upper 16 bits of version)
pub const DUAL_TREE_SER_FULL: u16 = 0;
pub const DUAL_TREE_SER_NO_WITNESS: u16 = 1;
pub const DUAL_TREE_SER_ONLY_WITNESS: u16 = 2;

/// Fixed-point precision (bits) of the ASERT exponent
pub const ASERT_RADIX_BITS: u32 = 16;
