//! Binary envelope codec for Bitcoin-derived networks.
//!
//! One codec covers the wire variations of the supported chains: witness
//! flags with the dummy-input marker, proof-of-stake timestamps, special
//! transaction payloads, merge-mining (AuxPow) header trailers, Equihash
//! headers and Decred-style dual-tree transactions. Which sections exist is
//! decided by a network's [`FormatDescriptor`]; [`NetworkCodec`] binds a
//! descriptor and a proof-of-work hash from a [`NetworkRegistry`].

pub mod auxpow;
pub mod block;
pub mod codec;
pub mod constants;
pub mod difficulty;
pub mod dual_tree;
pub mod encoding;
pub mod error;
pub mod hashes;
pub mod params;
pub mod sighash;
pub mod transaction;

pub use block::{Block, BlockHeader, HeaderTrailer};
pub use codec::{AnyTransaction, NetworkCodec};
pub use dual_tree::DualTreeTransaction;
pub use error::{EnvelopeError, Result};
pub use hashes::{HashAlgorithm, PowHash};
pub use params::{FormatDescriptor, FormatKind, NetworkParams, NetworkRegistry, VersionWidth};
pub use transaction::{Transaction, TxIn, TxOut};
