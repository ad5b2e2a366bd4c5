//! Network-bound entry points: pick the right envelope codec for a network's
//! format descriptor and proof-of-work hash.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{Block, BlockHeader};
use crate::difficulty::{AnchorBlock, ChainTip};
use crate::dual_tree::DualTreeTransaction;
use crate::error::{EnvelopeError, Result};
use crate::hashes::PowHash;
use crate::params::{FormatDescriptor, NetworkParams, NetworkRegistry};
use crate::transaction::Transaction;

/// A transaction in whichever model the network uses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AnyTransaction {
    Linear(Transaction),
    DualTree(DualTreeTransaction),
}

impl AnyTransaction {
    pub fn as_linear(&self) -> Option<&Transaction> {
        match self {
            AnyTransaction::Linear(tx) => Some(tx),
            AnyTransaction::DualTree(_) => None,
        }
    }

    pub fn as_dual_tree(&self) -> Option<&DualTreeTransaction> {
        match self {
            AnyTransaction::DualTree(tx) => Some(tx),
            AnyTransaction::Linear(_) => None,
        }
    }
}

impl From<Transaction> for AnyTransaction {
    fn from(tx: Transaction) -> Self {
        AnyTransaction::Linear(tx)
    }
}

impl From<DualTreeTransaction> for AnyTransaction {
    fn from(tx: DualTreeTransaction) -> Self {
        AnyTransaction::DualTree(tx)
    }
}

/// Encodes, decodes and hashes envelopes for one network.
#[derive(Clone, Copy)]
pub struct NetworkCodec<'a> {
    params: &'a NetworkParams,
    hasher: Option<&'a dyn PowHash>,
}

impl fmt::Debug for NetworkCodec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCodec")
            .field("network", &self.params.name)
            .field("injected_hasher", &self.hasher.is_some())
            .finish()
    }
}

impl<'a> NetworkCodec<'a> {
    pub fn new(params: &'a NetworkParams) -> Self {
        NetworkCodec {
            params,
            hasher: None,
        }
    }

    pub fn for_network(registry: &'a NetworkRegistry, name: &str) -> Result<Self> {
        Ok(Self::new(registry.get(name)?))
    }

    /// Replaces the network's declared proof-of-work hash, e.g. to supply an
    /// algorithm this crate does not implement.
    pub fn with_hasher(mut self, hasher: &'a dyn PowHash) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn params(&self) -> &'a NetworkParams {
        self.params
    }

    pub fn format(&self) -> &'a FormatDescriptor {
        &self.params.format
    }

    fn hasher(&self) -> &'a dyn PowHash {
        match self.hasher {
            Some(hasher) => hasher,
            None => &self.params.pow_hash,
        }
    }

    fn log_failure<T>(&self, what: &'static str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            debug!(network = %self.params.name, %err, "failed to {}", what);
        }
        result
    }

    pub fn decode_transaction(&self, bytes: &[u8]) -> Result<AnyTransaction> {
        let result = if self.format().is_dual_tree() {
            DualTreeTransaction::deserialize(bytes).map(AnyTransaction::DualTree)
        } else {
            Transaction::deserialize(self.format(), bytes).map(AnyTransaction::Linear)
        };
        self.log_failure("decode transaction", result)
    }

    pub fn encode_transaction(&self, tx: &AnyTransaction) -> Result<Vec<u8>> {
        let result = match (tx, self.format().is_dual_tree()) {
            (AnyTransaction::Linear(tx), false) => tx.serialize(self.format()),
            (AnyTransaction::DualTree(tx), true) => tx.serialize(),
            _ => Err(EnvelopeError::InvalidDescriptor(
                "transaction model does not match the network",
            )),
        };
        self.log_failure("encode transaction", result)
    }

    /// Transaction id: double-SHA256 of the witness-stripped encoding for
    /// linear transactions, the network hash of the prefix for dual-tree ones.
    pub fn transaction_id(&self, tx: &AnyTransaction) -> Result<[u8; 32]> {
        match tx {
            AnyTransaction::Linear(tx) => tx.txid(self.format()),
            AnyTransaction::DualTree(tx) => tx.prefix_hash(self.hasher()),
        }
    }

    pub fn decode_header(&self, bytes: &[u8]) -> Result<BlockHeader> {
        let result = BlockHeader::deserialize(self.format(), bytes);
        self.log_failure("decode header", result)
    }

    pub fn encode_header(&self, header: &BlockHeader) -> Result<Vec<u8>> {
        let result = header.serialize(self.format());
        self.log_failure("encode header", result)
    }

    pub fn decode_block(&self, bytes: &[u8]) -> Result<Block> {
        let result = Block::deserialize(self.format(), bytes);
        self.log_failure("decode block", result)
    }

    pub fn encode_block(&self, block: &Block) -> Result<Vec<u8>> {
        let result = block.serialize(self.format());
        self.log_failure("encode block", result)
    }

    /// Proof-of-work hash of `header` under this network's hash function.
    pub fn header_pow_hash(&self, header: &BlockHeader) -> Result<[u8; 32]> {
        header.pow_hash(self.hasher())
    }

    /// Compact target required after `prev` on networks retargeting with ASERT.
    ///
    /// `Ok(None)` means `prev` lies before the ASERT anchor.
    pub fn next_required_bits(&self, anchor: &AnchorBlock, prev: &ChainTip) -> Result<Option<u32>> {
        let asert = self.format().asert.ok_or(EnvelopeError::InvalidDescriptor(
            "network does not retarget with ASERT",
        ))?;
        Ok(asert.next_required_bits(&self.params.pow_limit(), anchor, prev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::HeaderTrailer;
    use crate::dual_tree::{DualTreeOutPoint, DualTreeTxIn, DualTreeTxOut, SerializationType};
    use crate::hashes::{calculate_double_sha256, HashAlgorithm};
    use hex_literal::hex;

    const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    fn registry() -> NetworkRegistry {
        NetworkRegistry::with_presets().unwrap()
    }

    #[test]
    fn test_linear_transaction_dispatch() {
        let registry = registry();
        let codec = NetworkCodec::for_network(&registry, "bitcoin").unwrap();
        let bytes = hex!("01000008" "00" "01" "00f2052a01000000" "00" "00000000");
        let tx = codec.decode_transaction(&bytes).unwrap();
        let linear = tx.as_linear().unwrap();
        assert_eq!(linear.version, 1);
        assert!(linear.input.is_empty());
        assert_eq!(codec.encode_transaction(&tx).unwrap(), bytes.to_vec());
        assert_eq!(codec.transaction_id(&tx).unwrap(), linear.txid(codec.format()).unwrap());
    }

    #[test]
    fn test_pos_network_uses_timestamp() {
        let registry = registry();
        let codec = NetworkCodec::for_network(&registry, "peercoin").unwrap();
        let mut tx = Transaction::new(1, vec![], vec![], 0);
        tx.timestamp = Some(0x5f5e_1000);
        let bytes = codec.encode_transaction(&tx.clone().into()).unwrap();
        assert_eq!(&bytes[4..8], &0x5f5e_1000u32.to_le_bytes());
        assert_eq!(codec.decode_transaction(&bytes).unwrap(), AnyTransaction::Linear(tx));
    }

    #[test]
    fn test_dual_tree_dispatch() {
        let registry = registry();
        let codec = NetworkCodec::for_network(&registry, "decred-testnet").unwrap();
        let tx = DualTreeTransaction {
            version: 1,
            ser_type: SerializationType::Full,
            inputs: vec![DualTreeTxIn {
                previous_output: DualTreeOutPoint {
                    hash: [0x01; 32],
                    index: 0,
                    tree: 0,
                },
                sequence: u32::MAX,
                value_in: 5,
                block_height: 1,
                block_index: 0,
                signature_script: vec![0x51],
            }],
            outputs: vec![DualTreeTxOut {
                value: 4,
                script_version: 0,
                script: vec![0x51],
            }],
            lock_time: 0,
            expiry: 0,
        };
        let any = AnyTransaction::from(tx.clone());
        let bytes = codec.encode_transaction(&any).unwrap();
        let decoded = codec.decode_transaction(&bytes).unwrap();
        assert_eq!(decoded.as_dual_tree(), Some(&tx));

        // The network hash is declared but not implemented.
        assert!(matches!(
            codec.transaction_id(&decoded),
            Err(EnvelopeError::UnsupportedHash("blake256"))
        ));
        let injected: fn(&[u8]) -> [u8; 32] = calculate_double_sha256;
        let codec = codec.with_hasher(&injected);
        assert_eq!(
            codec.transaction_id(&decoded).unwrap(),
            tx.prefix_hash(&HashAlgorithm::DoubleSha256).unwrap()
        );

        // Linear envelopes are refused on a dual-tree network.
        let linear = AnyTransaction::Linear(Transaction::new(1, vec![], vec![], 0));
        assert!(matches!(
            codec.encode_transaction(&linear),
            Err(EnvelopeError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_header_pow_hash() {
        let registry = registry();
        let bytes = hex::decode(GENESIS_HEADER).unwrap();

        let bitcoin = NetworkCodec::for_network(&registry, "bitcoin").unwrap();
        let header = bitcoin.decode_header(&bytes).unwrap();
        assert_eq!(header.trailer, HeaderTrailer::None);
        assert_eq!(bitcoin.header_pow_hash(&header).unwrap(), header.block_hash().unwrap());
        assert_eq!(bitcoin.encode_header(&header).unwrap(), bytes);

        let dogecoin = NetworkCodec::for_network(&registry, "dogecoin").unwrap();
        assert_eq!(
            dogecoin.header_pow_hash(&header).unwrap(),
            HashAlgorithm::Scrypt.hash(&bytes).unwrap()
        );
        assert_ne!(dogecoin.header_pow_hash(&header).unwrap(), header.block_hash().unwrap());
        fn fake_scrypt(input: &[u8]) -> [u8; 32] {
            let mut out = calculate_double_sha256(input);
            out.reverse();
            out
        }
        let injected: fn(&[u8]) -> [u8; 32] = fake_scrypt;
        let dogecoin = dogecoin.with_hasher(&injected);
        let mut expected = header.block_hash().unwrap();
        expected.reverse();
        assert_eq!(dogecoin.header_pow_hash(&header).unwrap(), expected);
    }

    #[test]
    fn test_block_round_trip() {
        let registry = registry();
        let codec = NetworkCodec::for_network(&registry, "namecoin").unwrap();
        let header = codec.decode_header(&hex::decode(GENESIS_HEADER).unwrap()).unwrap();
        let block = Block {
            header,
            transactions: vec![Transaction::new(1, vec![], vec![], 0)],
        };
        let bytes = codec.encode_block(&block).unwrap();
        assert_eq!(codec.decode_block(&bytes).unwrap(), block);
        assert!(codec.decode_block(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_next_required_bits() {
        let registry = registry();
        let decred = NetworkCodec::for_network(&registry, "decred-testnet").unwrap();
        let anchor = AnchorBlock {
            height: 1,
            bits: 0x1e00ffff,
            parent_timestamp: 1_000_000,
        };
        // Exactly on schedule at the pow limit keeps the target.
        let prev = ChainTip {
            height: 11,
            timestamp: 1_000_000 + 120 * 11,
        };
        assert_eq!(decred.next_required_bits(&anchor, &prev).unwrap(), Some(0x1e00ffff));

        let before = ChainTip {
            height: 0,
            timestamp: 0,
        };
        assert_eq!(decred.next_required_bits(&anchor, &before).unwrap(), None);

        let bitcoin = NetworkCodec::for_network(&registry, "bitcoin").unwrap();
        assert!(matches!(
            bitcoin.next_required_bits(&anchor, &prev),
            Err(EnvelopeError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_unknown_network() {
        let registry = registry();
        assert!(matches!(
            NetworkCodec::for_network(&registry, "nope"),
            Err(EnvelopeError::UnknownNetwork(name)) if name == "nope"
        ));
    }
}
