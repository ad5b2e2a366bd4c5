//! Merge-mining proof carried after the header of AuxPow networks.

use bitcoin::block::Header as ParentHeader;
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::hashes::Hash;
use bitcoin::io::{self, BufRead, Write};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::encoding::{decode_list, encode_list};
use crate::error::{EnvelopeError, Result};
use crate::hashes::hash_pair;
use crate::params::FormatDescriptor;
use crate::transaction::Transaction;

/// Marks the chain merkle root inside the parent coinbase script.
pub const MERGED_MINING_HEADER: [u8; 4] = [0xfa, 0xbe, 0x6d, 0x6d];

/// Deepest chain merkle tree a proof may commit to.
pub const MAX_CHAIN_BRANCH_LENGTH: usize = 30;

/// Sibling hashes from a leaf up to a merkle root, with the leaf's position.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct MerkleBranch {
    pub hashes: Vec<[u8; 32]>,
    pub index: u32,
}

impl MerkleBranch {
    /// Folds `leaf` up the branch. Bit `i` of the index says whether the
    /// running hash is the right-hand node at level `i`.
    pub fn evaluate(&self, leaf: [u8; 32]) -> [u8; 32] {
        self.hashes
            .iter()
            .enumerate()
            .fold(leaf, |node, (level, sibling)| {
                if (self.index >> level) & 1 == 1 {
                    hash_pair(*sibling, node)
                } else {
                    hash_pair(node, *sibling)
                }
            })
    }
}

impl Encodable for MerkleBranch {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = encode_list(&self.hashes, w)?;
        len += self.index.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for MerkleBranch {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(MerkleBranch {
            hashes: decode_list(r)?,
            index: u32::consensus_decode(r)?,
        })
    }
}

/// Proof that a block of this chain was committed to by a parent-chain block.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash)]
pub struct AuxPow {
    /// Parent coinbase, always in Bitcoin layout without witness data.
    pub coinbase_tx: Transaction,
    pub parent_hash: [u8; 32],
    /// Links the coinbase to the parent header's merkle root.
    pub coinbase_branch: MerkleBranch,
    /// Links this chain's block hash to the root committed in the coinbase.
    pub chain_branch: MerkleBranch,
    pub parent_header: ParentHeader,
}

impl AuxPow {
    fn coinbase_format() -> FormatDescriptor {
        FormatDescriptor::legacy()
    }

    pub fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize> {
        let mut len = self
            .coinbase_tx
            .consensus_encode_for(&Self::coinbase_format(), w)?;
        len += self.parent_hash.consensus_encode(w)?;
        len += self.coinbase_branch.consensus_encode(w)?;
        len += self.chain_branch.consensus_encode(w)?;
        len += self.parent_header.consensus_encode(w)?;
        Ok(len)
    }

    pub fn consensus_decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Self> {
        let coinbase_tx = Transaction::consensus_decode_for(&Self::coinbase_format(), r)?;
        let parent_hash = <[u8; 32]>::consensus_decode(r)?;
        let coinbase_branch = MerkleBranch::consensus_decode(r)?;
        let chain_branch = MerkleBranch::consensus_decode(r)?;
        let parent_header = ParentHeader::consensus_decode(r)?;
        trace!(
            coinbase_depth = coinbase_branch.hashes.len(),
            chain_depth = chain_branch.hashes.len(),
            "decoded auxpow trailer"
        );
        Ok(AuxPow {
            coinbase_tx,
            parent_hash,
            coinbase_branch,
            chain_branch,
            parent_header,
        })
    }

    /// Root of the chain merkle tree that `aux_block_hash` belongs to.
    pub fn chain_merkle_root(&self, aux_block_hash: [u8; 32]) -> [u8; 32] {
        self.chain_branch.evaluate(aux_block_hash)
    }

    /// True if the coinbase branch leads to the parent header's merkle root.
    pub fn check_coinbase_branch(&self) -> Result<bool> {
        let txid = self.coinbase_tx.txid(&Self::coinbase_format())?;
        Ok(self.coinbase_branch.evaluate(txid) == self.parent_header.merkle_root.to_byte_array())
    }

    /// Slot a chain with `chain_id` must occupy in a chain merkle tree of
    /// depth `height`, given the nonce committed in the coinbase.
    pub fn expected_index(nonce: u32, chain_id: u32, height: usize) -> u32 {
        let mut rand = nonce;
        rand = rand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        rand = rand.wrapping_add(chain_id);
        rand = rand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        if height >= 32 {
            rand
        } else {
            rand % (1u32 << height)
        }
    }

    /// Checks that the parent coinbase commits to `aux_block_hash` for the
    /// chain with `chain_id`, and that the coinbase sits in the parent block.
    pub fn check_commitment(&self, aux_block_hash: [u8; 32], chain_id: u32) -> Result<()> {
        if self.coinbase_branch.index != 0 {
            return Err(EnvelopeError::InvalidEnvelope("auxpow coinbase is not the first transaction"));
        }
        if self.chain_branch.hashes.len() > MAX_CHAIN_BRANCH_LENGTH {
            return Err(EnvelopeError::InvalidEnvelope("auxpow chain merkle branch too long"));
        }
        if self.parent_header.version.to_consensus() as u32 >> 16 == chain_id {
            return Err(EnvelopeError::InvalidEnvelope("auxpow parent has our chain id"));
        }
        if !self.check_coinbase_branch()? {
            return Err(EnvelopeError::InvalidEnvelope("auxpow coinbase merkle branch mismatch"));
        }

        // The script stores the root in display (reversed) order.
        let mut root = self.chain_merkle_root(aux_block_hash);
        root.reverse();

        let script = self
            .coinbase_tx
            .input
            .first()
            .map(|input| input.script_sig.as_bytes())
            .ok_or(EnvelopeError::InvalidEnvelope("auxpow coinbase has no inputs"))?;

        let root_pos = find(script, &root)
            .ok_or(EnvelopeError::InvalidEnvelope("auxpow missing chain merkle root"))?;
        match find(script, &MERGED_MINING_HEADER) {
            Some(header_pos) => {
                if find(&script[header_pos + 1..], &MERGED_MINING_HEADER).is_some() {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "multiple merged mining headers in coinbase",
                    ));
                }
                if header_pos + MERGED_MINING_HEADER.len() != root_pos {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "merged mining header is not just before chain merkle root",
                    ));
                }
            }
            None => {
                if root_pos > 20 {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "auxpow chain merkle root must start in the first 20 bytes",
                    ));
                }
            }
        }

        let tail = &script[root_pos + root.len()..];
        if tail.len() < 8 {
            return Err(EnvelopeError::InvalidEnvelope(
                "auxpow missing chain merkle tree size and nonce",
            ));
        }
        let size = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let depth = self.chain_branch.hashes.len();
        if u64::from(size) != 1u64 << depth {
            return Err(EnvelopeError::InvalidEnvelope("auxpow chain merkle tree size mismatch"));
        }
        let nonce = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]);
        if self.chain_branch.index != Self::expected_index(nonce, chain_id, depth) {
            return Err(EnvelopeError::InvalidEnvelope("auxpow wrong index"));
        }
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
