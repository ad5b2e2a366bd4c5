use bitcoin::consensus::{Decodable, Encodable};
use bitcoin::io::{BufRead, Write};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::auxpow::AuxPow;
use crate::constants::{AUXPOW_VERSION_BIT, BLOCK_HEADER_SIZE, EQUIHASH_RESERVED_WORDS, MAX_PREALLOCATION};
use crate::encoding::{decode_count, decode_exact};
use crate::error::{EnvelopeError, Result};
use crate::hashes::{calculate_double_sha256, hash_pair, PowHash};
use crate::params::{FormatDescriptor, HeaderLayout};
use crate::transaction::Transaction;

/// Extended header fields of Equihash networks.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash)]
pub struct EquihashFields {
    pub height: u32,
    pub reserved: [u32; EQUIHASH_RESERVED_WORDS],
    pub nonce: [u8; 32],
    pub solution: Vec<u8>,
}

/// Everything a header carries beyond the six fixed fields.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash)]
pub enum HeaderTrailer {
    None,
    AuxPow(Box<AuxPow>),
    Equihash(EquihashFields),
}

/// A block header envelope.
///
/// On Equihash networks the 32-bit `nonce` is not on the wire (the 256-bit
/// nonce lives in [`EquihashFields`]) and must stay zero.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_blockhash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub trailer: HeaderTrailer,
}

impl BlockHeader {
    /// Merge-mining chain id, stored in the upper half of the version.
    pub fn chain_id(&self) -> u32 {
        self.version >> 16
    }

    pub fn has_auxpow_flag(&self) -> bool {
        self.version & AUXPOW_VERSION_BIT != 0
    }

    pub fn auxpow(&self) -> Option<&AuxPow> {
        match &self.trailer {
            HeaderTrailer::AuxPow(auxpow) => Some(auxpow),
            _ => None,
        }
    }

    pub fn validate(&self, format: &FormatDescriptor) -> Result<()> {
        format.validate()?;
        match (&self.trailer, format.header_layout) {
            (HeaderTrailer::Equihash(_), HeaderLayout::Equihash) => {
                if self.nonce != 0 {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "equihash headers carry their nonce in the extended fields",
                    ));
                }
                Ok(())
            }
            (_, HeaderLayout::Equihash) => Err(EnvelopeError::InvalidEnvelope(
                "equihash layout needs equihash header fields",
            )),
            (HeaderTrailer::Equihash(_), HeaderLayout::Standard) => Err(
                EnvelopeError::InvalidEnvelope("equihash fields on a standard header layout"),
            ),
            (HeaderTrailer::AuxPow(_), HeaderLayout::Standard) => {
                if !format.is_aux_pow() {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "auxpow trailer on a network without merge mining",
                    ));
                }
                if !self.has_auxpow_flag() {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "auxpow trailer without the auxpow version bit",
                    ));
                }
                Ok(())
            }
            (HeaderTrailer::None, HeaderLayout::Standard) => {
                if format.is_aux_pow() && self.has_auxpow_flag() {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "auxpow version bit without an auxpow trailer",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Writes the part of the header that its block hash commits to.
    fn encode_hashed_fields<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize> {
        let mut len = self.version.consensus_encode(w)?;
        len += self.prev_blockhash.consensus_encode(w)?;
        len += self.merkle_root.consensus_encode(w)?;
        match &self.trailer {
            HeaderTrailer::Equihash(fields) => {
                len += fields.height.consensus_encode(w)?;
                for word in &fields.reserved {
                    len += word.consensus_encode(w)?;
                }
                len += self.time.consensus_encode(w)?;
                len += self.bits.consensus_encode(w)?;
                len += fields.nonce.consensus_encode(w)?;
                len += fields.solution.consensus_encode(w)?;
            }
            _ => {
                len += self.time.consensus_encode(w)?;
                len += self.bits.consensus_encode(w)?;
                len += self.nonce.consensus_encode(w)?;
            }
        }
        Ok(len)
    }

    pub fn consensus_encode_for<W: Write + ?Sized>(
        &self,
        format: &FormatDescriptor,
        w: &mut W,
    ) -> Result<usize> {
        self.validate(format)?;
        let mut len = self.encode_hashed_fields(w)?;
        if let HeaderTrailer::AuxPow(auxpow) = &self.trailer {
            len += auxpow.consensus_encode(w)?;
        }
        Ok(len)
    }

    pub fn consensus_decode_for<R: BufRead + ?Sized>(
        format: &FormatDescriptor,
        r: &mut R,
    ) -> Result<Self> {
        format.validate()?;
        if format.is_dual_tree() {
            return Err(EnvelopeError::InvalidDescriptor(
                "dual-tree networks have no linear header codec",
            ));
        }
        let version = u32::consensus_decode(r)?;
        let prev_blockhash = <[u8; 32]>::consensus_decode(r)?;
        let merkle_root = <[u8; 32]>::consensus_decode(r)?;

        if format.has_equihash_header() {
            let height = u32::consensus_decode(r)?;
            let mut reserved = [0u32; EQUIHASH_RESERVED_WORDS];
            for word in reserved.iter_mut() {
                *word = u32::consensus_decode(r)?;
            }
            let time = u32::consensus_decode(r)?;
            let bits = u32::consensus_decode(r)?;
            let nonce = <[u8; 32]>::consensus_decode(r)?;
            let solution = Vec::<u8>::consensus_decode(r)?;
            trace!(height, solution_len = solution.len(), "decoded equihash header");
            return Ok(BlockHeader {
                version,
                prev_blockhash,
                merkle_root,
                time,
                bits,
                nonce: 0,
                trailer: HeaderTrailer::Equihash(EquihashFields {
                    height,
                    reserved,
                    nonce,
                    solution,
                }),
            });
        }

        let time = u32::consensus_decode(r)?;
        let bits = u32::consensus_decode(r)?;
        let nonce = u32::consensus_decode(r)?;

        let trailer = if format.is_aux_pow() && version & AUXPOW_VERSION_BIT != 0 {
            HeaderTrailer::AuxPow(Box::new(AuxPow::consensus_decode(r)?))
        } else {
            HeaderTrailer::None
        };

        Ok(BlockHeader {
            version,
            prev_blockhash,
            merkle_root,
            time,
            bits,
            nonce,
            trailer,
        })
    }

    pub fn serialize(&self, format: &FormatDescriptor) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE);
        self.consensus_encode_for(format, &mut buf)?;
        Ok(buf)
    }

    pub fn deserialize(format: &FormatDescriptor, bytes: &[u8]) -> Result<Self> {
        decode_exact(bytes, |r| Self::consensus_decode_for(format, r))
    }

    /// Header bytes the block hash commits to; excludes any AuxPow trailer.
    pub fn hashed_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE);
        self.encode_hashed_fields(&mut buf)?;
        Ok(buf)
    }

    /// Block id: double-SHA256 of the hashed header bytes, internal byte order.
    pub fn block_hash(&self) -> Result<[u8; 32]> {
        Ok(calculate_double_sha256(&self.hashed_bytes()?))
    }

    /// Proof-of-work hash through the network's hash function. Merge-mined
    /// headers are checked against the work of their parent header.
    pub fn pow_hash(&self, hasher: &dyn PowHash) -> Result<[u8; 32]> {
        match &self.trailer {
            HeaderTrailer::AuxPow(auxpow) => {
                hasher.pow_hash(&bitcoin::consensus::serialize(&auxpow.parent_header))
            }
            _ => hasher.pow_hash(&self.hashed_bytes()?),
        }
    }
}

/// A block envelope: a header followed by its transactions.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    pub fn consensus_encode_for<W: Write + ?Sized>(
        &self,
        format: &FormatDescriptor,
        w: &mut W,
    ) -> Result<usize> {
        let mut len = self.header.consensus_encode_for(format, w)?;
        len += bitcoin::VarInt(self.transactions.len() as u64).consensus_encode(w)?;
        for tx in &self.transactions {
            len += tx.consensus_encode_for(format, w)?;
        }
        Ok(len)
    }

    pub fn consensus_decode_for<R: BufRead + ?Sized>(
        format: &FormatDescriptor,
        r: &mut R,
    ) -> Result<Self> {
        let header = BlockHeader::consensus_decode_for(format, r)?;
        let count = decode_count(r)?;
        let mut transactions = Vec::with_capacity(count.min(MAX_PREALLOCATION));
        for _ in 0..count {
            transactions.push(Transaction::consensus_decode_for(format, r)?);
        }
        trace!(count, "decoded block transactions");
        Ok(Block {
            header,
            transactions,
        })
    }

    pub fn serialize(&self, format: &FormatDescriptor) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.consensus_encode_for(format, &mut buf)?;
        Ok(buf)
    }

    pub fn deserialize(format: &FormatDescriptor, bytes: &[u8]) -> Result<Self> {
        decode_exact(bytes, |r| Self::consensus_decode_for(format, r))
    }

    /// Merkle root over the transaction ids, duplicating the last node of
    /// odd-length levels.
    pub fn compute_merkle_root(&self, format: &FormatDescriptor) -> Result<Option<[u8; 32]>> {
        let mut level = self
            .transactions
            .iter()
            .map(|tx| tx.txid(format))
            .collect::<Result<Vec<_>>>()?;
        if level.is_empty() {
            return Ok(None);
        }
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| hash_pair(pair[0], *pair.get(1).unwrap_or(&pair[0])))
                .collect();
        }
        Ok(level.first().copied())
    }

    pub fn check_merkle_root(&self, format: &FormatDescriptor) -> Result<bool> {
        Ok(self.compute_merkle_root(format)? == Some(self.header.merkle_root))
    }

    fn base_size(&self, format: &FormatDescriptor) -> Result<usize> {
        let mut size = self.header.serialize(format)?.len();
        size += bitcoin::VarInt(self.transactions.len() as u64).size();
        for tx in &self.transactions {
            size += tx.base_size(format)?;
        }
        Ok(size)
    }

    pub fn total_size(&self, format: &FormatDescriptor) -> Result<usize> {
        Ok(self.serialize(format)?.len())
    }

    pub fn weight(&self, format: &FormatDescriptor) -> Result<u64> {
        Ok((self.base_size(format)? * 3 + self.total_size(format)?) as u64)
    }
}
