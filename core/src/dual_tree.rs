//! Decred-style transactions, split into a prefix tree (what is spent and
//! created) and a witness tree (how it is authorised).
//!
//! The serialization type rides in the upper 16 bits of the version word:
//! `0` carries both trees, `1` only the prefix and `2` only the witness.

use bitcoin::consensus::{Decodable, Encodable};
use bitcoin::io::{BufRead, Write};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constants::{
    DUAL_TREE_SER_FULL, DUAL_TREE_SER_NO_WITNESS, DUAL_TREE_SER_ONLY_WITNESS, MAX_PREALLOCATION,
};
use crate::encoding::{decode_count, decode_exact, encode_bytes};
use crate::error::{EnvelopeError, Result};
use crate::hashes::PowHash;

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SerializationType {
    Full,
    NoWitness,
    OnlyWitness,
}

impl SerializationType {
    pub fn to_u16(self) -> u16 {
        match self {
            SerializationType::Full => DUAL_TREE_SER_FULL,
            SerializationType::NoWitness => DUAL_TREE_SER_NO_WITNESS,
            SerializationType::OnlyWitness => DUAL_TREE_SER_ONLY_WITNESS,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            DUAL_TREE_SER_FULL => Some(SerializationType::Full),
            DUAL_TREE_SER_NO_WITNESS => Some(SerializationType::NoWitness),
            DUAL_TREE_SER_ONLY_WITNESS => Some(SerializationType::OnlyWitness),
            _ => None,
        }
    }

    fn has_prefix(self) -> bool {
        self != SerializationType::OnlyWitness
    }

    fn has_witness(self) -> bool {
        self != SerializationType::NoWitness
    }
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct DualTreeOutPoint {
    pub hash: [u8; 32],
    pub index: u32,
    /// Which tree of the funding block the output lives in.
    pub tree: u8,
}

/// An input with both its prefix and its witness fields. Fields of a tree
/// that was not serialized decode as zero.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct DualTreeTxIn {
    pub previous_output: DualTreeOutPoint,
    pub sequence: u32,
    pub value_in: i64,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct DualTreeTxOut {
    pub value: i64,
    pub script_version: u16,
    pub script: Vec<u8>,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct DualTreeTransaction {
    pub version: u16,
    pub ser_type: SerializationType,
    pub inputs: Vec<DualTreeTxIn>,
    pub outputs: Vec<DualTreeTxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl DualTreeTransaction {
    fn encode_prefix<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize> {
        let mut len = bitcoin::VarInt(self.inputs.len() as u64).consensus_encode(w)?;
        for input in &self.inputs {
            len += input.previous_output.hash.consensus_encode(w)?;
            len += input.previous_output.index.consensus_encode(w)?;
            len += input.previous_output.tree.consensus_encode(w)?;
            len += input.sequence.consensus_encode(w)?;
        }
        len += bitcoin::VarInt(self.outputs.len() as u64).consensus_encode(w)?;
        for output in &self.outputs {
            len += output.value.consensus_encode(w)?;
            len += output.script_version.consensus_encode(w)?;
            len += encode_bytes(&output.script, w)?;
        }
        len += self.lock_time.consensus_encode(w)?;
        len += self.expiry.consensus_encode(w)?;
        Ok(len)
    }

    fn encode_witness<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize> {
        let mut len = bitcoin::VarInt(self.inputs.len() as u64).consensus_encode(w)?;
        for input in &self.inputs {
            len += input.value_in.consensus_encode(w)?;
            len += input.block_height.consensus_encode(w)?;
            len += input.block_index.consensus_encode(w)?;
            len += encode_bytes(&input.signature_script, w)?;
        }
        Ok(len)
    }

    /// Encodes the trees selected by `ser_type`, regardless of `self.ser_type`.
    pub fn consensus_encode_as<W: Write + ?Sized>(
        &self,
        ser_type: SerializationType,
        w: &mut W,
    ) -> Result<usize> {
        let version = u32::from(self.version) | (u32::from(ser_type.to_u16()) << 16);
        let mut len = version.consensus_encode(w)?;
        if ser_type.has_prefix() {
            len += self.encode_prefix(w)?;
        }
        if ser_type.has_witness() {
            len += self.encode_witness(w)?;
        }
        Ok(len)
    }

    pub fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize> {
        self.consensus_encode_as(self.ser_type, w)
    }

    pub fn consensus_decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Self> {
        let word = u32::consensus_decode(r)?;
        let version = (word & 0xffff) as u16;
        let ser_type = SerializationType::from_u16((word >> 16) as u16).ok_or(
            EnvelopeError::InvalidEnvelope("unknown dual-tree serialization type"),
        )?;

        let mut tx = DualTreeTransaction {
            version,
            ser_type,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            expiry: 0,
        };

        if ser_type.has_prefix() {
            let count = decode_count(r)?;
            tx.inputs.reserve(count.min(MAX_PREALLOCATION));
            for _ in 0..count {
                let previous_output = DualTreeOutPoint {
                    hash: <[u8; 32]>::consensus_decode(r)?,
                    index: u32::consensus_decode(r)?,
                    tree: u8::consensus_decode(r)?,
                };
                tx.inputs.push(DualTreeTxIn {
                    previous_output,
                    sequence: u32::consensus_decode(r)?,
                    ..Default::default()
                });
            }
            let count = decode_count(r)?;
            tx.outputs.reserve(count.min(MAX_PREALLOCATION));
            for _ in 0..count {
                tx.outputs.push(DualTreeTxOut {
                    value: i64::consensus_decode(r)?,
                    script_version: u16::consensus_decode(r)?,
                    script: Vec::<u8>::consensus_decode(r)?,
                });
            }
            tx.lock_time = u32::consensus_decode(r)?;
            tx.expiry = u32::consensus_decode(r)?;
        }

        if ser_type.has_witness() {
            let count = decode_count(r)?;
            if ser_type == SerializationType::Full && count != tx.inputs.len() {
                return Err(EnvelopeError::WitnessCountMismatch {
                    prefix: tx.inputs.len(),
                    witness: count,
                });
            }
            if ser_type == SerializationType::OnlyWitness {
                tx.inputs.resize(count.min(MAX_PREALLOCATION), DualTreeTxIn::default());
            }
            for index in 0..count {
                if index == tx.inputs.len() {
                    tx.inputs.push(DualTreeTxIn::default());
                }
                let input = &mut tx.inputs[index];
                input.value_in = i64::consensus_decode(r)?;
                input.block_height = u32::consensus_decode(r)?;
                input.block_index = u32::consensus_decode(r)?;
                input.signature_script = Vec::<u8>::consensus_decode(r)?;
            }
        }

        trace!(
            ?ser_type,
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            "decoded dual-tree transaction"
        );
        Ok(tx)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.consensus_encode(&mut buf)?;
        Ok(buf)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        decode_exact(bytes, |r| Self::consensus_decode(r))
    }

    /// Transaction id: the prefix-only serialization through `hasher`.
    pub fn prefix_hash(&self, hasher: &dyn PowHash) -> Result<[u8; 32]> {
        let mut buf = Vec::new();
        self.consensus_encode_as(SerializationType::NoWitness, &mut buf)?;
        hasher.pow_hash(&buf)
    }

    /// Hash of the witness-only serialization through `hasher`.
    pub fn witness_hash(&self, hasher: &dyn PowHash) -> Result<[u8; 32]> {
        let mut buf = Vec::new();
        self.consensus_encode_as(SerializationType::OnlyWitness, &mut buf)?;
        hasher.pow_hash(&buf)
    }
}
