//! Signature digests over linear transactions.
//!
//! Both digests commit to the proof-of-stake timestamp right after the
//! version when the transaction carries one. Requests that Bitcoin answers
//! with the "SIGHASH_SINGLE bug" value (input index out of range, or SINGLE
//! without a matching output) return [`SIGHASH_ONE`] instead of failing.

use bitcoin::consensus::Encodable;
use bitcoin::{Amount, Script, ScriptBuf, Sequence};
use tracing::trace;

use crate::constants::{
    SIGHASH_ANYONECANPAY, SIGHASH_BASE_MASK, SIGHASH_NONE, SIGHASH_ONE, SIGHASH_SINGLE,
};
use crate::encoding::{encode_bytes, encode_list};
use crate::error::Result;
use crate::hashes::calculate_double_sha256;
use crate::transaction::{Transaction, TxIn, TxOut};

/// Sub-hashes shared by every input's segwit digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SegwitCache {
    prevouts: [u8; 32],
    sequences: [u8; 32],
    outputs: [u8; 32],
}

/// Computes signature digests for one transaction, caching the parts that do
/// not depend on the input being signed.
#[derive(Debug)]
pub struct SighashCache<'a> {
    tx: &'a Transaction,
    segwit: Option<SegwitCache>,
}

impl<'a> SighashCache<'a> {
    pub fn new(tx: &'a Transaction) -> Self {
        SighashCache { tx, segwit: None }
    }

    pub fn transaction(&self) -> &'a Transaction {
        self.tx
    }

    fn segwit_cache(&mut self) -> Result<SegwitCache> {
        if let Some(cache) = self.segwit {
            return Ok(cache);
        }
        let mut prevouts = Vec::with_capacity(self.tx.input.len() * 36);
        let mut sequences = Vec::with_capacity(self.tx.input.len() * 4);
        for input in &self.tx.input {
            input.previous_output.consensus_encode(&mut prevouts)?;
            input.sequence.consensus_encode(&mut sequences)?;
        }
        let mut outputs = Vec::new();
        for output in &self.tx.output {
            output.consensus_encode(&mut outputs)?;
        }
        let cache = SegwitCache {
            prevouts: calculate_double_sha256(&prevouts),
            sequences: calculate_double_sha256(&sequences),
            outputs: calculate_double_sha256(&outputs),
        };
        self.segwit = Some(cache);
        Ok(cache)
    }

    fn write_version<W: bitcoin::io::Write>(&self, w: &mut W) -> Result<()> {
        self.tx.version.consensus_encode(w)?;
        if let Some(timestamp) = self.tx.timestamp {
            timestamp.consensus_encode(w)?;
        }
        Ok(())
    }

    /// BIP143-style digest for `input_index`, spending `value` under
    /// `script_code`.
    pub fn segwit_signature_hash(
        &mut self,
        input_index: usize,
        script_code: &Script,
        value: Amount,
        sighash_type: u32,
    ) -> Result<[u8; 32]> {
        let base_type = sighash_type & SIGHASH_BASE_MASK;
        let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;

        let Some(input) = self.tx.input.get(input_index) else {
            trace!(input_index, "sighash input out of range");
            return Ok(SIGHASH_ONE);
        };
        if base_type == SIGHASH_SINGLE && input_index >= self.tx.output.len() {
            trace!(input_index, "sighash single without matching output");
            return Ok(SIGHASH_ONE);
        }

        let cache = self.segwit_cache()?;
        let zero = [0u8; 32];

        let hash_prevouts = if anyone_can_pay { zero } else { cache.prevouts };
        let hash_sequence =
            if anyone_can_pay || base_type == SIGHASH_SINGLE || base_type == SIGHASH_NONE {
                zero
            } else {
                cache.sequences
            };
        let hash_outputs = if base_type != SIGHASH_SINGLE && base_type != SIGHASH_NONE {
            cache.outputs
        } else if base_type == SIGHASH_SINGLE {
            let mut single = Vec::new();
            self.tx.output[input_index].consensus_encode(&mut single)?;
            calculate_double_sha256(&single)
        } else {
            zero
        };

        let mut preimage = Vec::with_capacity(160 + script_code.len());
        self.write_version(&mut preimage)?;
        preimage.extend_from_slice(&hash_prevouts);
        preimage.extend_from_slice(&hash_sequence);
        input.previous_output.consensus_encode(&mut preimage)?;
        script_code.consensus_encode(&mut preimage)?;
        value.to_sat().consensus_encode(&mut preimage)?;
        input.sequence.consensus_encode(&mut preimage)?;
        preimage.extend_from_slice(&hash_outputs);
        self.tx.lock_time.consensus_encode(&mut preimage)?;
        sighash_type.consensus_encode(&mut preimage)?;

        Ok(calculate_double_sha256(&preimage))
    }

    /// Pre-witness digest: a copy of the transaction with every other input's
    /// script blanked, trimmed according to the sighash type.
    pub fn legacy_signature_hash(
        &self,
        input_index: usize,
        script_code: &Script,
        sighash_type: u32,
    ) -> Result<[u8; 32]> {
        let base_type = sighash_type & SIGHASH_BASE_MASK;
        let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;

        if input_index >= self.tx.input.len() {
            return Ok(SIGHASH_ONE);
        }
        if base_type == SIGHASH_SINGLE && input_index >= self.tx.output.len() {
            return Ok(SIGHASH_ONE);
        }

        let blank_sequences = base_type == SIGHASH_SINGLE || base_type == SIGHASH_NONE;
        let signing_input = |index: usize, input: &TxIn| TxIn {
            previous_output: input.previous_output,
            script_sig: if index == input_index {
                script_code.to_owned()
            } else {
                ScriptBuf::new()
            },
            sequence: if index != input_index && blank_sequences {
                Sequence::ZERO
            } else {
                input.sequence
            },
        };
        let inputs: Vec<TxIn> = if anyone_can_pay {
            vec![signing_input(input_index, &self.tx.input[input_index])]
        } else {
            self.tx
                .input
                .iter()
                .enumerate()
                .map(|(index, input)| signing_input(index, input))
                .collect()
        };

        let outputs: Vec<TxOut> = match base_type {
            SIGHASH_NONE => Vec::new(),
            SIGHASH_SINGLE => self.tx.output[..=input_index]
                .iter()
                .enumerate()
                .map(|(index, output)| {
                    if index == input_index {
                        output.clone()
                    } else {
                        TxOut {
                            value: Amount::from_sat(u64::MAX),
                            script_pubkey: ScriptBuf::new(),
                        }
                    }
                })
                .collect(),
            _ => self.tx.output.clone(),
        };

        let mut preimage = Vec::new();
        self.write_version(&mut preimage)?;
        encode_list(&inputs, &mut preimage)?;
        encode_list(&outputs, &mut preimage)?;
        self.tx.lock_time.consensus_encode(&mut preimage)?;
        if let Some(payload) = &self.tx.extra_payload {
            encode_bytes(payload, &mut preimage)?;
        }
        sighash_type.consensus_encode(&mut preimage)?;

        Ok(calculate_double_sha256(&preimage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SIGHASH_ALL;
    use crate::params::FormatDescriptor;

    // BIP143 native P2WPKH example, unsigned.
    const UNSIGNED_TX: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";

    fn unsigned_tx() -> Transaction {
        let bytes = hex::decode(UNSIGNED_TX).unwrap();
        Transaction::deserialize(&FormatDescriptor::standard(), &bytes).unwrap()
    }

    fn script_code() -> ScriptBuf {
        ScriptBuf::from_bytes(
            hex::decode("76a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac").unwrap(),
        )
    }

    #[test]
    fn test_segwit_sighash_bip143_vector() {
        let tx = unsigned_tx();
        let mut cache = SighashCache::new(&tx);
        let sighash = cache
            .segwit_signature_hash(1, &script_code(), Amount::from_sat(600_000_000), SIGHASH_ALL)
            .unwrap();
        assert_eq!(
            hex::encode(sighash),
            "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
        );
    }

    #[test]
    fn test_segwit_sighash_commits_to_pos_timestamp() {
        let mut tx = unsigned_tx();
        tx.timestamp = Some(1_700_000_000);
        let mut cache = SighashCache::new(&tx);
        let sighash = cache
            .segwit_signature_hash(1, &script_code(), Amount::from_sat(600_000_000), SIGHASH_ALL)
            .unwrap();
        assert_eq!(
            hex::encode(sighash),
            "1fed6c4b7db954a97c301dc0473577d4398a136a7c2d44536a17254563e9ad6e"
        );
    }

    #[test]
    fn test_legacy_sighash_vectors() {
        let tx = unsigned_tx();
        let cache = SighashCache::new(&tx);
        let script = script_code();
        assert_eq!(
            hex::encode(cache.legacy_signature_hash(0, &script, SIGHASH_ALL).unwrap()),
            "47194bc3c303a30aa5f78e45c7c2980b3be1284a9d69b1ea9ec0d29aac5f6848"
        );
        assert_eq!(
            hex::encode(
                cache
                    .legacy_signature_hash(1, &script, SIGHASH_NONE | SIGHASH_ANYONECANPAY)
                    .unwrap()
            ),
            "bd8ca4cb1ab60a8db8451bd58bc068a9abd5ea20a08029b38934c9d50c1d6721"
        );
        assert_eq!(
            hex::encode(cache.legacy_signature_hash(1, &script, SIGHASH_SINGLE).unwrap()),
            "33cd468bd6b82f04bcef180b748c521d6fdee3b11711a2f27b2e465915afaec2"
        );
    }

    #[test]
    fn test_sentinels() {
        let mut tx = unsigned_tx();
        let script = script_code();
        let mut cache = SighashCache::new(&tx);
        assert_eq!(
            cache
                .segwit_signature_hash(2, &script, Amount::ZERO, SIGHASH_ALL)
                .unwrap(),
            SIGHASH_ONE
        );
        assert_eq!(
            cache.legacy_signature_hash(5, &script, SIGHASH_ALL).unwrap(),
            SIGHASH_ONE
        );

        // One output, SINGLE on the second input.
        tx.output.truncate(1);
        let mut cache = SighashCache::new(&tx);
        assert_eq!(
            cache
                .segwit_signature_hash(1, &script, Amount::ZERO, SIGHASH_SINGLE)
                .unwrap(),
            SIGHASH_ONE
        );
        assert_eq!(
            cache.legacy_signature_hash(1, &script, SIGHASH_SINGLE).unwrap(),
            SIGHASH_ONE
        );
        assert_ne!(
            cache.legacy_signature_hash(0, &script, SIGHASH_SINGLE).unwrap(),
            SIGHASH_ONE
        );
        assert_eq!(SIGHASH_ONE[0], 1);
        assert!(SIGHASH_ONE[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_cache_is_reused_across_inputs() {
        let tx = unsigned_tx();
        let mut cache = SighashCache::new(&tx);
        let script = script_code();
        let first = cache
            .segwit_signature_hash(0, &script, Amount::from_sat(1), SIGHASH_ALL)
            .unwrap();
        let cached = cache.segwit;
        let again = cache
            .segwit_signature_hash(0, &script, Amount::from_sat(1), SIGHASH_ALL)
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(cached, cache.segwit);
        assert!(cached.is_some());

        let acp = cache
            .segwit_signature_hash(0, &script, Amount::from_sat(1), SIGHASH_ALL | SIGHASH_ANYONECANPAY)
            .unwrap();
        assert_ne!(first, acp);
    }
}
