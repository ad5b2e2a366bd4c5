use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::hashes::Hash;
use bitcoin::io::{self, BufRead, Write};
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Witness};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constants::{NO_DUMMY_INPUT, TRANSACTION_NORMAL, WITNESS_FLAG};
use crate::encoding::{decode_count, decode_exact, decode_list, encode_bytes, encode_list, read_payload};
use crate::error::{EnvelopeError, Result};
use crate::hashes::calculate_double_sha256;
use crate::params::{FormatDescriptor, VersionWidth};

/// A transaction input: the outpoint it spends, its signature script and its
/// sequence number.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: ScriptBuf,
    pub sequence: Sequence,
}

impl TxIn {
    pub fn new(previous_output: OutPoint, script_sig: ScriptBuf) -> Self {
        TxIn {
            previous_output,
            script_sig,
            sequence: Sequence::MAX,
        }
    }
}

impl Encodable for TxIn {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.previous_output.consensus_encode(w)?;
        len += self.script_sig.consensus_encode(w)?;
        len += self.sequence.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for TxIn {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(TxIn {
            previous_output: OutPoint::consensus_decode(r)?,
            script_sig: ScriptBuf::consensus_decode(r)?,
            sequence: Sequence::consensus_decode(r)?,
        })
    }
}

/// A transaction output: an amount and the script that spends it.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
}

impl Encodable for TxOut {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.value.to_sat().consensus_encode(w)?;
        len += self.script_pubkey.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for TxOut {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(TxOut {
            value: Amount::from_sat(u64::consensus_decode(r)?),
            script_pubkey: ScriptBuf::consensus_decode(r)?,
        })
    }
}

/// A linear (single-tree) transaction envelope.
///
/// The same value encodes differently depending on the network's
/// [`FormatDescriptor`]: the timestamp only exists on proof-of-stake formats,
/// the witness section only on witness-capable formats and the extra payload
/// only on special-payload formats with a non-zero type tag.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Hash)]
pub struct Transaction {
    /// Low 16 bits: version. High 16 bits: special-transaction type tag.
    pub version: u32,
    /// Proof-of-stake inclusion time.
    pub timestamp: Option<u32>,
    pub input: Vec<TxIn>,
    pub output: Vec<TxOut>,
    /// One witness stack per input.
    pub witness: Option<Vec<Witness>>,
    pub lock_time: u32,
    pub extra_payload: Option<Vec<u8>>,
}

impl Transaction {
    pub fn new(version: u32, input: Vec<TxIn>, output: Vec<TxOut>, lock_time: u32) -> Self {
        Transaction {
            version,
            timestamp: None,
            input,
            output,
            witness: None,
            lock_time,
            extra_payload: None,
        }
    }

    /// Special-transaction type tag carried in the upper half of the version.
    pub fn tx_type(&self) -> u16 {
        (self.version >> 16) as u16
    }

    /// The version without the type tag.
    pub fn base_version(&self) -> u16 {
        (self.version & 0xffff) as u16
    }

    /// True if at least one witness stack is non-empty.
    pub fn has_witness(&self) -> bool {
        self.witness
            .iter()
            .flatten()
            .any(|stack| !stack.is_empty())
    }

    pub fn is_coinbase(&self) -> bool {
        self.input.len() == 1 && self.input[0].previous_output.is_null()
    }

    /// Checks the envelope against the invariants of `format` before encoding.
    pub fn validate(&self, format: &FormatDescriptor) -> Result<()> {
        format.validate()?;
        if format.is_dual_tree() {
            return Err(EnvelopeError::InvalidDescriptor(
                "dual-tree networks use the dual-tree transaction codec",
            ));
        }
        if let Some(witness) = &self.witness {
            if witness.len() != self.input.len() {
                return Err(EnvelopeError::InvalidEnvelope(
                    "witness stack count differs from input count",
                ));
            }
            if witness.iter().all(|stack| stack.is_empty()) {
                return Err(EnvelopeError::InvalidEnvelope(
                    "witness section present but every stack is empty",
                ));
            }
        }
        if self.timestamp.is_some() != format.has_pos_timestamp() {
            return Err(EnvelopeError::InvalidEnvelope(
                "timestamp presence does not match the format",
            ));
        }
        if format.version_width == VersionWidth::Bits16
            && !format.allows_special_payload()
            && self.version > u32::from(u16::MAX)
        {
            return Err(EnvelopeError::InvalidEnvelope(
                "version does not fit a 16-bit version field",
            ));
        }
        if format.allows_witness && self.input.is_empty() && self.version & NO_DUMMY_INPUT != 0 {
            return Err(EnvelopeError::InvalidEnvelope(
                "no-dummy-input bit is reserved for the serialization",
            ));
        }
        if format.allows_special_payload() {
            match (self.tx_type() != TRANSACTION_NORMAL, self.extra_payload.is_some()) {
                (false, true) => {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "extra payload on a normal transaction",
                    ))
                }
                (true, false) => {
                    return Err(EnvelopeError::InvalidEnvelope(
                        "special transaction without extra payload",
                    ))
                }
                _ => {}
            }
        } else if self.extra_payload.is_some() {
            return Err(EnvelopeError::InvalidEnvelope(
                "format does not allow extra payloads",
            ));
        }
        Ok(())
    }

    /// Encodes the transaction for `format`, optionally leaving out the witness
    /// section (as for transaction ids and legacy peers).
    pub fn consensus_encode_with<W: Write + ?Sized>(
        &self,
        format: &FormatDescriptor,
        include_witness: bool,
        w: &mut W,
    ) -> Result<usize> {
        self.validate(format)?;

        let witness_allowed = format.allows_witness;
        let mut version = self.version;
        if witness_allowed && self.input.is_empty() && !self.output.is_empty() {
            version |= NO_DUMMY_INPUT;
        }

        let mut len = match format.version_width {
            VersionWidth::Bits32 => version.consensus_encode(w)?,
            VersionWidth::Bits16 => {
                let mut len = ((version & 0xffff) as u16).consensus_encode(w)?;
                if format.allows_special_payload() {
                    len += ((version >> 16) as u16).consensus_encode(w)?;
                }
                len
            }
        };

        if let Some(timestamp) = self.timestamp {
            len += timestamp.consensus_encode(w)?;
        }

        let mut flags = 0u8;
        if witness_allowed && include_witness && self.has_witness() {
            flags |= WITNESS_FLAG;
        }

        if flags != 0 {
            // Empty dummy input list followed by the flags.
            len += VarInt(0).consensus_encode(w)?;
            len += flags.consensus_encode(w)?;
        }
        len += encode_list(&self.input, w)?;
        len += encode_list(&self.output, w)?;

        if flags & WITNESS_FLAG != 0 {
            for stack in self.witness.iter().flatten() {
                len += stack.consensus_encode(w)?;
            }
        }

        len += self.lock_time.consensus_encode(w)?;

        if format.allows_special_payload() && self.tx_type() != TRANSACTION_NORMAL {
            if let Some(payload) = &self.extra_payload {
                len += encode_bytes(payload, w)?;
            }
        }

        Ok(len)
    }

    /// Encodes the transaction with its witness section.
    pub fn consensus_encode_for<W: Write + ?Sized>(
        &self,
        format: &FormatDescriptor,
        w: &mut W,
    ) -> Result<usize> {
        self.consensus_encode_with(format, true, w)
    }

    /// Decodes a transaction laid out for `format`.
    pub fn consensus_decode_for<R: BufRead + ?Sized>(
        format: &FormatDescriptor,
        r: &mut R,
    ) -> Result<Self> {
        format.validate()?;
        if format.is_dual_tree() {
            return Err(EnvelopeError::InvalidDescriptor(
                "dual-tree networks use the dual-tree transaction codec",
            ));
        }

        let mut version = match format.version_width {
            VersionWidth::Bits32 => u32::consensus_decode(r)?,
            VersionWidth::Bits16 => {
                let base = u32::from(u16::consensus_decode(r)?);
                if format.allows_special_payload() {
                    base | (u32::from(u16::consensus_decode(r)?) << 16)
                } else {
                    base
                }
            }
        };

        let timestamp = if format.has_pos_timestamp() {
            Some(u32::consensus_decode(r)?)
        } else {
            None
        };

        // An empty list here is either a real empty input list or the dummy
        // in front of the flag byte.
        let mut input: Vec<TxIn> = decode_list(r)?;
        let mut flags = 0u8;
        let output: Vec<TxOut>;

        let has_no_dummy = version & NO_DUMMY_INPUT != 0 && input.is_empty();
        if format.allows_witness && has_no_dummy {
            version &= !NO_DUMMY_INPUT;
            output = decode_list(r)?;
        } else if input.is_empty() && format.allows_witness {
            flags = u8::consensus_decode(r)?;
            if flags != 0 {
                input = decode_list(r)?;
                output = decode_list(r)?;
            } else {
                // The byte was the (empty) output count.
                output = Vec::new();
            }
        } else {
            output = decode_list(r)?;
        }
        trace!(inputs = input.len(), outputs = output.len(), flags, "decoded transaction lists");

        let mut witness = None;
        if flags & WITNESS_FLAG != 0 && format.allows_witness {
            flags ^= WITNESS_FLAG;
            let mut stacks = Vec::with_capacity(input.len());
            for _ in 0..input.len() {
                stacks.push(Witness::consensus_decode(r)?);
            }
            if stacks.iter().all(|stack| stack.is_empty()) {
                return Err(EnvelopeError::SuperfluousWitness);
            }
            witness = Some(stacks);
        }
        if flags != 0 {
            return Err(EnvelopeError::UnknownOptionalData(flags));
        }

        let lock_time = u32::consensus_decode(r)?;

        let tx_type = (version >> 16) as u16;
        let extra_payload = if format.allows_special_payload() && tx_type != TRANSACTION_NORMAL {
            let declared = decode_count(r)?;
            let payload = read_payload(r, declared)?;
            trace!(tx_type, len = payload.len(), "decoded extra payload");
            Some(payload)
        } else {
            None
        };

        Ok(Transaction {
            version,
            timestamp,
            input,
            output,
            witness,
            lock_time,
            extra_payload,
        })
    }

    pub fn serialize(&self, format: &FormatDescriptor) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.consensus_encode_for(format, &mut buf)?;
        Ok(buf)
    }

    /// Decodes a transaction that must span all of `bytes`.
    pub fn deserialize(format: &FormatDescriptor, bytes: &[u8]) -> Result<Self> {
        decode_exact(bytes, |r| Self::consensus_decode_for(format, r))
    }

    /// Decodes the extra payload as `T`, requiring that `T` consumes it whole.
    pub fn parse_payload<T: Decodable>(&self) -> Result<T> {
        let payload = self.extra_payload.as_deref().ok_or(EnvelopeError::InvalidEnvelope(
            "transaction has no extra payload",
        ))?;
        let mut cursor = payload;
        let value = T::consensus_decode(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(EnvelopeError::PayloadOverrun {
                declared: payload.len() - cursor.len(),
                available: payload.len(),
            });
        }
        Ok(value)
    }

    /// Returns the transaction id, in internal byte order.
    pub fn txid(&self, format: &FormatDescriptor) -> Result<[u8; 32]> {
        let mut buf = Vec::new();
        self.consensus_encode_with(format, false, &mut buf)?;
        Ok(calculate_double_sha256(&buf))
    }

    /// Returns the witness-transaction id, in internal byte order.
    pub fn wtxid(&self, format: &FormatDescriptor) -> Result<[u8; 32]> {
        Ok(calculate_double_sha256(&self.serialize(format)?))
    }

    /// Size without the witness section.
    pub fn base_size(&self, format: &FormatDescriptor) -> Result<usize> {
        let mut buf = Vec::new();
        self.consensus_encode_with(format, false, &mut buf)
    }

    pub fn total_size(&self, format: &FormatDescriptor) -> Result<usize> {
        let mut buf = Vec::new();
        self.consensus_encode_with(format, true, &mut buf)
    }

    /// BIP-141 weight: base size counted four times, witness bytes once.
    pub fn weight(&self, format: &FormatDescriptor) -> Result<u64> {
        Ok((self.base_size(format)? * 3 + self.total_size(format)?) as u64)
    }
}

impl From<bitcoin::Transaction> for Transaction {
    fn from(tx: bitcoin::Transaction) -> Self {
        let witness: Vec<Witness> = tx.input.iter().map(|txin| txin.witness.clone()).collect();
        let has_witness = witness.iter().any(|stack| !stack.is_empty());
        Transaction {
            version: tx.version.0 as u32,
            timestamp: None,
            input: tx
                .input
                .into_iter()
                .map(|txin| TxIn {
                    previous_output: txin.previous_output,
                    script_sig: txin.script_sig,
                    sequence: txin.sequence,
                })
                .collect(),
            output: tx
                .output
                .into_iter()
                .map(|txout| TxOut {
                    value: txout.value,
                    script_pubkey: txout.script_pubkey,
                })
                .collect(),
            witness: has_witness.then_some(witness),
            lock_time: tx.lock_time.to_consensus_u32(),
            extra_payload: None,
        }
    }
}

/// Compact storage form, independent of any network's wire format.
impl BorshSerialize for Transaction {
    #[inline]
    fn serialize<W: borsh::io::Write>(&self, writer: &mut W) -> borsh::io::Result<()> {
        BorshSerialize::serialize(&self.version, writer)?;
        BorshSerialize::serialize(&self.timestamp, writer)?;
        BorshSerialize::serialize(&self.lock_time, writer)?;
        BorshSerialize::serialize(&(self.input.len() as u32), writer)?;
        for input in &self.input {
            serialize_txin(input, writer)?;
        }
        BorshSerialize::serialize(&(self.output.len() as u32), writer)?;
        for output in &self.output {
            serialize_txout(output, writer)?;
        }
        let witness: Option<Vec<Vec<Vec<u8>>>> = self
            .witness
            .as_ref()
            .map(|stacks| stacks.iter().map(|stack| stack.to_vec()).collect());
        BorshSerialize::serialize(&witness, writer)?;
        BorshSerialize::serialize(&self.extra_payload, writer)
    }
}

impl BorshDeserialize for Transaction {
    #[inline]
    fn deserialize_reader<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<Self> {
        let version = u32::deserialize_reader(reader)?;
        let timestamp = Option::<u32>::deserialize_reader(reader)?;
        let lock_time = u32::deserialize_reader(reader)?;
        let input_len = u32::deserialize_reader(reader)? as usize;
        let mut input = Vec::with_capacity(input_len.min(crate::constants::MAX_PREALLOCATION));
        for _ in 0..input_len {
            input.push(deserialize_txin(reader)?);
        }
        let output_len = u32::deserialize_reader(reader)? as usize;
        let mut output = Vec::with_capacity(output_len.min(crate::constants::MAX_PREALLOCATION));
        for _ in 0..output_len {
            output.push(deserialize_txout(reader)?);
        }
        let witness = Option::<Vec<Vec<Vec<u8>>>>::deserialize_reader(reader)?
            .map(|stacks| stacks.into_iter().map(Witness::from).collect());
        let extra_payload = Option::<Vec<u8>>::deserialize_reader(reader)?;

        Ok(Transaction {
            version,
            timestamp,
            input,
            output,
            witness,
            lock_time,
            extra_payload,
        })
    }
}

fn serialize_txin<W: borsh::io::Write>(txin: &TxIn, writer: &mut W) -> borsh::io::Result<()> {
    BorshSerialize::serialize(&txin.previous_output.txid.to_byte_array(), writer)?;
    BorshSerialize::serialize(&txin.previous_output.vout, writer)?;
    BorshSerialize::serialize(&txin.script_sig.as_bytes(), writer)?;
    BorshSerialize::serialize(&txin.sequence.0, writer)
}

fn deserialize_txin<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<TxIn> {
    let txid = bitcoin::Txid::from_byte_array(<[u8; 32]>::deserialize_reader(reader)?);
    let vout = u32::deserialize_reader(reader)?;
    let script_sig = ScriptBuf::from_bytes(Vec::<u8>::deserialize_reader(reader)?);
    let sequence = Sequence(u32::deserialize_reader(reader)?);

    Ok(TxIn {
        previous_output: OutPoint { txid, vout },
        script_sig,
        sequence,
    })
}

fn serialize_txout<W: borsh::io::Write>(txout: &TxOut, writer: &mut W) -> borsh::io::Result<()> {
    BorshSerialize::serialize(&txout.value.to_sat(), writer)?;
    BorshSerialize::serialize(&txout.script_pubkey.as_bytes(), writer)
}

fn deserialize_txout<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<TxOut> {
    let value = Amount::from_sat(u64::deserialize_reader(reader)?);
    let script_pubkey = ScriptBuf::from_bytes(Vec::<u8>::deserialize_reader(reader)?);

    Ok(TxOut {
        value,
        script_pubkey,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const LEGACY_TX: &str = "0100000001c997a5e56e104102fa209c6a852dd90660a20b2d9c352423edce25857fcd3704000000004847304402204e45e16932b8af514961a1d3a1a25fdf3f4f7732e9d624c6c61548ab5fb8cd410220181522ec8eca07de4860a4acdd12909d831cc56cbbac4622082221a8768d1d0901ffffffff0200ca9a3b00000000434104ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84cac00286bee0000000043410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac00000000";

    const SEGWIT_TX: &str = "0100000000010142ec43062180882d239799f134f7d8e9d104f37d87643e35fda84c47e4fc67a00000000000ffffffff026734000000000000225120e86c9c8c6777f28af40ef0c4cbd8308d27b60c7adf4f668d2433113616ddaa33cf660000000000001976a9149893ea81967d770f07f9bf0f659e3bce155be99a88ac01418a3d2a2182154dfd083cf48bfcd9f7dfb9d09eb46515e0043cdf39b688e9e711a2ce47f0f535191368be52fd706d77eb82eacd293a6a881491cdadf99b1df4400100000000";

    fn sample_input(seed: u8) -> TxIn {
        TxIn {
            previous_output: OutPoint {
                txid: bitcoin::Txid::from_byte_array([seed; 32]),
                vout: seed as u32,
            },
            script_sig: ScriptBuf::from_bytes(vec![0x51, seed]),
            sequence: Sequence(0xffff_fffe),
        }
    }

    fn sample_output(value: u64) -> TxOut {
        TxOut {
            value: Amount::from_sat(value),
            script_pubkey: ScriptBuf::from_bytes(vec![0x76, 0xa9, 0x14]),
        }
    }

    fn round_trip(format: &FormatDescriptor, tx: &Transaction) -> Transaction {
        let bytes = tx.serialize(format).unwrap();
        Transaction::deserialize(format, &bytes).unwrap()
    }

    #[test]
    fn test_txid_legacy() {
        let bytes = hex::decode(LEGACY_TX).unwrap();
        let format = FormatDescriptor::standard();
        let tx = Transaction::deserialize(&format, &bytes).unwrap();
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 2);
        assert!(tx.witness.is_none());
        let mut txid = tx.txid(&format).unwrap();
        txid.reverse();
        assert_eq!(
            hex::encode(txid),
            "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16"
        );
        assert_eq!(tx.serialize(&format).unwrap(), bytes);
    }

    #[test]
    fn test_txid_segwit() {
        let bytes = hex::decode(SEGWIT_TX).unwrap();
        let format = FormatDescriptor::standard();
        let tx = Transaction::deserialize(&format, &bytes).unwrap();
        assert!(tx.has_witness());
        assert_eq!(tx.witness.as_ref().unwrap().len(), 1);
        let mut txid = tx.txid(&format).unwrap();
        txid.reverse();
        assert_eq!(
            hex::encode(txid),
            "a6a150fcdbabaf26040f4dea78ff53d794da2807d8600ead4758b065c5339324"
        );
        assert_eq!(tx.serialize(&format).unwrap(), bytes);
    }

    #[test]
    fn test_wtxid_matches_bitcoin() {
        let bytes = hex::decode(SEGWIT_TX).unwrap();
        let reference: bitcoin::Transaction = bitcoin::consensus::deserialize(&bytes).unwrap();
        let format = FormatDescriptor::standard();
        let tx = Transaction::from(reference.clone());
        assert_eq!(
            tx.wtxid(&format).unwrap(),
            reference.compute_wtxid().to_byte_array()
        );
        assert_eq!(
            tx.txid(&format).unwrap(),
            reference.compute_txid().to_byte_array()
        );
        assert_eq!(tx.weight(&format).unwrap(), reference.weight().to_wu());
    }

    #[test]
    fn test_legacy_format_rejects_segwit_bytes() {
        // Without witness support the marker byte reads as an empty input list
        // and the flag byte as a one-element output list.
        let bytes = hex::decode(SEGWIT_TX).unwrap();
        assert!(Transaction::deserialize(&FormatDescriptor::legacy(), &bytes).is_err());
    }

    #[test]
    fn test_no_dummy_input_layout() {
        let format = FormatDescriptor::standard();
        let tx = Transaction::new(
            1,
            vec![],
            vec![TxOut {
                value: Amount::from_sat(5_000_000_000),
                script_pubkey: ScriptBuf::new(),
            }],
            0,
        );
        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(bytes, hex!("01000008" "00" "01" "00f2052a01000000" "00" "00000000"));

        let decoded = Transaction::deserialize(&format, &bytes).unwrap();
        assert_eq!(decoded.version, 1);
        assert!(decoded.input.is_empty());
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_no_dummy_bit_not_used_without_witness_support() {
        let format = FormatDescriptor::legacy();
        let tx = Transaction::new(1, vec![], vec![sample_output(1)], 0);
        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(&bytes[..4], &hex!("01000000"));
        assert_eq!(round_trip(&format, &tx), tx);
    }

    #[test]
    fn test_empty_transaction_round_trip() {
        let format = FormatDescriptor::standard();
        let tx = Transaction::new(2, vec![], vec![], 0);
        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(bytes, hex!("02000000" "00" "00" "00000000"));
        assert_eq!(round_trip(&format, &tx), tx);
    }

    #[test]
    fn test_witness_round_trip() {
        let format = FormatDescriptor::standard();
        let mut tx = Transaction::new(
            2,
            vec![sample_input(1), sample_input(2)],
            vec![sample_output(1000), sample_output(2000)],
            500_000,
        );
        tx.witness = Some(vec![
            Witness::from_slice(&[vec![0x30, 0x44], vec![0x02; 33]]),
            Witness::new(),
        ]);
        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(&bytes[4..6], &[0x00, WITNESS_FLAG]);
        assert_eq!(round_trip(&format, &tx), tx);
        assert!(tx.total_size(&format).unwrap() > tx.base_size(&format).unwrap());
    }

    #[test]
    fn test_witness_omitted_for_legacy_format() {
        let mut tx = Transaction::new(1, vec![sample_input(7)], vec![sample_output(99)], 0);
        tx.witness = Some(vec![Witness::from_slice(&[vec![0xab]])]);

        let legacy = FormatDescriptor::legacy();
        let decoded = round_trip(&legacy, &tx);
        assert_eq!(decoded.input, tx.input);
        assert_eq!(decoded.output, tx.output);
        assert_eq!(decoded.lock_time, tx.lock_time);
        assert!(decoded.witness.is_none());
        assert_eq!(
            tx.serialize(&legacy).unwrap(),
            Transaction {
                witness: None,
                ..tx.clone()
            }
            .serialize(&legacy)
            .unwrap()
        );
    }

    #[test]
    fn test_all_empty_witness_is_superfluous() {
        let bytes = hex!(
            "01000000" "00" "01"
            "01" "1111111111111111111111111111111111111111111111111111111111111111" "00000000" "00" "ffffffff"
            "01" "0100000000000000" "00"
            "00"
            "00000000"
        );
        assert!(matches!(
            Transaction::deserialize(&FormatDescriptor::standard(), &bytes),
            Err(EnvelopeError::SuperfluousWitness)
        ));
    }

    #[test]
    fn test_unknown_flag_bits() {
        let bytes = hex!(
            "01000000" "00" "03"
            "01" "1111111111111111111111111111111111111111111111111111111111111111" "00000000" "00" "ffffffff"
            "01" "0100000000000000" "00"
            "01" "01" "aa"
            "00000000"
        );
        assert!(matches!(
            Transaction::deserialize(&FormatDescriptor::standard(), &bytes),
            Err(EnvelopeError::UnknownOptionalData(0x02))
        ));
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        let bytes = hex::decode(LEGACY_TX).unwrap();
        let err = Transaction::deserialize(&FormatDescriptor::standard(), &bytes[..bytes.len() - 10])
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedLength(_)));
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = hex::decode(LEGACY_TX).unwrap();
        bytes.push(0);
        assert!(matches!(
            Transaction::deserialize(&FormatDescriptor::standard(), &bytes),
            Err(EnvelopeError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_pos_timestamp_round_trip() {
        let format = FormatDescriptor::pos_timestamped(true);
        let mut tx = Transaction::new(1, vec![sample_input(3)], vec![sample_output(10)], 0);
        tx.timestamp = Some(1_700_000_000);
        tx.witness = Some(vec![Witness::from_slice(&[vec![0x01, 0x02]])]);
        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(&bytes[4..8], &1_700_000_000u32.to_le_bytes());
        assert_eq!(&bytes[8..10], &[0x00, WITNESS_FLAG]);
        assert_eq!(round_trip(&format, &tx), tx);

        // Timestamp presence must match the format.
        let standard = FormatDescriptor::standard();
        assert!(matches!(
            tx.serialize(&standard),
            Err(EnvelopeError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_pos_no_dummy_round_trip() {
        let format = FormatDescriptor::pos_timestamped(true);
        let mut tx = Transaction::new(1, vec![], vec![sample_output(5)], 0);
        tx.timestamp = Some(42);
        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(&bytes[..4], &hex!("01000008"));
        assert_eq!(round_trip(&format, &tx), tx);
    }

    #[test]
    fn test_extra_payload_round_trip() {
        let format = FormatDescriptor::special_payload(VersionWidth::Bits32);
        let mut tx = Transaction::new(
            3 | (1 << 16),
            vec![sample_input(9)],
            vec![sample_output(1)],
            0,
        );
        tx.extra_payload = Some(vec![0x5a; 20]);
        assert_eq!(tx.tx_type(), 1);
        assert_eq!(tx.base_version(), 3);

        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(&bytes[bytes.len() - 21..], &[[20u8].as_slice(), &[0x5a; 20]].concat()[..]);
        assert_eq!(round_trip(&format, &tx), tx);
    }

    #[test]
    fn test_extra_payload_bits16_layout() {
        let format = FormatDescriptor::special_payload(VersionWidth::Bits16);
        let mut tx = Transaction::new(3 | (5 << 16), vec![sample_input(1)], vec![], 0);
        tx.extra_payload = Some(vec![1, 2, 3]);
        let bytes = tx.serialize(&format).unwrap();
        assert_eq!(&bytes[..4], &hex!("03000500"));
        assert_eq!(round_trip(&format, &tx), tx);
    }

    #[test]
    fn test_extra_payload_overrun() {
        let format = FormatDescriptor::special_payload(VersionWidth::Bits32);
        let mut tx = Transaction::new(3 | (1 << 16), vec![sample_input(9)], vec![], 0);
        tx.extra_payload = Some(vec![0x5a; 20]);
        let bytes = tx.serialize(&format).unwrap();
        match Transaction::deserialize(&format, &bytes[..bytes.len() - 4]) {
            Err(EnvelopeError::PayloadOverrun {
                declared,
                available,
            }) => {
                assert_eq!(declared, 20);
                assert_eq!(available, 16);
            }
            other => panic!("expected overrun, got {:?}", other),
        }
    }

    #[test]
    fn test_extra_payload_invariants() {
        let format = FormatDescriptor::special_payload(VersionWidth::Bits32);
        let mut normal = Transaction::new(3, vec![sample_input(1)], vec![], 0);
        normal.extra_payload = Some(vec![1]);
        assert!(matches!(
            normal.serialize(&format),
            Err(EnvelopeError::InvalidEnvelope(_))
        ));

        let special = Transaction::new(3 | (2 << 16), vec![sample_input(1)], vec![], 0);
        assert!(special.serialize(&format).is_err());

        // Payloads only exist on special-payload formats.
        assert!(normal.serialize(&FormatDescriptor::standard()).is_err());
    }

    #[test]
    fn test_parse_payload() {
        let mut tx = Transaction::new(3 | (1 << 16), vec![], vec![], 0);
        tx.extra_payload = Some(hex!("0100" "2a000000").to_vec());
        #[derive(Debug, PartialEq)]
        struct Registration {
            version: u16,
            height: u32,
        }
        impl Decodable for Registration {
            fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
                Ok(Registration {
                    version: u16::consensus_decode(r)?,
                    height: u32::consensus_decode(r)?,
                })
            }
        }
        assert_eq!(
            tx.parse_payload::<Registration>().unwrap(),
            Registration {
                version: 1,
                height: 42
            }
        );

        tx.extra_payload = Some(hex!("0100" "2a000000" "ff").to_vec());
        assert!(matches!(
            tx.parse_payload::<Registration>(),
            Err(EnvelopeError::PayloadOverrun { .. })
        ));
    }

    #[test]
    fn test_all_empty_witness_section_rejected() {
        let mut tx = Transaction::new(1, vec![sample_input(1)], vec![sample_output(10)], 0);
        tx.witness = Some(vec![Witness::new()]);
        assert!(matches!(
            tx.serialize(&FormatDescriptor::standard()),
            Err(EnvelopeError::InvalidEnvelope(_))
        ));

        tx.witness = None;
        assert_eq!(round_trip(&FormatDescriptor::standard(), &tx), tx);
    }

    #[test]
    fn test_inconsistent_descriptor_rejected() {
        // Witness support needs the no-dummy-input bit above the 16-bit version.
        let format = FormatDescriptor {
            version_width: VersionWidth::Bits16,
            ..FormatDescriptor::standard()
        };
        let tx = Transaction::new(1, vec![], vec![sample_output(5)], 0);
        assert!(matches!(
            tx.serialize(&format),
            Err(EnvelopeError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            Transaction::deserialize(&format, &hex!("0100" "00" "01" "0500000000000000" "00" "00000000")),
            Err(EnvelopeError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_witness_count_must_match_inputs() {
        let mut tx = Transaction::new(1, vec![sample_input(1)], vec![], 0);
        tx.witness = Some(vec![Witness::new(), Witness::new()]);
        assert!(matches!(
            tx.serialize(&FormatDescriptor::standard()),
            Err(EnvelopeError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_borsh_serialization() {
        let mut tx = Transaction::new(2, vec![sample_input(4)], vec![sample_output(77)], 9);
        tx.timestamp = Some(5);
        tx.witness = Some(vec![Witness::from_slice(&[vec![0xde, 0xad]])]);

        let serialized = borsh::to_vec(&tx).unwrap();
        let deserialized: Transaction = borsh::from_slice(&serialized).unwrap();

        assert_eq!(tx, deserialized);
    }

    #[test]
    fn test_coinbase() {
        let bytes = hex::decode(LEGACY_TX).unwrap();
        let tx = Transaction::deserialize(&FormatDescriptor::standard(), &bytes).unwrap();
        assert!(!tx.is_coinbase());

        let coinbase = Transaction::new(
            1,
            vec![TxIn::new(OutPoint::null(), ScriptBuf::from_bytes(vec![0x03, 0x01, 0x02, 0x03]))],
            vec![sample_output(50)],
            0,
        );
        assert!(coinbase.is_coinbase());
    }
}
