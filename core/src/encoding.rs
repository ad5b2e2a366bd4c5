//! Primitive read/write helpers shared by the envelope codecs.
//!
//! Leaf records (inputs, outputs, merkle branches) implement the consensus
//! `Encodable` / `Decodable` traits of the `bitcoin` crate; the helpers here
//! cover var-int prefixed lists, exact-length byte strings and whole-slice
//! decoding.

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::io::{self, Write};

use crate::constants::MAX_PREALLOCATION;
use crate::error::{EnvelopeError, Result};

/// Reads a var-int count and converts it to `usize`.
pub fn decode_count<R: io::Read + ?Sized>(r: &mut R) -> Result<usize, encode::Error> {
    let VarInt(count) = VarInt::consensus_decode(r)?;
    usize::try_from(count).map_err(|_| encode::Error::ParseFailed("count overflows usize"))
}

/// Reads a var-int prefixed list of records.
pub fn decode_list<T: Decodable, R: io::Read + ?Sized>(r: &mut R) -> Result<Vec<T>, encode::Error> {
    let count = decode_count(r)?;
    let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATION));
    for _ in 0..count {
        items.push(T::consensus_decode(r)?);
    }
    Ok(items)
}

/// Writes a var-int prefixed list of records.
pub fn encode_list<T: Encodable, W: Write + ?Sized>(items: &[T], w: &mut W) -> Result<usize, io::Error> {
    let mut len = VarInt(items.len() as u64).consensus_encode(w)?;
    for item in items {
        len += item.consensus_encode(w)?;
    }
    Ok(len)
}

/// Reads exactly `declared` bytes, reporting how many were available when the
/// stream ends first.
pub fn read_payload<R: io::Read + ?Sized>(r: &mut R, declared: usize) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(declared.min(MAX_PREALLOCATION * 32));
    let mut chunk = [0u8; 512];
    while payload.len() < declared {
        let want = (declared - payload.len()).min(chunk.len());
        let got = r.read(&mut chunk[..want])?;
        if got == 0 {
            return Err(EnvelopeError::PayloadOverrun {
                declared,
                available: payload.len(),
            });
        }
        payload.extend_from_slice(&chunk[..got]);
    }
    Ok(payload)
}

/// Writes a var-int length followed by the bytes.
pub fn encode_bytes<W: Write + ?Sized>(bytes: &[u8], w: &mut W) -> Result<usize, io::Error> {
    let len = VarInt(bytes.len() as u64).consensus_encode(w)?;
    w.write_all(bytes)?;
    Ok(len + bytes.len())
}

/// Runs `decode` over `bytes` and requires that it consumes all of them.
pub fn decode_exact<T, F>(bytes: &[u8], decode: F) -> Result<T>
where
    F: FnOnce(&mut &[u8]) -> Result<T>,
{
    let mut cursor = bytes;
    let value = decode(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(EnvelopeError::TrailingBytes(cursor.len()));
    }
    Ok(value)
}
