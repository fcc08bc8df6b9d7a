//! Encoding and decoding of persisted operator state.
//!
//! Checkpoints are written as a flat sequence of typed fields to an append-only
//! byte sink and read back in the same order: integers fixed-width little-endian,
//! sequences prefixed with a `u32` count. User-defined types (times, keys,
//! values) pass through [`Codec`] objects supplied by the caller, constructed
//! once at startup; the default codec is backed by `serde`/`bincode`.

use std::io::{Read, Write};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// A failure while writing or reading a checkpoint.
///
/// Restore failures are fatal: the instance must not resume processing from a
/// partially reconstructed state.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The underlying sink or source failed.
    #[error("checkpoint i/o failed")]
    Io(#[from] std::io::Error),
    /// A codec failed to encode or decode a value.
    #[error("checkpoint codec failed")]
    Codec(#[from] bincode::Error),
    /// The byte stream does not describe a state this instance can hold.
    #[error("malformed checkpoint: {0}")]
    Corrupt(&'static str),
}

/// Encodes and decodes values of one type against a byte stream.
///
/// Codecs are dependency-injected into checkpoint and restore so that the
/// framework chooses the wire representation of user types; this crate never
/// consults a process-wide serializer registry.
pub trait Codec<T> {
    /// Writes one value to the sink.
    fn encode(&self, item: &T, writer: &mut dyn Write) -> Result<(), CheckpointError>;
    /// Reads one value from the source.
    fn decode(&self, reader: &mut dyn Read) -> Result<T, CheckpointError>;
}

/// The default codec: `serde` via `bincode`, fixed-width integers.
pub struct BincodeCodec<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Creates the codec.
    pub fn new() -> Self {
        BincodeCodec { marker: PhantomData }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for BincodeCodec<T> {
    fn encode(&self, item: &T, writer: &mut dyn Write) -> Result<(), CheckpointError> {
        bincode::serialize_into(writer, item)?;
        Ok(())
    }
    fn decode(&self, reader: &mut dyn Read) -> Result<T, CheckpointError> {
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// Writes a `u32` as four little-endian bytes.
pub fn write_u32(writer: &mut dyn Write, value: u32) -> Result<(), CheckpointError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Reads a `u32` written by [`write_u32`].
pub fn read_u32(reader: &mut dyn Read) -> Result<u32, CheckpointError> {
    let mut buffer = [0u8; 4];
    reader.read_exact(&mut buffer)?;
    Ok(u32::from_le_bytes(buffer))
}

/// Writes a `i64` as eight little-endian bytes.
pub fn write_i64(writer: &mut dyn Write, value: i64) -> Result<(), CheckpointError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Reads an `i64` written by [`write_i64`].
pub fn read_i64(reader: &mut dyn Read) -> Result<i64, CheckpointError> {
    let mut buffer = [0u8; 8];
    reader.read_exact(&mut buffer)?;
    Ok(i64::from_le_bytes(buffer))
}

/// Writes a sequence length as a `u32` count.
pub fn write_len(writer: &mut dyn Write, length: usize) -> Result<(), CheckpointError> {
    let length = u32::try_from(length).map_err(|_| CheckpointError::Corrupt("sequence too long"))?;
    write_u32(writer, length)
}

/// Reads a sequence length written by [`write_len`].
pub fn read_len(reader: &mut dyn Read) -> Result<usize, CheckpointError> {
    Ok(read_u32(reader)? as usize)
}

/// Writes a boolean as a single byte.
pub fn write_bool(writer: &mut dyn Write, value: bool) -> Result<(), CheckpointError> {
    writer.write_all(&[value as u8])?;
    Ok(())
}

/// Reads a boolean written by [`write_bool`].
pub fn read_bool(reader: &mut dyn Read) -> Result<bool, CheckpointError> {
    let mut buffer = [0u8; 1];
    reader.read_exact(&mut buffer)?;
    match buffer[0] {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(CheckpointError::Corrupt("boolean field out of range")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 17).unwrap();
        write_i64(&mut bytes, -42).unwrap();
        write_bool(&mut bytes, true).unwrap();
        write_len(&mut bytes, 3).unwrap();

        let mut reader = &bytes[..];
        assert_eq!(read_u32(&mut reader).unwrap(), 17);
        assert_eq!(read_i64(&mut reader).unwrap(), -42);
        assert!(read_bool(&mut reader).unwrap());
        assert_eq!(read_len(&mut reader).unwrap(), 3);
    }

    #[test]
    fn truncation_is_detected() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 12345).unwrap();
        let mut reader = &bytes[..2];
        assert!(read_u32(&mut reader).is_err());
    }

    #[test]
    fn bincode_codec_round_trips() {
        let codec = BincodeCodec::<(u64, String)>::new();
        let mut bytes = Vec::new();
        codec.encode(&(7, "seven".to_owned()), &mut bytes).unwrap();
        let mut reader = &bytes[..];
        assert_eq!(codec.decode(&mut reader).unwrap(), (7, "seven".to_owned()));
    }
}
