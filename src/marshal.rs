// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Capacity-checked writer and bounds-checked reader over TPM 2.0 wire bytes.
//!
//! All multi-byte integers on the wire are big-endian. Length-prefixed byte
//! fields (`TPM2B_*`) carry a 2-byte size followed by the payload.

use crate::tpm20proto::packed_nums::*;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("buffer overflow - required size > capacity: {needed} > {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },
    #[error("{what} too large - size > upper bound: {size} > {max}")]
    SizeTooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },
    #[error("parameters of {found} supplied to the {expected} encoder")]
    ParameterMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum UnmarshalError {
    #[error("insufficient bytes for {what} - required {needed}, remaining {remaining}")]
    Insufficient {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("{what} too large - size > upper bound: {size} > {max}")]
    SizeTooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },
    #[error("invalid value {value:#x} for {what}")]
    InvalidValue { what: &'static str, value: u32 },
    #[error("{0} bytes left over after unmarshaling")]
    TrailingBytes(usize),
}

/// A value with a TPM 2.0 wire encoding.
pub trait TpmMarshal {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError>;
}

/// A value that can be parsed from its TPM 2.0 wire encoding.
pub trait TpmUnmarshal: Sized {
    fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError>;
}

/// Appends wire data to a fixed-capacity byte slice.
pub struct TpmWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> TpmWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start writing at `pos`, keeping the bytes before it.
    pub fn at(buf: &'a mut [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), MarshalError> {
        let end = self
            .pos
            .checked_add(data.len())
            .filter(|end| *end <= self.buf.len())
            .ok_or(MarshalError::BufferOverflow {
                needed: self.pos.saturating_add(data.len()),
                capacity: self.buf.len(),
            })?;
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    /// Write a fixed-layout big-endian value.
    pub fn write<T: IntoBytes + Immutable>(&mut self, value: &T) -> Result<(), MarshalError> {
        self.write_bytes(value.as_bytes())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), MarshalError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), MarshalError> {
        self.write(&u16_be::new(value))
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), MarshalError> {
        self.write(&u32_be::new(value))
    }

    /// Write a `TPM2B` field whose payload must not exceed `max` bytes.
    pub fn write_sized(
        &mut self,
        what: &'static str,
        data: &[u8],
        max: usize,
    ) -> Result<(), MarshalError> {
        let max = max.min(u16::MAX.into());
        if data.len() > max {
            Err(MarshalError::SizeTooLarge {
                what,
                size: data.len(),
                max,
            })?
        }
        self.write_u16(data.len() as u16)?;
        self.write_bytes(data)
    }

    /// Write a `TPM2B` wrapper around a nested structure, backfilling the
    /// size once the structure has been written.
    pub fn write_sized_with(
        &mut self,
        what: &'static str,
        f: impl FnOnce(&mut Self) -> Result<(), MarshalError>,
    ) -> Result<(), MarshalError> {
        let size_pos = self.pos;
        self.write_u16(0)?;
        f(self)?;
        let size = self.pos - size_pos - size_of::<u16_be>();
        if size > u16::MAX.into() {
            Err(MarshalError::SizeTooLarge {
                what,
                size,
                max: u16::MAX.into(),
            })?
        }
        self.buf[size_pos..size_pos + size_of::<u16_be>()]
            .copy_from_slice(u16_be::new(size as u16).as_bytes());
        Ok(())
    }
}

/// Cursor over received wire data.
pub struct TpmReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TpmReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread bytes.
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn read_bytes(&mut self, what: &'static str, len: usize) -> Result<&'a [u8], UnmarshalError> {
        if len > self.remaining() {
            Err(UnmarshalError::Insufficient {
                what,
                needed: len,
                remaining: self.remaining(),
            })?
        }
        let data = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(data)
    }

    /// Read a fixed-layout big-endian value.
    pub fn read<T: FromBytes>(&mut self, what: &'static str) -> Result<T, UnmarshalError> {
        let (value, _) =
            T::read_from_prefix(self.rest()).map_err(|_| UnmarshalError::Insufficient {
                what,
                needed: size_of::<T>(),
                remaining: self.remaining(),
            })?;
        self.pos += size_of::<T>();
        Ok(value)
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, UnmarshalError> {
        self.read::<u8>(what)
    }

    pub fn read_u16(&mut self, what: &'static str) -> Result<u16, UnmarshalError> {
        Ok(self.read::<u16_be>(what)?.get())
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, UnmarshalError> {
        Ok(self.read::<u32_be>(what)?.get())
    }

    /// Read a `TPMI_YES_NO`.
    pub fn read_bool(&mut self, what: &'static str) -> Result<bool, UnmarshalError> {
        match self.read_u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(UnmarshalError::InvalidValue {
                what,
                value: value.into(),
            }),
        }
    }

    /// Read a `TPM2B` field whose payload must not exceed `max` bytes.
    pub fn read_sized(&mut self, what: &'static str, max: usize) -> Result<&'a [u8], UnmarshalError> {
        let size = self.read_u16(what)? as usize;
        if size > max {
            Err(UnmarshalError::SizeTooLarge { what, size, max })?
        }
        self.read_bytes(what, size)
    }

    /// Read a `TPM2B` wrapper around a nested structure. The nested
    /// structure must consume exactly the advertised size.
    pub fn read_sized_with<T>(
        &mut self,
        what: &'static str,
        f: impl FnOnce(&mut TpmReader<'a>) -> Result<T, UnmarshalError>,
    ) -> Result<T, UnmarshalError> {
        let inner = self.read_sized(what, u16::MAX.into())?;
        let mut reader = TpmReader::new(inner);
        let value = f(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }

    /// Fails with [`UnmarshalError::TrailingBytes`] unless every byte was consumed.
    pub fn finish(&self) -> Result<(), UnmarshalError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(UnmarshalError::TrailingBytes(n)),
        }
    }
}

impl TpmMarshal for bool {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        writer.write_u8(*self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_writer_rejects_overflow_without_writing() {
        let mut buf = [0u8; 5];
        let mut writer = TpmWriter::new(&mut buf);
        writer.write_u32(0xdeadbeef).unwrap();

        let err = writer.write_u16(0x1234).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::BufferOverflow {
                needed: 6,
                capacity: 5
            }
        ));
        assert_eq!(writer.position(), 4);
        assert_eq!(buf, [0xde, 0xad, 0xbe, 0xef, 0x00]);
    }

    #[test]
    fn test_sized_field_is_big_endian_length_prefixed() {
        let mut buf = [0u8; 16];
        let mut writer = TpmWriter::new(&mut buf);
        writer.write_sized("nonce", &[0xaa, 0xbb, 0xcc], 64).unwrap();
        assert_eq!(writer.written(), &[0x00, 0x03, 0xaa, 0xbb, 0xcc]);

        let err = writer.write_sized("nonce", &[0; 9], 8).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::SizeTooLarge {
                size: 9,
                max: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_nested_sized_field_backfills_length() {
        let mut buf = [0u8; 16];
        let mut writer = TpmWriter::new(&mut buf);
        writer
            .write_sized_with("public", |w| {
                w.write_u32(0x01400001)?;
                w.write_u16(0x000b)
            })
            .unwrap();
        assert_eq!(
            writer.written(),
            &[0x00, 0x06, 0x01, 0x40, 0x00, 0x01, 0x00, 0x0b]
        );

        let mut reader = TpmReader::new(&buf[..8]);
        let (index, alg) = reader
            .read_sized_with("public", |r| Ok((r.read_u32("index")?, r.read_u16("alg")?)))
            .unwrap();
        assert_eq!((index, alg), (0x01400001, 0x000b));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_nested_sized_field_must_be_consumed() {
        let bytes = [0x00, 0x03, 0x01, 0x02, 0x03];
        let mut reader = TpmReader::new(&bytes);
        let err = reader
            .read_sized_with("public", |r| r.read_u16("alg"))
            .unwrap_err();
        assert!(matches!(err, UnmarshalError::TrailingBytes(1)));
    }

    #[test]
    fn test_reader_reports_insufficient_bytes() {
        let bytes = [0x80, 0x01, 0x00];
        let mut reader = TpmReader::new(&bytes);
        assert_eq!(reader.read_u16("tag").unwrap(), 0x8001);

        let err = reader.read_u32("size").unwrap_err();
        assert!(matches!(
            err,
            UnmarshalError::Insufficient {
                needed: 4,
                remaining: 1,
                ..
            }
        ));
        assert_eq!(reader.position(), 2);
        assert!(matches!(reader.finish(), Err(UnmarshalError::TrailingBytes(1))));
    }

    #[test]
    fn test_reader_rejects_oversized_and_non_boolean_values() {
        let bytes = [0x00, 0x41];
        let err = TpmReader::new(&bytes).read_sized("hmac", 64).unwrap_err();
        assert!(matches!(err, UnmarshalError::SizeTooLarge { size: 65, .. }));

        let err = TpmReader::new(&[0x02]).read_bool("state").unwrap_err();
        assert!(matches!(
            err,
            UnmarshalError::InvalidValue { value: 2, .. }
        ));
    }
}
