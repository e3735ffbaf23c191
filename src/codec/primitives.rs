//! Scalar and string encoding over a data source
//!
//! Every scalar is converted from host order to the source's target byte
//! order on write, and back on read. With debug tags enabled each value is
//! preceded by a one-byte [`TypeTag`] which is validated on read so that a
//! corrupt stream fails fast instead of being misinterpreted.

use super::source::{ByteOrder, DataSource};
use crate::error::{CoreError, CoreResult};

/// Type tags interleaved in debug mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    U8 = 0x01,
    I8 = 0x02,
    U16 = 0x03,
    I16 = 0x04,
    U32 = 0x05,
    I32 = 0x06,
    U64 = 0x07,
    I64 = 0x08,
    F32 = 0x09,
    F64 = 0x0a,
    Str = 0x0b,
    PaddedStr = 0x0c,
    Version = 0x0d,
}

macro_rules! scalar_codec {
    ($(#[$doc:meta])* $read:ident, $write:ident, $ty:ty, $tag:expr) => {
        $(#[$doc])*
        fn $read(&mut self) -> CoreResult<$ty> {
            self.expect_tag($tag)?;
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            self.read_bytes(&mut buf)?;
            Ok(match self.codec().byte_order {
                ByteOrder::Big => <$ty>::from_be_bytes(buf),
                ByteOrder::Little => <$ty>::from_le_bytes(buf),
            })
        }

        fn $write(&mut self, value: $ty) -> CoreResult<()> {
            self.put_tag($tag)?;
            let buf = match self.codec().byte_order {
                ByteOrder::Big => value.to_be_bytes(),
                ByteOrder::Little => value.to_le_bytes(),
            };
            self.write_bytes(&buf)
        }
    };
}

/// Growth step of [`Codec::read_blob`]
const BLOB_CHUNK: usize = 64 * 1024;

/// Typed read/write helpers available on every [`DataSource`]
pub trait Codec: DataSource {
    /// Write a type tag if debug tags are enabled
    fn put_tag(&mut self, tag: TypeTag) -> CoreResult<()> {
        if self.codec().debug_tags {
            self.write_bytes(&[tag as u8])?;
        }
        Ok(())
    }

    /// Consume and validate a type tag if debug tags are enabled
    fn expect_tag(&mut self, tag: TypeTag) -> CoreResult<()> {
        if self.codec().debug_tags {
            let mut b = [0u8; 1];
            self.read_bytes(&mut b)?;
            if b[0] != tag as u8 {
                return Err(CoreError::BadTypeTag {
                    expected: tag as u8,
                    found: b[0],
                });
            }
        }
        Ok(())
    }

    scalar_codec!(read_u8, write_u8, u8, TypeTag::U8);
    scalar_codec!(read_i8, write_i8, i8, TypeTag::I8);
    scalar_codec!(read_u16, write_u16, u16, TypeTag::U16);
    scalar_codec!(read_i16, write_i16, i16, TypeTag::I16);
    scalar_codec!(read_u32, write_u32, u32, TypeTag::U32);
    scalar_codec!(read_i32, write_i32, i32, TypeTag::I32);
    scalar_codec!(read_u64, write_u64, u64, TypeTag::U64);
    scalar_codec!(read_i64, write_i64, i64, TypeTag::I64);
    scalar_codec!(read_f32, write_f32, f32, TypeTag::F32);
    scalar_codec!(read_f64, write_f64, f64, TypeTag::F64);

    /// Raw length prefix without a tag of its own
    fn read_len(&mut self) -> CoreResult<usize> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        let n = match self.codec().byte_order {
            ByteOrder::Big => u32::from_be_bytes(buf),
            ByteOrder::Little => u32::from_le_bytes(buf),
        };
        Ok(n as usize)
    }

    fn write_len(&mut self, len: usize) -> CoreResult<()> {
        let n = u32::try_from(len).map_err(|_| CoreError::StringTooLong(len, u32::MAX as usize))?;
        let buf = match self.codec().byte_order {
            ByteOrder::Big => n.to_be_bytes(),
            ByteOrder::Little => n.to_le_bytes(),
        };
        self.write_bytes(&buf)
    }

    /// Write a length-prefixed string
    fn write_string(&mut self, s: &str) -> CoreResult<()> {
        let max = self.codec().max_string_len;
        if s.len() > max {
            return Err(CoreError::StringTooLong(s.len(), max));
        }
        self.put_tag(TypeTag::Str)?;
        self.write_len(s.len())?;
        self.write_bytes(s.as_bytes())
    }

    /// Read a length-prefixed string, rejecting lengths above the ceiling
    fn read_string(&mut self) -> CoreResult<String> {
        self.expect_tag(TypeTag::Str)?;
        let len = self.read_len()?;
        let max = self.codec().max_string_len;
        if len > max {
            return Err(CoreError::StringTooLong(len, max));
        }
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read a length-prefixed string into a caller buffer.
    ///
    /// The copy is truncated to fit and NUL-terminated; the return value is
    /// the encoded (untruncated) length. A length above the ceiling fails
    /// without touching `dst`.
    fn read_string_into(&mut self, dst: &mut [u8]) -> CoreResult<usize> {
        self.expect_tag(TypeTag::Str)?;
        let len = self.read_len()?;
        let max = self.codec().max_string_len;
        if len > max {
            return Err(CoreError::StringTooLong(len, max));
        }
        copy_truncated(self, dst, len, len)?;
        Ok(len)
    }

    /// Write `s` into a constant-width field of `field_len` bytes.
    ///
    /// Returns the length of `s`; when it exceeds the field only the first
    /// `field_len` bytes are stored.
    fn write_padded_string(&mut self, s: &str, field_len: usize) -> CoreResult<usize> {
        let stored = s.len().min(field_len);
        self.put_tag(TypeTag::PaddedStr)?;
        self.write_len(stored)?;
        self.write_bytes(&s.as_bytes()[..stored])?;
        if field_len > stored {
            self.write_bytes(&vec![0u8; field_len - stored])?;
        }
        Ok(s.len())
    }

    /// Read a constant-width string field
    fn read_padded_string(&mut self, field_len: usize) -> CoreResult<String> {
        self.expect_tag(TypeTag::PaddedStr)?;
        let stored = self.read_len()?;
        if stored > field_len {
            return Err(CoreError::StringTooLong(stored, field_len));
        }
        let mut buf = vec![0u8; field_len];
        self.read_bytes(&mut buf)?;
        buf.truncate(stored);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read a constant-width string field into a caller buffer, returning the
    /// stored length (see [`Codec::read_string_into`])
    fn read_padded_string_into(&mut self, dst: &mut [u8], field_len: usize) -> CoreResult<usize> {
        self.expect_tag(TypeTag::PaddedStr)?;
        let stored = self.read_len()?;
        if stored > field_len {
            return Err(CoreError::StringTooLong(stored, field_len));
        }
        copy_truncated(self, dst, stored, field_len)?;
        Ok(stored)
    }

    /// Read `len` raw bytes.
    ///
    /// The buffer grows one chunk at a time as data arrives, so a length
    /// taken from a corrupt stream fails on the short read instead of
    /// allocating the whole claimed size up front.
    fn read_blob(&mut self, len: usize) -> CoreResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(BLOB_CHUNK));
        while out.len() < len {
            let start = out.len();
            out.resize(start + (len - start).min(BLOB_CHUNK), 0);
            self.read_bytes(&mut out[start..]).map_err(|e| match e {
                CoreError::Truncated(_) => CoreError::Truncated(len),
                e => e,
            })?;
        }
        Ok(out)
    }
}

impl<S: DataSource + ?Sized> Codec for S {}

/// Copy up to `dst.len() - 1` of the next `len` bytes into `dst`, NUL
/// terminate, then skip the rest of the `span` bytes
fn copy_truncated<S: DataSource + ?Sized>(
    ds: &mut S,
    dst: &mut [u8],
    len: usize,
    span: usize,
) -> CoreResult<()> {
    if dst.is_empty() {
        return ds.skip(span);
    }
    let n = len.min(dst.len() - 1);
    ds.read_bytes(&mut dst[..n])?;
    dst[n] = 0;
    ds.skip(span - n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::source::{CodecConfig, MemSource};

    fn mem(order: ByteOrder, tags: bool) -> MemSource {
        MemSource::memory(CodecConfig {
            byte_order: order,
            debug_tags: tags,
            ..CodecConfig::default()
        })
    }

    #[test]
    fn test_byte_order_on_the_wire() {
        let mut big = mem(ByteOrder::Big, false);
        big.write_u32(0x0102_0304).unwrap();
        assert_eq!(big.bytes(), &[1, 2, 3, 4]);

        let mut little = mem(ByteOrder::Little, false);
        little.write_u32(0x0102_0304).unwrap();
        assert_eq!(little.bytes(), &[4, 3, 2, 1]);
    }

    #[test]
    fn test_signed_values() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let mut ds = mem(order, false);
            ds.write_i8(-5).unwrap();
            ds.write_i16(-300).unwrap();
            ds.write_i32(i32::MIN).unwrap();
            ds.write_i64(-1).unwrap();
            ds.write_f64(-2.5).unwrap();
            ds.rewind();
            assert_eq!(ds.read_i8().unwrap(), -5);
            assert_eq!(ds.read_i16().unwrap(), -300);
            assert_eq!(ds.read_i32().unwrap(), i32::MIN);
            assert_eq!(ds.read_i64().unwrap(), -1);
            assert_eq!(ds.read_f64().unwrap(), -2.5);
        }
    }

    #[test]
    fn test_debug_tag_mismatch_fails_fast() {
        let mut ds = mem(ByteOrder::Big, true);
        ds.write_u16(7).unwrap();
        assert_eq!(ds.bytes()[0], TypeTag::U16 as u8);
        ds.rewind();
        match ds.read_u32() {
            Err(CoreError::BadTypeTag { expected, found }) => {
                assert_eq!(expected, TypeTag::U32 as u8);
                assert_eq!(found, TypeTag::U16 as u8);
            }
            other => panic!("expected BadTypeTag, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_read() {
        let mut ds = MemSource::from_bytes(vec![0, 1], CodecConfig::default());
        assert!(matches!(ds.read_u32(), Err(CoreError::Truncated(4))));
    }

    #[test]
    fn test_string_truncated_into_buffer() {
        let mut ds = mem(ByteOrder::Big, false);
        ds.write_string("hello world").unwrap();
        ds.write_u8(9).unwrap();
        ds.rewind();

        let mut buf = [0xffu8; 6];
        let len = ds.read_string_into(&mut buf).unwrap();
        assert_eq!(len, 11);
        assert_eq!(&buf, b"hello\0");
        // Remainder of the string was consumed
        assert_eq!(ds.read_u8().unwrap(), 9);
    }

    #[test]
    fn test_string_over_max_fails_without_partial_write() {
        let mut ds = mem(ByteOrder::Big, false);
        ds.write_string("abcdefgh").unwrap();
        let bytes = ds.bytes().to_vec();

        let mut limited = MemSource::from_bytes(bytes, CodecConfig::default()).with_max_string_len(4);
        let mut buf = [0xffu8; 16];
        assert!(matches!(
            limited.read_string_into(&mut buf),
            Err(CoreError::StringTooLong(8, 4))
        ));
        assert!(buf.iter().all(|&b| b == 0xff));

        let mut writer = mem(ByteOrder::Big, false).with_max_string_len(4);
        assert!(writer.write_string("abcdefgh").is_err());
        assert!(writer.bytes().is_empty());
    }

    #[test]
    fn test_blob_with_bogus_length_is_truncated() {
        let mut ds = mem(ByteOrder::Big, false);
        ds.write_bytes(&[7u8; 100]).unwrap();
        ds.rewind();
        assert!(matches!(
            ds.read_blob(u32::MAX as usize),
            Err(CoreError::Truncated(n)) if n == u32::MAX as usize
        ));

        ds.rewind();
        let blob = ds.read_blob(100).unwrap();
        assert_eq!(blob, vec![7u8; 100]);
        assert!(ds.read_blob(0).unwrap().is_empty());
    }

    #[test]
    fn test_padded_string() {
        let mut ds = mem(ByteOrder::Little, true);
        assert_eq!(ds.write_padded_string("abc", 8).unwrap(), 3);
        assert_eq!(ds.write_padded_string("truncated", 4).unwrap(), 9);
        ds.write_u8(1).unwrap();
        // tag + len + field
        assert_eq!(ds.bytes().len(), (1 + 4 + 8) + (1 + 4 + 4) + 2);
        ds.rewind();

        assert_eq!(ds.read_padded_string(8).unwrap(), "abc");
        let mut buf = [0u8; 3];
        assert_eq!(ds.read_padded_string_into(&mut buf, 4).unwrap(), 4);
        assert_eq!(&buf, b"tr\0");
        assert_eq!(ds.read_u8().unwrap(), 1);
    }
}
