//! Byte buffer for building machine code.
//!
//! This module provides a growable buffer for incrementally emitting
//! instruction bytes, plus in-place patching used by the relocation engine
//! to fill displacement fields after their targets become known.

/// A fixed-width value that can be appended to a [`CodeBuf`] in
/// little-endian byte order.
///
/// `UPPER_BOUND` is the static maximum number of bytes `emit` may write,
/// so capacity can be reserved before a multi-value write.
pub trait Emit {
    const UPPER_BOUND: usize;

    fn emit(&self, out: &mut Vec<u8>);
}

macro_rules! impl_emit {
    ($($ty:ty),*) => {
        $(impl Emit for $ty {
            const UPPER_BOUND: usize = std::mem::size_of::<$ty>();

            fn emit(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        })*
    };
}

impl_emit!(u8, i8, u16, i16, u32, i32, u64, i64);

/// A buffer of emitted machine code.
///
/// Bytes in `[0, len)` are always fully defined. The buffer is append-only
/// except for [`CodeBuf::patch_u8`] and [`CodeBuf::patch_u32`], which
/// overwrite previously written displacement fields.
#[derive(Default)]
pub struct CodeBuf {
    bytes: Vec<u8>,
}

impl CodeBuf {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Current size of the emitted code.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Guarantee capacity for at least `additional` more bytes.
    pub fn reserve(&mut self, additional: usize) {
        self.bytes.reserve(additional);
    }

    /// Append a fixed-width value in little-endian order.
    pub fn push<T: Emit>(&mut self, value: T) {
        self.bytes.reserve(T::UPPER_BOUND);
        value.emit(&mut self.bytes);
    }

    pub fn push_u8(&mut self, value: u8) {
        self.push(value);
    }

    pub fn push_u16(&mut self, value: u16) {
        self.push(value);
    }

    pub fn push_u32(&mut self, value: u32) {
        self.push(value);
    }

    pub fn push_u64(&mut self, value: u64) {
        self.push(value);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Overwrite one already-written byte.
    ///
    /// # Panics
    /// Panics if `offset` is past the end of the emitted code.
    pub fn patch_u8(&mut self, offset: usize, value: u8) {
        assert!(offset < self.bytes.len(), "patch offset out of bounds");
        self.bytes[offset] = value;
    }

    /// Overwrite four already-written bytes with a little-endian value.
    ///
    /// # Panics
    /// Panics if the field at `offset` is not fully inside the emitted code.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.bytes.len(), "patch offset out of bounds");
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Render the emitted bytes as hex, 16 per line.
    pub fn hex_dump(&self) -> String {
        let mut out = String::with_capacity(self.bytes.len() * 3);
        for (i, byte) in self.bytes.iter().enumerate() {
            out.push_str(&format!("{byte:02x}"));
            if i % 16 == 15 || i + 1 == self.bytes.len() {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_values() {
        let mut buf = CodeBuf::new();
        buf.push_u8(0x90);
        buf.push_u16(0x1234);
        buf.push_u32(0xDEADBEEF);

        assert_eq!(buf.len(), 7);
        assert_eq!(buf.as_slice(), &[0x90, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_push_signed() {
        let mut buf = CodeBuf::new();
        buf.push(-1i8);
        buf.push(-2i32);

        assert_eq!(buf.as_slice(), &[0xFF, 0xFE, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_push_u64() {
        let mut buf = CodeBuf::new();
        buf.push_u64(0x0102030405060708);

        assert_eq!(
            buf.as_slice(),
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_patch() {
        let mut buf = CodeBuf::new();
        buf.push_bytes(&[0xEB, 0x00, 0x90, 0x00, 0x00, 0x00, 0x00]);
        buf.patch_u8(1, 0xFE);
        buf.patch_u32(3, 0x11223344);

        assert_eq!(
            buf.as_slice(),
            &[0xEB, 0xFE, 0x90, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    #[should_panic(expected = "patch offset out of bounds")]
    fn test_patch_past_end() {
        let mut buf = CodeBuf::new();
        buf.push_u8(0x90);
        buf.patch_u32(0, 0);
    }

    #[test]
    fn test_hex_dump() {
        let mut buf = CodeBuf::new();
        buf.push_bytes(&[0x48, 0x89, 0xD8]);

        assert_eq!(buf.hex_dump(), "48 89 d8\n");
    }
}
