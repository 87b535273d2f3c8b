// src/cursor.rs
// Sequential typed reader over a seekable byte stream

use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom};

/// Stateful little-endian reader with one-token lookahead.
///
/// Every read returns `Ok(None)` when fewer bytes remain than were asked for.
/// A short read leaves the position where it was, so the caller can always
/// `unread` exactly what it successfully consumed. `Err` is reserved for
/// failures of the underlying stream.
pub struct ByteCursor<R> {
    inner: R,
    position: u64,
}

impl ByteCursor<Cursor<Vec<u8>>> {
    /// Wrap an in-memory buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ByteCursor::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> ByteCursor<R> {
    pub fn new(inner: R) -> Self {
        ByteCursor { inner, position: 0 }
    }

    /// Bytes consumed since the cursor was created.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled < n {
            if filled > 0 {
                self.inner.seek(SeekFrom::Current(-(filled as i64)))?;
            }
            return Ok(None);
        }

        self.position += n as u64;
        Ok(Some(buf))
    }

    /// Read `n` bytes as text. Bytes that are not valid UTF-8 are replaced,
    /// which is enough for comparing against ASCII tags.
    pub fn read_ascii(&mut self, n: usize) -> io::Result<Option<String>> {
        Ok(self
            .read_bytes(n)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn read_u16(&mut self) -> io::Result<Option<u16>> {
        Ok(self
            .read_bytes(2)?
            .map(|b| u16::from_le_bytes([b[0], b[1]])))
    }

    pub fn read_i16(&mut self) -> io::Result<Option<i16>> {
        Ok(self
            .read_bytes(2)?
            .map(|b| i16::from_le_bytes([b[0], b[1]])))
    }

    pub fn read_u32(&mut self) -> io::Result<Option<u32>> {
        Ok(self
            .read_bytes(4)?
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }

    pub fn read_u16_array(&mut self, n: usize) -> io::Result<Option<Vec<u16>>> {
        Ok(self.read_bytes(2 * n)?.map(|bytes| {
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect()
        }))
    }

    pub fn read_f32_array(&mut self, n: usize) -> io::Result<Option<Vec<f32>>> {
        Ok(self.read_bytes(4 * n)?.map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }))
    }

    /// Step back `n` bytes so the next read sees them again.
    pub fn unread(&mut self, n: usize) -> io::Result<()> {
        let n = n as u64;
        if n > self.position {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("cannot unread {} bytes at position {}", n, self.position),
            ));
        }
        self.inner.seek(SeekFrom::Current(-(n as i64)))?;
        self.position -= n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_reads_are_little_endian() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"DRS2");
        bytes.extend_from_slice(&0x1234u16.to_le_bytes());
        bytes.extend_from_slice(&(-5i16).to_le_bytes());
        bytes.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.25f32).to_le_bytes());

        let mut cursor = ByteCursor::from_bytes(bytes);
        assert_eq!(cursor.read_ascii(4).unwrap().as_deref(), Some("DRS2"));
        assert_eq!(cursor.read_u16().unwrap(), Some(0x1234));
        assert_eq!(cursor.read_i16().unwrap(), Some(-5));
        assert_eq!(cursor.read_u32().unwrap(), Some(0xDEADBEEF));
        assert_eq!(cursor.read_f32_array(2).unwrap(), Some(vec![1.5, -0.25]));
        assert_eq!(cursor.position(), 20);
    }

    #[test]
    fn test_end_marker_is_distinct_from_zero() {
        let mut cursor = ByteCursor::from_bytes(vec![0, 0, 0, 0]);
        assert_eq!(cursor.read_u32().unwrap(), Some(0));
        assert_eq!(cursor.read_u32().unwrap(), None);
        assert_eq!(cursor.read_ascii(1).unwrap(), None);
    }

    #[test]
    fn test_short_read_does_not_consume() {
        let mut cursor = ByteCursor::from_bytes(vec![1, 0, 2]);
        assert_eq!(cursor.read_u16_array(2).unwrap(), None);
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.read_u16().unwrap(), Some(1));
        assert_eq!(cursor.read_u16().unwrap(), None);
        assert_eq!(cursor.read_bytes(1).unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_unread_rewinds() {
        let mut cursor = ByteCursor::from_bytes(b"B#C001".to_vec());
        assert_eq!(cursor.read_ascii(2).unwrap().as_deref(), Some("B#"));
        assert_eq!(cursor.read_ascii(4).unwrap().as_deref(), Some("C001"));
        cursor.unread(4).unwrap();
        assert_eq!(cursor.position(), 2);
        assert_eq!(cursor.read_ascii(1).unwrap().as_deref(), Some("C"));
    }

    #[test]
    fn test_unread_past_start_fails() {
        let mut cursor = ByteCursor::from_bytes(b"AB".to_vec());
        cursor.read_bytes(1).unwrap();
        assert!(cursor.unread(2).is_err());
        assert_eq!(cursor.position(), 1);
    }
}
