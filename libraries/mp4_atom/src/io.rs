//! Seekable big-endian byte streams.
//!
//! All multi-byte integers in the atom layout are big-endian regardless of
//! host byte order, including the 24-bit flags field of full atoms.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{FormatError, FormatResult};

/// A positioned big-endian reader over any seekable byte source.
///
/// The reader tracks its own position and seeks before every access, so two
/// instances over independently opened handles of the same file do not
/// interfere.
pub struct Reader<R> {
    inner: R,
    pos: u64,
}

pub type MemoryReader = Reader<Cursor<Vec<u8>>>;

impl MemoryReader {
    pub fn from_vec(data: Vec<u8>) -> Self {
        Reader::new(Cursor::new(data))
    }
}

impl Reader<File> {
    pub fn open(path: impl AsRef<Path>) -> FormatResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            FormatError::UnexpectedEof(format!(
                "cannot open {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Reader::new(file))
    }
}

impl<R: Read + Seek> Reader<R> {
    pub fn new(inner: R) -> Self {
        Reader { inner, pos: 0 }
    }

    /// Total size of the underlying stream in bytes.
    pub fn size(&mut self) -> FormatResult<u64> {
        self.inner
            .seek(SeekFrom::End(0))
            .map_err(|e| read_error("size", e))
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) -> FormatResult<()> {
        self.pos = pos;
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8], context: &str) -> FormatResult<()> {
        self.inner
            .seek(SeekFrom::Start(self.pos))
            .map_err(|e| read_error(context, e))?;
        self.inner
            .read_exact(buf)
            .map_err(|e| read_error(context, e))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> FormatResult<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf, "read_u8")?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> FormatResult<u16> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf, "read_u16")?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads a 24-bit big-endian integer into the low three bytes.
    pub fn read_u24(&mut self) -> FormatResult<u32> {
        let mut buf = [0u8; 3];
        self.fill(&mut buf, "read_u24")?;
        Ok(((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32)
    }

    pub fn read_u32(&mut self) -> FormatResult<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, "read_u32")?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> FormatResult<u64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf, "read_u64")?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_bytes(&mut self, size: u64) -> FormatResult<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        self.fill(&mut buf, "read_bytes")?;
        Ok(buf)
    }

    pub fn read_fourcc(&mut self) -> FormatResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, "read_fourcc")?;
        Ok(buf)
    }
}

/// A positioned big-endian writer over any seekable byte sink.
pub struct Writer<W> {
    inner: W,
    pos: u64,
}

pub type MemoryWriter = Writer<Cursor<Vec<u8>>>;

impl MemoryWriter {
    pub fn new_memory() -> Self {
        Writer::new(Cursor::new(Vec::new()))
    }

    pub fn into_contents(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Writer<File> {
    /// Opens a file for writing, truncating any previous contents.
    pub fn create(path: impl AsRef<Path>) -> FormatResult<Self> {
        let file = File::create(path.as_ref()).map_err(|e| {
            FormatError::Write(format!("cannot create {}: {e}", path.as_ref().display()))
        })?;
        Ok(Writer::new(file))
    }

    /// Opens an existing file for in-place updates without truncation.
    pub fn open_in_place(path: impl AsRef<Path>) -> FormatResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .open(path.as_ref())
            .map_err(|e| {
                FormatError::Write(format!("cannot open {}: {e}", path.as_ref().display()))
            })?;
        Ok(Writer::new(file))
    }
}

impl<W: Write + Seek> Writer<W> {
    pub fn new(inner: W) -> Self {
        Writer { inner, pos: 0 }
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) -> FormatResult<()> {
        self.pos = pos;
        Ok(())
    }

    fn emit(&mut self, buf: &[u8], context: &str) -> FormatResult<()> {
        self.inner
            .seek(SeekFrom::Start(self.pos))
            .map_err(|e| write_error(context, e))?;
        self.inner
            .write_all(buf)
            .map_err(|e| write_error(context, e))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> FormatResult<()> {
        self.emit(&[value], "put_u8")
    }

    pub fn put_u16(&mut self, value: u16) -> FormatResult<()> {
        self.emit(&value.to_be_bytes(), "put_u16")
    }

    /// Writes the low three bytes of `value` big-endian.
    pub fn put_u24(&mut self, value: u32) -> FormatResult<()> {
        let bytes = value.to_be_bytes();
        self.emit(&bytes[1..4], "put_u24")
    }

    pub fn put_u32(&mut self, value: u32) -> FormatResult<()> {
        self.emit(&value.to_be_bytes(), "put_u32")
    }

    pub fn put_u64(&mut self, value: u64) -> FormatResult<()> {
        self.emit(&value.to_be_bytes(), "put_u64")
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> FormatResult<()> {
        self.emit(value, "put_bytes")
    }

    pub fn put_fourcc(&mut self, value: &[u8; 4]) -> FormatResult<()> {
        self.emit(value, "put_fourcc")
    }

    pub fn flush(&mut self) -> FormatResult<()> {
        self.inner.flush().map_err(|e| write_error("flush", e))
    }
}

fn read_error(context: &str, e: std::io::Error) -> FormatError {
    FormatError::UnexpectedEof(format!("reader error in {context}: {e}"))
}

fn write_error(context: &str, e: std::io::Error) -> FormatError {
    FormatError::Write(format!("writer error in {context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut writer = Writer::new_memory();
        writer.put_u8(0xAB).unwrap();
        writer.put_u16(0x1234).unwrap();
        writer.put_u24(0xABCDEF).unwrap();
        writer.put_u32(0xDEADBEEF).unwrap();
        writer.put_u64(0x0102030405060708).unwrap();
        writer.put_fourcc(b"moov").unwrap();

        let mut reader = Reader::from_vec(writer.into_contents());
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u24().unwrap(), 0xABCDEF);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
        assert_eq!(&reader.read_fourcc().unwrap(), b"moov");
    }

    #[test]
    fn integers_are_big_endian_on_the_wire() {
        let mut writer = Writer::new_memory();
        writer.put_u32(1).unwrap();
        writer.put_u24(0x010203).unwrap();
        assert_eq!(writer.into_contents(), [0, 0, 0, 1, 1, 2, 3]);
    }

    #[test]
    fn short_read_reports_eof() {
        let mut reader = Reader::from_vec(vec![0u8; 3]);
        assert!(matches!(
            reader.read_u32(),
            Err(crate::error::FormatError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn seek_and_tell_track_position() {
        let mut reader = Reader::from_vec(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        reader.read_u32().unwrap();
        assert_eq!(reader.tell(), 4);
        reader.seek(2).unwrap();
        assert_eq!(reader.read_u16().unwrap(), 0x0304);
        assert_eq!(reader.size().unwrap(), 8);
    }
}
