//! Version and flags fields shared by "full" atoms.
//!
//! A full atom starts its payload with an 8-bit version and a 24-bit flag
//! map. Atoms whose layout depends on the version (`tkhd`, `elst`) must call
//! `Atom::update` after changing it.

use std::io::{Read, Seek, Write};

use crate::atom::AtomSize;
use crate::error::FormatResult;
use crate::io::{Reader, Writer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VersionFlags {
    pub version: u8,
    pub flags: u32,
}

impl VersionFlags {
    pub const SIZE: AtomSize = 4;

    pub fn read<R: Read + Seek>(io: &mut Reader<R>) -> FormatResult<Self> {
        let version = io.read_u8()?;
        let flags = io.read_u24()?;
        Ok(VersionFlags { version, flags })
    }

    pub fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        io.put_u8(self.version)?;
        io.put_u24(self.flags & 0x00FF_FFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Reader, Writer};

    #[test]
    fn round_trips_and_masks_flags() {
        let mut writer = Writer::new_memory();
        VersionFlags {
            version: 1,
            flags: 0xAB00_0107,
        }
        .write(&mut writer)
        .unwrap();

        let mut reader = Reader::from_vec(writer.into_contents());
        let vf = VersionFlags::read(&mut reader).unwrap();
        assert_eq!(vf.version, 1);
        assert_eq!(vf.flags, 0x0107);
    }
}
