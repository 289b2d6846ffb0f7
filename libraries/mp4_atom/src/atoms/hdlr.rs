//! Handler Reference atom.
//!
//! A descendant of `trak` that declares the track's media type through its
//! component subtype. There must be exactly one `hdlr` in each `mdia`.
//!
//! ISO/IEC 14496-12 Section 8.9

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::common::TrackMediaType;
use crate::atoms::HDLR;
use crate::error::FormatResult;
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

const TAG_LEN: u64 = 4;
const FIXED_FIELDS_SIZE: AtomSize = 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hdlr {
    pub vf: VersionFlags,
    pub component_type: [u8; 4],
    pub component_subtype: [u8; 4],
    pub component_manufacturer: [u8; 4],
    pub component_flags: u32,
    pub component_flags_mask: u32,
    /// Null-terminated handler name, kept verbatim including the terminator.
    pub component_name: Vec<u8>,
}

impl Default for Hdlr {
    fn default() -> Self {
        Hdlr {
            vf: VersionFlags::default(),
            component_type: [0; 4],
            component_subtype: [0; 4],
            component_manufacturer: [0; 4],
            component_flags: 0,
            component_flags_mask: 0,
            component_name: vec![0],
        }
    }
}

impl Hdlr {
    pub fn track_media_type(&self) -> TrackMediaType {
        TrackMediaType::from_subtype(&self.component_subtype)
    }

    pub(crate) fn read<R: Read + Seek>(
        &mut self,
        io: &mut Reader<R>,
        data_size: AtomSize,
    ) -> FormatResult<()> {
        let start = io.tell();
        self.vf = VersionFlags::read(io)?;
        self.component_type = io.read_fourcc()?;
        self.component_subtype = io.read_fourcc()?;
        self.component_manufacturer = io.read_fourcc()?;
        self.component_flags = io.read_u32()?;
        self.component_flags_mask = io.read_u32()?;
        let name_size = data_size.saturating_sub(io.tell() - start);
        self.component_name = io.read_bytes(name_size)?;
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        self.vf.write(io)?;
        io.put_fourcc(&self.component_type)?;
        io.put_fourcc(&self.component_subtype)?;
        io.put_fourcc(&self.component_manufacturer)?;
        io.put_u32(self.component_flags)?;
        io.put_u32(self.component_flags_mask)?;
        io.put_bytes(&self.component_name)
    }

    pub(crate) fn size(&self) -> AtomSize {
        FIXED_FIELDS_SIZE + 3 * TAG_LEN + self.component_name.len() as AtomSize
    }
}

impl Atom {
    pub fn new_hdlr() -> Atom {
        Atom::new_typed(HDLR, Payload::Hdlr(Hdlr::default()))
    }

    pub fn hdlr(&self) -> Option<&Hdlr> {
        match self.payload() {
            Payload::Hdlr(hdlr) => Some(hdlr),
            _ => None,
        }
    }

    pub fn hdlr_mut(&mut self) -> Option<&mut Hdlr> {
        match self.payload_mut() {
            Payload::Hdlr(hdlr) => Some(hdlr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Reader, Writer};

    #[test]
    fn round_trip_with_name() {
        let mut hdlr = Hdlr {
            component_subtype: *b"vide",
            component_name: b"VideoHandler\0".to_vec(),
            ..Hdlr::default()
        };
        hdlr.component_type = *b"mhlr";

        let mut writer = Writer::new_memory();
        hdlr.write(&mut writer).unwrap();
        let bytes = writer.into_contents();
        assert_eq!(bytes.len() as u64, hdlr.size());

        let mut parsed = Hdlr::default();
        parsed
            .read(&mut Reader::from_vec(bytes), hdlr.size())
            .unwrap();
        assert_eq!(parsed, hdlr);
        assert_eq!(parsed.track_media_type(), TrackMediaType::Visual);
    }
}
