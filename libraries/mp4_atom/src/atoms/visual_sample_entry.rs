//! Visual sample entry: the shared layout of every video codec's sample
//! description (`avc1`, `hvc1`, `mp4v`, ...).
//!
//! All visual sample entries share a fixed 78-byte preamble followed by
//! codec-specific child atoms; the codec is identified by the atom type tag
//! alone.
//!
//! ISO/IEC 14496-12 Section 8.16.2

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, FourCc, Payload};
use crate::error::FormatResult;
use crate::io::{Reader, Writer};

const VISUAL_SAMPLE_ENTRY_FIXED_SIZE: AtomSize = 78;
const VENDOR_LEN: usize = 4;
const ENCODER_NAME_LEN: usize = 31;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisualSampleEntry {
    pub data_reference_index: u16,
    pub version: u16,
    pub revision: u16,
    pub vendor: [u8; VENDOR_LEN],
    pub temporal_quality: u32,
    pub spatial_quality: u32,
    pub width: u16,
    pub height: u16,
    /// Pixels per inch, 16.16 fixed point on the wire, integer part here.
    pub horizontal_res: u32,
    pub vertical_res: u32,
    pub entry_data_size: u32,
    pub frames_per_sample: u16,
    pub encoder_name_size: u8,
    pub encoder_name: [u8; ENCODER_NAME_LEN],
    pub bit_depth: u16,
    pub color_table_id: u16,
    reserved_32: u32,
    reserved_16: u16,
}

impl Default for VisualSampleEntry {
    fn default() -> Self {
        VisualSampleEntry {
            data_reference_index: 1,
            version: 0,
            revision: 0,
            vendor: [0; VENDOR_LEN],
            temporal_quality: 0,
            spatial_quality: 0,
            width: 0,
            height: 0,
            horizontal_res: 0x48,
            vertical_res: 0x48,
            entry_data_size: 0,
            frames_per_sample: 1,
            encoder_name_size: ENCODER_NAME_LEN as u8,
            encoder_name: [0; ENCODER_NAME_LEN],
            bit_depth: 0x18,
            color_table_id: 0xFFFF,
            reserved_32: 0,
            reserved_16: 0,
        }
    }
}

impl VisualSampleEntry {
    pub(crate) fn read<R: Read + Seek>(&mut self, io: &mut Reader<R>) -> FormatResult<()> {
        // Common to all sample entries.
        self.reserved_32 = io.read_u32()?;
        self.reserved_16 = io.read_u16()?;
        self.data_reference_index = io.read_u16()?;

        // Specific to the visual sample entry.
        self.version = io.read_u16()?;
        self.revision = io.read_u16()?;
        self.vendor = io.read_fourcc()?;
        self.temporal_quality = io.read_u32()?;
        self.spatial_quality = io.read_u32()?;
        self.width = io.read_u16()?;
        self.height = io.read_u16()?;
        self.horizontal_res = io.read_u32()? >> 16;
        self.vertical_res = io.read_u32()? >> 16;
        self.entry_data_size = io.read_u32()?;
        self.frames_per_sample = io.read_u16()?;
        self.encoder_name_size = io.read_u8()?;
        self.encoder_name = io
            .read_bytes(ENCODER_NAME_LEN as AtomSize)?
            .try_into()
            .expect("fixed-length read");
        self.bit_depth = io.read_u16()?;
        self.color_table_id = io.read_u16()?;
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        io.put_u32(self.reserved_32)?;
        io.put_u16(self.reserved_16)?;
        io.put_u16(self.data_reference_index)?;

        io.put_u16(self.version)?;
        io.put_u16(self.revision)?;
        io.put_fourcc(&self.vendor)?;
        io.put_u32(self.temporal_quality)?;
        io.put_u32(self.spatial_quality)?;
        io.put_u16(self.width)?;
        io.put_u16(self.height)?;
        io.put_u32(self.horizontal_res << 16)?;
        io.put_u32(self.vertical_res << 16)?;
        io.put_u32(self.entry_data_size)?;
        io.put_u16(self.frames_per_sample)?;
        io.put_u8(self.encoder_name_size)?;
        io.put_bytes(&self.encoder_name)?;
        io.put_u16(self.bit_depth)?;
        io.put_u16(self.color_table_id)
    }

    pub(crate) fn size(&self) -> AtomSize {
        VISUAL_SAMPLE_ENTRY_FIXED_SIZE
    }
}

/// Visual sample entry type tags known to the registry.
pub const VISUAL_SAMPLE_ENTRY_TYPES: &[&[u8; 4]] = &[
    b"AVDJ", b"AVdh", b"AVdn", b"CFHD", b"DIVX", b"WMV1", b"WMV2", b"WMV3", b"XVID", b"ai12",
    b"ai13", b"ai15", b"ai16", b"ai1p", b"ai1q", b"ai52", b"ai53", b"ai55", b"ai56", b"ai5q",
    b"ap4h", b"ap4x", b"apch", b"apcn", b"apco", b"apcs", b"av01", b"avc1", b"dmb1", b"h263",
    b"hev1", b"hvc1", b"jpeg", b"mjp2", b"mjpa", b"mjpb", b"mp4v", b"s263", b"vp09",
];

impl Atom {
    pub fn new_visual_sample_entry(atom_type: FourCc) -> Atom {
        Atom::new_typed(atom_type, Payload::Visual(VisualSampleEntry::default()))
    }

    pub fn visual_sample_entry(&self) -> Option<&VisualSampleEntry> {
        match self.payload() {
            Payload::Visual(entry) => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn is_visual_sample_entry(&self) -> bool {
        matches!(self.payload(), Payload::Visual(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Reader, Writer};

    #[test]
    fn preamble_is_78_bytes_and_round_trips() {
        let entry = VisualSampleEntry {
            width: 3840,
            height: 2160,
            ..VisualSampleEntry::default()
        };

        let mut writer = Writer::new_memory();
        entry.write(&mut writer).unwrap();
        let bytes = writer.into_contents();
        assert_eq!(bytes.len() as u64, VISUAL_SAMPLE_ENTRY_FIXED_SIZE);

        let mut parsed = VisualSampleEntry::default();
        parsed.read(&mut Reader::from_vec(bytes)).unwrap();
        assert_eq!(parsed, entry);
    }
}
