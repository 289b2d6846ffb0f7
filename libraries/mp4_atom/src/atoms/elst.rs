//! Edit List atom.
//!
//! Each entry maps part of the media time-line onto the presentation
//! time-line. Version 0 stores durations and media times as 32-bit values;
//! adding an entry that overflows those bounds promotes the atom to
//! version 1.
//!
//! ISO/IEC 14496-12 Section 8.6.6

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::ELST;
use crate::error::{FormatError, FormatResult};
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

const ELST_FIXED_SIZE: AtomSize = 8;
const ENTRY_V0_SIZE: AtomSize = 12;
const ENTRY_V1_SIZE: AtomSize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElstEntry {
    pub segment_duration: u64,
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

impl ElstEntry {
    pub fn with_duration(segment_duration: u64) -> ElstEntry {
        ElstEntry {
            segment_duration,
            ..ElstEntry::default()
        }
    }
}

impl Default for ElstEntry {
    fn default() -> Self {
        ElstEntry {
            segment_duration: 0,
            media_time: 0,
            media_rate_integer: 1,
            media_rate_fraction: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Elst {
    pub vf: VersionFlags,
    entries: Vec<ElstEntry>,
}

impl Elst {
    pub fn entries(&self) -> &[ElstEntry] {
        &self.entries
    }

    fn entry_size(&self) -> AtomSize {
        if self.vf.version == 1 {
            ENTRY_V1_SIZE
        } else {
            ENTRY_V0_SIZE
        }
    }

    pub(crate) fn read<R: Read + Seek>(
        &mut self,
        io: &mut Reader<R>,
        data_size: AtomSize,
    ) -> FormatResult<()> {
        self.vf = VersionFlags::read(io)?;
        let count = io.read_u32()?;
        if data_size < ELST_FIXED_SIZE + count as AtomSize * self.entry_size() {
            return Err(FormatError::FileFormat(format!(
                "entry count ({count}) does not match data size reading elst atom"
            )));
        }

        self.entries.clear();
        self.entries.reserve(count as usize);
        for _ in 0..count {
            let (segment_duration, media_time) = if self.vf.version == 1 {
                (io.read_u64()?, io.read_u64()? as i64)
            } else {
                (io.read_u32()? as u64, io.read_u32()? as i64)
            };
            let media_rate_integer = io.read_u16()? as i16;
            let media_rate_fraction = io.read_u16()? as i16;
            self.entries.push(ElstEntry {
                segment_duration,
                media_time,
                media_rate_integer,
                media_rate_fraction,
            });
        }
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        self.vf.write(io)?;
        io.put_u32(self.entries.len() as u32)?;
        for entry in &self.entries {
            if self.vf.version == 1 {
                io.put_u64(entry.segment_duration)?;
                io.put_u64(entry.media_time as u64)?;
            } else {
                io.put_u32(entry.segment_duration as u32)?;
                io.put_u32(entry.media_time as u32)?;
            }
            io.put_u16(entry.media_rate_integer as u16)?;
            io.put_u16(entry.media_rate_fraction as u16)?;
        }
        Ok(())
    }

    pub(crate) fn size(&self) -> AtomSize {
        ELST_FIXED_SIZE + self.entries.len() as AtomSize * self.entry_size()
    }
}

impl Atom {
    pub fn new_elst() -> Atom {
        Atom::new_typed(ELST, Payload::Elst(Elst::default()))
    }

    pub fn elst(&self) -> Option<&Elst> {
        match self.payload() {
            Payload::Elst(elst) => Some(elst),
            _ => None,
        }
    }

    /// Appends an edit list entry, promoting the atom to version 1 when the
    /// entry overflows the version-0 32-bit bounds.
    pub fn add_edit_list_entry(&mut self, entry: ElstEntry) {
        if let Payload::Elst(elst) = self.payload_mut() {
            if entry.segment_duration > u32::MAX as u64
                || entry.media_time > i32::MAX as i64
                || entry.media_time < i32::MIN as i64
            {
                elst.vf.version = 1;
            }
            elst.entries.push(entry);
            self.update();
        }
    }
}
