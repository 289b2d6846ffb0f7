//! Track Header atom.
//!
//! Version 0 stores the date and duration fields as 32-bit integers; version
//! 1 widens them to 64 bits. Width and height are 16.16 fixed point on the
//! wire but held as integers here.
//!
//! ISO/IEC 14496-12 Section 8.5

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::TKHD;
use crate::error::FormatResult;
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

const MATRIX_LEN: usize = 9;
const UNITY_MATRIX: [u32; MATRIX_LEN] = [
    0x0001_0000,
    0,
    0,
    0,
    0x0001_0000,
    0,
    0,
    0,
    0x4000_0000,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tkhd {
    pub vf: VersionFlags,
    pub created: u64,
    pub modified: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: u16,
    pub group: u16,
    pub volume: u16,
    pub matrix: [u32; MATRIX_LEN],
    pub width: u32,
    pub height: u32,
    reserved32_1: u32,
    reserved32_2: u32,
    reserved32_3: u32,
    reserved16: u16,
}

impl Default for Tkhd {
    fn default() -> Self {
        Tkhd {
            vf: VersionFlags::default(),
            created: 0,
            modified: 0,
            track_id: 0,
            duration: 0,
            layer: 0,
            group: 0,
            volume: 0,
            matrix: UNITY_MATRIX,
            width: 0,
            height: 0,
            reserved32_1: 0,
            reserved32_2: 0,
            reserved32_3: 0,
            reserved16: 0,
        }
    }
}

impl Tkhd {
    pub(crate) fn read<R: Read + Seek>(&mut self, io: &mut Reader<R>) -> FormatResult<()> {
        self.vf = VersionFlags::read(io)?;

        if self.vf.version == 1 {
            self.created = io.read_u64()?;
            self.modified = io.read_u64()?;
            self.track_id = io.read_u32()?;
            self.reserved32_1 = io.read_u32()?;
            self.duration = io.read_u64()?;
        } else {
            self.created = io.read_u32()? as u64;
            self.modified = io.read_u32()? as u64;
            self.track_id = io.read_u32()?;
            self.reserved32_1 = io.read_u32()?;
            self.duration = io.read_u32()? as u64;
        }
        self.reserved32_2 = io.read_u32()?;
        self.reserved32_3 = io.read_u32()?;
        self.layer = io.read_u16()?;
        self.group = io.read_u16()?;
        self.volume = io.read_u16()?;
        self.reserved16 = io.read_u16()?;

        for entry in &mut self.matrix {
            *entry = io.read_u32()?;
        }

        // Width and height are fixed point xxxx.yyyy; integers assumed.
        self.width = io.read_u32()? >> 16;
        self.height = io.read_u32()? >> 16;
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        self.vf.write(io)?;

        if self.vf.version == 1 {
            io.put_u64(self.created)?;
            io.put_u64(self.modified)?;
            io.put_u32(self.track_id)?;
            io.put_u32(self.reserved32_1)?;
            io.put_u64(self.duration)?;
        } else {
            io.put_u32(self.created as u32)?;
            io.put_u32(self.modified as u32)?;
            io.put_u32(self.track_id)?;
            io.put_u32(self.reserved32_1)?;
            io.put_u32(self.duration as u32)?;
        }
        io.put_u32(self.reserved32_2)?;
        io.put_u32(self.reserved32_3)?;
        io.put_u16(self.layer)?;
        io.put_u16(self.group)?;
        io.put_u16(self.volume)?;
        io.put_u16(self.reserved16)?;

        for entry in &self.matrix {
            io.put_u32(*entry)?;
        }

        io.put_u32(self.width << 16)?;
        io.put_u32(self.height << 16)
    }

    pub(crate) fn size(&self) -> AtomSize {
        if self.vf.version == 1 {
            96
        } else {
            84
        }
    }
}

impl Atom {
    pub fn new_tkhd() -> Atom {
        Atom::new_typed(TKHD, Payload::Tkhd(Tkhd::default()))
    }

    pub fn tkhd(&self) -> Option<&Tkhd> {
        match self.payload() {
            Payload::Tkhd(tkhd) => Some(tkhd),
            _ => None,
        }
    }

    pub fn tkhd_mut(&mut self) -> Option<&mut Tkhd> {
        match self.payload_mut() {
            Payload::Tkhd(tkhd) => Some(tkhd),
            _ => None,
        }
    }
}
