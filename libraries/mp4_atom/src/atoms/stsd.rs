//! Sample Description atom.
//!
//! The payload is a descriptor count followed by the sample entry children;
//! the count is recomputed from the child list on write.
//!
//! ISO/IEC 14496-12 Section 8.16

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::STSD;
use crate::error::FormatResult;
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

const STSD_FIXED_SIZE: AtomSize = 8;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stsd {
    pub vf: VersionFlags,
}

impl Stsd {
    pub(crate) fn read<R: Read + Seek>(&mut self, io: &mut Reader<R>) -> FormatResult<()> {
        self.vf = VersionFlags::read(io)?;
        // The descriptor count duplicates the child list; children are parsed
        // generically so the stored count is discarded.
        let _descriptor_count = io.read_u32()?;
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(
        &self,
        io: &mut Writer<W>,
        num_children: u32,
    ) -> FormatResult<()> {
        self.vf.write(io)?;
        io.put_u32(num_children)
    }

    pub(crate) fn size(&self) -> AtomSize {
        STSD_FIXED_SIZE
    }
}

impl Atom {
    pub fn new_stsd() -> Atom {
        Atom::new_typed(STSD, Payload::Stsd(Stsd::default()))
    }
}
