//! Camera Motion Metadata sample entry.
//!
//! Replaces a generic `mett` sample entry in the metadata track so players
//! recognize the track as camera motion data.

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::CAMM;
use crate::error::FormatResult;
use crate::io::{Reader, Writer};

const RESERVED_LEN: usize = 6;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Camm {
    pub reserved: [u8; RESERVED_LEN],
    pub data_reference_index: u16,
}

impl Camm {
    pub(crate) fn read<R: Read + Seek>(&mut self, io: &mut Reader<R>) -> FormatResult<()> {
        self.reserved = io
            .read_bytes(RESERVED_LEN as AtomSize)?
            .try_into()
            .expect("fixed-length read");
        self.data_reference_index = io.read_u16()?;
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        io.put_bytes(&self.reserved)?;
        io.put_u16(self.data_reference_index)
    }

    pub(crate) fn size(&self) -> AtomSize {
        (RESERVED_LEN + 2) as AtomSize
    }
}

impl Atom {
    pub fn new_camm() -> Atom {
        Atom::new_typed(CAMM, Payload::Camm(Camm::default()))
    }

    pub fn camm(&self) -> Option<&Camm> {
        match self.payload() {
            Payload::Camm(camm) => Some(camm),
            _ => None,
        }
    }
}
