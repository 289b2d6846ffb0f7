//! Chunk Offset atom, 32-bit (`stco`) and 64-bit (`co64`) variants.
//!
//! The table maps 1-based chunk numbers to absolute file byte offsets of the
//! media data, so it must be repaired whenever the `mdat` region moves. The
//! repair is accumulated in `moov_size_delta` and applied at write time; the
//! atom promotes itself to `co64` once the largest adjusted offset no longer
//! fits in 32 bits.
//!
//! ISO/IEC 14496-12 Section 8.19

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, FourCc, Payload};
use crate::atoms::{CO64, STCO};
use crate::error::{FormatError, FormatResult};
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

const STCO_FIXED_SIZE: AtomSize = 8;
const OFFSET_SIZE_32: AtomSize = 4;
const OFFSET_SIZE_64: AtomSize = 8;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stco {
    pub vf: VersionFlags,
    chunk_offsets: Vec<u64>,
    moov_size_delta: i64,
    max_chunk_offset: u64,
}

fn offset_size(atom_type: FourCc) -> AtomSize {
    if atom_type == STCO {
        OFFSET_SIZE_32
    } else {
        OFFSET_SIZE_64
    }
}

impl Stco {
    pub fn chunk_offsets(&self) -> &[u64] {
        &self.chunk_offsets
    }

    pub fn moov_size_delta(&self) -> i64 {
        self.moov_size_delta
    }

    pub(crate) fn read<R: Read + Seek>(
        &mut self,
        io: &mut Reader<R>,
        atom_type: FourCc,
        data_size: AtomSize,
    ) -> FormatResult<()> {
        self.vf = VersionFlags::read(io)?;

        let num_chunks = io.read_u32()?;
        let entry_size = offset_size(atom_type);
        if data_size < STCO_FIXED_SIZE + num_chunks as AtomSize * entry_size {
            return Err(FormatError::FileFormat(format!(
                "number of chunks ({num_chunks}) is not consistent with atom size \
                 reading chunk offset atom"
            )));
        }

        self.chunk_offsets.clear();
        self.chunk_offsets.reserve(num_chunks as usize);
        for _ in 0..num_chunks {
            let offset = if atom_type == STCO {
                io.read_u32()? as u64
            } else {
                io.read_u64()?
            };
            self.chunk_offsets.push(offset);
        }
        self.max_chunk_offset = self.chunk_offsets.iter().copied().max().unwrap_or(0);
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(
        &self,
        io: &mut Writer<W>,
        atom_type: FourCc,
    ) -> FormatResult<()> {
        self.vf.write(io)?;
        io.put_u32(self.chunk_offsets.len() as u32)?;
        for offset in &self.chunk_offsets {
            let adjusted = (*offset as i64 + self.moov_size_delta) as u64;
            if atom_type == STCO {
                io.put_u32(adjusted as u32)?;
            } else {
                io.put_u64(adjusted)?;
            }
        }
        Ok(())
    }

    pub(crate) fn size(&self, atom_type: FourCc) -> AtomSize {
        STCO_FIXED_SIZE + self.chunk_offsets.len() as AtomSize * offset_size(atom_type)
    }
}

impl Atom {
    pub fn new_stco() -> Atom {
        Atom::new_typed(STCO, Payload::Stco(Stco::default()))
    }

    pub fn stco(&self) -> Option<&Stco> {
        match self.payload() {
            Payload::Stco(stco) => Some(stco),
            _ => None,
        }
    }

    /// Appends a chunk offset to the table.
    pub fn append_chunk_offset(&mut self, offset: u64) {
        if let Payload::Stco(stco) = self.payload_mut() {
            stco.chunk_offsets.push(offset);
            stco.max_chunk_offset = stco.max_chunk_offset.max(offset);
            self.review_chunk_offset_type();
            self.update();
        }
    }

    /// Shifts every stored chunk offset by `adjustment` bytes at write time.
    pub fn adjust_chunk_offsets(&mut self, adjustment: i64) {
        if let Payload::Stco(stco) = self.payload_mut() {
            stco.moov_size_delta += adjustment;
            self.review_chunk_offset_type();
            self.update();
        }
    }

    /// Promotes `stco` to `co64` when the largest adjusted offset overflows
    /// the 32-bit table format.
    fn review_chunk_offset_type(&mut self) {
        let promote = match self.payload() {
            Payload::Stco(stco) => {
                stco.max_chunk_offset as i64 + stco.moov_size_delta > u32::MAX as i64
            }
            _ => false,
        };
        if promote && self.atom_type() == STCO {
            self.set_atom_type(CO64);
            self.update();
        }
    }
}
