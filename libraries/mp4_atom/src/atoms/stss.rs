//! Sync Sample atom: the list of 1-based key-frame indices.
//!
//! ISO/IEC 14496-12 Section 8.6.2

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::STSS;
use crate::error::{FormatError, FormatResult};
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

const STSS_FIXED_SIZE: AtomSize = 8;
const INDEX_SIZE: AtomSize = 4;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stss {
    pub vf: VersionFlags,
    key_frame_indices: Vec<u32>,
}

impl Stss {
    pub fn key_frame_indices(&self) -> &[u32] {
        &self.key_frame_indices
    }

    pub(crate) fn read<R: Read + Seek>(
        &mut self,
        io: &mut Reader<R>,
        data_size: AtomSize,
    ) -> FormatResult<()> {
        self.vf = VersionFlags::read(io)?;
        let num_key_frames = io.read_u32()?;
        if data_size < STSS_FIXED_SIZE + num_key_frames as AtomSize * INDEX_SIZE {
            return Err(FormatError::FileFormat(format!(
                "number of key frames ({num_key_frames}) is not consistent with atom \
                 size reading stss atom"
            )));
        }

        self.key_frame_indices.clear();
        self.key_frame_indices.reserve(num_key_frames as usize);
        for _ in 0..num_key_frames {
            self.key_frame_indices.push(io.read_u32()?);
        }
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        self.vf.write(io)?;
        io.put_u32(self.key_frame_indices.len() as u32)?;
        for index in &self.key_frame_indices {
            io.put_u32(*index)?;
        }
        Ok(())
    }

    pub(crate) fn size(&self) -> AtomSize {
        STSS_FIXED_SIZE + self.key_frame_indices.len() as AtomSize * INDEX_SIZE
    }
}

impl Atom {
    pub fn new_stss(key_frame_indices: Vec<u32>) -> Atom {
        Atom::new_typed(
            STSS,
            Payload::Stss(Stss {
                vf: VersionFlags::default(),
                key_frame_indices,
            }),
        )
    }

    pub fn stss(&self) -> Option<&Stss> {
        match self.payload() {
            Payload::Stss(stss) => Some(stss),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Reader, Writer};

    #[test]
    fn round_trips_key_frame_indices() {
        let atom = Atom::new_stss(vec![1, 13, 25]);
        let stss = atom.stss().unwrap();

        let mut writer = Writer::new_memory();
        stss.write(&mut writer).unwrap();

        let mut parsed = Stss::default();
        parsed
            .read(&mut Reader::from_vec(writer.into_contents()), stss.size())
            .unwrap();
        assert_eq!(parsed.key_frame_indices(), &[1, 13, 25]);
    }
}
