//! Sample Dependency atom: one flags byte per video sample.
//!
//! ISO/IEC 14496-12 Section 8.6.4

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::SDTP;
use crate::error::{FormatError, FormatResult};
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

/// Sync sample that other samples depend on.
pub const I_FRAME_DESCRIPTION: u8 = 32;
/// Droppable sample; written for everything that is not a key frame so iOS
/// export can skip frames.
pub const P_FRAME_DESCRIPTION: u8 = 24;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sdtp {
    pub vf: VersionFlags,
    frame_description: Vec<u8>,
}

impl Sdtp {
    pub fn frame_description(&self) -> &[u8] {
        &self.frame_description
    }

    /// Builds one flags byte per frame between 1 and the last key-frame
    /// index: the I-frame marker at every index in `indices`, the droppable
    /// P-frame marker everywhere else.
    pub fn populate_from_key_frame_indices(&mut self, indices: &[u32]) {
        self.frame_description.clear();
        let Some(&last_index) = indices.last() else {
            return;
        };
        self.frame_description.reserve(last_index as usize);
        let mut next_key_frame = 0usize;
        for i in 0..last_index {
            if next_key_frame < indices.len() && i == indices[next_key_frame] - 1 {
                self.frame_description.push(I_FRAME_DESCRIPTION);
                next_key_frame += 1;
            } else {
                self.frame_description.push(P_FRAME_DESCRIPTION);
            }
        }
    }

    pub(crate) fn read<R: Read + Seek>(
        &mut self,
        io: &mut Reader<R>,
        data_size: AtomSize,
    ) -> FormatResult<()> {
        self.vf = VersionFlags::read(io)?;
        let num_frames = data_size.checked_sub(VersionFlags::SIZE).ok_or_else(|| {
            FormatError::FileFormat("sdtp atom smaller than its version field".to_string())
        })?;
        self.frame_description = io.read_bytes(num_frames)?;
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        self.vf.write(io)?;
        io.put_bytes(&self.frame_description)
    }

    pub(crate) fn size(&self) -> AtomSize {
        VersionFlags::SIZE + self.frame_description.len() as AtomSize
    }
}

impl Atom {
    pub fn new_sdtp() -> Atom {
        Atom::new_typed(SDTP, Payload::Sdtp(Sdtp::default()))
    }

    pub fn sdtp(&self) -> Option<&Sdtp> {
        match self.payload() {
            Payload::Sdtp(sdtp) => Some(sdtp),
            _ => None,
        }
    }

    /// Rebuilds the frame-dependency table from a key-frame index list.
    pub fn populate_sdtp_from_key_frame_indices(&mut self, indices: &[u32]) {
        if let Payload::Sdtp(sdtp) = self.payload_mut() {
            sdtp.populate_from_key_frame_indices(indices);
            self.update();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_key_frames_and_droppable_frames() {
        let mut atom = Atom::new_sdtp();
        atom.populate_sdtp_from_key_frame_indices(&[1, 13, 25]);

        let table = atom.sdtp().unwrap().frame_description();
        assert_eq!(table.len(), 25);
        for (i, flags) in table.iter().enumerate() {
            if i == 0 || i == 12 || i == 24 {
                assert_eq!(*flags, I_FRAME_DESCRIPTION, "frame {i}");
            } else {
                assert_eq!(*flags, P_FRAME_DESCRIPTION, "frame {i}");
            }
        }
        assert_eq!(atom.data_size(), 25 + 4);
    }

    #[test]
    fn empty_index_list_builds_empty_table() {
        let mut atom = Atom::new_sdtp();
        atom.populate_sdtp_from_key_frame_indices(&[]);
        assert!(atom.sdtp().unwrap().frame_description().is_empty());
    }
}
