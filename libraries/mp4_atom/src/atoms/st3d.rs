//! Stereoscopic rendering mode atom, part of the Spherical Video V2 layout.
//!
//! Container: visual sample entry.
//! https://github.com/google/spatial-media/blob/master/docs/spherical-video-v2-rfc.md

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::common::StereoMode;
use crate::atoms::ST3D;
use crate::error::FormatResult;
use crate::full_atom::VersionFlags;
use crate::io::{Reader, Writer};

const ST3D_FIXED_SIZE: AtomSize = VersionFlags::SIZE + 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct St3d {
    pub vf: VersionFlags,
    pub stereo_mode: StereoMode,
}

impl Default for St3d {
    fn default() -> Self {
        St3d {
            vf: VersionFlags::default(),
            stereo_mode: StereoMode::Mono,
        }
    }
}

impl St3d {
    pub(crate) fn read<R: Read + Seek>(&mut self, io: &mut Reader<R>) -> FormatResult<()> {
        self.vf = VersionFlags::read(io)?;
        self.stereo_mode = StereoMode::from_u8(io.read_u8()?);
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        self.vf.write(io)?;
        io.put_u8(self.stereo_mode as u8)
    }

    pub(crate) fn size(&self) -> AtomSize {
        ST3D_FIXED_SIZE
    }
}

impl Atom {
    pub fn new_st3d(stereo_mode: StereoMode) -> Atom {
        Atom::new_typed(
            ST3D,
            Payload::St3d(St3d {
                vf: VersionFlags::default(),
                stereo_mode,
            }),
        )
    }

    pub fn st3d(&self) -> Option<&St3d> {
        match self.payload() {
            Payload::St3d(st3d) => Some(st3d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Reader, Writer};

    #[test]
    fn round_trips_stereo_mode() {
        let atom = Atom::new_st3d(StereoMode::TopBottom);
        assert_eq!(atom.data_size(), 5);

        let mut writer = Writer::new_memory();
        atom.st3d().unwrap().write(&mut writer).unwrap();

        let mut parsed = St3d::default();
        parsed.read(&mut Reader::from_vec(writer.into_contents())).unwrap();
        assert_eq!(parsed.stereo_mode, StereoMode::TopBottom);
    }
}
