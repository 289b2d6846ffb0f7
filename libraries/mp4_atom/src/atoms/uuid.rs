//! User-extension atom: a 16-byte identifier followed by opaque value bytes.
//!
//! Used as a child of `trak` to store the Spherical V1 XML metadata.
//! https://github.com/google/spatial-media/blob/master/docs/spherical-video-rfc.md

use std::io::{Read, Seek, Write};

use crate::atom::{Atom, AtomSize, Payload};
use crate::atoms::UUID;
use crate::error::{FormatError, FormatResult};
use crate::io::{Reader, Writer};

pub const UUID_LEN: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Uuid {
    pub uuid: [u8; UUID_LEN],
    pub value: Vec<u8>,
}

impl Uuid {
    pub(crate) fn read<R: Read + Seek>(
        &mut self,
        io: &mut Reader<R>,
        data_size: AtomSize,
    ) -> FormatResult<()> {
        let value_size = data_size.checked_sub(UUID_LEN as AtomSize).ok_or_else(|| {
            FormatError::FileFormat(format!(
                "uuid atom payload is shorter than its {UUID_LEN}-byte identifier"
            ))
        })?;
        self.uuid = io
            .read_bytes(UUID_LEN as AtomSize)?
            .try_into()
            .map_err(|_| FormatError::Unexpected("uuid read returned wrong length".to_string()))?;
        self.value = io.read_bytes(value_size)?;
        Ok(())
    }

    pub(crate) fn write<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        io.put_bytes(&self.uuid)?;
        io.put_bytes(&self.value)
    }

    pub(crate) fn size(&self) -> AtomSize {
        (UUID_LEN + self.value.len()) as AtomSize
    }
}

impl Atom {
    pub fn new_uuid(uuid: [u8; UUID_LEN], value: Vec<u8>) -> Atom {
        Atom::new_typed(UUID, Payload::Uuid(Uuid { uuid, value }))
    }

    pub fn uuid(&self) -> Option<&Uuid> {
        match self.payload() {
            Payload::Uuid(uuid) => Some(uuid),
            _ => None,
        }
    }
}
