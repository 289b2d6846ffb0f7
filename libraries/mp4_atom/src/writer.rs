//! Atom tree serialization.

use std::io::{Seek, Write};

use crate::atom::{Atom, HEADER_SIZE_32, HEADER_SIZE_64, SIZE_IS_64_BIT};
use crate::error::{FormatError, FormatResult};
use crate::io::Writer;

fn write_atom_header<W: Write + Seek>(atom: &Atom, output: &mut Writer<W>) -> FormatResult<()> {
    let use_64_bit_size = match atom.header_size() {
        HEADER_SIZE_32 => false,
        HEADER_SIZE_64 => true,
        _ => {
            return Err(FormatError::FileFormat(format!(
                "incorrect header_size of atom ({}) writing atom header",
                atom.atom_type()
            )))
        }
    };

    if use_64_bit_size {
        output.put_u32(SIZE_IS_64_BIT)?;
        output.put_fourcc(atom.atom_type().as_bytes())?;
        output.put_u64(atom.size())
    } else {
        output.put_u32(atom.size() as u32)?;
        output.put_fourcc(atom.atom_type().as_bytes())
    }
}

/// Serializes an atom: header, typed payload, children in order, and the
/// optional null terminator.
pub fn write_atom<W: Write + Seek>(atom: &Atom, output: &mut Writer<W>) -> FormatResult<()> {
    write_atom_header(atom, output)?;
    atom.write_payload(output)?;
    for child in atom.children() {
        write_atom(child, output)?;
    }
    if atom.has_null_terminator() {
        output.put_u32(0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, FourCc};
    use crate::io::{MemoryReader, Writer};
    use crate::reader::read_atom;

    fn serialized(atom: &Atom) -> Vec<u8> {
        let mut writer = Writer::new_memory();
        write_atom(atom, &mut writer).unwrap();
        writer.into_contents()
    }

    #[test]
    fn writes_compact_header_and_payload() {
        let atom = Atom::new_opaque(FourCc::new(b"free"), vec![0xAA, 0xBB]);
        let bytes = serialized(&atom);
        assert_eq!(bytes, vec![0, 0, 0, 10, b'f', b'r', b'e', b'e', 0xAA, 0xBB]);
    }

    #[test]
    fn container_write_matches_parse() {
        let mut moov = Atom::new_moov();
        moov.add_child(Atom::new_opaque(FourCc::new(b"free"), vec![1, 2, 3]));
        moov.set_has_null_terminator(true);

        let bytes = serialized(&moov);
        let parsed = read_atom(&mut MemoryReader::from_vec(bytes.clone())).unwrap();
        assert_eq!(parsed.size(), moov.size());
        assert!(parsed.has_null_terminator());
        assert_eq!(serialized(&parsed), bytes);
    }
}
