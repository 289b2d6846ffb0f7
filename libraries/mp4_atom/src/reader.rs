//! Atom tree parsing.
//!
//! `read_atom` reads one atom and, recursively, its children; the child area
//! is whatever remains of the payload after the typed payload bytes. A
//! post-condition verifies that the parse consumed exactly the declared atom
//! size, so a malformed subtree fails instead of silently desynchronizing
//! the stream.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use crate::atom::{Atom, AtomSize, FourCc, HEADER_SIZE_32, NULL_TERMINATOR_SIZE, SIZE_IS_64_BIT, SIZE_IS_TO_END_OF_FILE};
use crate::error::{FormatError, FormatResult};
use crate::io::Reader;
use crate::registry;

struct AtomHeader {
    header_size: AtomSize,
    data_size: AtomSize,
    atom_type: FourCc,
}

fn read_header<R: Read + Seek>(input: &mut Reader<R>) -> FormatResult<AtomHeader> {
    // The 32-bit size field may delegate: a value of 1 means the real size is
    // a 64-bit integer following the type tag; 0 means "to end of file".
    let size32 = input.read_u32()?;
    let atom_type = FourCc(input.read_fourcc()?);

    let mut header_size = HEADER_SIZE_32;
    let size = if size32 == SIZE_IS_64_BIT {
        header_size += 8;
        input.read_u64()?
    } else if size32 == SIZE_IS_TO_END_OF_FILE {
        input.size()? - input.tell() + header_size
    } else {
        size32 as AtomSize
    };

    if size < header_size {
        return Err(FormatError::FileFormat(format!(
            "atom structure is broken: atom_size={size} is less than header_size={header_size}"
        )));
    }

    Ok(AtomHeader {
        header_size,
        data_size: size - header_size,
        atom_type,
    })
}

fn read_child_atoms<R: Read + Seek>(input: &mut Reader<R>, parent: &mut Atom) -> FormatResult<()> {
    let children_size = parent
        .data_size()
        .saturating_sub(parent.payload_size_without_children());

    let mut sum_sizes: AtomSize = 0;
    while sum_sizes + HEADER_SIZE_32 <= children_size {
        let child = read_atom(input)?;
        sum_sizes = sum_sizes.saturating_add(child.size());
        parent.add_child(child);
    }
    Ok(())
}

/// Reads one atom (and recursively its children) from the current position.
pub fn read_atom<R: Read + Seek>(input: &mut Reader<R>) -> FormatResult<Atom> {
    let initial_pos = input.tell();
    let header = read_header(input)?;
    let atom_size = header.header_size + header.data_size;
    let expected_pos = initial_pos.saturating_add(atom_size);

    let mut atom = registry::create_atom(header.header_size, header.data_size, header.atom_type);
    atom.read_payload(input).map_err(|e| {
        warn!(atom_type = %header.atom_type, "failed to read atom payload");
        e
    })?;
    read_child_atoms(input, &mut atom)?;

    // Exactly 4 spare trailing bytes are treated as the optional null
    // terminator carried by udta and the visual sample entries.
    if expected_pos.saturating_sub(input.tell()) == NULL_TERMINATOR_SIZE {
        debug!(atom_type = %atom.atom_type(), "found null terminator");
        atom.set_has_null_terminator(true);
        input.read_u32()?;
    }

    if input.tell() != expected_pos {
        return Err(FormatError::FileFormat(format!(
            "atom [{}] structure is broken: read consumed {} bytes but expected to consume {}",
            atom.atom_type(),
            input.tell() - initial_pos,
            atom_size
        )));
    }

    Ok(atom)
}

/// Reads all top-level atoms. A malformed trailing atom stops the scan with a
/// warning; the atoms parsed so far are returned.
pub fn read_atoms<R: Read + Seek>(input: &mut Reader<R>) -> Vec<Atom> {
    let mut atoms = Vec::new();
    let size = match input.size() {
        Ok(size) => size,
        Err(_) => return atoms,
    };
    while input.tell() < size {
        match read_atom(input) {
            Ok(atom) => atoms.push(atom),
            Err(e) => {
                warn!(error = %e, "stopping top-level atom scan");
                break;
            }
        }
    }
    atoms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Payload;
    use crate::io::MemoryReader;

    fn atom_bytes(atom_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(atom_type);
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn parses_an_opaque_atom() {
        let bytes = atom_bytes(b"free", &[1, 2, 3, 4]);
        let atom = read_atom(&mut MemoryReader::from_vec(bytes)).unwrap();
        assert_eq!(atom.atom_type(), FourCc::new(b"free"));
        assert_eq!(atom.data_size(), 4);
        match atom.payload() {
            Payload::Opaque(data) => assert_eq!(data, &[1, 2, 3, 4]),
            other => panic!("expected opaque payload, got {other:?}"),
        }
    }

    #[test]
    fn parses_nested_containers() {
        let inner = atom_bytes(b"free", &[0; 8]);
        let mut moov = Vec::new();
        moov.extend_from_slice(&(8 + inner.len() as u32).to_be_bytes());
        moov.extend_from_slice(b"moov");
        moov.extend_from_slice(&inner);

        let atom = read_atom(&mut MemoryReader::from_vec(moov)).unwrap();
        assert_eq!(atom.num_children(), 1);
        assert_eq!(atom.child(0).unwrap().atom_type(), FourCc::new(b"free"));
    }

    #[test]
    fn parses_64_bit_headers() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(b"free");
        bytes.extend_from_slice(&20u64.to_be_bytes());
        bytes.extend_from_slice(&[9, 9, 9, 9]);

        let atom = read_atom(&mut MemoryReader::from_vec(bytes)).unwrap();
        assert_eq!(atom.header_size(), 16);
        assert_eq!(atom.data_size(), 4);
    }

    #[test]
    fn size_zero_extends_to_end_of_file() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(b"mdat");
        bytes.extend_from_slice(&[5; 12]);

        let atom = read_atom(&mut MemoryReader::from_vec(bytes)).unwrap();
        assert_eq!(atom.data_size(), 12);
    }

    #[test]
    fn detects_null_terminator_in_container() {
        let inner = atom_bytes(b"free", &[]);
        let mut moov = Vec::new();
        moov.extend_from_slice(&(8 + inner.len() as u32 + 4).to_be_bytes());
        moov.extend_from_slice(b"moov");
        moov.extend_from_slice(&inner);
        moov.extend_from_slice(&[0; 4]);

        let atom = read_atom(&mut MemoryReader::from_vec(moov)).unwrap();
        assert!(atom.has_null_terminator());
        assert_eq!(atom.num_children(), 1);
    }

    #[test]
    fn declared_size_below_header_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(b"free");

        let result = read_atom(&mut MemoryReader::from_vec(bytes));
        assert!(matches!(result, Err(FormatError::FileFormat(_))));
    }

    #[test]
    fn top_level_scan_stops_at_garbage() {
        let mut bytes = atom_bytes(b"free", &[1, 2]);
        bytes.extend_from_slice(&[0xFF, 0xFF]); // trailing garbage, too short

        let atoms = read_atoms(&mut MemoryReader::from_vec(bytes));
        assert_eq!(atoms.len(), 1);
    }
}
