//! The moov-modification engine.
//!
//! `modify_moov` parses the top-level atoms of an MP4 file, hands the `moov`
//! atom to a caller-supplied transformer, and serializes the result. Two
//! disjoint strategies exist:
//!
//! - **rewrite** (input and output differ): `moov` is reordered before
//!   `mdat` if needed and every track's chunk-offset table is shifted by the
//!   byte distance `mdat` moved;
//! - **in-place** (input and output are the same file): media data is never
//!   rewritten. The new `moov` is laid over its old location when it fits
//!   (possibly capped by a `free` atom), and relocated to the end of the
//!   file with a `free` tombstone over its old bytes otherwise. Chunk
//!   offsets are untouched because `mdat` never moves.

use std::io::{Read, Seek, Write};
use std::path::Path;

use tracing::info;

use crate::atom::{Atom, FourCc, HEADER_SIZE_32};
use crate::atoms::{FREE, MDAT, MOOV, STCO};
use crate::error::{FormatError, FormatResult};
use crate::io::{MemoryReader, MemoryWriter, Reader, Writer};
use crate::reader::read_atoms;
use crate::writer::write_atom;

/// A transformation applied to the `moov` atom of a file.
pub type MoovModifier<'a> = dyn Fn(&mut Atom) -> FormatResult<()> + 'a;

fn atom_index(atoms: &[Atom], atom_type: FourCc) -> Option<usize> {
    atoms.iter().position(|a| a.atom_type() == atom_type)
}

fn atom_position(atoms: &[Atom], atom_type: FourCc) -> u64 {
    let mut position = 0;
    for atom in atoms {
        if atom.atom_type() == atom_type {
            break;
        }
        position += atom.size();
    }
    position
}

/// Shifts every chunk-offset table under `moov` by `delta` bytes.
fn adjust_track_offsets(moov: &mut Atom, delta: i64) -> FormatResult<()> {
    info!(delta, "adjusting chunk offsets");
    for track_index in moov.track_indices() {
        let trak = moov.child_mut(track_index).expect("track index is valid");
        let stbl = trak.stbl_mut().ok_or_else(|| {
            FormatError::FileFormat("track does not contain stbl atom".to_string())
        })?;
        let stco_index = stbl
            .find_index(STCO)
            .or_else(|| stbl.find_index(crate::atoms::CO64))
            .ok_or_else(|| {
                FormatError::FileFormat("track does not contain stco atom".to_string())
            })?;
        stbl.child_mut(stco_index)
            .expect("stco index is valid")
            .adjust_chunk_offsets(delta);
    }
    moov.update_subtree();
    Ok(())
}

/// Writes a free-space atom header of the given total size at the current
/// position; the body bytes are left as they are.
fn write_free_space<W: Write + Seek>(size: u32, output: &mut Writer<W>) -> FormatResult<()> {
    output.put_u32(size)?;
    output.put_fourcc(FREE.as_bytes())
}

/// Serializes `atoms[start..end]` through memory, re-parses the bytes as a
/// sanity check, and writes them at `output_position`.
fn write_atoms_in_place<W: Write + Seek>(
    atoms: &[Atom],
    start: usize,
    end: usize,
    output_position: u64,
    output: &mut Writer<W>,
) -> FormatResult<()> {
    let mut memory_output = MemoryWriter::new_memory();
    for atom in &atoms[start..end] {
        if atom.atom_type() == MDAT {
            return Err(FormatError::Unexpected(
                "media data must not be copied during an in-place update".to_string(),
            ));
        }
        write_atom(atom, &mut memory_output)?;
    }

    let contents = memory_output.into_contents();
    let memory_atoms = read_atoms(&mut MemoryReader::from_vec(contents));
    if memory_atoms.len() != end - start {
        return Err(FormatError::Unexpected(
            "invalid number of atoms to write".to_string(),
        ));
    }

    output.seek(output_position)?;
    for atom in &memory_atoms {
        write_atom(atom, output)?;
    }
    Ok(())
}

/// Rewrite path: parses `input`, transforms `moov`, repairs chunk offsets and
/// serializes every top-level atom to `output`.
pub fn modify_moov_streams<R, W>(
    modifier: &MoovModifier,
    input: &mut Reader<R>,
    output: &mut Writer<W>,
) -> FormatResult<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut top_level_atoms = read_atoms(input);
    let moov_index = atom_index(&top_level_atoms, MOOV);
    let mdat_index = atom_index(&top_level_atoms, MDAT);
    let (Some(moov_index), Some(mdat_index)) = (moov_index, mdat_index) else {
        return Err(FormatError::FileFormat("invalid video file".to_string()));
    };

    let mdat_position_before_update = atom_position(&top_level_atoms, MDAT);

    let moov = &mut top_level_atoms[moov_index];
    modifier(moov)?;
    moov.update_subtree();

    if moov_index > mdat_index {
        top_level_atoms.swap(moov_index, mdat_index);
    }
    let mdat_position_after_update = atom_position(&top_level_atoms, MDAT);
    let delta = mdat_position_after_update as i64 - mdat_position_before_update as i64;

    if delta != 0 {
        let moov_index = atom_index(&top_level_atoms, MOOV).expect("moov is present");
        adjust_track_offsets(&mut top_level_atoms[moov_index], delta)?;
    }

    for atom in &top_level_atoms {
        write_atom(atom, output)?;
    }
    output.flush()
}

/// In-place path: updates `moov` (and anything after it) inside the file
/// without touching the media data.
pub fn modify_moov_in_place<R, W>(
    modifier: &MoovModifier,
    input: &mut Reader<R>,
    output: &mut Writer<W>,
) -> FormatResult<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let size_before_update = input.size()?;
    let mut atoms = read_atoms(input);
    let moov_index = atom_index(&atoms, MOOV);
    let mdat_index = atom_index(&atoms, MDAT);
    let (Some(moov_index), Some(mdat_index)) = (moov_index, mdat_index) else {
        return Err(FormatError::FileFormat("invalid video file".to_string()));
    };

    let moov_position_before_update = atom_position(&atoms, MOOV);
    let moov = &mut atoms[moov_index];
    let moov_size_before_update = moov.size();
    modifier(moov)?;
    moov.update_subtree();
    let delta = atoms[moov_index].size() as i64 - moov_size_before_update as i64;

    if moov_index > mdat_index {
        info!("updating moov and following atoms in place after mdat");
        let end = atoms.len();
        write_atoms_in_place(&atoms, moov_index, end, moov_position_before_update, output)?;
        if delta < 0 {
            // The new moov is smaller; cap the leftover bytes as free space.
            info!(shrunk_by = -delta, "marking leftover bytes as free");
            write_free_space((-delta).max(HEADER_SIZE_32 as i64) as u32, output)?;
        }
        return output.flush();
    }

    let next = &atoms[moov_index + 1];
    let free_space_after_moov = if next.atom_type() == FREE {
        next.size() as i64
    } else {
        0
    };

    if delta == free_space_after_moov {
        info!("updating moov in place");
        write_atoms_in_place(
            &atoms,
            moov_index,
            moov_index + 1,
            moov_position_before_update,
            output,
        )?;
        return output.flush();
    }

    if delta + HEADER_SIZE_32 as i64 <= free_space_after_moov {
        info!("updating moov in place and refreshing trailing free atom");
        write_atoms_in_place(
            &atoms,
            moov_index,
            moov_index + 1,
            moov_position_before_update,
            output,
        )?;
        write_free_space((free_space_after_moov - delta) as u32, output)?;
        return output.flush();
    }

    info!(
        end_of_file = size_before_update,
        "moving moov to the end of the file"
    );
    write_atoms_in_place(&atoms, moov_index, moov_index + 1, size_before_update, output)?;
    output.seek(moov_position_before_update)?;
    write_free_space(moov_size_before_update as u32, output)?;
    output.flush()
}

/// Applies `modifier` to the `moov` atom of `input_url`, writing the result
/// to `output_url`. When the two paths are equal the update is done in place,
/// preserving the media-data byte positions whenever possible.
pub fn modify_moov(
    modifier: &MoovModifier,
    input_url: impl AsRef<Path>,
    output_url: impl AsRef<Path>,
) -> FormatResult<()> {
    let input_url = input_url.as_ref();
    let output_url = output_url.as_ref();
    if input_url.as_os_str().is_empty() || output_url.as_os_str().is_empty() {
        return Err(FormatError::Unexpected(
            "must provide non-empty input and output urls".to_string(),
        ));
    }

    if input_url != output_url {
        let mut reader = Reader::open(input_url)?;
        let mut writer = Writer::create(output_url)?;
        modify_moov_streams(modifier, &mut reader, &mut writer)
    } else {
        let mut reader = Reader::open(input_url)?;
        let mut writer = Writer::open_in_place(output_url)?;
        modify_moov_in_place(modifier, &mut reader, &mut writer)
    }
}
