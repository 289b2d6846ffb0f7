//! End-to-end tests over synthetic MP4 byte streams: parse/serialize
//! fidelity, moov reordering with chunk-offset repair, and the in-place
//! update strategies.

use mp4_atom::atom::{Atom, FourCc};
use mp4_atom::atoms::common::StereoMode;
use mp4_atom::atoms::{
    new_container, CAMM, EDTS, FREE, MDAT, MDIA, METT, MINF, MOOV, SDTP, ST3D, STBL, STCO, SV3D,
};
use mp4_atom::inject::{
    inject_edts_to_moov, inject_projection_metadata_to_moov, inject_sdtp_to_moov,
    replace_mett_with_camm,
};
use mp4_atom::io::{MemoryReader, MemoryWriter, Reader};
use mp4_atom::modify_moov::{modify_moov, modify_moov_streams};
use mp4_atom::reader::read_atoms;
use mp4_atom::writer::write_atom;

/// Builds a track of the given handler subtype around a sample table.
fn build_track(subtype: &[u8; 4], sample_entry: Atom, chunk_offsets: &[u64]) -> Atom {
    let mut hdlr = Atom::new_hdlr();
    hdlr.hdlr_mut().unwrap().component_subtype = *subtype;

    let mut stsd = Atom::new_stsd();
    stsd.add_child(sample_entry);

    let mut stco = Atom::new_stco();
    for offset in chunk_offsets {
        stco.append_chunk_offset(*offset);
    }

    let mut stbl = new_container(STBL);
    stbl.add_child(stsd);
    stbl.add_child(stco);
    stbl.add_child(Atom::new_stss(vec![1, 3]));

    let mut minf = new_container(MINF);
    minf.add_child(stbl);

    let mut mdia = new_container(MDIA);
    mdia.add_child(hdlr);
    mdia.add_child(minf);

    let mut tkhd = Atom::new_tkhd();
    tkhd.tkhd_mut().unwrap().duration = 3000;

    let mut trak = Atom::new_trak();
    trak.add_child(tkhd);
    trak.add_child(mdia);
    trak
}

fn build_moov(chunk_offsets: &[u64]) -> Atom {
    let video_entry = Atom::new_visual_sample_entry(FourCc::new(b"avc1"));
    let mut moov = Atom::new_moov();
    moov.add_child(build_track(b"vide", video_entry, chunk_offsets));
    moov
}

fn serialize(atoms: &[&Atom]) -> Vec<u8> {
    let mut writer = MemoryWriter::new_memory();
    for atom in atoms {
        write_atom(atom, &mut writer).unwrap();
    }
    writer.into_contents()
}

fn serialized_sv3d() -> Vec<u8> {
    let mut sv3d = new_container(SV3D);
    sv3d.add_child(Atom::new_opaque(FourCc::new(b"svhd"), vec![0; 12]));
    serialize(&[&sv3d])
}

#[test]
fn untouched_file_round_trips_byte_exact() {
    let ftyp = Atom::new_opaque(
        FourCc::new(b"ftyp"),
        b"isom\x00\x00\x02\x00isomiso2avc1mp41".to_vec(),
    );
    let moov = build_moov(&[101, 202]);
    let mdat = Atom::new_opaque(MDAT, (0..64u8).collect());
    let free = Atom::new_opaque(FREE, vec![0; 16]);
    let bytes = serialize(&[&ftyp, &moov, &free, &mdat]);

    let atoms = read_atoms(&mut MemoryReader::from_vec(bytes.clone()));
    assert_eq!(atoms.len(), 4);

    let rewritten = serialize(&atoms.iter().collect::<Vec<_>>());
    assert_eq!(rewritten, bytes);
}

#[test]
fn rewrite_swaps_moov_before_mdat_and_repairs_offsets() {
    let mdat = Atom::new_opaque(MDAT, vec![0xCD; 32]);
    let moov = build_moov(&[8]); // first chunk right after the mdat header
    let bytes = serialize(&[&mdat, &moov]);

    let mut output = MemoryWriter::new_memory();
    modify_moov_streams(
        &|_moov| Ok(()),
        &mut MemoryReader::from_vec(bytes),
        &mut output,
    )
    .unwrap();

    let atoms = read_atoms(&mut MemoryReader::from_vec(output.into_contents()));
    assert_eq!(atoms[0].atom_type(), MOOV);
    assert_eq!(atoms[1].atom_type(), MDAT);

    // mdat moved from the start of the file to just after moov, so every
    // chunk offset grows by moov's size.
    let moov_size = atoms[0].size();
    let stbl = atoms[0].tracks().next().unwrap().stbl().unwrap();
    let stco = stbl.find_child(STCO).unwrap().stco().unwrap();
    let written = stco.chunk_offsets()[0] as i64 + stco.moov_size_delta();
    assert_eq!(written as u64, 8 + moov_size);
}

#[test]
fn sdtp_and_edts_inject_through_the_rewrite_engine() {
    let moov = build_moov(&[50]);
    let mdat = Atom::new_opaque(MDAT, vec![1; 16]);
    let bytes = serialize(&[&moov, &mdat]);

    let mut output = MemoryWriter::new_memory();
    modify_moov_streams(
        &|moov| {
            inject_sdtp_to_moov(moov)?;
            inject_edts_to_moov(moov)
        },
        &mut MemoryReader::from_vec(bytes),
        &mut output,
    )
    .unwrap();

    let atoms = read_atoms(&mut MemoryReader::from_vec(output.into_contents()));
    let trak = atoms[0].tracks().next().unwrap();
    assert!(trak.find_child(EDTS).is_some());
    let stbl = trak.stbl().unwrap();
    let sdtp = stbl.find_child(SDTP).unwrap().sdtp().unwrap();
    // stss lists frames 1 and 3.
    assert_eq!(sdtp.frame_description(), &[32, 24, 32]);
}

#[test]
fn replace_mett_with_camm_in_place_is_byte_predictable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.mp4");

    // mett and camm sample entries are both 16 bytes, so the moov size does
    // not change and the in-place path rewrites moov over itself.
    let mett_entry = Atom::new_opaque(METT, vec![0x55; 8]);
    let mut moov = Atom::new_moov();
    moov.add_child(build_track(b"meta", mett_entry, &[40]));
    let mdat = Atom::new_opaque(MDAT, vec![0xEE; 48]);
    std::fs::write(&path, serialize(&[&moov, &mdat])).unwrap();

    modify_moov(&|moov| replace_mett_with_camm(moov), &path, &path).unwrap();

    let camm_entry = Atom::new_camm();
    let mut expected_moov = Atom::new_moov();
    expected_moov.add_child(build_track(b"meta", camm_entry, &[40]));
    let expected = serialize(&[&expected_moov, &mdat]);

    assert_eq!(std::fs::read(&path).unwrap(), expected);
}

#[test]
fn projection_injection_rewrite_matches_in_place_media_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.mp4");
    let output_path = dir.path().join("out.mp4");
    let inplace_path = dir.path().join("inplace.mp4");

    let moov = build_moov(&[77]);
    let mdat_payload: Vec<u8> = (0..96u8).collect();
    let mdat = Atom::new_opaque(MDAT, mdat_payload.clone());
    let input_bytes = serialize(&[&moov, &mdat]);
    std::fs::write(&input_path, &input_bytes).unwrap();
    std::fs::write(&inplace_path, &input_bytes).unwrap();

    let sv3d = serialized_sv3d();

    // Rewrite to a second file.
    modify_moov(
        &|moov| inject_projection_metadata_to_moov(StereoMode::LeftRight, &sv3d, moov),
        &input_path,
        &output_path,
    )
    .unwrap();

    let mut reader = Reader::open(&output_path).unwrap();
    let atoms = read_atoms(&mut reader);
    let entry = atoms[0]
        .first_video_track()
        .unwrap()
        .track_visual_sample_entry()
        .unwrap();
    assert!(entry.find_child(ST3D).is_some());
    assert!(entry.find_child(SV3D).is_some());

    // In-place: moov grows and cannot fit, so it relocates to the end of the
    // file and a free atom covers its old location. The media bytes must not
    // move.
    modify_moov(
        &|moov| inject_projection_metadata_to_moov(StereoMode::LeftRight, &sv3d, moov),
        &inplace_path,
        &inplace_path,
    )
    .unwrap();

    let inplace_bytes = std::fs::read(&inplace_path).unwrap();
    let atoms = read_atoms(&mut MemoryReader::from_vec(inplace_bytes.clone()));
    assert_eq!(atoms[0].atom_type(), FREE);
    assert_eq!(atoms[0].size(), moov.size());
    assert_eq!(atoms[1].atom_type(), MDAT);
    assert_eq!(atoms[2].atom_type(), MOOV);

    // mdat stayed at its original byte range.
    let mdat_start = moov.size() as usize + 8;
    assert_eq!(&inplace_bytes[mdat_start..mdat_start + 96], &mdat_payload[..]);

    // The relocated moov carries the injected metadata and untouched offsets.
    let entry = atoms[2]
        .first_video_track()
        .unwrap()
        .track_visual_sample_entry()
        .unwrap();
    assert!(entry.find_child(SV3D).is_some());
    let stco = atoms[2]
        .tracks()
        .next()
        .unwrap()
        .stbl()
        .unwrap()
        .find_child(STCO)
        .unwrap()
        .stco()
        .unwrap();
    assert_eq!(stco.chunk_offsets(), &[77]);
    assert_eq!(stco.moov_size_delta(), 0);
}

#[test]
fn in_place_update_reuses_a_trailing_free_atom() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("padded.mp4");

    let moov = build_moov(&[300]);
    let free = Atom::new_opaque(FREE, vec![0; 192]);
    let mdat = Atom::new_opaque(MDAT, vec![0x77; 24]);
    std::fs::write(&path, serialize(&[&moov, &free, &mdat])).unwrap();
    let original_len = std::fs::metadata(&path).unwrap().len();

    let sv3d = serialized_sv3d();
    modify_moov(
        &|moov| inject_projection_metadata_to_moov(StereoMode::Mono, &sv3d, moov),
        &path,
        &path,
    )
    .unwrap();

    // The grown moov consumed part of the free atom; the file length and the
    // positions of everything after the free atom are unchanged.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), original_len);
    let atoms = read_atoms(&mut MemoryReader::from_vec(std::fs::read(&path).unwrap()));
    assert_eq!(atoms[0].atom_type(), MOOV);
    assert_eq!(atoms[1].atom_type(), FREE);
    assert_eq!(atoms[2].atom_type(), MDAT);
    assert_eq!(atoms[0].size() + atoms[1].size(), moov.size() + free.size());
    let entry = atoms[0]
        .first_video_track()
        .unwrap()
        .track_visual_sample_entry()
        .unwrap();
    assert!(entry.find_child(SV3D).is_some());
}

#[test]
fn in_place_shrink_after_mdat_caps_the_leftover_with_free() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tail.mp4");

    let mut moov = build_moov(&[8]);
    moov.add_child(Atom::new_opaque(FourCc::new(b"udta"), vec![0; 64]));
    moov.update_subtree();
    let mdat = Atom::new_opaque(MDAT, vec![0x99; 40]);
    std::fs::write(&path, serialize(&[&mdat, &moov])).unwrap();
    let original_len = std::fs::metadata(&path).unwrap().len();

    // Shrink moov by deleting the udta child.
    modify_moov(
        &|moov| {
            moov.delete_children(FourCc::new(b"udta"));
            Ok(())
        },
        &path,
        &path,
    )
    .unwrap();

    // File length is unchanged; the shrunken moov is followed by a free atom
    // header covering the leftover bytes.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), original_len);
    let atoms = read_atoms(&mut MemoryReader::from_vec(std::fs::read(&path).unwrap()));
    assert_eq!(atoms[0].atom_type(), MDAT);
    assert_eq!(atoms[1].atom_type(), MOOV);
    assert!(atoms[1].size() < moov.size());
    assert_eq!(atoms[2].atom_type(), FREE);
    assert_eq!(atoms[2].size(), moov.size() - atoms[1].size());

    // Chunk offsets were not touched.
    let stco = atoms[1]
        .tracks()
        .next()
        .unwrap()
        .stbl()
        .unwrap()
        .find_child(STCO)
        .unwrap()
        .stco()
        .unwrap();
    assert_eq!(stco.chunk_offsets(), &[8]);
}
