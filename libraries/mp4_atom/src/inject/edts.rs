//! Edit-list (`edts/elst`) injection.

use crate::atom::Atom;
use crate::atoms::elst::ElstEntry;
use crate::atoms::{new_container, EDTS, MDIA, TKHD};
use crate::error::{FormatError, FormatResult};

/// Ensures every track carries an `edts/elst` immediately before its `mdia`.
///
/// An existing `edts` is moved to the right position; otherwise a new one is
/// created whose single `elst` entry spans the track's `tkhd` duration.
pub fn inject_edts_to_moov(moov: &mut Atom) -> FormatResult<()> {
    for track_index in moov.track_indices() {
        let trak = moov.child_mut(track_index).expect("track index is valid");
        if trak.find_index(MDIA).is_none() {
            return Err(FormatError::FileFormat("trak has no mdia atom".to_string()));
        }

        let edts = match trak.find_index(EDTS) {
            Some(index) => trak.delete_child(index).expect("edts index is valid"),
            None => {
                let duration = trak
                    .find_child(TKHD)
                    .and_then(Atom::tkhd)
                    .map(|tkhd| tkhd.duration)
                    .ok_or_else(|| {
                        FormatError::FileFormat("trak has no tkhd atom".to_string())
                    })?;
                let mut elst = Atom::new_elst();
                elst.add_edit_list_entry(ElstEntry::with_duration(duration));
                let mut edts = new_container(EDTS);
                edts.add_child(elst);
                edts
            }
        };

        let mdia_index = trak.find_index(MDIA).expect("mdia presence checked above");
        trak.add_child_at(edts, mdia_index);
    }
    moov.update_subtree();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ELST;
    use crate::modify_moov::test_support::moov_with_video_track;

    #[test]
    fn creates_edts_before_mdia_with_tkhd_duration() {
        let mut moov = moov_with_video_track(&[64]);
        inject_edts_to_moov(&mut moov).unwrap();

        let trak = moov.tracks().next().unwrap();
        let edts_index = trak.find_index(EDTS).unwrap();
        let mdia_index = trak.find_index(MDIA).unwrap();
        assert_eq!(edts_index + 1, mdia_index);

        let elst = trak
            .find_child(EDTS)
            .unwrap()
            .find_child(ELST)
            .unwrap()
            .elst()
            .unwrap();
        assert_eq!(elst.entries().len(), 1);
        assert_eq!(elst.entries()[0].segment_duration, 1000);
        assert_eq!(elst.entries()[0].media_rate_integer, 1);
    }

    #[test]
    fn moves_existing_edts_in_front_of_mdia() {
        let mut moov = moov_with_video_track(&[64]);
        // Misplace an edts at the end of the trak.
        {
            let trak = moov.child_mut(0).unwrap();
            let mut elst = Atom::new_elst();
            elst.add_edit_list_entry(ElstEntry::with_duration(77));
            let mut edts = new_container(EDTS);
            edts.add_child(elst);
            trak.add_child(edts);
        }
        moov.update_subtree();

        inject_edts_to_moov(&mut moov).unwrap();

        let trak = moov.tracks().next().unwrap();
        let edts_index = trak.find_index(EDTS).unwrap();
        let mdia_index = trak.find_index(MDIA).unwrap();
        assert_eq!(edts_index + 1, mdia_index);

        // The original entry is preserved rather than rebuilt.
        let elst = trak
            .find_child(EDTS)
            .unwrap()
            .find_child(ELST)
            .unwrap()
            .elst()
            .unwrap();
        assert_eq!(elst.entries()[0].segment_duration, 77);
    }
}
