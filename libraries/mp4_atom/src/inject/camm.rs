//! Metadata-track retyping: `mett` sample entry to `camm`.

use crate::atom::Atom;
use crate::atoms::common::TrackMediaType;
use crate::atoms::{METT, STSD};
use crate::error::{FormatError, FormatResult};

fn first_meta_track_stsd(moov: &mut Atom) -> Option<&mut Atom> {
    let track_index = moov.track_indices().into_iter().find(|i| {
        let trak = &moov.children()[*i];
        trak.track_type() == TrackMediaType::Meta && trak.stbl().is_some()
    })?;
    moov.child_mut(track_index)?.stbl_mut()?.find_child_mut(STSD)
}

/// Replaces the single `mett` sample entry of the first metadata track with a
/// default camera-motion (`camm`) sample entry.
pub fn replace_mett_with_camm(moov: &mut Atom) -> FormatResult<()> {
    let stsd = match first_meta_track_stsd(moov) {
        Some(stsd) if stsd.num_children() == 1 => stsd,
        _ => {
            return Err(FormatError::FileFormat(
                "file has no valid meta data track".to_string(),
            ))
        }
    };
    if stsd.child(0).expect("one child").atom_type() != METT {
        return Err(FormatError::FileFormat(
            "metadata track is not mett".to_string(),
        ));
    }
    stsd.delete_child(0);
    stsd.add_child(Atom::new_camm());
    moov.update_subtree();
    Ok(())
}
