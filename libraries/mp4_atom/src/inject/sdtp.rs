//! Frame-dependency (`sdtp`) injection.

use tracing::error;

use crate::atom::Atom;
use crate::atoms::{SDTP, STSS};
use crate::error::{FormatError, FormatResult};

/// Adds an `sdtp` atom to the first video track's sample table, derived from
/// the `stss` key-frame list. A pre-existing `sdtp` is left untouched.
pub fn inject_sdtp_to_moov(moov: &mut Atom) -> FormatResult<()> {
    let video_trak = moov.first_video_track_mut().ok_or_else(|| {
        FormatError::FileFormat("file has no video track during sdtp injection".to_string())
    })?;

    let stbl = video_trak.stbl_mut().ok_or_else(|| {
        FormatError::FileFormat("video track has no stbl atom during sdtp injection".to_string())
    })?;

    if stbl.find_child(SDTP).is_some() {
        error!("an sdtp atom is already present");
        return Ok(());
    }

    let key_frame_indices = stbl
        .find_child(STSS)
        .and_then(Atom::stss)
        .map(|stss| stss.key_frame_indices().to_vec())
        .ok_or_else(|| FormatError::FileFormat("file has no stss atom".to_string()))?;

    let mut sdtp = Atom::new_sdtp();
    sdtp.populate_sdtp_from_key_frame_indices(&key_frame_indices);
    stbl.add_child(sdtp);
    moov.update_subtree();
    Ok(())
}
