//! Movie atom: the top-level container of all structural metadata.
//!
//! There must be exactly one `moov` per file, holding one or more `trak`
//! children.
//!
//! ISO/IEC 14496-12 Section 8.1

use crate::atom::Atom;
use crate::atoms::common::TrackMediaType;
use crate::atoms::{new_container, MOOV, TRAK};

impl Atom {
    pub fn new_moov() -> Atom {
        new_container(MOOV)
    }

    /// Returns all `trak` children of this atom.
    pub fn tracks(&self) -> impl Iterator<Item = &Atom> {
        self.children().iter().filter(|c| c.atom_type() == TRAK)
    }

    /// Returns the indices of all `trak` children.
    pub fn track_indices(&self) -> Vec<usize> {
        self.children()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.atom_type() == TRAK)
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the first video track of this `moov`, if any.
    pub fn first_video_track(&self) -> Option<&Atom> {
        self.tracks()
            .find(|t| t.track_type() == TrackMediaType::Visual)
    }

    pub fn first_video_track_mut(&mut self) -> Option<&mut Atom> {
        let index = self
            .track_indices()
            .into_iter()
            .find(|i| self.children()[*i].track_type() == TrackMediaType::Visual)?;
        self.child_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use crate::atom::Atom;
    use crate::atoms::common::TrackMediaType;

    fn track_of_type(subtype: &[u8; 4]) -> Atom {
        let mut hdlr = Atom::new_hdlr();
        hdlr.hdlr_mut().unwrap().component_subtype = *subtype;
        let mut mdia = crate::atoms::new_container(crate::atoms::MDIA);
        mdia.add_child(hdlr);
        let mut trak = Atom::new_trak();
        trak.add_child(Atom::new_tkhd());
        trak.add_child(mdia);
        trak
    }

    #[test]
    fn finds_first_video_track() {
        let mut moov = Atom::new_moov();
        moov.add_child(track_of_type(b"soun"));
        moov.add_child(track_of_type(b"vide"));
        moov.add_child(track_of_type(b"vide"));

        assert_eq!(moov.tracks().count(), 3);
        let video = moov.first_video_track().unwrap();
        assert_eq!(video.track_type(), TrackMediaType::Visual);
        assert_eq!(moov.track_indices(), vec![0, 1, 2]);
    }

    #[test]
    fn no_video_track_returns_none() {
        let mut moov = Atom::new_moov();
        moov.add_child(track_of_type(b"soun"));
        assert!(moov.first_video_track().is_none());
    }
}
