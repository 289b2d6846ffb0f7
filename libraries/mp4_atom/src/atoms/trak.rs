//! Track atom and its named-descendant navigation.
//!
//! The track type is resolved through `mdia/hdlr`, the sample table through
//! `mdia/minf/stbl`, and the visual sample entry through `stbl/stsd`.
//!
//! ISO/IEC 14496-12 Section 8.4

use crate::atom::Atom;
use crate::atoms::common::TrackMediaType;
use crate::atoms::{new_container, HDLR, MDIA, MINF, STBL, STSD, TRAK};

impl Atom {
    pub fn new_trak() -> Atom {
        new_container(TRAK)
    }

    /// Media type of this track, derived from the `hdlr` component subtype.
    pub fn track_type(&self) -> TrackMediaType {
        self.find_child(MDIA)
            .and_then(|mdia| mdia.find_child(HDLR))
            .and_then(|hdlr| hdlr.hdlr())
            .map(|hdlr| hdlr.track_media_type())
            .unwrap_or(TrackMediaType::Unknown)
    }

    /// The sample table of this track, if the `mdia/minf/stbl` chain exists.
    pub fn stbl(&self) -> Option<&Atom> {
        self.find_child(MDIA)?.find_child(MINF)?.find_child(STBL)
    }

    pub fn stbl_mut(&mut self) -> Option<&mut Atom> {
        self.find_child_mut(MDIA)?
            .find_child_mut(MINF)?
            .find_child_mut(STBL)
    }

    /// The first visual sample entry within this track's `stsd`, if any.
    pub fn track_visual_sample_entry(&self) -> Option<&Atom> {
        self.stbl()?
            .find_child(STSD)?
            .children()
            .iter()
            .find(|c| c.is_visual_sample_entry())
    }

    pub fn track_visual_sample_entry_mut(&mut self) -> Option<&mut Atom> {
        self.stbl_mut()?
            .find_child_mut(STSD)?
            .children_mut_internal()
            .iter_mut()
            .find(|c| c.is_visual_sample_entry())
    }
}

#[cfg(test)]
mod tests {
    use crate::atom::{Atom, FourCc};
    use crate::atoms::common::TrackMediaType;
    use crate::atoms::{new_container, MDIA, MINF, STBL};

    fn video_trak() -> Atom {
        let mut hdlr = Atom::new_hdlr();
        hdlr.hdlr_mut().unwrap().component_subtype = *b"vide";

        let mut stsd = Atom::new_stsd();
        stsd.add_child(Atom::new_visual_sample_entry(FourCc::new(b"avc1")));

        let mut stbl = new_container(STBL);
        stbl.add_child(stsd);
        stbl.add_child(Atom::new_stco());

        let mut minf = new_container(MINF);
        minf.add_child(stbl);

        let mut mdia = new_container(MDIA);
        mdia.add_child(hdlr);
        mdia.add_child(minf);

        let mut trak = Atom::new_trak();
        trak.add_child(Atom::new_tkhd());
        trak.add_child(mdia);
        trak
    }

    #[test]
    fn resolves_named_descendants() {
        let trak = video_trak();
        assert_eq!(trak.track_type(), TrackMediaType::Visual);
        assert!(trak.stbl().is_some());

        let entry = trak.track_visual_sample_entry().unwrap();
        assert_eq!(entry.atom_type(), FourCc::new(b"avc1"));
    }

    #[test]
    fn missing_chain_yields_none() {
        let trak = Atom::new_trak();
        assert_eq!(trak.track_type(), TrackMediaType::Unknown);
        assert!(trak.stbl().is_none());
        assert!(trak.track_visual_sample_entry().is_none());
    }
}
