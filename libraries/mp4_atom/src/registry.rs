//! Process-wide mapping from atom type tag to constructor.
//!
//! The map is created lazily on first use and seeded with the built-in typed
//! atoms; registration afterwards is thread-safe. Unknown tags construct the
//! byte-preserving opaque atom.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::atom::{Atom, AtomSize, FourCc, Payload};
use crate::atoms::camm::Camm;
use crate::atoms::elst::Elst;
use crate::atoms::hdlr::Hdlr;
use crate::atoms::sdtp::Sdtp;
use crate::atoms::st3d::St3d;
use crate::atoms::stco::Stco;
use crate::atoms::stsd::Stsd;
use crate::atoms::stss::Stss;
use crate::atoms::tkhd::Tkhd;
use crate::atoms::uuid::Uuid;
use crate::atoms::visual_sample_entry::{VisualSampleEntry, VISUAL_SAMPLE_ENTRY_TYPES};
use crate::atoms::{CAMM, CO64, EDTS, ELST, HDLR, MDIA, MINF, MOOV, SDTP, ST3D, STBL, STCO, STSD, STSS, SV3D, TKHD, TRAK, UUID};

/// The payload family an atom type constructs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomKind {
    /// Byte-preserving default for unknown types.
    Opaque,
    /// Payload consists purely of child atoms.
    Container,
    Tkhd,
    Hdlr,
    Stsd,
    Stco,
    Stss,
    Sdtp,
    Elst,
    St3d,
    Uuid,
    Camm,
    VisualSampleEntry,
}

impl AtomKind {
    fn empty_payload(self) -> Payload {
        match self {
            AtomKind::Opaque => Payload::Opaque(Vec::new()),
            AtomKind::Container => Payload::Container,
            AtomKind::Tkhd => Payload::Tkhd(Tkhd::default()),
            AtomKind::Hdlr => Payload::Hdlr(Hdlr::default()),
            AtomKind::Stsd => Payload::Stsd(Stsd::default()),
            AtomKind::Stco => Payload::Stco(Stco::default()),
            AtomKind::Stss => Payload::Stss(Stss::default()),
            AtomKind::Sdtp => Payload::Sdtp(Sdtp::default()),
            AtomKind::Elst => Payload::Elst(Elst::default()),
            AtomKind::St3d => Payload::St3d(St3d::default()),
            AtomKind::Uuid => Payload::Uuid(Uuid::default()),
            AtomKind::Camm => Payload::Camm(Camm::default()),
            AtomKind::VisualSampleEntry => Payload::Visual(VisualSampleEntry::default()),
        }
    }
}

fn built_in_atoms() -> HashMap<FourCc, AtomKind> {
    let mut map = HashMap::new();
    for container in [MOOV, TRAK, MDIA, MINF, STBL, EDTS, SV3D] {
        map.insert(container, AtomKind::Container);
    }
    map.insert(TKHD, AtomKind::Tkhd);
    map.insert(HDLR, AtomKind::Hdlr);
    map.insert(STSD, AtomKind::Stsd);
    map.insert(STCO, AtomKind::Stco);
    map.insert(CO64, AtomKind::Stco);
    map.insert(STSS, AtomKind::Stss);
    map.insert(SDTP, AtomKind::Sdtp);
    map.insert(ELST, AtomKind::Elst);
    map.insert(ST3D, AtomKind::St3d);
    map.insert(UUID, AtomKind::Uuid);
    map.insert(CAMM, AtomKind::Camm);
    for tag in VISUAL_SAMPLE_ENTRY_TYPES {
        map.insert(FourCc::new(tag), AtomKind::VisualSampleEntry);
    }
    map
}

fn registry() -> &'static Mutex<HashMap<FourCc, AtomKind>> {
    static REGISTRY: OnceLock<Mutex<HashMap<FourCc, AtomKind>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(built_in_atoms()))
}

/// Registers (or replaces) the payload family for an atom type.
pub fn register_atom(atom_type: FourCc, kind: AtomKind) {
    registry()
        .lock()
        .expect("atom registry lock poisoned")
        .insert(atom_type, kind);
}

/// Creates an atom of the registered kind for the given header fields; a
/// typeless byte-preserving atom when the tag is unknown.
pub fn create_atom(header_size: AtomSize, data_size: AtomSize, atom_type: FourCc) -> Atom {
    let kind = registry()
        .lock()
        .expect("atom registry lock poisoned")
        .get(&atom_type)
        .copied()
        .unwrap_or(AtomKind::Opaque);
    Atom::from_parts(header_size, data_size, atom_type, kind.empty_payload())
}
