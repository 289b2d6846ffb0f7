//! The polymorphic atom tree node.
//!
//! Every node carries a header (type tag, header size, payload size), a typed
//! payload and an ordered list of child atoms. Typed payloads know their own
//! byte codec; unknown atom types fall back to [`Payload::Opaque`], which
//! preserves the raw payload bytes across a parse/serialize round trip.
//!
//! Parent identity is carried by ownership: a node is reachable for mutation
//! only through its parent, and the mutating operations on [`Atom`] recompute
//! the sizes of the node they are invoked on. After a batch of deep edits,
//! [`Atom::update_subtree`] restores size consistency bottom-up.

use std::fmt;
use std::io::{Read, Seek, Write};

use tracing::warn;

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
use crate::atoms::visual_sample_entry::VisualSampleEntry;
use crate::error::FormatResult;
use crate::io::{Reader, Writer};

/// Atom and descriptor sizes are 64-bit in the MP4 spec.
pub type AtomSize = u64;

/// A 32-bit size field of 0 means the atom extends to the end of the file.
pub const SIZE_IS_TO_END_OF_FILE: u32 = 0;
/// A 32-bit size field of 1 means a 64-bit size follows the type tag.
pub const SIZE_IS_64_BIT: u32 = 1;
/// Compact header: 32-bit size + type tag.
pub const HEADER_SIZE_32: AtomSize = 8;
/// Extended header: 32-bit size marker + type tag + 64-bit size.
pub const HEADER_SIZE_64: AtomSize = 16;
/// Size of the optional trailing null terminator.
pub const NULL_TERMINATOR_SIZE: AtomSize = 4;

/// A four-character atom type tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(tag: &[u8; 4]) -> Self {
        FourCc(*tag)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(&self.0).unwrap_or("????"))
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Typed atom payloads. `Opaque` is the default for unregistered types and
/// preserves the payload bytes verbatim; `Container` is for atoms whose
/// payload consists purely of child atoms.
pub enum Payload {
    Opaque(Vec<u8>),
    Container,
    Tkhd(Tkhd),
    Hdlr(Hdlr),
    Stsd(Stsd),
    Stco(Stco),
    Stss(Stss),
    Sdtp(Sdtp),
    Elst(Elst),
    St3d(St3d),
    Uuid(Uuid),
    Camm(Camm),
    Visual(VisualSampleEntry),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Opaque(data) => {
                let capped = &data[..data.len().min(8)];
                if data.len() > 8 {
                    write!(f, "Opaque({capped:?} ... {} bytes)", data.len())
                } else {
                    write!(f, "Opaque({capped:?})")
                }
            }
            Payload::Container => f.write_str("Container"),
            Payload::Tkhd(v) => v.fmt(f),
            Payload::Hdlr(v) => v.fmt(f),
            Payload::Stsd(v) => v.fmt(f),
            Payload::Stco(v) => v.fmt(f),
            Payload::Stss(v) => v.fmt(f),
            Payload::Sdtp(v) => v.fmt(f),
            Payload::Elst(v) => v.fmt(f),
            Payload::St3d(v) => v.fmt(f),
            Payload::Uuid(v) => v.fmt(f),
            Payload::Camm(v) => v.fmt(f),
            Payload::Visual(v) => v.fmt(f),
        }
    }
}

pub struct Atom {
    atom_type: FourCc,
    header_size: AtomSize,
    data_size: AtomSize,
    has_null_terminator: bool,
    payload: Payload,
    children: Vec<Atom>,
}

impl Atom {
    /// Creates an atom from parsed header fields. A zero `header_size` with a
    /// non-zero `data_size` asks for the header size to be derived from the
    /// payload size, promoting to the extended header when needed.
    pub(crate) fn from_parts(
        header_size: AtomSize,
        data_size: AtomSize,
        atom_type: FourCc,
        payload: Payload,
    ) -> Atom {
        let mut atom = Atom {
            atom_type,
            header_size,
            data_size,
            has_null_terminator: false,
            payload,
            children: Vec::new(),
        };
        if header_size == 0 && data_size != 0 {
            atom.compute_header_size();
        }
        atom
    }

    /// Creates an empty typed atom and computes its initial sizes.
    pub(crate) fn new_typed(atom_type: FourCc, payload: Payload) -> Atom {
        let mut atom = Atom::from_parts(0, 0, atom_type, payload);
        atom.update();
        atom
    }

    /// Creates an opaque atom around raw payload bytes.
    pub fn new_opaque(atom_type: FourCc, data: Vec<u8>) -> Atom {
        Atom::new_typed(atom_type, Payload::Opaque(data))
    }

    pub fn atom_type(&self) -> FourCc {
        self.atom_type
    }

    pub(crate) fn set_atom_type(&mut self, atom_type: FourCc) {
        self.atom_type = atom_type;
    }

    /// Size of the atom header in bytes, 8 or 16.
    pub fn header_size(&self) -> AtomSize {
        self.header_size
    }

    /// Size of the atom payload in bytes, including children and the null
    /// terminator if present.
    pub fn data_size(&self) -> AtomSize {
        self.data_size
    }

    /// Total size of the atom in bytes.
    pub fn size(&self) -> AtomSize {
        self.header_size + self.data_size
    }

    /// Some atoms carry a 4-byte all-zero terminator after their children;
    /// known carriers are `udta` and the visual sample entries.
    pub fn has_null_terminator(&self) -> bool {
        self.has_null_terminator
    }

    pub fn set_has_null_terminator(&mut self, value: bool) {
        if self.has_null_terminator != value {
            self.has_null_terminator = value;
            self.update();
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> &[Atom] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&Atom> {
        self.children.get(index)
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut Atom> {
        self.children.get_mut(index)
    }

    /// Direct mutable access to the child list. Callers that mutate children
    /// through this must restore size consistency with [`Atom::update_subtree`].
    pub(crate) fn children_mut_internal(&mut self) -> &mut [Atom] {
        &mut self.children
    }

    /// Appends a child atom.
    pub fn add_child(&mut self, child: Atom) {
        self.add_child_at(child, self.children.len());
    }

    /// Inserts a child atom at the given index; out-of-bounds indices are
    /// logged and ignored.
    pub fn add_child_at(&mut self, child: Atom, index: usize) {
        if index > self.children.len() {
            warn!(
                index,
                len = self.children.len(),
                "add_child_at index out of bounds"
            );
            return;
        }
        self.children.insert(index, child);
        self.update();
    }

    /// Removes and returns the child at the given index.
    pub fn delete_child(&mut self, index: usize) -> Option<Atom> {
        if index >= self.children.len() {
            warn!(
                index,
                len = self.children.len(),
                "delete_child index out of bounds"
            );
            return None;
        }
        let child = self.children.remove(index);
        self.update();
        Some(child)
    }

    /// Returns the first child with the given type tag.
    pub fn find_child(&self, atom_type: FourCc) -> Option<&Atom> {
        self.children.iter().find(|c| c.atom_type == atom_type)
    }

    pub fn find_child_mut(&mut self, atom_type: FourCc) -> Option<&mut Atom> {
        self.children.iter_mut().find(|c| c.atom_type == atom_type)
    }

    /// Returns the index of the first child with the given type tag.
    pub fn find_index(&self, atom_type: FourCc) -> Option<usize> {
        self.children.iter().position(|c| c.atom_type == atom_type)
    }

    /// Removes every child with the given type tag.
    pub fn delete_children(&mut self, atom_type: FourCc) {
        self.children.retain(|c| c.atom_type != atom_type);
        self.update();
    }

    /// Payload size excluding children and the null terminator.
    pub fn payload_size_without_children(&self) -> AtomSize {
        match &self.payload {
            Payload::Opaque(data) => data.len() as AtomSize,
            Payload::Container => 0,
            Payload::Tkhd(v) => v.size(),
            Payload::Hdlr(v) => v.size(),
            Payload::Stsd(v) => v.size(),
            Payload::Stco(v) => v.size(self.atom_type),
            Payload::Stss(v) => v.size(),
            Payload::Sdtp(v) => v.size(),
            Payload::Elst(v) => v.size(),
            Payload::St3d(v) => v.size(),
            Payload::Uuid(v) => v.size(),
            Payload::Camm(v) => v.size(),
            Payload::Visual(v) => v.size(),
        }
    }

    /// Recomputes this atom's `data_size` and `header_size` from its payload
    /// and the current sizes of its children.
    pub fn update(&mut self) {
        let children_size: AtomSize = self.children.iter().map(Atom::size).sum();
        let terminator = if self.has_null_terminator {
            NULL_TERMINATOR_SIZE
        } else {
            0
        };
        self.data_size = self.payload_size_without_children() + children_size + terminator;
        self.compute_header_size();
    }

    /// Recomputes sizes for the whole subtree bottom-up. Call after mutating
    /// descendants directly through `child_mut` or typed payload access.
    pub fn update_subtree(&mut self) {
        for child in &mut self.children {
            child.update_subtree();
        }
        self.update();
    }

    fn compute_header_size(&mut self) {
        self.header_size = if HEADER_SIZE_32 + self.data_size > u32::MAX as AtomSize {
            HEADER_SIZE_64
        } else {
            HEADER_SIZE_32
        };
    }

    /// Reads the payload (excluding children) from the stream; dispatched to
    /// the typed codec of this atom.
    pub(crate) fn read_payload<R: Read + Seek>(&mut self, io: &mut Reader<R>) -> FormatResult<()> {
        let data_size = self.data_size;
        let atom_type = self.atom_type;
        match &mut self.payload {
            Payload::Opaque(data) => {
                *data = io.read_bytes(data_size)?;
                Ok(())
            }
            Payload::Container => Ok(()),
            Payload::Tkhd(v) => v.read(io),
            Payload::Hdlr(v) => v.read(io, data_size),
            Payload::Stsd(v) => v.read(io),
            Payload::Stco(v) => v.read(io, atom_type, data_size),
            Payload::Stss(v) => v.read(io, data_size),
            Payload::Sdtp(v) => v.read(io, data_size),
            Payload::Elst(v) => v.read(io, data_size),
            Payload::St3d(v) => v.read(io),
            Payload::Uuid(v) => v.read(io, data_size),
            Payload::Camm(v) => v.read(io),
            Payload::Visual(v) => v.read(io),
        }
    }

    /// Writes the payload (excluding children) to the stream.
    pub(crate) fn write_payload<W: Write + Seek>(&self, io: &mut Writer<W>) -> FormatResult<()> {
        match &self.payload {
            Payload::Opaque(data) => io.put_bytes(data),
            Payload::Container => Ok(()),
            Payload::Tkhd(v) => v.write(io),
            Payload::Hdlr(v) => v.write(io),
            Payload::Stsd(v) => v.write(io, self.children.len() as u32),
            Payload::Stco(v) => v.write(io, self.atom_type),
            Payload::Stss(v) => v.write(io),
            Payload::Sdtp(v) => v.write(io),
            Payload::Elst(v) => v.write(io),
            Payload::St3d(v) => v.write(io),
            Payload::Uuid(v) => v.write(io),
            Payload::Camm(v) => v.write(io),
            Payload::Visual(v) => v.write(io),
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("type", &self.atom_type)
            .field("size", &self.size())
            .field("header_size", &self.header_size)
            .field("data_size", &self.data_size)
            .field("null_terminator", &self.has_null_terminator)
            .field("payload", &self.payload)
            .field("children", &self.children)
            .finish()
    }
}
