//! # MP4 atom tree engine
//!
//! A QuickTime/ISO-BMFF file is a sequence of **atoms** (also called boxes).
//! Each atom starts with a header (a 32-bit size and a 4-character type tag,
//! with a 64-bit size extension for atoms larger than 4 GiB) followed by a
//! payload that is either atom-specific data, a list of child atoms, or both.
//!
//! This crate parses a file into a tree of [`atom::Atom`] nodes, lets the
//! tree be edited in memory (sample-description replacement, spherical-video
//! metadata injection, edit lists, frame-dependency tables), and serializes
//! it back out. Two serialization strategies exist:
//!
//! - a full **rewrite** to a second file, which reorders `moov` before
//!   `mdat` and repairs every chunk-offset table by the distance the media
//!   data moved;
//! - an **in-place** update of the original file, which never rewrites the
//!   media data: the new `moov` lands on top of the old one when it fits and
//!   is relocated to the end of the file otherwise.
//!
//! Atom types the engine does not model keep their payload bytes verbatim,
//! so parsing and re-serializing an untouched file reproduces it exactly.
//!
//! Typical usage goes through [`modify_moov::modify_moov`]:
//!
//! ```no_run
//! use mp4_atom::inject::inject_sdtp_to_moov;
//! use mp4_atom::modify_moov::modify_moov;
//!
//! modify_moov(&|moov| inject_sdtp_to_moov(moov), "in.mp4", "out.mp4").unwrap();
//! ```
//!
//! See ISO/IEC 14496-12 (MPEG-4 Part 12) for the box layouts.

pub mod atom;
pub mod atoms;
pub mod error;
pub mod full_atom;
pub mod inject;
pub mod io;
pub mod modify_moov;
pub mod reader;
pub mod registry;
pub mod writer;

pub use atom::{Atom, FourCc, Payload};
pub use error::{FormatError, FormatResult};
