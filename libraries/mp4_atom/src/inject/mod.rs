//! Pure `moov`-tree mutations used by the capture pipeline: frame-dependency
//! and edit-list injection, metadata-track retyping, and spherical-video
//! metadata injection.

mod camm;
mod edts;
mod sdtp;
mod spherical;

pub use camm::replace_mett_with_camm;
pub use edts::inject_edts_to_moov;
pub use sdtp::inject_sdtp_to_moov;
pub use spherical::{
    inject_projection_metadata_to_moov, inject_spherical_v1_metadata_to_moov, SphericalV1Params,
};
