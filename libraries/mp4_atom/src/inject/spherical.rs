//! Spherical-video metadata injection.
//!
//! V1 metadata is a `uuid` atom on the video track carrying an RDF/XML
//! payload; V2 metadata is the `st3d` + `sv3d` atom pair inside the visual
//! sample entry.
//!
//! https://github.com/google/spatial-media/blob/master/docs/spherical-video-rfc.md
//! https://github.com/google/spatial-media/blob/master/docs/spherical-video-v2-rfc.md

use crate::atom::Atom;
use crate::atoms::common::StereoMode;
use crate::atoms::{ST3D, SV3D, UUID};
use crate::error::{FormatError, FormatResult};
use crate::io::MemoryReader;
use crate::reader::read_atom;

const SPHERICAL_V1_UUID: [u8; 16] = [
    0xFF, 0xCC, 0x82, 0x63, 0xF8, 0x55, 0x4A, 0x93, 0x88, 0x14, 0x58, 0x7A, 0x02, 0x52, 0x1F,
    0xDD,
];

const SPHERICAL_V1_CROPPED_EQUIRECT_XML: &str = r#"
<rdf:SphericalVideo xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
                    xmlns:GSpherical="http://ns.google.com/videos/1.0/spherical/">
  <GSpherical:Spherical>true</GSpherical:Spherical>
  <GSpherical:Stitched>true</GSpherical:Stitched>
  <GSpherical:ProjectionType>equirectangular</GSpherical:ProjectionType>
  <GSpherical:StitchingSoftware>{stitcher}</GSpherical:StitchingSoftware>
  <GSpherical:SourceCount>2</GSpherical:SourceCount>
  <GSpherical:StereoMode>{stereo_mode}</GSpherical:StereoMode>
  <GSpherical:CroppedAreaLeftPixels>{crop_left}</GSpherical:CroppedAreaLeftPixels>
  <GSpherical:CroppedAreaTopPixels>{crop_top}</GSpherical:CroppedAreaTopPixels>
  <GSpherical:CroppedAreaImageWidthPixels>{width}</GSpherical:CroppedAreaImageWidthPixels>
  <GSpherical:CroppedAreaImageHeightPixels>{height}</GSpherical:CroppedAreaImageHeightPixels>
  <GSpherical:FullPanoWidthPixels>{full_width}</GSpherical:FullPanoWidthPixels>
  <GSpherical:FullPanoHeightPixels>{full_height}</GSpherical:FullPanoHeightPixels>
</rdf:SphericalVideo>
"#;

/// Settings of the Spherical V1 XML payload.
#[derive(Clone, Debug)]
pub struct SphericalV1Params {
    pub stitcher: String,
    pub stereo_mode: StereoMode,
    /// Cropped image size in pixels.
    pub width: u32,
    pub height: u32,
    /// Horizontal and vertical field of view in degrees.
    pub fov_x_degrees: f64,
    pub fov_y_degrees: f64,
}

fn stereo_mode_as_str(stereo_mode: StereoMode) -> &'static str {
    match stereo_mode {
        StereoMode::LeftRight => "left-right",
        StereoMode::TopBottom => "top-bottom",
        StereoMode::Mono => "mono",
    }
}

fn create_uuid_atom(params: &SphericalV1Params) -> FormatResult<Atom> {
    if params.width == 0
        || params.height == 0
        || params.fov_x_degrees <= 0.0
        || params.fov_x_degrees > 360.0
        || params.fov_y_degrees <= 0.0
        || params.fov_y_degrees > 180.0
    {
        return Err(FormatError::Unexpected(
            "invalid v1 metadata settings".to_string(),
        ));
    }

    // The full panorama extent is derived from the captured field of view;
    // the crop rectangle centers the image within it.
    let full_width = params.width as f64 * 360.0 / params.fov_x_degrees;
    let full_height = params.height as f64 * 180.0 / params.fov_y_degrees;
    let crop_left = ((full_width - params.width as f64) / 2.0) as i64;
    let crop_top = ((full_height - params.height as f64) / 2.0) as i64;

    let payload = SPHERICAL_V1_CROPPED_EQUIRECT_XML
        .replace("{stitcher}", &params.stitcher)
        .replace("{stereo_mode}", stereo_mode_as_str(params.stereo_mode))
        .replace("{crop_left}", &crop_left.to_string())
        .replace("{crop_top}", &crop_top.to_string())
        .replace("{width}", &params.width.to_string())
        .replace("{height}", &params.height.to_string())
        .replace("{full_width}", &format!("{:.0}", full_width.round()))
        .replace("{full_height}", &format!("{:.0}", full_height.round()));

    Ok(Atom::new_uuid(SPHERICAL_V1_UUID, payload.into_bytes()))
}

/// Inserts V1 (`uuid`) and/or V2 (`st3d` + `sv3d`) spherical metadata into
/// the first video track, removing any previous copies.
fn inject_spherical_metadata_to_moov(
    stereo_mode: StereoMode,
    sv3d: Option<Atom>,
    v1_metadata: Option<Atom>,
    moov: &mut Atom,
) -> FormatResult<()> {
    let video_trak = moov.first_video_track_mut().ok_or_else(|| {
        FormatError::FileFormat("file has no video track during spherical injection".to_string())
    })?;

    if let Some(v1_metadata) = v1_metadata {
        video_trak.delete_children(UUID);
        video_trak.add_child(v1_metadata);
    }

    if let Some(sv3d) = sv3d {
        let visual_sample_entry =
            video_trak.track_visual_sample_entry_mut().ok_or_else(|| {
                FormatError::FileFormat("track has no visual sample entry".to_string())
            })?;

        visual_sample_entry.delete_children(ST3D);
        visual_sample_entry.delete_children(SV3D);
        visual_sample_entry.add_child(Atom::new_st3d(stereo_mode));
        visual_sample_entry.add_child(sv3d);
    }

    moov.update_subtree();
    Ok(())
}

/// Parses `serialized_sv3d` and injects it (with a matching `st3d`) into the
/// first video track's visual sample entry.
pub fn inject_projection_metadata_to_moov(
    stereo_mode: StereoMode,
    serialized_sv3d: &[u8],
    moov: &mut Atom,
) -> FormatResult<()> {
    let mut reader = MemoryReader::from_vec(serialized_sv3d.to_vec());
    let sv3d = read_atom(&mut reader)
        .map_err(|_| FormatError::FileFormat("cannot parse the sv3d atom".to_string()))?;
    inject_spherical_metadata_to_moov(stereo_mode, Some(sv3d), None, moov)
}

/// Builds the Spherical V1 `uuid` atom from `params` and injects it into the
/// first video track, replacing any prior `uuid` children.
pub fn inject_spherical_v1_metadata_to_moov(
    params: &SphericalV1Params,
    moov: &mut Atom,
) -> FormatResult<()> {
    let uuid = create_uuid_atom(params)?;
    inject_spherical_metadata_to_moov(params.stereo_mode, None, Some(uuid), moov)
}
