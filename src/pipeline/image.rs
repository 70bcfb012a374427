use image::DynamicImage;
use tracing::{debug, warn};

/// Transient read hiccups and real corruption are indistinguishable here,
/// so a failed decode gets one more attempt before giving up.
const DECODE_ATTEMPTS: usize = 2;

/// Decodes arbitrary image bytes into a canonical RGB image. Never errors:
/// anything undecodable comes back as `None` and downstream treats the
/// image as containing zero faces.
pub fn load_image(data: &[u8]) -> Option<DynamicImage> {
    for attempt in 1..=DECODE_ATTEMPTS {
        if let Some(img) = decode(data) {
            return Some(img);
        }
        debug!(attempt, "image decode attempt failed");
    }
    warn!(len = data.len(), "image could not be decoded, treating as zero faces");
    None
}

fn decode(data: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory(data) {
        Ok(img) => Some(DynamicImage::ImageRgb8(img.to_rgb8())),
        Err(_) if is_heif(data) => decode_heif(data),
        Err(_) => None,
    }
}

/// ISO BMFF `ftyp` box with a HEIF brand. The image crate has no HEIC
/// support, so these go through libvips instead.
pub fn is_heif(data: &[u8]) -> bool {
    data.len() >= 12
        && &data[4..8] == b"ftyp"
        && matches!(&data[8..12], b"heic" | b"heix" | b"heif" | b"hevc" | b"mif1" | b"msf1")
}

#[cfg(not(target_env = "msvc"))]
fn decode_heif(data: &[u8]) -> Option<DynamicImage> {
    let img = libvips::VipsImage::new_from_buffer(data, "").ok()?;
    // Round-trip through PNG so every format lands in the same RGB path.
    let png = libvips::ops::pngsave_buffer(&img).ok()?;
    image::load_from_memory(&png).ok().map(|i| DynamicImage::ImageRgb8(i.to_rgb8()))
}

#[cfg(target_env = "msvc")]
fn decode_heif(_data: &[u8]) -> Option<DynamicImage> {
    // libvips doesn't compile on MSVC; HEIC uploads decode as zero faces there.
    None
}
