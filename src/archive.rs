use std::io::{Cursor, Write};

use anyhow::Result;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::pipeline::matcher::MatchedImage;

pub const ARCHIVE_NAME: &str = "matched_photos.zip";

/// Builds the downloadable archive in memory. Entry names are bare
/// filenames with any directory components stripped; duplicate names are
/// written as-is, so last write wins on extraction.
pub fn package_matched(matched: &[MatchedImage]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for img in matched {
        zip.start_file(base_name(&img.name), options)?;
        zip.write_all(&img.data)?;
    }
    Ok(zip.finish()?.into_inner())
}

fn base_name(name: &str) -> &str {
    name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name)
}
