use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use image::codecs::jpeg::JpegEncoder;
use tracing::warn;

use crate::types::{CaptureError, Rotation};

/// Rotate a freshly captured JPEG in place.
///
/// The rotated image is written to a sibling temp file and renamed over the
/// original, so readers never observe a half-written JPEG. `Rotation::None`
/// leaves the file untouched.
pub fn rotate_in_place(path: &Path, rotation: Rotation, jpeg_quality: u8) -> Result<(), CaptureError> {
    if rotation == Rotation::None {
        return Ok(());
    }

    let post_err = |source| CaptureError::PostProcess {
        path: path.to_path_buf(),
        source,
    };

    let image = image::open(path).map_err(post_err)?;
    let rotated = match rotation {
        Rotation::None => image,
        Rotation::Cw90 => image.rotate90(),
        Rotation::Cw180 => image.rotate180(),
        Rotation::Cw270 => image.rotate270(),
    };

    replace_via_temp(path, |tmp| {
        let mut writer = BufWriter::new(File::create(tmp)?);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, jpeg_quality.clamp(1, 100));
        encoder.encode_image(&rotated.to_rgb8()).map_err(post_err)?;
        writer.flush()?;
        Ok(())
    })
}

/// Write a sibling temp file with `write` and rename it over `path`. The temp
/// file is removed when writing or renaming fails.
fn replace_via_temp<F>(path: &Path, write: F) -> Result<(), CaptureError>
where
    F: FnOnce(&Path) -> Result<(), CaptureError>,
{
    let tmp = path.with_extension("rotating.jpg");
    let result = write(&tmp).and_then(|()| fs::rename(&tmp, path).map_err(CaptureError::from));
    if result.is_err() {
        if let Err(err) = fs::remove_file(&tmp) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove {}: {err}", tmp.display());
            }
        }
    }
    result
}
