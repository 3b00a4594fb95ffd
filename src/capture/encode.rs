use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use super::phash::compute_phash;
use super::CaptureError;

const MIN_JPEG_QUALITY: u8 = 30;
const QUALITY_STEP: u8 = 10;
const MAX_SHRINK_ROUNDS: u32 = 4;

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub phash: String,
}

/// Decodes raw capture bytes, caps the longest side at `max_dimension` and
/// JPEG-encodes the result under `max_bytes`.
///
/// Quality is lowered first; if the floor is reached and the image is still
/// too large, it is shrunk by a quarter and the quality ladder restarts. After
/// `MAX_SHRINK_ROUNDS` the smallest attempt is returned as is.
pub fn prepare_image(
    raw: &[u8],
    max_dimension: u32,
    max_bytes: usize,
    quality: u8,
) -> Result<EncodedImage, CaptureError> {
    if raw.is_empty() {
        return Err(CaptureError::WindowUnavailable("empty capture buffer".into()));
    }

    let decoded =
        image::load_from_memory(raw).map_err(|err| CaptureError::Encode(err.to_string()))?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(CaptureError::WindowUnavailable("zero-sized window".into()));
    }

    let mut img = downscale(decoded, max_dimension);
    let phash = compute_phash(&img);

    let mut smallest: Option<Vec<u8>> = None;
    for round in 0..=MAX_SHRINK_ROUNDS {
        if round > 0 {
            let width = (img.width() * 3 / 4).max(1);
            let height = (img.height() * 3 / 4).max(1);
            img = img.resize_exact(width, height, FilterType::Triangle);
        }

        let mut q = quality.clamp(1, 100);
        loop {
            let data = encode_jpeg(&img, q)?;
            if data.len() <= max_bytes {
                return Ok(EncodedImage {
                    data,
                    width: img.width(),
                    height: img.height(),
                    phash,
                });
            }
            smallest = Some(data);
            if q <= MIN_JPEG_QUALITY {
                break;
            }
            q = q.saturating_sub(QUALITY_STEP).max(MIN_JPEG_QUALITY);
        }
    }

    let data = smallest.ok_or_else(|| CaptureError::Encode("no encoding attempt made".into()))?;
    log::warn!(
        "frame still {} bytes after shrinking (limit {}); sending anyway",
        data.len(),
        max_bytes
    );
    Ok(EncodedImage {
        data,
        width: img.width(),
        height: img.height(),
        phash,
    })
}

fn downscale(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let longest = img.width().max(img.height());
    if longest <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::Triangle)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let rgb = img.to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|err| CaptureError::Encode(err.to_string()))?;
    Ok(buf.into_inner())
}
