use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Frames closer than this are treated as visually unchanged.
pub const PHASH_CHANGE_THRESHOLD: u32 = 8;

pub fn compute_phash(img: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    hasher.hash_image(img).to_base64()
}

pub fn compute_hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}

/// True when both hashes exist and are within `PHASH_CHANGE_THRESHOLD`.
pub fn looks_unchanged(current: Option<&str>, previous: Option<&str>) -> bool {
    match (current, previous) {
        (Some(current), Some(previous)) => {
            compute_hamming_distance(current, previous) < PHASH_CHANGE_THRESHOLD
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(invert: bool) -> DynamicImage {
        let img = RgbImage::from_fn(64, 64, |x, _| {
            let v = (x * 4) as u8;
            if invert {
                Rgb([255 - v, 255 - v, 255 - v])
            } else {
                Rgb([v, v, v])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let a = compute_phash(&gradient(false));
        let b = compute_phash(&gradient(false));
        assert_eq!(compute_hamming_distance(&a, &b), 0);
        assert!(looks_unchanged(Some(&a), Some(&b)));
    }

    #[test]
    fn inverted_image_is_a_change() {
        let a = compute_phash(&gradient(false));
        let b = compute_phash(&gradient(true));
        assert!(compute_hamming_distance(&a, &b) >= PHASH_CHANGE_THRESHOLD);
        assert!(!looks_unchanged(Some(&a), Some(&b)));
    }

    #[test]
    fn garbage_or_missing_hashes_never_match() {
        assert_eq!(compute_hamming_distance("!!", "??"), u32::MAX);
        assert!(!looks_unchanged(None, Some("abc")));
        assert!(!looks_unchanged(Some("abc"), None));
    }
}
