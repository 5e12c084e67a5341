//! Perceptual and structural signature computation.
//!
//! Every signature is a lowercase hex string. Perceptual signatures are derived
//! from decoded pixels, so re-encoded or slightly resized copies of an image
//! land a small number of positions apart. Structural signatures are derived
//! from media metadata alone and only collide for identically described media.
//!
//! # Usage
//!
//! ```no_run
//! use imgdup_core::signature::{compute_signature, distance, HashMethod};
//!
//! let a = compute_signature(&std::fs::read("a.jpg").unwrap(), 8, HashMethod::Phash).unwrap();
//! let b = compute_signature(&std::fs::read("b.jpg").unwrap(), 8, HashMethod::Phash).unwrap();
//! let differing = distance(&a, &b).unwrap();
//! ```

use std::fmt;
use std::str::FromStr;

use blockhash::{blockhash144, blockhash16, blockhash256, blockhash64};
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::error::{ImgdupError, Result};
use crate::source::Media;

/// Perceptual hash algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMethod {
    /// DCT-based mean hash. Most tolerant of re-encoding.
    #[default]
    Phash,
    /// Horizontal gradient (difference) hash.
    Dhash,
    /// Grid-based blockhash; only hash sizes 4, 8, 12 and 16 are defined.
    Blockhash,
}

impl HashMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phash => "phash",
            Self::Dhash => "dhash",
            Self::Blockhash => "blockhash",
        }
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashMethod {
    type Err = ImgdupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "phash" => Ok(Self::Phash),
            "dhash" => Ok(Self::Dhash),
            "blockhash" => Ok(Self::Blockhash),
            other => Err(ImgdupError::InvalidConfig(format!(
                "unknown hash method: {other}"
            ))),
        }
    }
}

/// Hex length of a signature produced with the given hash size.
///
/// A `hash_size` of `n` yields `n * n` bits, rounded up to whole bytes.
pub fn signature_hex_len(hash_size: u32) -> usize {
    let bits = (hash_size as usize) * (hash_size as usize);
    bits.div_ceil(8) * 2
}

/// Decode `image_bytes` and compute a perceptual signature.
///
/// Fails with [`ImgdupError::SignatureComputation`] when the bytes do not
/// decode as a supported image (JPEG, PNG, GIF, WebP).
pub fn compute_signature(image_bytes: &[u8], hash_size: u32, method: HashMethod) -> Result<String> {
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| ImgdupError::SignatureComputation(format!("Failed to decode image: {e}")))?;

    signature_of_image(&image, hash_size, method)
}

/// Compute a perceptual signature from an already decoded image.
pub fn signature_of_image(image: &DynamicImage, hash_size: u32, method: HashMethod) -> Result<String> {
    if hash_size == 0 {
        return Err(ImgdupError::InvalidConfig("hash size must be positive".into()));
    }

    let bytes: Vec<u8> = match method {
        HashMethod::Phash => HasherConfig::new()
            .hash_size(hash_size, hash_size)
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .to_hasher()
            .hash_image(image)
            .as_bytes()
            .to_vec(),
        HashMethod::Dhash => HasherConfig::new()
            .hash_size(hash_size, hash_size)
            .hash_alg(HashAlg::Gradient)
            .to_hasher()
            .hash_image(image)
            .as_bytes()
            .to_vec(),
        HashMethod::Blockhash => match hash_size {
            4 => <[u8; 2]>::from(blockhash16(image)).to_vec(),
            8 => <[u8; 8]>::from(blockhash64(image)).to_vec(),
            12 => <[u8; 18]>::from(blockhash144(image)).to_vec(),
            16 => <[u8; 32]>::from(blockhash256(image)).to_vec(),
            other => {
                return Err(ImgdupError::InvalidConfig(format!(
                    "blockhash supports hash sizes 4, 8, 12 and 16, got {other}"
                )))
            }
        },
    };

    Ok(hex::encode(bytes))
}

/// Derive a cheap signature from media metadata without downloading bytes.
///
/// The digest covers the media kind, MIME type, byte size and the dimensions
/// of the largest size variant, truncated to the hex length a perceptual
/// signature of `hash_size` would have so both kinds stay comparable in shape.
pub fn structural_signature(media: &Media, hash_size: u32) -> String {
    let (width, height) = media
        .largest_variant()
        .map(|v| (v.width, v.height))
        .unwrap_or((0, 0));

    let mut hasher = Sha3_256::new();
    hasher.update(media.kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(media.mime_type.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(media.byte_size.to_le_bytes());
    hasher.update(b"|");
    hasher.update(width.to_le_bytes());
    hasher.update(height.to_le_bytes());

    let digest = hex::encode(hasher.finalize());
    let len = signature_hex_len(hash_size).clamp(1, digest.len());
    digest[..len].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MediaKind, SizeVariant};
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let band = if (x / 8 + y / 8) % 2 == 0 { 40 } else { 0 };
            Rgb([
                (((x * 255) / width) as u8).saturating_add(band),
                ((y * 255) / height) as u8,
                90,
            ])
        });
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn photo(byte_size: u64, width: u32, height: u32) -> Media {
        Media {
            kind: MediaKind::Photo,
            mime_type: Some("image/jpeg".into()),
            byte_size,
            file_id: None,
            download_ref: None,
            sizes: vec![SizeVariant {
                width,
                height,
                byte_size,
            }],
        }
    }

    #[test]
    fn test_hash_method_parse() {
        assert_eq!("PHASH".parse::<HashMethod>().unwrap(), HashMethod::Phash);
        assert_eq!("dhash".parse::<HashMethod>().unwrap(), HashMethod::Dhash);
        assert_eq!(
            "blockhash".parse::<HashMethod>().unwrap(),
            HashMethod::Blockhash
        );
        assert!("ahash".parse::<HashMethod>().is_err());
    }

    #[test]
    fn test_signature_hex_len() {
        assert_eq!(signature_hex_len(8), 16);
        assert_eq!(signature_hex_len(16), 64);
        assert_eq!(signature_hex_len(4), 4);
        assert_eq!(signature_hex_len(12), 36);
    }

    #[test]
    fn test_compute_signature_is_deterministic() {
        let png = gradient_png(64, 48);
        for method in [HashMethod::Phash, HashMethod::Dhash, HashMethod::Blockhash] {
            let first = compute_signature(&png, 8, method).unwrap();
            let second = compute_signature(&png, 8, method).unwrap();
            assert_eq!(first, second, "{method} should be deterministic");
            assert_eq!(first.len(), signature_hex_len(8), "{method} length");
        }
    }

    #[test]
    fn test_compute_signature_rejects_garbage() {
        let err = compute_signature(b"definitely not an image", 8, HashMethod::Phash).unwrap_err();
        assert!(matches!(err, ImgdupError::SignatureComputation(_)));
    }

    #[test]
    fn test_blockhash_rejects_unsupported_size() {
        let png = gradient_png(32, 32);
        assert!(compute_signature(&png, 5, HashMethod::Blockhash).is_err());
    }

    #[test]
    fn test_structural_signature_matches_identical_metadata() {
        let a = structural_signature(&photo(52_000, 1280, 720), 8);
        let b = structural_signature(&photo(52_000, 1280, 720), 8);
        let c = structural_signature(&photo(52_001, 1280, 720), 8);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
