//! Perceptual image fingerprints and EXIF GPS coordinates.
//!
//! The fingerprint is the concatenation of three independent hashes computed
//! at the same `hash_size`:
//!
//! - aHash (mean)
//! - dHash (gradient)
//! - pHash (DCT + median)
//!
//! Each bit is stored as one `0`/`1` byte so the vectors can be compared with
//! a plain city-block distance, which then equals the Hamming distance of
//! the three hashes combined.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use exif::{In, Reader, Tag, Value};
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default hash edge length (8x8 bits per algorithm).
pub const DEFAULT_HASH_SIZE: u32 = 8;

/// Largest accepted hash edge length.
pub const MAX_HASH_SIZE: u32 = 256;

/// Orientation variant a fingerprint was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rotation {
    /// As stored.
    None,
    /// 90 degrees clockwise.
    Cw90,
    /// 180 degrees.
    Cw180,
    /// 270 degrees clockwise.
    Cw270,
}

impl Rotation {
    /// Every variant, base orientation first.
    pub const ALL: [Rotation; 4] = [Self::None, Self::Cw90, Self::Cw180, Self::Cw270];

    /// Rotate `image` by this amount.
    #[must_use]
    pub fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Self::None => image.clone(),
            Self::Cw90 => image.rotate90(),
            Self::Cw180 => image.rotate180(),
            Self::Cw270 => image.rotate270(),
        }
    }
}

/// Signed decimal-degree coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoord {
    /// Latitude, negative south of the equator.
    pub latitude: f64,
    /// Longitude, negative west of Greenwich.
    pub longitude: f64,
}

impl GpsCoord {
    /// Coordinates in radians, `[lat, lon]`.
    #[must_use]
    pub fn to_radians(self) -> [f64; 2] {
        [self.latitude.to_radians(), self.longitude.to_radians()]
    }
}

/// Errors that can occur while reading an image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Failed to open or decode the image.
    #[error("Failed to load image {path}: {source}")]
    Decode {
        /// Image path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Failed to open the file for EXIF parsing.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Image path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Computes combined perceptual fingerprints.
pub struct PerceptualHasher {
    hash_size: u32,
    mean: image_hasher::Hasher,
    gradient: image_hasher::Hasher,
    dct: image_hasher::Hasher,
}

impl PerceptualHasher {
    /// Create a hasher producing `hash_size x hash_size` bits per algorithm.
    #[must_use]
    pub fn new(hash_size: u32) -> Self {
        let hash_size = hash_size.max(2);
        let config = || HasherConfig::new().hash_size(hash_size, hash_size);
        Self {
            hash_size,
            mean: config().hash_alg(HashAlg::Mean).to_hasher(),
            gradient: config().hash_alg(HashAlg::Gradient).to_hasher(),
            dct: config().hash_alg(HashAlg::Median).preproc_dct().to_hasher(),
        }
    }

    /// Edge length in use.
    #[must_use]
    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    /// Open and normalize an image to 8-bit RGB.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Decode`] if the file cannot be decoded.
    pub fn load(path: &Path) -> Result<DynamicImage, ImageError> {
        let image = image::open(path).map_err(|source| ImageError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
    }

    /// Fingerprint of `image` after applying `rotation`.
    #[must_use]
    pub fn fingerprint(&self, image: &DynamicImage, rotation: Rotation) -> Vec<u8> {
        let rotated;
        let image = if rotation == Rotation::None {
            image
        } else {
            rotated = rotation.apply(image);
            &rotated
        };

        let mut bits = Vec::new();
        for hasher in [&self.mean, &self.gradient, &self.dct] {
            let hash = hasher.hash_image(image);
            for &byte in hash.as_bytes() {
                for shift in (0..8).rev() {
                    bits.push((byte >> shift) & 1);
                }
            }
        }
        bits
    }
}

/// Read pixel dimensions without decoding the whole image.
///
/// # Errors
///
/// Returns [`ImageError::Decode`] if the header cannot be parsed.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32), ImageError> {
    image::image_dimensions(path).map_err(|source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the EXIF GPS position of an image.
///
/// Returns `Ok(None)` when the file carries no EXIF block or no complete
/// GPS position.
///
/// # Errors
///
/// Returns [`ImageError::Io`] if the file cannot be opened.
pub fn read_gps(path: &Path) -> Result<Option<GpsCoord>, ImageError> {
    let file = File::open(path).map_err(|source| ImageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            log::trace!("No EXIF data in {}: {}", path.display(), e);
            return Ok(None);
        }
    };

    let coordinate = |value_tag: Tag, ref_tag: Tag, negative: u8| -> Option<f64> {
        let field = exif.get_field(value_tag, In::PRIMARY)?;
        let degrees = dms_to_degrees(&field.value)?;
        let hemisphere = exif
            .get_field(ref_tag, In::PRIMARY)
            .and_then(|f| match &f.value {
                Value::Ascii(parts) => parts.first().and_then(|p| p.first().copied()),
                _ => None,
            });
        Some(if hemisphere == Some(negative) {
            -degrees
        } else {
            degrees
        })
    };

    let latitude = coordinate(Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S');
    let longitude = coordinate(Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W');
    Ok(match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GpsCoord {
            latitude,
            longitude,
        }),
        _ => None,
    })
}

/// Convert an EXIF degrees/minutes/seconds triple to decimal degrees.
fn dms_to_degrees(value: &Value) -> Option<f64> {
    let Value::Rational(parts) = value else {
        return None;
    };
    let component = |i: usize| {
        parts
            .get(i)
            .filter(|r| r.denom != 0)
            .map_or(0.0, |r| r.to_f64())
    };
    if parts.is_empty() || parts[0].denom == 0 {
        return None;
    }
    Some(dms(component(0), component(1), component(2)))
}

/// Degrees, minutes and seconds to decimal degrees.
#[must_use]
pub fn dms(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}
