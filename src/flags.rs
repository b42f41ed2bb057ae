//! Per-pixel surface categories and conversion from the external
//! classification bits.

use log::debug;
use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{Error, Result};
use crate::geometry::Rect;

/// Exactly one category holds per pixel while a tile is processed. The output
/// band packs it as `1 << ordinal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PixelFlag {
    Water = 0,
    #[default]
    Land = 1,
    Cloud = 2,
    Haze = 3,
    CloudShadow = 4,
    MountainShadow = 5,
    Invalid = 6,
}

impl PixelFlag {
    pub const ALL: [PixelFlag; 7] = [
        PixelFlag::Water,
        PixelFlag::Land,
        PixelFlag::Cloud,
        PixelFlag::Haze,
        PixelFlag::CloudShadow,
        PixelFlag::MountainShadow,
        PixelFlag::Invalid,
    ];

    #[inline]
    pub fn bit(self) -> i32 {
        1 << (self as u8)
    }

    /// Flag band name of the category.
    pub fn name(self) -> &'static str {
        match self {
            PixelFlag::Water => "water",
            PixelFlag::Land => "land",
            PixelFlag::Cloud => "cloud",
            PixelFlag::Haze => "pot_haze",
            PixelFlag::CloudShadow => "cloud_shadow",
            PixelFlag::MountainShadow => "mountain_shadow",
            PixelFlag::Invalid => "invalid",
        }
    }

    /// Cloud-free, valid ground that a shadow can fall on.
    #[inline]
    pub fn is_clear_surface(self) -> bool {
        matches!(self, PixelFlag::Land | PixelFlag::Water | PixelFlag::Haze)
    }
}

/// Bit positions inside the external classification flag band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifBits {
    pub invalid: u8,
    pub cloud: u8,
    pub cloud_ambiguous: u8,
    pub cloud_sure: u8,
    pub cloud_buffer: u8,
    pub land: u8,
}

impl Default for ClassifBits {
    fn default() -> Self {
        Self {
            invalid: 0,
            cloud: 1,
            cloud_ambiguous: 2,
            cloud_sure: 3,
            cloud_buffer: 4,
            land: 10,
        }
    }
}

impl ClassifBits {
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("classif_bits.invalid", self.invalid),
            ("classif_bits.cloud", self.cloud),
            ("classif_bits.cloud_ambiguous", self.cloud_ambiguous),
            ("classif_bits.cloud_sure", self.cloud_sure),
            ("classif_bits.cloud_buffer", self.cloud_buffer),
            ("classif_bits.land", self.land),
        ];
        for (name, bit) in named {
            if bit >= 32 {
                return Err(Error::invalid_parameter(name, bit, "bit index must be below 32"));
            }
        }
        Ok(())
    }

    #[inline]
    fn is_set(value: i32, bit: u8) -> bool {
        (value >> bit) & 1 == 1
    }

    fn is_cloud(&self, value: i32) -> bool {
        Self::is_set(value, self.cloud) || Self::is_set(value, self.cloud_sure)
    }

    fn classify(&self, primary: i32, buffer: Option<i32>) -> PixelFlag {
        let buffered = buffer
            .map(|b| self.is_cloud(b) || Self::is_set(b, self.cloud_buffer))
            .unwrap_or(false);
        if self.is_cloud(primary) || buffered {
            PixelFlag::Cloud
        } else if Self::is_set(primary, self.invalid) {
            PixelFlag::Invalid
        } else if Self::is_set(primary, self.cloud_ambiguous) {
            PixelFlag::Haze
        } else if Self::is_set(primary, self.land) {
            PixelFlag::Land
        } else {
            PixelFlag::Water
        }
    }
}

/// Builds the flag array of a source rectangle.
///
/// `primary` and the optional cloud-buffer classification cover `source`;
/// pixels of `source` outside the scene become `Invalid`.
pub fn extract_flags(
    primary: ArrayView2<i32>,
    buffer: Option<ArrayView2<i32>>,
    bits: &ClassifBits,
    source: &Rect,
    scene_width: usize,
    scene_height: usize,
) -> Result<Array2<PixelFlag>> {
    check_shape("primary classification", primary.dim(), source)?;
    if let Some(buffer) = &buffer {
        check_shape("cloud buffer classification", buffer.dim(), source)?;
    } else {
        debug!("No cloud buffer classification, using primary flags only");
    }

    let mut flags = Array2::from_elem(source.shape(), PixelFlag::Invalid);
    match buffer {
        Some(buffer) => Zip::from(&mut flags)
            .and(&primary)
            .and(&buffer)
            .for_each(|flag, &p, &b| *flag = bits.classify(p, Some(b))),
        None => Zip::from(&mut flags)
            .and(&primary)
            .for_each(|flag, &p| *flag = bits.classify(p, None)),
    }

    let scene = Rect::new(0, 0, scene_width, scene_height);
    for ((row, col), flag) in flags.indexed_iter_mut() {
        if !scene.contains(source.x + col as isize, source.y + row as isize) {
            *flag = PixelFlag::Invalid;
        }
    }
    Ok(flags)
}

pub(crate) fn check_shape(name: &'static str, actual: (usize, usize), source: &Rect) -> Result<()> {
    if actual != source.shape() {
        return Err(Error::SizeMismatch {
            name,
            expected: source.shape(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const INVALID: i32 = 1 << 0;
    const CLOUD: i32 = 1 << 1;
    const AMBIGUOUS: i32 = 1 << 2;
    const SURE: i32 = 1 << 3;
    const BUFFER: i32 = 1 << 4;
    const LAND: i32 = 1 << 10;

    #[test]
    fn test_bits_follow_ordinal() {
        for (i, flag) in PixelFlag::ALL.iter().enumerate() {
            assert_eq!(flag.bit(), 1 << i);
        }
        assert_eq!(PixelFlag::CloudShadow.bit(), 16);
    }

    #[test]
    fn test_primary_only() {
        let primary = array![[LAND, 0, CLOUD | LAND], [SURE, AMBIGUOUS | LAND, INVALID]];
        let source = Rect::new(0, 0, 3, 2);
        let flags =
            extract_flags(primary.view(), None, &ClassifBits::default(), &source, 3, 2).unwrap();
        assert_eq!(
            flags,
            array![
                [PixelFlag::Land, PixelFlag::Water, PixelFlag::Cloud],
                [PixelFlag::Cloud, PixelFlag::Haze, PixelFlag::Invalid]
            ]
        );
    }

    #[test]
    fn test_buffer_adds_cloud() {
        let primary = array![[LAND, LAND], [0, LAND]];
        let buffer = array![[BUFFER, 0], [CLOUD, 0]];
        let source = Rect::new(0, 0, 2, 2);
        let flags = extract_flags(
            primary.view(),
            Some(buffer.view()),
            &ClassifBits::default(),
            &source,
            2,
            2,
        )
        .unwrap();
        assert_eq!(
            flags,
            array![
                [PixelFlag::Cloud, PixelFlag::Land],
                [PixelFlag::Cloud, PixelFlag::Land]
            ]
        );
    }

    #[test]
    fn test_outside_scene_is_invalid() {
        let primary = Array2::from_elem((3, 3), LAND);
        let source = Rect::new(-1, -1, 3, 3);
        let flags =
            extract_flags(primary.view(), None, &ClassifBits::default(), &source, 2, 2).unwrap();
        assert_eq!(flags[[0, 0]], PixelFlag::Invalid);
        assert_eq!(flags[[0, 2]], PixelFlag::Invalid);
        assert_eq!(flags[[1, 1]], PixelFlag::Land);
        assert_eq!(flags[[2, 2]], PixelFlag::Land);
    }

    #[test]
    fn test_shape_mismatch() {
        let primary = Array2::from_elem((2, 3), LAND);
        let source = Rect::new(0, 0, 2, 2);
        assert!(matches!(
            extract_flags(primary.view(), None, &ClassifBits::default(), &source, 2, 2),
            Err(Error::SizeMismatch { .. })
        ));
    }
}
