//! Run configuration: analysis mode and the tunable constants of the detector.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::flags::ClassifBits;

/// How candidate shadow regions are judged spectrally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnalysisMode {
    /// Land and water pixels are compared against separate references.
    #[default]
    LandWater,
    /// Both cluster bands contribute to one darkness value.
    MultiBand,
    /// Only the first cluster band is used.
    SingleBand,
}

impl FromStr for AnalysisMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LandWater" => Ok(AnalysisMode::LandWater),
            "MultiBand" => Ok(AnalysisMode::MultiBand),
            "SingleBand" => Ok(AnalysisMode::SingleBand),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisMode::LandWater => "LandWater",
            AnalysisMode::MultiBand => "MultiBand",
            AnalysisMode::SingleBand => "SingleBand",
        };
        f.write_str(name)
    }
}

pub const MAX_CLOUD_HEIGHT: f64 = 8000.0;
pub const MAX_TILE_DIMENSION: usize = 1400;
pub const MIN_CLOUD_BASE: f32 = 100.0;
pub const MAX_CLOUD_TOP: f32 = 10000.0;
/// Relative contrast `(region - reference) / |reference|`, not a raw reflectance sum.
pub const DARKNESS_THRESHOLD: f32 = -0.15;
pub const OUTLIER_THRESHOLD: f32 = 0.94;
pub const GROWING_ITERATIONS: usize = 1;
/// Pixels per shadow component; smaller components are dropped.
pub const FRAGMENTATION_THRESHOLD: usize = 10;

/// Everything a scene run needs besides the samples themselves.
///
/// Built once, validated once, then shared read-only by every tile worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowConfig {
    pub mode: AnalysisMode,
    pub compute_mountain_shadow: bool,
    /// Cloud height (m) used to size the search border.
    pub max_cloud_height: f64,
    pub max_tile_dimension: usize,
    /// Lowest cloud base (m above ground) swept by the shadow caster.
    pub min_cloud_base: f32,
    /// Highest cloud top (m above ground) swept by the shadow caster.
    pub max_cloud_top: f32,
    /// Relative contrast a candidate region must fall below to count as shadow.
    pub darkness_threshold: f32,
    /// Fraction of valid region pixels that must be darker than their reference.
    pub outlier_threshold: f32,
    pub growing_iterations: usize,
    /// Cloud-shadow components smaller than this (pixels) are discarded.
    pub fragmentation_threshold: usize,
    pub classif_bits: ClassifBits,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::default(),
            compute_mountain_shadow: true,
            max_cloud_height: MAX_CLOUD_HEIGHT,
            max_tile_dimension: MAX_TILE_DIMENSION,
            min_cloud_base: MIN_CLOUD_BASE,
            max_cloud_top: MAX_CLOUD_TOP,
            darkness_threshold: DARKNESS_THRESHOLD,
            outlier_threshold: OUTLIER_THRESHOLD,
            growing_iterations: GROWING_ITERATIONS,
            fragmentation_threshold: FRAGMENTATION_THRESHOLD,
            classif_bits: ClassifBits::default(),
        }
    }
}

impl ShadowConfig {
    pub fn with_mode(mode: &str, compute_mountain_shadow: bool) -> Result<Self> {
        Ok(Self {
            mode: mode.parse()?,
            compute_mountain_shadow,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_cloud_height.is_finite() && self.max_cloud_height > 0.0) {
            return Err(Error::invalid_parameter(
                "max_cloud_height",
                self.max_cloud_height,
                "must be a positive number",
            ));
        }
        if self.max_tile_dimension == 0 {
            return Err(Error::invalid_parameter(
                "max_tile_dimension",
                self.max_tile_dimension,
                "must be at least 1",
            ));
        }
        if !(self.min_cloud_base.is_finite() && self.min_cloud_base >= 0.0) {
            return Err(Error::invalid_parameter(
                "min_cloud_base",
                self.min_cloud_base,
                "must be a non-negative number",
            ));
        }
        if !(self.max_cloud_top.is_finite() && self.max_cloud_top > self.min_cloud_base) {
            return Err(Error::invalid_parameter(
                "max_cloud_top",
                self.max_cloud_top,
                "must be greater than min_cloud_base",
            ));
        }
        if !self.darkness_threshold.is_finite() {
            return Err(Error::invalid_parameter(
                "darkness_threshold",
                self.darkness_threshold,
                "must be finite",
            ));
        }
        if !(self.outlier_threshold > 0.0 && self.outlier_threshold <= 1.0) {
            return Err(Error::invalid_parameter(
                "outlier_threshold",
                self.outlier_threshold,
                "must lie in (0, 1]",
            ));
        }
        if self.fragmentation_threshold == 0 {
            return Err(Error::invalid_parameter(
                "fragmentation_threshold",
                self.fragmentation_threshold,
                "must be at least 1",
            ));
        }
        self.classif_bits.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("LandWater".parse::<AnalysisMode>(), Ok(AnalysisMode::LandWater));
        assert_eq!("MultiBand".parse::<AnalysisMode>(), Ok(AnalysisMode::MultiBand));
        assert_eq!("SingleBand".parse::<AnalysisMode>(), Ok(AnalysisMode::SingleBand));
        assert_eq!(
            "landwater".parse::<AnalysisMode>(),
            Err(Error::InvalidMode("landwater".to_string()))
        );
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [AnalysisMode::LandWater, AnalysisMode::MultiBand, AnalysisMode::SingleBand] {
            assert_eq!(mode.to_string().parse::<AnalysisMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_with_mode_rejects_unknown() {
        assert!(matches!(
            ShadowConfig::with_mode("Thermal", true),
            Err(Error::InvalidMode(_))
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ShadowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_thresholds_scale() {
        let config = ShadowConfig::default();
        // A contrast is a fraction of the reference, so it lies in (-1, 0).
        assert!(config.darkness_threshold > -1.0 && config.darkness_threshold < 0.0);
        // Fragments are counted in pixels and must fit well inside one tile.
        assert!(config.fragmentation_threshold > 1);
        assert!(config.fragmentation_threshold < config.max_tile_dimension);
    }

    #[test]
    fn test_inverted_cloud_heights_rejected() {
        let config = ShadowConfig {
            min_cloud_base: 5000.0,
            max_cloud_top: 1000.0,
            ..ShadowConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter { name: "max_cloud_top", .. })
        ));
    }

    #[test]
    fn test_outlier_threshold_range() {
        let config = ShadowConfig {
            outlier_threshold: 0.0,
            ..ShadowConfig::default()
        };
        assert!(config.validate().is_err());
        let config = ShadowConfig {
            outlier_threshold: f32::NAN,
            ..ShadowConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
