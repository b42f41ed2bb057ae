//! Scene-level geometry: search border radius, tile sizing and tile rectangles.
//!
//! A cloud at height `H` under sun zenith `θ` casts its shadow `H · tan θ`
//! metres away, so every tile is read with a border wide enough to contain
//! the longest shadow that can reach into it. The plan is computed once per
//! scene and shared read-only by every tile worker.

use log::{info, warn};

use crate::config::{ShadowConfig, MAX_CLOUD_HEIGHT, MAX_TILE_DIMENSION};
use crate::error::{Error, Result};

/// Zenith angles beyond this are treated as this value when sizing borders.
pub const MAX_SUN_ZENITH_DEG: f64 = 89.0;

/// Pixel rectangle in scene coordinates. Source rectangles may extend past
/// the scene, hence the signed origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: isize,
    pub y: isize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: isize, y: isize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// (rows, cols), the shape of an array covering this rectangle.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: isize, y: isize) -> bool {
        x >= self.x
            && y >= self.y
            && x < self.x + self.width as isize
            && y < self.y + self.height as isize
    }

    pub fn grow(&self, ext: &BorderExtensions) -> Rect {
        Rect {
            x: self.x - ext.left as isize,
            y: self.y - ext.top as isize,
            width: self.width + ext.left + ext.right,
            height: self.height + ext.top + ext.bottom,
        }
    }

    /// Smallest rectangle holding both.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.width as isize).max(other.x + other.width as isize);
        let y1 = (self.y + self.height as isize).max(other.y + other.height as isize);
        Rect::new(x0, y0, (x1 - x0) as usize, (y1 - y0) as usize)
    }
}

/// Padding added on each side of a target rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BorderExtensions {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

impl BorderExtensions {
    pub fn symmetric(radius: usize) -> Self {
        Self {
            left: radius,
            right: radius,
            top: radius,
            bottom: radius,
        }
    }

    /// Reach towards the sun, used when sizing tiles: clouds that shade a
    /// target pixel lie on the sun side of it. Azimuth is clockwise from
    /// north, in degrees.
    ///
    /// A side whose cardinal direction lies inside the range gets the full
    /// radius.
    pub fn from_azimuth_range(radius: f64, min_azimuth: f64, max_azimuth: f64) -> Self {
        let (sin_min, sin_max) = (min_azimuth.to_radians().sin(), max_azimuth.to_radians().sin());
        let (cos_min, cos_max) = (min_azimuth.to_radians().cos(), max_azimuth.to_radians().cos());
        let spans = |cardinal: f64| {
            [cardinal, cardinal + 360.0]
                .iter()
                .any(|c| (min_azimuth..=max_azimuth).contains(c))
        };
        let extend = |cardinal: f64, a: f64, b: f64| {
            let reach = if spans(cardinal) { 1.0 } else { a.max(b).max(0.0) };
            (radius * reach).ceil() as usize
        };
        Self {
            top: extend(0.0, cos_min, cos_max),
            right: extend(90.0, sin_min, sin_max),
            bottom: extend(180.0, -cos_min, -cos_max),
            left: extend(270.0, -sin_min, -sin_max),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Border radius in pixels for the default maximum cloud height.
pub fn search_border_radius(resolution: f64, max_sun_zenith: f64) -> f64 {
    border_radius_for_height(MAX_CLOUD_HEIGHT, resolution, max_sun_zenith)
}

/// Horizontal reach (pixels) of a shadow cast from `cloud_height` metres.
///
/// The zenith is clamped to `[0, MAX_SUN_ZENITH_DEG]`; NaN counts as an
/// overhead sun.
pub fn border_radius_for_height(cloud_height: f64, resolution: f64, max_sun_zenith: f64) -> f64 {
    let zenith = if max_sun_zenith.is_nan() {
        0.0
    } else {
        max_sun_zenith.clamp(0.0, MAX_SUN_ZENITH_DEG)
    };
    let max_cloud_distance = cloud_height / (90.0 - zenith).to_radians().tan();
    max_cloud_distance / resolution
}

/// Tile edge length for one axis using the default maximum tile dimension.
pub fn tile_size(
    raster_size: usize,
    preferred_size: usize,
    border_extension1: usize,
    border_extension2: usize,
) -> usize {
    tile_size_with_limit(
        raster_size,
        preferred_size,
        border_extension1,
        border_extension2,
        MAX_TILE_DIMENSION,
    )
}

/// Largest tile edge allowed once both borders are reserved, never below 1.
fn max_tile_size(
    preferred_size: usize,
    border_extension1: usize,
    border_extension2: usize,
    max_tile_dimension: usize,
) -> usize {
    max_tile_dimension
        .saturating_sub(border_extension1 + border_extension2)
        .min(2 * preferred_size)
        .max(1)
}

/// Picks an even divisor of `raster_size` close to `preferred_size`.
///
/// A raster that fits within the bound is a single tile. Otherwise divisors
/// are visited from the largest admissible tile downwards; the search stops
/// at the first divisor that is further from the preferred size than the
/// best so far. When no divisor is found the bound itself is used.
pub fn tile_size_with_limit(
    raster_size: usize,
    preferred_size: usize,
    border_extension1: usize,
    border_extension2: usize,
    max_tile_dimension: usize,
) -> usize {
    let max_tile_size = max_tile_size(
        preferred_size,
        border_extension1,
        border_extension2,
        max_tile_dimension,
    );
    if raster_size > 0 && raster_size <= max_tile_size {
        return raster_size;
    }
    let min_num_tiles = raster_size.div_ceil(max_tile_size).max(1);

    let mut best_tile_size = None;
    let mut smallest_diff = usize::MAX;
    for num_tiles in min_num_tiles..=raster_size {
        if raster_size % num_tiles != 0 {
            continue;
        }
        let candidate = raster_size / num_tiles;
        let candidate_diff = preferred_size.abs_diff(candidate);
        if candidate_diff > smallest_diff {
            break;
        }
        best_tile_size = Some(candidate);
        smallest_diff = candidate_diff;
    }
    best_tile_size.unwrap_or(max_tile_size)
}

/// Scene-wide inputs of the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGeometry {
    pub width: usize,
    pub height: usize,
    /// Ground metres per pixel.
    pub resolution: f64,
    /// Largest sun zenith angle (degrees) found in the scene.
    pub max_sun_zenith: f64,
    /// (min, max) sun azimuth in degrees; narrows the borders used to size tiles.
    pub sun_azimuth_range: Option<(f64, f64)>,
    pub preferred_tile_width: usize,
    pub preferred_tile_height: usize,
}

/// Read-only constants for a whole scene run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenePlan {
    pub width: usize,
    pub height: usize,
    pub resolution: f64,
    pub search_border_radius: usize,
    pub extensions: BorderExtensions,
    pub tile_width: usize,
    pub tile_height: usize,
}

impl ScenePlan {
    pub fn new(scene: &SceneGeometry, config: &ShadowConfig) -> Result<Self> {
        if scene.width == 0 || scene.height == 0 {
            return Err(Error::EmptyScene {
                width: scene.width,
                height: scene.height,
            });
        }
        if !(scene.resolution.is_finite() && scene.resolution > 0.0) {
            return Err(Error::invalid_parameter(
                "resolution",
                scene.resolution,
                "must be a positive number of metres per pixel",
            ));
        }
        if scene.max_sun_zenith.is_nan() {
            return Err(Error::invalid_parameter(
                "max_sun_zenith",
                scene.max_sun_zenith,
                "scene has no valid sun zenith samples",
            ));
        }
        if scene.max_sun_zenith > MAX_SUN_ZENITH_DEG {
            warn!(
                "Sun zenith {:.2} deg clamped to {:.1} deg for border sizing",
                scene.max_sun_zenith, MAX_SUN_ZENITH_DEG
            );
        }

        let raw_radius =
            border_radius_for_height(config.max_cloud_height, scene.resolution, scene.max_sun_zenith);
        let radius_limit = scene.width.max(scene.height) as f64;
        let radius = if raw_radius > radius_limit {
            warn!(
                "Search border radius {:.0} px clamped to scene size {} px",
                raw_radius, radius_limit
            );
            radius_limit
        } else {
            raw_radius
        } as usize;

        let extensions = match scene.sun_azimuth_range {
            Some((min_az, max_az)) => {
                BorderExtensions::from_azimuth_range(radius as f64, min_az, max_az)
            }
            None => BorderExtensions::symmetric(radius),
        };

        let reserved = (extensions.left + extensions.right).max(extensions.top + extensions.bottom);
        let fits_one_tile =
            scene.width <= config.max_tile_dimension && scene.height <= config.max_tile_dimension;
        if reserved >= config.max_tile_dimension && !fits_one_tile {
            return Err(Error::invalid_parameter(
                "max_tile_dimension",
                config.max_tile_dimension,
                format!("search borders of {reserved} px leave no room for a tile"),
            ));
        }

        let plan = if reserved >= config.max_tile_dimension {
            warn!(
                "Search borders of {} px exceed the tile limit, scene read as one tile",
                reserved
            );
            Self::single_tile(scene)
        } else {
            let tile_width = axis_tile_size(
                scene.width,
                scene.preferred_tile_width,
                extensions.right,
                extensions.left,
                config.max_tile_dimension,
            );
            let tile_height = axis_tile_size(
                scene.height,
                scene.preferred_tile_height,
                extensions.top,
                extensions.bottom,
                config.max_tile_dimension,
            );
            if scene.width > tile_width || scene.height > tile_height {
                ScenePlan {
                    width: scene.width,
                    height: scene.height,
                    resolution: scene.resolution,
                    search_border_radius: radius,
                    extensions,
                    tile_width: scene.width.min(tile_width),
                    tile_height: scene.height.min(tile_height),
                }
            } else {
                Self::single_tile(scene)
            }
        };

        info!(
            "Scene plan: {}x{} px at {} m, border radius {} px, tiles {}x{} ({} total)",
            plan.width,
            plan.height,
            plan.resolution,
            plan.search_border_radius,
            plan.tile_width,
            plan.tile_height,
            plan.tile_count()
        );
        Ok(plan)
    }

    /// One tile covers the scene: nothing can leak in from a neighbour.
    fn single_tile(scene: &SceneGeometry) -> Self {
        ScenePlan {
            width: scene.width,
            height: scene.height,
            resolution: scene.resolution,
            search_border_radius: 0,
            extensions: BorderExtensions::default(),
            tile_width: scene.width,
            tile_height: scene.height,
        }
    }

    pub fn tile_count(&self) -> usize {
        self.width.div_ceil(self.tile_width) * self.height.div_ceil(self.tile_height)
    }

    /// Target rectangles covering the scene in raster order.
    pub fn tiles(&self) -> impl Iterator<Item = Rect> + '_ {
        (0..self.height).step_by(self.tile_height).flat_map(move |y| {
            (0..self.width).step_by(self.tile_width).map(move |x| {
                Rect::new(
                    x as isize,
                    y as isize,
                    self.tile_width.min(self.width - x),
                    self.tile_height.min(self.height - y),
                )
            })
        })
    }

    /// Region read for a target tile: the target grown by the search border
    /// radius on every side. The directional extensions only size tiles; a
    /// shadow leaving the target on the anti-sun side must stay whole so its
    /// region statistics do not depend on the tiling.
    pub fn source_rect(&self, target: &Rect) -> Rect {
        target.grow(&BorderExtensions::symmetric(self.search_border_radius))
    }
}

/// Tile edge for one scene axis. When the raster has no divisor near the
/// preferred size (a prime length, say) the bound is used and the last tile
/// is left partial.
fn axis_tile_size(
    raster_size: usize,
    preferred_size: usize,
    border_extension1: usize,
    border_extension2: usize,
    max_tile_dimension: usize,
) -> usize {
    let divisor = tile_size_with_limit(
        raster_size,
        preferred_size,
        border_extension1,
        border_extension2,
        max_tile_dimension,
    );
    let fallback = preferred_size.clamp(
        1,
        max_tile_size(preferred_size, border_extension1, border_extension2, max_tile_dimension),
    );
    if 2 * divisor < fallback {
        warn!(
            "Raster length {} has no divisor near {}, using {} px tiles with a partial last tile",
            raster_size, preferred_size, fallback
        );
        fallback
    } else {
        divisor
    }
}
