//! Tile pipeline and scene runner.
//!
//! Orchestrates: flags → clusters → shadow casting → spectral check → growing
//! → mountain shadow → packed output. Every stage works on arrays covering the
//! tile's source rectangle; only the final bands are cropped to the target.
//!
//! Tiles share nothing but the read-only [`ShadowConfig`] and [`ScenePlan`],
//! so the scene runner hands them to rayon as independent jobs.

use log::{debug, info};
use ndarray::{s, Array2, ArrayView2};
use ndarray_stats::QuantileExt;
use rayon::prelude::*;

use crate::caster::cast_shadows;
use crate::classifier::{classify_shadows, ClusterBands};
use crate::config::ShadowConfig;
use crate::error::{Error, Result};
use crate::flags::{check_shape, extract_flags};
use crate::geocoding::{geo_grids, scene_resolution, GeoCoding};
use crate::geometry::{Rect, SceneGeometry, ScenePlan};
use crate::growing::grow_shadows;
use crate::mountain::compute_mountain_shadow;
use crate::output::{make_filled_band, pack_flags, pack_mountain};
use crate::ray::GroundGeometry;
use crate::segmentation::compute_cloud_ids;

// ── Tile inputs and results ───────────────────────────────────────────────

/// Every sample a tile needs, covering its source rectangle.
#[derive(Debug, Clone)]
pub struct TileInputs {
    pub target: Rect,
    pub source: Rect,
    /// External classification flags.
    pub primary: Array2<i32>,
    /// Optional cloud-buffer classification flags.
    pub buffer: Option<Array2<i32>>,
    pub sun_zenith: Array2<f32>,
    pub sun_azimuth: Array2<f32>,
    pub altitude: Array2<f32>,
    pub cluster_a: Array2<f32>,
    pub cluster_b: Array2<f32>,
    pub latitude: Array2<f64>,
    pub longitude: Array2<f64>,
}

impl TileInputs {
    fn ground_geometry(&self) -> GroundGeometry<'_> {
        GroundGeometry {
            sun_zenith: self.sun_zenith.view(),
            sun_azimuth: self.sun_azimuth.view(),
            altitude: self.altitude.view(),
            latitude: self.latitude.view(),
            longitude: self.longitude.view(),
        }
    }

    fn cluster_bands(&self) -> ClusterBands<'_> {
        ClusterBands {
            a: self.cluster_a.view(),
            b: self.cluster_b.view(),
        }
    }
}

/// Output bands of one tile, cropped to its target rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct TileResult {
    pub target: Rect,
    /// One bit per category, bit index = flag ordinal.
    pub flags: Array2<i32>,
    pub mountain_shadow: Option<Array2<i32>>,
    pub cloud_ids: Array2<u32>,
    pub shadow_ids: Array2<u32>,
    pub long_shadow_ids: Array2<u32>,
    pub cluster_count: usize,
    pub confirmed_regions: usize,
}

// ── Scene sources ─────────────────────────────────────────────────────────

/// Supplies the padded samples of a tile.
pub trait TileSource: Sync {
    fn tile_inputs(&self, target: &Rect, source: &Rect) -> Result<TileInputs>;
}

/// Whole-scene sample arrays.
#[derive(Debug, Clone)]
pub struct SceneBands {
    pub primary: Array2<i32>,
    pub buffer: Option<Array2<i32>>,
    pub sun_zenith: Array2<f32>,
    pub sun_azimuth: Array2<f32>,
    pub altitude: Array2<f32>,
    pub cluster_a: Array2<f32>,
    pub cluster_b: Array2<f32>,
}

/// A scene held in memory. Pixels of a source rectangle outside the scene
/// read as NaN (flags as 0, which the flag extractor marks invalid).
pub struct InMemoryScene<G: GeoCoding> {
    bands: SceneBands,
    geocoding: G,
}

impl<G: GeoCoding> InMemoryScene<G> {
    pub fn new(bands: SceneBands, geocoding: G) -> Result<Self> {
        let (height, width) = bands.primary.dim();
        if width == 0 || height == 0 {
            return Err(Error::EmptyScene { width, height });
        }
        let scene = Rect::new(0, 0, width, height);
        if let Some(buffer) = &bands.buffer {
            check_shape("cloud buffer classification", buffer.dim(), &scene)?;
        }
        check_shape("sun zenith", bands.sun_zenith.dim(), &scene)?;
        check_shape("sun azimuth", bands.sun_azimuth.dim(), &scene)?;
        check_shape("altitude", bands.altitude.dim(), &scene)?;
        check_shape("cluster band A", bands.cluster_a.dim(), &scene)?;
        check_shape("cluster band B", bands.cluster_b.dim(), &scene)?;
        Ok(Self { bands, geocoding })
    }

    pub fn width(&self) -> usize {
        self.bands.primary.ncols()
    }

    pub fn height(&self) -> usize {
        self.bands.primary.nrows()
    }

    /// Planner inputs derived from the scene's own samples.
    ///
    /// Fails when the geocoding has no affine resolution.
    pub fn scene_geometry(
        &self,
        preferred_tile_width: usize,
        preferred_tile_height: usize,
    ) -> Result<SceneGeometry> {
        let resolution = scene_resolution(&self.geocoding)?;
        let max_sun_zenith = *self.bands.sun_zenith.max_skipnan() as f64;
        let min_azimuth = *self.bands.sun_azimuth.min_skipnan() as f64;
        let max_azimuth = *self.bands.sun_azimuth.max_skipnan() as f64;
        let sun_azimuth_range =
            (min_azimuth.is_finite() && max_azimuth.is_finite()).then_some((min_azimuth, max_azimuth));
        Ok(SceneGeometry {
            width: self.width(),
            height: self.height(),
            resolution,
            max_sun_zenith,
            sun_azimuth_range,
            preferred_tile_width,
            preferred_tile_height,
        })
    }
}

impl<G: GeoCoding> TileSource for InMemoryScene<G> {
    fn tile_inputs(&self, target: &Rect, source: &Rect) -> Result<TileInputs> {
        let scene = Rect::new(0, 0, self.width(), self.height());
        let crop_f32 = |band: &Array2<f32>| crop_padded(band.view(), &scene, source, f32::NAN);
        let (latitude, longitude) = geo_grids(&self.geocoding, source);
        Ok(TileInputs {
            target: *target,
            source: *source,
            primary: crop_padded(self.bands.primary.view(), &scene, source, 0),
            buffer: self
                .bands
                .buffer
                .as_ref()
                .map(|b| crop_padded(b.view(), &scene, source, 0)),
            sun_zenith: crop_f32(&self.bands.sun_zenith),
            sun_azimuth: crop_f32(&self.bands.sun_azimuth),
            altitude: crop_f32(&self.bands.altitude),
            cluster_a: crop_f32(&self.bands.cluster_a),
            cluster_b: crop_f32(&self.bands.cluster_b),
            latitude,
            longitude,
        })
    }
}

/// Copies `rect` out of a scene-sized array, `fill` where it leaves the scene.
fn crop_padded<T: Clone>(data: ArrayView2<T>, scene: &Rect, rect: &Rect, fill: T) -> Array2<T> {
    let mut out = Array2::from_elem(rect.shape(), fill);
    let x0 = rect.x.max(0);
    let y0 = rect.y.max(0);
    let x1 = (rect.x + rect.width as isize).min(scene.width as isize);
    let y1 = (rect.y + rect.height as isize).min(scene.height as isize);
    if x1 <= x0 || y1 <= y0 {
        return out;
    }
    let (dx, dy) = ((x0 - rect.x) as usize, (y0 - rect.y) as usize);
    let (w, h) = ((x1 - x0) as usize, (y1 - y0) as usize);
    out.slice_mut(s![dy..dy + h, dx..dx + w]).assign(&data.slice(s![
        y0 as usize..y1 as usize,
        x0 as usize..x1 as usize
    ]));
    out
}

// ── Scene results ─────────────────────────────────────────────────────────

/// Scene-sized output bands.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneResult {
    pub flags: Array2<i32>,
    pub mountain_shadow: Option<Array2<i32>>,
    pub tiles: usize,
    pub cloud_clusters: usize,
    pub confirmed_regions: usize,
}

// ── Pipeline ──────────────────────────────────────────────────────────────

/// Validated configuration plus the scene plan, shared by all tiles.
#[derive(Debug, Clone)]
pub struct CloudShadowPipeline {
    config: ShadowConfig,
    plan: ScenePlan,
}

impl CloudShadowPipeline {
    /// Fails on any configuration error before a tile is touched.
    pub fn new(config: ShadowConfig, scene: &SceneGeometry) -> Result<Self> {
        config.validate()?;
        let plan = ScenePlan::new(scene, &config)?;
        Ok(Self { config, plan })
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    pub fn plan(&self) -> &ScenePlan {
        &self.plan
    }

    /// Runs every stage on one tile.
    pub fn process_tile(&self, inputs: &TileInputs) -> Result<TileResult> {
        let source = &inputs.source;
        let geometry = inputs.ground_geometry();
        let bands = inputs.cluster_bands();
        geometry.check(source)?;
        bands.check(source)?;

        let extracted = extract_flags(
            inputs.primary.view(),
            inputs.buffer.as_ref().map(|b| b.view()),
            &self.config.classif_bits,
            source,
            self.plan.width,
            self.plan.height,
        )?;
        let mut flags = extracted.clone();
        let (cloud_ids, cluster_count) = compute_cloud_ids(&flags);

        let (shadow_ids, long_shadow_ids, confirmed_regions) = if cluster_count == 0 {
            debug!("Tile {:?}: no clouds", inputs.target);
            let empty = Array2::<u32>::zeros(flags.dim());
            (empty.clone(), empty, 0)
        } else {
            let candidates = cast_shadows(&flags, &cloud_ids, cluster_count, &geometry, &self.config);
            let classification = classify_shadows(&mut flags, &candidates, &bands, &self.config);
            grow_shadows(
                &mut flags,
                &extracted,
                self.config.growing_iterations,
                self.config.fragmentation_threshold,
            );
            debug!(
                "Tile {:?}: {} clusters, {} confirmed shadow regions",
                inputs.target,
                cluster_count,
                classification.confirmed_count()
            );
            let confirmed = classification.confirmed_count();
            (candidates.shadow_ids, classification.long_shadow_ids, confirmed)
        };

        let mountain = self
            .config
            .compute_mountain_shadow
            .then(|| compute_mountain_shadow(&geometry));

        let target = &inputs.target;
        let packed = pack_flags(&flags, mountain.as_ref());
        Ok(TileResult {
            target: *target,
            flags: make_filled_band(packed.view(), target, source)?,
            mountain_shadow: mountain
                .map(|m| make_filled_band(pack_mountain(&m).view(), target, source))
                .transpose()?,
            cloud_ids: make_filled_band(cloud_ids.view(), target, source)?,
            shadow_ids: make_filled_band(shadow_ids.view(), target, source)?,
            long_shadow_ids: make_filled_band(long_shadow_ids.view(), target, source)?,
            cluster_count,
            confirmed_regions,
        })
    }

    /// Processes every tile of the plan in parallel and assembles the
    /// scene-sized bands.
    pub fn process_scene<S: TileSource>(&self, scene: &S) -> Result<SceneResult> {
        let tiles: Vec<Rect> = self.plan.tiles().collect();
        let results = tiles
            .par_iter()
            .map(|target| {
                let inputs = scene.tile_inputs(target, &self.plan.source_rect(target))?;
                self.process_tile(&inputs)
            })
            .collect::<Result<Vec<_>>>()?;

        let shape = (self.plan.height, self.plan.width);
        let mut flags = Array2::<i32>::zeros(shape);
        let mut mountain_shadow = self
            .config
            .compute_mountain_shadow
            .then(|| Array2::<i32>::zeros(shape));
        let mut cloud_clusters = 0;
        let mut confirmed_regions = 0;

        for tile in &results {
            let t = &tile.target;
            let (x, y) = (t.x as usize, t.y as usize);
            flags
                .slice_mut(s![y..y + t.height, x..x + t.width])
                .assign(&tile.flags);
            if let (Some(scene_band), Some(tile_band)) = (&mut mountain_shadow, &tile.mountain_shadow) {
                scene_band
                    .slice_mut(s![y..y + t.height, x..x + t.width])
                    .assign(tile_band);
            }
            cloud_clusters += tile.cluster_count;
            confirmed_regions += tile.confirmed_regions;
        }

        info!(
            "Processed {} tiles: {} cloud clusters, {} confirmed shadow regions",
            results.len(),
            cloud_clusters,
            confirmed_regions
        );
        Ok(SceneResult {
            flags,
            mountain_shadow,
            tiles: results.len(),
            cloud_clusters,
            confirmed_regions,
        })
    }
}
