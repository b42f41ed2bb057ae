//! Python bindings.

use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

use crate::config::{
    ShadowConfig, DARKNESS_THRESHOLD, FRAGMENTATION_THRESHOLD, GROWING_ITERATIONS,
    MAX_CLOUD_HEIGHT, MAX_CLOUD_TOP, MAX_TILE_DIMENSION, MIN_CLOUD_BASE, OUTLIER_THRESHOLD,
};
use crate::geocoding::{AffineGeoCoding, GeoPos};
use crate::geometry::{self, SceneGeometry, ScenePlan};
use crate::pipeline::{CloudShadowPipeline, InMemoryScene, SceneBands};

// ── Parameters ────────────────────────────────────────────────────────────

/// Detector settings. `mode` is one of "LandWater", "MultiBand", "SingleBand".
#[pyclass]
#[derive(Clone)]
pub struct ShadowParams {
    #[pyo3(get, set)]
    pub mode: String,
    #[pyo3(get, set)]
    pub compute_mountain_shadow: bool,
    #[pyo3(get, set)]
    pub min_cloud_base: f32,
    #[pyo3(get, set)]
    pub max_cloud_top: f32,
    #[pyo3(get, set)]
    pub max_cloud_height: f64,
    #[pyo3(get, set)]
    pub max_tile_dimension: usize,
    #[pyo3(get, set)]
    pub darkness_threshold: f32,
    #[pyo3(get, set)]
    pub outlier_threshold: f32,
    #[pyo3(get, set)]
    pub growing_iterations: usize,
    #[pyo3(get, set)]
    pub fragmentation_threshold: usize,
}

#[pymethods]
impl ShadowParams {
    #[new]
    #[pyo3(signature = (mode="LandWater".to_string(), compute_mountain_shadow=true))]
    pub fn new(mode: String, compute_mountain_shadow: bool) -> Self {
        Self {
            mode,
            compute_mountain_shadow,
            min_cloud_base: MIN_CLOUD_BASE,
            max_cloud_top: MAX_CLOUD_TOP,
            max_cloud_height: MAX_CLOUD_HEIGHT,
            max_tile_dimension: MAX_TILE_DIMENSION,
            darkness_threshold: DARKNESS_THRESHOLD,
            outlier_threshold: OUTLIER_THRESHOLD,
            growing_iterations: GROWING_ITERATIONS,
            fragmentation_threshold: FRAGMENTATION_THRESHOLD,
        }
    }
}

impl ShadowParams {
    fn to_config(&self) -> PyResult<ShadowConfig> {
        let config = ShadowConfig {
            min_cloud_base: self.min_cloud_base,
            max_cloud_top: self.max_cloud_top,
            max_cloud_height: self.max_cloud_height,
            max_tile_dimension: self.max_tile_dimension,
            darkness_threshold: self.darkness_threshold,
            outlier_threshold: self.outlier_threshold,
            growing_iterations: self.growing_iterations,
            fragmentation_threshold: self.fragmentation_threshold,
            ..ShadowConfig::with_mode(&self.mode, self.compute_mountain_shadow)?
        };
        config.validate()?;
        Ok(config)
    }
}

// ── Results ───────────────────────────────────────────────────────────────

/// Scene plan as seen by a caller tiling its own reads.
#[pyclass]
pub struct PlanInfo {
    #[pyo3(get)]
    pub tile_width: usize,
    #[pyo3(get)]
    pub tile_height: usize,
    #[pyo3(get)]
    pub search_border_radius: usize,
    /// (left, right, top, bottom) borders used to size tiles. Reads are
    /// padded by `search_border_radius` on every side.
    #[pyo3(get)]
    pub extensions: (usize, usize, usize, usize),
}

impl From<&ScenePlan> for PlanInfo {
    fn from(plan: &ScenePlan) -> Self {
        let e = &plan.extensions;
        Self {
            tile_width: plan.tile_width,
            tile_height: plan.tile_height,
            search_border_radius: plan.search_border_radius,
            extensions: (e.left, e.right, e.top, e.bottom),
        }
    }
}

#[pyclass]
pub struct DetectionResult {
    /// Packed flag band, bit index = flag ordinal.
    #[pyo3(get)]
    pub flags: Py<PyArray2<i32>>,
    #[pyo3(get)]
    pub mountain_shadow: Option<Py<PyArray2<i32>>>,
    #[pyo3(get)]
    pub plan: Py<PlanInfo>,
    #[pyo3(get)]
    pub cloud_clusters: usize,
    #[pyo3(get)]
    pub confirmed_regions: usize,
}

// ── Functions ─────────────────────────────────────────────────────────────

/// Search border radius in pixels for a scene resolution (m) and the largest
/// sun zenith angle (degrees).
#[pyfunction]
pub fn search_border_radius(resolution: f64, max_sun_zenith: f64) -> f64 {
    geometry::search_border_radius(resolution, max_sun_zenith)
}

/// Tile edge length for one raster axis.
#[pyfunction]
pub fn tile_size(
    raster_size: usize,
    preferred_size: usize,
    border_extension1: usize,
    border_extension2: usize,
) -> usize {
    geometry::tile_size(raster_size, preferred_size, border_extension1, border_extension2)
}

/// Plans the tiling of a scene.
#[pyfunction]
#[pyo3(signature = (
    params, width, height, resolution, max_sun_zenith,
    sun_azimuth_range=None, preferred_tile_size=512,
))]
pub fn plan_scene(
    params: &ShadowParams,
    width: usize,
    height: usize,
    resolution: f64,
    max_sun_zenith: f64,
    sun_azimuth_range: Option<(f64, f64)>,
    preferred_tile_size: usize,
) -> PyResult<PlanInfo> {
    let config = params.to_config()?;
    let scene = SceneGeometry {
        width,
        height,
        resolution,
        max_sun_zenith,
        sun_azimuth_range,
        preferred_tile_width: preferred_tile_size,
        preferred_tile_height: preferred_tile_size,
    };
    Ok(PlanInfo::from(&ScenePlan::new(&scene, &config)?))
}

/// Detects cloud shadow over whole-scene arrays.
///
/// The scene is north-up with square pixels of `pixel_size` metres;
/// `origin_lat`/`origin_lon` locate the upper-left corner.
#[pyfunction]
#[pyo3(signature = (
    params, primary, sun_zenith, sun_azimuth, altitude, cluster_a, cluster_b,
    origin_lat, origin_lon, pixel_size, buffer=None, preferred_tile_size=512,
))]
#[allow(clippy::too_many_arguments)]
pub fn detect_cloud_shadow(
    py: Python<'_>,
    params: &ShadowParams,
    primary: PyReadonlyArray2<i32>,
    sun_zenith: PyReadonlyArray2<f32>,
    sun_azimuth: PyReadonlyArray2<f32>,
    altitude: PyReadonlyArray2<f32>,
    cluster_a: PyReadonlyArray2<f32>,
    cluster_b: PyReadonlyArray2<f32>,
    origin_lat: f64,
    origin_lon: f64,
    pixel_size: f64,
    buffer: Option<PyReadonlyArray2<i32>>,
    preferred_tile_size: usize,
) -> PyResult<DetectionResult> {
    let config = params.to_config()?;
    let bands = SceneBands {
        primary: primary.as_array().to_owned(),
        buffer: buffer.as_ref().map(|b| b.as_array().to_owned()),
        sun_zenith: sun_zenith.as_array().to_owned(),
        sun_azimuth: sun_azimuth.as_array().to_owned(),
        altitude: altitude.as_array().to_owned(),
        cluster_a: cluster_a.as_array().to_owned(),
        cluster_b: cluster_b.as_array().to_owned(),
    };
    let geocoding = AffineGeoCoding::new(GeoPos::new(origin_lat, origin_lon), pixel_size)?;
    let scene = InMemoryScene::new(bands, geocoding)?;
    let geometry = scene.scene_geometry(preferred_tile_size, preferred_tile_size)?;
    let pipeline = CloudShadowPipeline::new(config, &geometry)?;
    let result = pipeline.process_scene(&scene)?;

    Ok(DetectionResult {
        flags: result.flags.into_pyarray(py).unbind(),
        mountain_shadow: result.mountain_shadow.map(|m| m.into_pyarray(py).unbind()),
        plan: Py::new(py, PlanInfo::from(pipeline.plan()))?,
        cloud_clusters: result.cloud_clusters,
        confirmed_regions: result.confirmed_regions,
    })
}
