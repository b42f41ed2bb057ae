//! Cloud and cloud-shadow detection for optical satellite scenes.
//!
//! A scene is processed in tiles, each read with a border wide enough to hold
//! the longest shadow that can reach it. Per tile the external classification
//! is turned into exclusive pixel flags, cloud pixels are grouped into
//! clusters, every cluster's shadow is cast along the anti-solar direction,
//! candidate regions are confirmed spectrally, then grown and filtered.
//! Terrain self-shadow is traced independently. The result is a packed flag
//! band cropped to the tile.

pub mod caster;
pub mod classifier;
pub mod config;
pub mod error;
pub mod flags;
pub mod geocoding;
pub mod geometry;
pub mod growing;
pub mod labeling;
pub mod mountain;
pub mod output;
pub mod pipeline;
pub mod ray;
pub mod segmentation;

#[cfg(feature = "python")]
mod python;

pub use config::{AnalysisMode, ShadowConfig};
pub use error::{Error, Result};
pub use flags::{ClassifBits, PixelFlag};
pub use geocoding::{AffineGeoCoding, GeoCoding, GeoPos};
pub use geometry::{search_border_radius, tile_size, BorderExtensions, Rect, SceneGeometry, ScenePlan};
pub use output::make_filled_band;
pub use pipeline::{
    CloudShadowPipeline, InMemoryScene, SceneBands, SceneResult, TileInputs, TileResult, TileSource,
};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn cloudshadow(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    register_geometry_module(py_module)?;
    register_detection_module(py_module)?;

    py_module.add("__doc__", "Cloud and cloud-shadow detection implemented in Rust.")?;

    Ok(())
}

#[cfg(feature = "python")]
fn register_geometry_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "geometry")?;
    submodule.add("__doc__", "Search border and tile sizing.")?;
    submodule.add_class::<python::PlanInfo>()?;
    submodule.add_function(wrap_pyfunction!(python::search_border_radius, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(python::tile_size, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(python::plan_scene, &submodule)?)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

#[cfg(feature = "python")]
fn register_detection_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "detection")?;
    submodule.add("__doc__", "Cloud shadow and mountain shadow detection.")?;
    submodule.add_class::<python::ShadowParams>()?;
    submodule.add_class::<python::DetectionResult>()?;
    submodule.add_function(wrap_pyfunction!(python::detect_cloud_shadow, &submodule)?)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}
