//! Output assembly: packs flags into the bitmask band and crops the search
//! border away.

use ndarray::{s, Array2, ArrayView2, Zip};

use crate::error::{Error, Result};
use crate::flags::{check_shape, PixelFlag};
use crate::geometry::Rect;

/// `1 << flag` per pixel, with the mountain-shadow bit added where `mountain`
/// is set.
pub fn pack_flags(flags: &Array2<PixelFlag>, mountain: Option<&Array2<bool>>) -> Array2<i32> {
    let mut packed = flags.mapv(PixelFlag::bit);
    if let Some(mountain) = mountain {
        Zip::from(&mut packed).and(mountain).for_each(|value, &shaded| {
            if shaded {
                *value |= PixelFlag::MountainShadow.bit();
            }
        });
    }
    packed
}

/// Mountain-shadow-only band.
pub fn pack_mountain(mountain: &Array2<bool>) -> Array2<i32> {
    mountain.mapv(|shaded| if shaded { PixelFlag::MountainShadow.bit() } else { 0 })
}

/// Copies the `target` part of a band covering `source`.
pub fn make_filled_band<T: Clone>(data: ArrayView2<T>, target: &Rect, source: &Rect) -> Result<Array2<T>> {
    check_shape("band", data.dim(), source)?;
    let left = target.x - source.x;
    let top = target.y - source.y;
    if left < 0
        || top < 0
        || left as usize + target.width > source.width
        || top as usize + target.height > source.height
    {
        return Err(Error::invalid_parameter(
            "target",
            format!("{target:?}"),
            format!("must lie inside the source rectangle {source:?}"),
        ));
    }
    let (left, top) = (left as usize, top as usize);
    Ok(data
        .slice(s![top..top + target.height, left..left + target.width])
        .to_owned())
}
