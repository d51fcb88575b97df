//! Band reduction of validity masks.

use ndarray::{Array2, Array3, Axis};

/// Collapse a `(bands, rows, cols)` mask to `(rows, cols)`.
///
/// A position is excluded only when it is masked in every band; a pixel with
/// at least one valid band is kept and carries all of its band values.
pub fn reduce_mask(mask: &Array3<bool>) -> Array2<bool> {
    mask.fold_axis(Axis(0), true, |all_masked, &masked| *all_masked && masked)
}
