use crate::grid_patch::GridPatch;

/// Convert an index at one refinement level to the index of the cell that
/// contains it (coarsening) or of its first sub-cell (refining) at another
/// level.
///
pub fn rescale_index(index: (i64, i64), from_level: u32, to_level: u32, ratio: i64) -> (i64, i64) {
    if to_level >= from_level {
        let factor = ratio.pow(to_level - from_level);
        (index.0 * factor, index.1 * factor)
    } else {
        let factor = ratio.pow(from_level - to_level);
        (index.0.div_euclid(factor), index.1.div_euclid(factor))
    }
}

/// A trait for a container that can respond to queries for a patch overlying
/// a point on a given panel.
///
pub trait PatchQuery {
    /// Return the index of a patch on `panel` whose interior contains
    /// `point`, given at refinement `level`, if one exists.
    ///
    fn patch_containing_point(&self, panel: usize, level: u32, point: (i64, i64), ratio: i64) -> Option<usize>;
}

impl PatchQuery for [GridPatch] {
    fn patch_containing_point(&self, panel: usize, level: u32, point: (i64, i64), ratio: i64) -> Option<usize> {
        self.iter()
            .find(|p| {
                let b = p.patch_box();
                b.panel() == panel && b.global_interior().contains(rescale_index(point, level, b.refinement_level(), ratio))
            })
            .map(|p| p.index())
    }
}
