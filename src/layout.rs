use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::index_space::range2d;
use crate::patch_box::PatchBox;




/**
 * Version stamp written into every layout
 */
pub const LAYOUT_VERSION: u32 = 1;




#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]


/**
 * The persisted topology of a grid: enough to rebuild every patch box and
 * rerun connectivity. Each entry of `patch_info` is `[panel, level, halo,
 * a_begin, a_end, b_begin, b_end]`; the coordinate arrays of all patches are
 * concatenated in patch order, each covering the patch's total width (plus
 * one for edges).
 */
pub struct GridLayout {
    pub stamp: u32,
    pub base_resolution: (i64, i64),
    pub refinement_ratio: i64,
    pub patch_info: Vec<[i64; 7]>,
    pub a_nodes: Vec<f64>,
    pub b_nodes: Vec<f64>,
    pub a_edges: Vec<f64>,
    pub b_edges: Vec<f64>,
}




// ============================================================================
impl GridLayout {


    pub fn new<'a, I>(base_resolution: (i64, i64), refinement_ratio: i64, boxes: I) -> Self
    where
        I: IntoIterator<Item = &'a PatchBox>,
    {
        let mut layout = Self {
            stamp: LAYOUT_VERSION,
            base_resolution,
            refinement_ratio,
            patch_info: Vec::new(),
            a_nodes: Vec::new(),
            b_nodes: Vec::new(),
            a_edges: Vec::new(),
            b_edges: Vec::new(),
        };
        for b in boxes {
            let (a0, b0) = b.global_interior().start();
            let (a1, b1) = b.global_interior().end();

            layout.patch_info.push([
                b.panel() as i64,
                b.refinement_level() as i64,
                b.halo() as i64,
                a0, a1, b0, b1,
            ]);
            layout.a_nodes.extend_from_slice(b.a_nodes());
            layout.b_nodes.extend_from_slice(b.b_nodes());
            layout.a_edges.extend_from_slice(b.a_edges());
            layout.b_edges.extend_from_slice(b.b_edges());
        }
        layout
    }


    /**
     * Rebuild the patch boxes. Inconsistent records are configuration
     * errors.
     */
    pub fn patch_boxes(&self) -> Result<Vec<PatchBox>> {
        if self.stamp != LAYOUT_VERSION {
            return Err(Error::Configuration(format!(
                "layout version {} is not supported (expected {})", self.stamp, LAYOUT_VERSION)))
        }
        let mut cursor = (0, 0);
        let mut boxes = Vec::with_capacity(self.patch_info.len());

        for (n, info) in self.patch_info.iter().enumerate() {
            let [panel, level, halo, a0, a1, b0, b1] = *info;

            if panel < 0 || level < 0 || halo < 1 || a1 <= a0 || b1 <= b0 {
                return Err(Error::Configuration(format!("patch record {} is invalid: {:?}", n, info)))
            }
            let ta = (a1 - a0 + 2 * halo) as usize;
            let tb = (b1 - b0 + 2 * halo) as usize;
            let (ca, cb) = cursor;

            if ca + ta > self.a_nodes.len() || cb + tb > self.b_nodes.len() ||
               ca + n + ta + 1 > self.a_edges.len() || cb + n + tb + 1 > self.b_edges.len() {
                return Err(Error::Configuration(format!(
                    "coordinate arrays are too short for patch record {}", n)))
            }
            boxes.push(PatchBox::new(
                panel as usize,
                level as u32,
                halo as usize,
                range2d(a0..a1, b0..b1),
                self.a_nodes[ca .. ca + ta].to_vec(),
                self.b_nodes[cb .. cb + tb].to_vec(),
                self.a_edges[ca + n .. ca + n + ta + 1].to_vec(),
                self.b_edges[cb + n .. cb + n + tb + 1].to_vec())?);

            cursor = (ca + ta, cb + tb);
        }
        let n = self.patch_info.len();

        if cursor.0 != self.a_nodes.len() || cursor.1 != self.b_nodes.len() ||
           cursor.0 + n != self.a_edges.len() || cursor.1 + n != self.b_edges.len() {
            return Err(Error::Configuration("coordinate arrays are longer than the patch records".into()))
        }
        Ok(boxes)
    }
}
