use crate::error::{Error, Result};
use crate::index_space::{range2d, IndexSpace};
use std::f64::consts::FRAC_PI_4;




#[derive(Clone, Debug, PartialEq)]


/**
 * The index-space footprint of a grid patch: the panel it lives on, its
 * refinement level, the global interior ranges on that panel, the halo width,
 * and the node and edge coordinates along both axes (covering the halo).
 *
 * Local indexes run over the total extent, with the interior occupying
 * `halo .. halo + width` on each axis.
 */
pub struct PatchBox {
    panel: usize,
    refinement_level: u32,
    halo: usize,
    interior: IndexSpace,
    a_nodes: Vec<f64>,
    b_nodes: Vec<f64>,
    a_edges: Vec<f64>,
    b_edges: Vec<f64>,
}




// ============================================================================
impl PatchBox {


    /**
     * Create a patch box from explicit coordinate arrays. Node arrays must
     * cover the total width on their axis, and edge arrays one more than
     * that.
     */
    pub fn new(
        panel: usize,
        refinement_level: u32,
        halo: usize,
        interior: IndexSpace,
        a_nodes: Vec<f64>,
        b_nodes: Vec<f64>,
        a_edges: Vec<f64>,
        b_edges: Vec<f64>) -> Result<Self>
    {
        if halo == 0 {
            return Err(Error::Configuration("patch halo width must be at least one".into()))
        }
        if interior.is_empty() {
            return Err(Error::Configuration(format!("patch interior {:?} is empty", interior)))
        }
        let (wa, wb) = interior.dim();
        let (ta, tb) = (wa + 2 * halo, wb + 2 * halo);

        if a_nodes.len() != ta || b_nodes.len() != tb || a_edges.len() != ta + 1 || b_edges.len() != tb + 1 {
            return Err(Error::Configuration(format!(
                "coordinate arrays ({}, {}, {}, {}) do not match total width ({}, {})",
                a_nodes.len(), b_nodes.len(), a_edges.len(), b_edges.len(), ta, tb)))
        }
        Ok(Self { panel, refinement_level, halo, interior, a_nodes, b_nodes, a_edges, b_edges })
    }


    /**
     * Create a patch box with equiangular coordinates, for a panel spanning
     * `[-pi/4, pi/4]` on both axes with `resolution` cells per side.
     */
    pub fn equiangular(
        panel: usize,
        refinement_level: u32,
        halo: usize,
        interior: IndexSpace,
        resolution: i64) -> Result<Self>
    {
        if resolution <= 0 {
            return Err(Error::Configuration(format!("invalid panel resolution {}", resolution)))
        }
        let delta = 2.0 * FRAC_PI_4 / resolution as f64;
        let h = halo as i64;
        let (a0, b0) = interior.start();
        let (a1, b1) = interior.end();

        let edges = |g0: i64, g1: i64| -> Vec<f64> {
            (g0 - h ..= g1 + h).map(|g| -FRAC_PI_4 + g as f64 * delta).collect()
        };
        let nodes = |g0: i64, g1: i64| -> Vec<f64> {
            (g0 - h .. g1 + h).map(|g| -FRAC_PI_4 + (g as f64 + 0.5) * delta).collect()
        };
        Self::new(
            panel,
            refinement_level,
            halo,
            interior,
            nodes(a0, a1),
            nodes(b0, b1),
            edges(a0, a1),
            edges(b0, b1))
    }


    pub fn panel(&self) -> usize {
        self.panel
    }


    pub fn refinement_level(&self) -> u32 {
        self.refinement_level
    }


    pub fn halo(&self) -> usize {
        self.halo
    }


    /**
     * The interior of this box in global panel indexes, at its own
     * refinement level.
     */
    pub fn global_interior(&self) -> &IndexSpace {
        &self.interior
    }


    pub fn interior_width(&self) -> (usize, usize) {
        self.interior.dim()
    }


    pub fn total_width(&self) -> (usize, usize) {
        let (wa, wb) = self.interior_width();
        (wa + 2 * self.halo, wb + 2 * self.halo)
    }


    /**
     * Number of nodes in one horizontal layer, including the halo.
     */
    pub fn total_nodes(&self) -> usize {
        let (ta, tb) = self.total_width();
        ta * tb
    }


    /**
     * Number of interior cells bordering the patch boundary, counted once per
     * side (corner cells count twice).
     */
    pub fn interior_perimeter(&self) -> usize {
        let (wa, wb) = self.interior_width();
        2 * (wa + wb)
    }


    /**
     * The interior in local indexes.
     */
    pub fn local_interior(&self) -> IndexSpace {
        let h = self.halo as i64;
        let (wa, wb) = self.interior_width();
        range2d(h .. h + wa as i64, h .. h + wb as i64)
    }


    /**
     * The total extent (interior plus halo) in local indexes.
     */
    pub fn local_total(&self) -> IndexSpace {
        let (ta, tb) = self.total_width();
        range2d(0 .. ta as i64, 0 .. tb as i64)
    }


    pub fn global_to_local(&self, index: (i64, i64)) -> (i64, i64) {
        let (a0, b0) = self.interior.start();
        let h = self.halo as i64;
        (index.0 - a0 + h, index.1 - b0 + h)
    }


    pub fn local_to_global(&self, index: (i64, i64)) -> (i64, i64) {
        let (a0, b0) = self.interior.start();
        let h = self.halo as i64;
        (index.0 + a0 - h, index.1 + b0 - h)
    }


    pub fn a_nodes(&self) -> &[f64] {
        &self.a_nodes
    }


    pub fn b_nodes(&self) -> &[f64] {
        &self.b_nodes
    }


    pub fn a_edges(&self) -> &[f64] {
        &self.a_edges
    }


    pub fn b_edges(&self) -> &[f64] {
        &self.b_edges
    }
}
