//! Panel adjacency for a grid made of square panels, and the cubed-sphere
//! instance of it.

use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::index_space::range2d;
use crate::patch_box::PatchBox;




/// How a relation looks from the other side: the direction on the neighbor
/// that points back, whether the running index is reversed across the seam,
/// and whether the alpha and beta axes are swapped.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Opposing {
    pub direction: Direction,
    pub reverse: bool,
    pub flip: bool,
}




/// Knowledge of how panels are stitched together. Implementors answer two
/// questions: where a panel index that falls outside its panel actually
/// lives, and how a direction on one panel appears from a neighboring one.
///
pub trait PanelTopology {
    /// Return the number of panels.
    fn panel_count(&self) -> usize;

    /// Check that the given base resolution can be used with this topology.
    fn validate_resolution(&self, _resolution: (i64, i64)) -> Result<()> {
        Ok(())
    }

    /// Map an index on `panel`, which may lie outside the panel's
    /// `resolution`, onto the panel that owns it. Returns `None` for indexes
    /// that cannot be resolved, such as points more than a panel width away.
    fn fold(&self, panel: usize, resolution: (i64, i64), index: (i64, i64)) -> Option<(usize, (i64, i64))>;

    /// Return the opposing direction for a relation pointing from panel
    /// `first` in `direction` to panel `second`. It is an error if `second`
    /// is not reachable from `first` that way.
    fn opposing_direction(&self, first: usize, second: usize, direction: Direction) -> Result<Opposing>;
}




/// The six-panel cubed sphere. Each panel has a local frame (center, alpha
/// axis, beta axis):
///
/// | panel | center | alpha | beta |
/// |-------|--------|-------|------|
/// | 0     | +x     | +y    | +z   |
/// | 1     | +y     | -x    | +z   |
/// | 2     | -x     | -y    | +z   |
/// | 3     | -y     | +x    | +z   |
/// | 4     | +z     | +y    | -x   |
/// | 5     | -z     | +y    | +x   |
///
#[derive(Clone, Debug, Default)]
pub struct CubedSphere;

/// For each panel and each edge (Right, Top, Left, Bottom): the neighboring
/// panel, the edge it meets there, and the (reverse, flip) flags.
const EDGES: [[(usize, Direction, bool, bool); 4]; 6] = {
    use Direction::{Bottom as B, Left as L, Right as R, Top as T};
    [
        [(1, L, false, false), (4, B, false, false), (3, R, false, false), (5, T, false, false)],
        [(2, L, false, false), (4, R, false, true),  (0, R, false, false), (5, R, true,  true )],
        [(3, L, false, false), (4, T, true,  false), (1, R, false, false), (5, B, true,  false)],
        [(0, L, false, false), (4, L, true,  true ), (2, R, false, false), (5, L, false, true )],
        [(1, T, false, true ), (2, T, true,  false), (3, T, true,  true ), (0, T, false, false)],
        [(1, B, true,  true ), (0, B, false, false), (3, B, false, true ), (2, B, true,  false)],
    ]
};




// ============================================================================
impl CubedSphere {

    pub const PANELS: usize = 6;


    /// Look up the neighbor across one edge of a panel.
    ///
    pub fn edge(&self, panel: usize, edge: Direction) -> (usize, Direction, bool, bool) {
        let column = match edge {
            Direction::Right => 0,
            Direction::Top => 1,
            Direction::Left => 2,
            Direction::Bottom => 3,
            corner => panic!("{:?} is not an edge", corner),
        };
        EDGES[panel][column]
    }


    /// Return boxes tiling every panel with `split` x `split` patches at
    /// refinement level zero. Boxes are ordered by panel, then alpha block,
    /// then beta block.
    ///
    pub fn default_patches(&self, resolution: i64, halo: usize, split: usize) -> Result<Vec<PatchBox>> {
        if split == 0 || resolution < split as i64 {
            return Err(Error::Configuration(format!(
                "cannot split a panel of resolution {} into {} blocks per side", resolution, split)))
        }
        let s = split as i64;
        let bounds = |n: i64| resolution * n / s;
        let mut boxes = Vec::with_capacity(Self::PANELS * split * split);

        for panel in 0..Self::PANELS {
            for i in 0..s {
                for j in 0..s {
                    let interior = range2d(bounds(i)..bounds(i + 1), bounds(j)..bounds(j + 1));
                    boxes.push(PatchBox::equiangular(panel, 0, halo, interior, resolution)?);
                }
            }
        }
        Ok(boxes)
    }


    fn cross(&self, panel: usize, edge: Direction, depth: i64, tangent: i64, n: i64) -> Option<(usize, (i64, i64))> {
        if depth >= n {
            return None
        }
        let (neighbor, facing, reverse, _) = self.edge(panel, edge);
        let t = if reverse { n - 1 - tangent } else { tangent };

        let index = match facing {
            Direction::Left   => (depth, t),
            Direction::Right  => (n - 1 - depth, t),
            Direction::Bottom => (t, depth),
            Direction::Top    => (t, n - 1 - depth),
            _ => unreachable!(),
        };
        Some((neighbor, index))
    }
}




// ============================================================================
impl PanelTopology for CubedSphere {

    fn panel_count(&self) -> usize {
        Self::PANELS
    }

    fn validate_resolution(&self, resolution: (i64, i64)) -> Result<()> {
        if resolution.0 != resolution.1 || resolution.0 <= 0 {
            Err(Error::Configuration(format!("cubed sphere panels must be square, got {:?}", resolution)))
        } else {
            Ok(())
        }
    }

    fn fold(&self, panel: usize, resolution: (i64, i64), index: (i64, i64)) -> Option<(usize, (i64, i64))> {
        let n = resolution.0;
        let (ia, ib) = index;
        let outside_a = ia < 0 || ia >= n;
        let outside_b = ib < 0 || ib >= n;

        match (outside_a, outside_b) {
            (false, false) => Some((panel, index)),
            (true, true) => {
                // Beyond a vertex: cross the alpha edge, then fold the
                // remaining beta overshoot on the panel reached.
                let (neighbor, index) = if ia < 0 {
                    self.cross(panel, Direction::Left, -1 - ia, ib, n)?
                } else {
                    self.cross(panel, Direction::Right, ia - n, ib, n)?
                };
                self.fold(neighbor, resolution, index)
            }
            (true, false) => {
                if ia < 0 {
                    self.cross(panel, Direction::Left, -1 - ia, ib, n)
                } else {
                    self.cross(panel, Direction::Right, ia - n, ib, n)
                }
            }
            (false, true) => {
                if ib < 0 {
                    self.cross(panel, Direction::Bottom, -1 - ib, ia, n)
                } else {
                    self.cross(panel, Direction::Top, ib - n, ia, n)
                }
            }
        }
    }

    fn opposing_direction(&self, first: usize, second: usize, direction: Direction) -> Result<Opposing> {
        if first == second {
            return Ok(Opposing { direction: direction.reverse(), reverse: false, flip: false })
        }
        if direction.is_edge() {
            let (neighbor, facing, reverse, flip) = self.edge(first, direction);

            if neighbor != second {
                return Err(Error::Configuration(format!(
                    "panel {} is not across the {:?} edge of panel {}", second, direction, first)))
            }
            return Ok(Opposing { direction: facing, reverse, flip })
        }

        // A corner crosses exactly one panel edge; the other component is
        // tangent to that edge and is carried across with the seam's running
        // direction.
        let (along_a, along_b) = direction.edge_components();
        let (along_a, along_b) = match (along_a, along_b) {
            (Some(a), Some(b)) => (a, b),
            _ => unreachable!(),
        };

        for &(crossed, tangent) in &[(along_a, along_b), (along_b, along_a)] {
            let (neighbor, facing, reverse, flip) = self.edge(first, crossed);

            if neighbor == second {
                let (ta, tb) = tangent.signs();
                let tangent_is_positive = ta + tb > 0;
                let back = if tangent_is_positive != reverse { -1 } else { 1 };
                let (fa, fb) = facing.signs();
                let signs = if facing.runs_along_beta() { (fa, back) } else { (back, fb) };

                return match Direction::from_signs(signs) {
                    Some(direction) => Ok(Opposing { direction, reverse, flip }),
                    None => unreachable!(),
                }
            }
        }
        Err(Error::Configuration(format!(
            "panel {} does not touch the {:?} corner of panel {}", second, direction, first)))
    }
}
