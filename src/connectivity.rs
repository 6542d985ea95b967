use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::grid_data::GridData;
use crate::patch_box::PatchBox;
use crate::topology::Opposing;




/// Which halves of an exchange a relation takes part in. Most relations
/// are mutual. Where three panels meet, the corner blocks cannot pair up,
/// so each such corner receives through an inbound relation and its supplier
/// serves it through a matching outbound one.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    Mutual,
    Inbound,
    Outbound,
}

impl Link {
    /// The link of the relation on the other side.
    pub fn reciprocal(self) -> Link {
        match self {
            Link::Mutual => Link::Mutual,
            Link::Inbound => Link::Outbound,
            Link::Outbound => Link::Inbound,
        }
    }
}




#[derive(Clone, Debug)]


/**
 * One directed adjacency relation from a patch to a neighbor, over a span of
 * its boundary in one direction.
 *
 * For edges, `span` is the range of local running indexes (beta for Right
 * and Left, alpha for Top and Bottom) covered by the neighbor. For corners,
 * `span` holds the local anchor cell: the interior cell at the tip of the
 * corner, from which the h x h halo block extends outward.
 *
 * The relation knows the neighbor-local anchor of the reciprocal relation,
 * which is how incoming halo messages are matched to it.
 */
pub struct ExteriorNeighbor {
    direction: Direction,
    opposing: Direction,
    neighbor: usize,
    reverse: bool,
    flip: bool,
    boundary_size: usize,
    first: i64,
    second: i64,
    remote_anchor: (i64, i64),
    link: Link,
    send_buffer: Vec<f64>,
    recv_buffer: Vec<f64>,
    expected: Option<usize>,
}




// ============================================================================
impl ExteriorNeighbor {


    pub fn new(
        direction: Direction,
        neighbor: usize,
        opposing: Opposing,
        span: (i64, i64),
        remote_anchor: (i64, i64),
        halo: usize,
        max_variables: usize) -> Self
    {
        let boundary_size = if direction.is_edge() {
            assert!(span.1 > span.0, "empty edge span {:?}", span);
            (span.1 - span.0) as usize
        } else {
            halo
        };
        let capacity = boundary_size * halo * max_variables;

        Self {
            direction,
            opposing: opposing.direction,
            neighbor,
            reverse: opposing.reverse,
            flip: opposing.flip,
            boundary_size,
            first: span.0,
            second: span.1,
            remote_anchor,
            link: Link::Mutual,
            send_buffer: Vec::with_capacity(capacity),
            recv_buffer: Vec::with_capacity(capacity),
            expected: None,
        }
    }


    /**
     * Replace the neighbor-local anchor of the reciprocal relation. The grid
     * fills this in once it has folded the relation's halo key onto the
     * neighbor.
     */
    pub fn with_remote_anchor(mut self, anchor: (i64, i64)) -> Self {
        self.remote_anchor = anchor;
        self
    }


    pub fn with_link(mut self, link: Link) -> Self {
        self.link = link;
        self
    }


    pub fn direction(&self) -> Direction {
        self.direction
    }


    pub fn link(&self) -> Link {
        self.link
    }


    /// Whether this relation fills part of the patch's halo.
    pub fn receives(&self) -> bool {
        self.link != Link::Outbound
    }


    /// Whether this relation sends interior data to the neighbor.
    pub fn sends(&self) -> bool {
        self.link != Link::Inbound
    }


    pub fn opposing(&self) -> Direction {
        self.opposing
    }


    pub fn neighbor(&self) -> usize {
        self.neighbor
    }


    pub fn reverse(&self) -> bool {
        self.reverse
    }


    pub fn flip(&self) -> bool {
        self.flip
    }


    /**
     * Segment length for an edge; the halo width for a corner.
     */
    pub fn boundary_size(&self) -> usize {
        self.boundary_size
    }


    pub fn span(&self) -> (i64, i64) {
        (self.first, self.second)
    }


    pub fn remote_anchor(&self) -> (i64, i64) {
        self.remote_anchor
    }


    pub fn send_buffer(&self) -> &[f64] {
        &self.send_buffer
    }


    pub fn recv_buffer(&self) -> &[f64] {
        &self.recv_buffer
    }


    /**
     * Number of halo values per (component, level) column carried by this
     * relation.
     */
    pub fn cell_count(&self, halo: usize) -> usize {
        self.boundary_size * halo
    }


    /**
     * The local cell that identifies this relation to its neighbor: for an
     * edge, the interior cell at depth zero at the start of the span; for a
     * corner, the anchor.
     */
    pub fn anchor(&self, patch_box: &PatchBox) -> (i64, i64) {
        if self.direction.is_edge() {
            self.edge_interior(patch_box, 0, self.first)
        } else {
            (self.first, self.second)
        }
    }


    /**
     * The local halo cell whose owner is the neighbor's anchor cell.
     */
    pub fn halo_key(&self, patch_box: &PatchBox) -> (i64, i64) {
        if self.direction.is_edge() {
            let s = if self.reverse { self.second - 1 } else { self.first };
            self.edge_halo(patch_box, 0, s)
        } else {
            let (sa, sb) = self.direction.signs();
            (self.first + sa, self.second + sb)
        }
    }


    /**
     * The local halo cells filled by this relation, in the canonical order
     * shared with the neighbor: depth-major then running index for edges;
     * alpha offset then beta offset for corners.
     */
    pub fn halo_cells(&self, patch_box: &PatchBox) -> Vec<(i64, i64)> {
        let h = patch_box.halo() as i64;

        if self.direction.is_edge() {
            (0..h)
                .flat_map(|m| (self.first..self.second).map(move |s| (m, s)))
                .map(|(m, s)| self.edge_halo(patch_box, m, s))
                .collect()
        } else {
            let (sa, sb) = self.direction.signs();
            (0..h)
                .flat_map(|u| (0..h).map(move |v| (u, v)))
                .map(|(u, v)| (self.first + sa * (1 + u), self.second + sb * (1 + v)))
                .collect()
        }
    }


    /**
     * The local interior cells sent through this relation, listed in the
     * neighbor's canonical halo order.
     */
    pub fn interior_cells(&self, patch_box: &PatchBox) -> Vec<(i64, i64)> {
        let h = patch_box.halo() as i64;

        if self.direction.is_edge() {
            let n = self.second - self.first;
            (0..h)
                .flat_map(|m| (0..n).map(move |k| (m, k)))
                .map(|(m, k)| {
                    let s = if self.reverse { self.second - 1 - k } else { self.first + k };
                    self.edge_interior(patch_box, m, s)
                })
                .collect()
        } else {
            let (sa, sb) = self.direction.signs();
            (0..h)
                .flat_map(|u| (0..h).map(move |v| (u, v)))
                .map(|(u, v)| if self.flip { (v, u) } else { (u, v) })
                .map(|(u, v)| (self.first - sa * u, self.second - sb * v))
                .collect()
        }
    }


    /**
     * Fill the send buffer from the given arrays, in the neighbor's frame.
     */
    pub fn pack(&mut self, patch_box: &PatchBox, arrays: &[&GridData]) {
        let cells = self.interior_cells(patch_box);
        self.send_buffer.clear();

        for array in arrays {
            for c in 0..array.components() {
                for k in 0..array.levels() {
                    for &(i, j) in &cells {
                        self.send_buffer.push(array[(c, k, i as usize, j as usize)])
                    }
                }
            }
        }
    }


    /**
     * Post a receive of `len` values for the current exchange.
     */
    pub fn post_receive(&mut self, len: usize) {
        self.expected = Some(len);
    }


    pub fn is_pending(&self) -> bool {
        self.expected.is_some()
    }


    /**
     * Complete the posted receive with an incoming payload. A relation with
     * no posted receive, or a payload of the wrong length, means the
     * processes disagree about the exchange.
     */
    pub fn accept(&mut self, payload: &[f64]) -> Result<()> {
        match self.expected {
            None => Err(Error::Protocol(format!(
                "duplicate halo message for the {:?} relation to patch {}", self.direction, self.neighbor))),
            Some(n) if n != payload.len() => Err(Error::Protocol(format!(
                "halo message for the {:?} relation to patch {} has {} values, expected {}",
                self.direction, self.neighbor, payload.len(), n))),
            Some(_) => {
                self.recv_buffer.clear();
                self.recv_buffer.extend_from_slice(payload);
                self.expected = None;
                Ok(())
            }
        }
    }


    /**
     * Write the receive buffer into the halo of the given arrays.
     */
    pub fn unpack(&self, patch_box: &PatchBox, arrays: &mut [&mut GridData]) {
        let cells = self.halo_cells(patch_box);
        let mut values = self.recv_buffer.iter();

        for array in arrays.iter_mut() {
            for c in 0..array.components() {
                for k in 0..array.levels() {
                    for &(i, j) in &cells {
                        match values.next() {
                            Some(x) => array[(c, k, i as usize, j as usize)] = *x,
                            None => panic!("receive buffer is shorter than the halo region"),
                        }
                    }
                }
            }
        }
    }


    fn edge_interior(&self, patch_box: &PatchBox, depth: i64, s: i64) -> (i64, i64) {
        let interior = patch_box.local_interior();
        let (a0, b0) = interior.start();
        let (a1, b1) = interior.end();

        match self.direction {
            Direction::Right  => (a1 - 1 - depth, s),
            Direction::Left   => (a0 + depth, s),
            Direction::Top    => (s, b1 - 1 - depth),
            Direction::Bottom => (s, b0 + depth),
            corner => panic!("{:?} is not an edge", corner),
        }
    }


    fn edge_halo(&self, patch_box: &PatchBox, depth: i64, s: i64) -> (i64, i64) {
        let interior = patch_box.local_interior();
        let (a0, b0) = interior.start();
        let (a1, b1) = interior.end();

        match self.direction {
            Direction::Right  => (a1 + depth, s),
            Direction::Left   => (a0 - 1 - depth, s),
            Direction::Top    => (s, b1 + depth),
            Direction::Bottom => (s, b0 - 1 - depth),
            corner => panic!("{:?} is not an edge", corner),
        }
    }
}




#[derive(Clone, Debug, Default)]


/**
 * The ordered list of relations belonging to one patch.
 */
pub struct Connectivity {
    patch: usize,
    neighbors: Vec<ExteriorNeighbor>,
}




// ============================================================================
impl Connectivity {

    pub fn new(patch: usize) -> Self {
        Self { patch, neighbors: Vec::new() }
    }

    pub fn patch(&self) -> usize {
        self.patch
    }

    pub fn add_exterior_neighbor(&mut self, neighbor: ExteriorNeighbor) {
        self.neighbors.push(neighbor)
    }

    pub fn neighbors(&self) -> &[ExteriorNeighbor] {
        &self.neighbors
    }

    pub fn neighbors_mut(&mut self) -> &mut [ExteriorNeighbor] {
        &mut self.neighbors
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /**
     * Number of edge relations filling the halo.
     */
    pub fn edge_count(&self) -> usize {
        self.neighbors.iter().filter(|n| n.receives() && n.direction().is_edge()).count()
    }

    /**
     * Number of corner relations filling the halo.
     */
    pub fn corner_count(&self) -> usize {
        self.neighbors.iter().filter(|n| n.receives() && n.direction().is_corner()).count()
    }

    pub fn outbound_count(&self) -> usize {
        self.neighbors.iter().filter(|n| n.link() == Link::Outbound).count()
    }

    /**
     * Post a receive on every relation that fills the halo, sized for
     * `variables` values per halo cell.
     */
    pub fn prepare_exchange(&mut self, halo: usize, variables: usize) {
        for n in self.neighbors.iter_mut().filter(|n| n.receives()) {
            let len = n.cell_count(halo) * variables;
            n.post_receive(len)
        }
    }

    /**
     * Number of relations still waiting for their halo message.
     */
    pub fn pending(&self) -> usize {
        self.neighbors.iter().filter(|n| n.is_pending()).count()
    }

    /**
     * Find the relation that receives from `source`, whose reciprocal points
     * in `direction` and is anchored at `anchor` on the source patch.
     */
    pub fn find_mut(&mut self, source: usize, direction: Direction, anchor: (i64, i64)) -> Option<&mut ExteriorNeighbor> {
        self.neighbors.iter_mut().find(|n| {
            n.receives() && n.neighbor == source && n.opposing == direction && n.remote_anchor == anchor
        })
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Connectivity, ExteriorNeighbor, Link};
    use crate::direction::Direction;
    use crate::grid_data::GridData;
    use crate::index_space::range2d;
    use crate::model::DataLocation;
    use crate::patch_box::PatchBox;
    use crate::topology::Opposing;

    fn opposing(direction: Direction, reverse: bool, flip: bool) -> Opposing {
        Opposing { direction, reverse, flip }
    }

    fn filled(b: &PatchBox, offset: f64) -> GridData {
        let (ta, tb) = b.total_width();
        let mut data = GridData::new(DataLocation::Node, 1, 2, ta, tb);
        for (i, j) in b.local_interior().iter() {
            for k in 0..2 {
                let (ga, gb) = b.local_to_global((i, j));
                data[(0, k, i as usize, j as usize)] = offset + 100.0 * ga as f64 + gb as f64 + 1e4 * k as f64;
            }
        }
        data
    }

    #[test]
    fn edge_relation_covers_span_times_halo() {
        let b = PatchBox::equiangular(0, 0, 2, range2d(0..6, 0..4), 6).unwrap();
        let n = ExteriorNeighbor::new(Direction::Top, 1, opposing(Direction::Bottom, false, false), (3, 6), (2, 2), 2, 5);
        assert_eq!(n.boundary_size(), 3);
        assert_eq!(n.halo_cells(&b), vec![(3, 6), (4, 6), (5, 6), (3, 7), (4, 7), (5, 7)]);
        assert_eq!(n.interior_cells(&b), vec![(3, 5), (4, 5), (5, 5), (3, 4), (4, 4), (5, 4)]);
        assert_eq!(n.anchor(&b), (3, 5));
        assert_eq!(n.halo_key(&b), (3, 6));
        assert!(n.send_buffer.capacity() >= 30);
    }

    #[test]
    fn reversed_edge_runs_backward_on_the_sender() {
        let b = PatchBox::equiangular(0, 0, 1, range2d(0..4, 0..4), 4).unwrap();
        let n = ExteriorNeighbor::new(Direction::Right, 1, opposing(Direction::Right, true, false), (1, 5), (0, 0), 1, 1);
        assert_eq!(n.interior_cells(&b), vec![(4, 4), (4, 3), (4, 2), (4, 1)]);
        assert_eq!(n.halo_key(&b), (5, 4));
    }

    #[test]
    fn corner_relation_is_halo_squared() {
        let b = PatchBox::equiangular(0, 0, 2, range2d(0..4, 0..4), 4).unwrap();
        let n = ExteriorNeighbor::new(Direction::TopRight, 3, opposing(Direction::BottomLeft, false, true), (5, 5), (2, 2), 2, 1);
        assert_eq!(n.boundary_size(), 2);
        assert_eq!(n.halo_cells(&b), vec![(6, 6), (6, 7), (7, 6), (7, 7)]);
        assert_eq!(n.interior_cells(&b), vec![(5, 5), (4, 5), (5, 4), (4, 4)]);
        assert_eq!(n.halo_key(&b), (6, 6));
    }

    #[test]
    fn packed_edge_fills_the_neighbor_halo() {
        // Two side-by-side patches on one panel: `west` spans alpha 0..4 and
        // `east` spans alpha 4..8.
        let west = PatchBox::equiangular(0, 0, 2, range2d(0..4, 0..3), 8).unwrap();
        let east = PatchBox::equiangular(0, 0, 2, range2d(4..8, 0..3), 8).unwrap();
        let mut to_east = ExteriorNeighbor::new(Direction::Right, 1, opposing(Direction::Left, false, false), (2, 5), (2, 2), 2, 1);
        let mut from_west = ExteriorNeighbor::new(Direction::Left, 0, opposing(Direction::Right, false, false), (2, 5), (5, 2), 2, 1);

        let source = filled(&west, 0.0);
        let mut target = filled(&east, 0.5);

        to_east.pack(&west, &[&source]);
        from_west.post_receive(to_east.send_buffer().len());
        from_west.accept(to_east.send_buffer()).unwrap();
        from_west.unpack(&east, &mut [&mut target]);

        for (i, j) in from_west.halo_cells(&east) {
            let (ga, gb) = east.local_to_global((i, j));
            for k in 0..2 {
                let expected = 100.0 * ga as f64 + gb as f64 + 1e4 * k as f64;
                assert_eq!(target[(0, k, i as usize, j as usize)], expected);
            }
        }
        assert_eq!(to_east.anchor(&west), (5, 2));
        assert_eq!(from_west.halo_key(&east), (1, 2));
    }

    #[test]
    fn accept_rejects_duplicates_and_wrong_sizes() {
        let mut n = ExteriorNeighbor::new(Direction::Left, 0, opposing(Direction::Right, false, false), (0, 2), (0, 0), 1, 1);
        assert!(n.accept(&[1.0, 2.0]).is_err());
        n.post_receive(2);
        assert!(n.accept(&[1.0]).is_err());
        assert!(n.is_pending());
        n.accept(&[1.0, 2.0]).unwrap();
        assert!(!n.is_pending());
        assert!(n.accept(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn connectivity_finds_relations_by_anchor() {
        let mut c = Connectivity::new(7);
        let o = opposing(Direction::BottomLeft, false, false);
        c.add_exterior_neighbor(ExteriorNeighbor::new(Direction::TopRight, 2, o, (3, 3), (1, 1), 1, 1));
        c.add_exterior_neighbor(ExteriorNeighbor::new(Direction::TopRight, 2, o, (3, 5), (1, 4), 1, 1));
        c.add_exterior_neighbor(ExteriorNeighbor::new(Direction::Top, 2, opposing(Direction::Bottom, false, false), (1, 4), (1, 1), 1, 1));
        assert_eq!(c.edge_count(), 1);
        assert_eq!(c.corner_count(), 2);

        c.prepare_exchange(1, 3);
        assert_eq!(c.pending(), 3);
        let found = c.find_mut(2, Direction::BottomLeft, (1, 4)).unwrap();
        assert_eq!(found.span(), (3, 5));
        assert!(c.find_mut(2, Direction::BottomLeft, (9, 9)).is_none());
        assert!(c.find_mut(2, Direction::Bottom, (1, 1)).is_some());
    }

    #[test]
    fn one_way_relations_only_count_where_they_receive() {
        let mut c = Connectivity::new(0);
        let o = opposing(Direction::TopLeft, false, true);
        c.add_exterior_neighbor(ExteriorNeighbor::new(Direction::BottomLeft, 5, o, (2, 2), (2, 11), 2, 3).with_link(Link::Inbound));
        c.add_exterior_neighbor(ExteriorNeighbor::new(Direction::TopLeft, 5, o, (2, 2), (2, 11), 2, 3).with_link(Link::Outbound));
        assert_eq!(c.corner_count(), 1);
        assert_eq!(c.outbound_count(), 1);
        assert!(!c.neighbors()[0].sends() && !c.neighbors()[1].receives());
        assert_eq!(Link::Inbound.reciprocal(), Link::Outbound);

        c.prepare_exchange(2, 3);
        assert_eq!(c.pending(), 1);
        let found = c.find_mut(5, Direction::TopLeft, (2, 11)).unwrap();
        assert_eq!(found.link(), Link::Inbound);
        assert!(c.find_mut(5, Direction::BottomLeft, (2, 11)).is_none());
    }
}
