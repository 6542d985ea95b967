use log::{debug, info};
use crate::connectivity::{ExteriorNeighbor, Link};
use crate::consolidation::{generate_tag, parse_tag, ConsolidatedData, ConsolidationStatus};
use crate::direction::Direction;
use crate::error::{Error, Result};
use crate::grid_data::DataType;
use crate::grid_patch::{ChecksumType, GridPatch};
use crate::index_space::range2d;
use crate::layout::GridLayout;
use crate::meshing::{rescale_index, PatchQuery};
use crate::message::{Communicator, Envelope, HaloMessage, Mailbox, ReduceOp};
use crate::model::{DataLocation, ModelConfig};
use crate::patch_box::PatchBox;
use crate::topology::{CubedSphere, Opposing, PanelTopology};




/**
 * One stop of the perimeter walk: a corner (one sample, with its local
 * anchor cell) or an edge (one sample per local running index, in walk
 * order).
 */
enum PerimeterSide {
    Corner(Direction, (i64, i64)),
    Edge(Direction, Vec<i64>),
}




/**
 * The distributed patch mesh. Every process builds the same list of patches;
 * `distribute_patches` decides which of them this process owns, and the grid
 * then drives halo exchange, consolidation at rank zero, and reductions over
 * the owned patches.
 *
 * The lifecycle is: add patches (or load a layout), distribute, initialize
 * connectivity, then exchange and consolidate as often as needed. Calls made
 * out of that order are contract errors.
 */
pub struct Grid<C> {
    model: ModelConfig,
    mailbox: Mailbox<C>,
    topology: Box<dyn PanelTopology + Send>,
    base_resolution: (i64, i64),
    refinement_ratio: i64,
    patches: Vec<GridPatch>,
    cumulative_2d: Vec<usize>,
    interfaces: Vec<f64>,
    levels: Vec<f64>,
    round: u64,
    consolidation_round: u64,
    distributed: bool,
    connected: bool,
}




// ============================================================================
impl<C: Communicator> Grid<C> {


    /**
     * Create an empty grid. The model and the base resolution are validated
     * here; the vertical coordinate starts out uniform on [0, 1].
     */
    pub fn new(
        model: ModelConfig,
        comm: C,
        topology: Box<dyn PanelTopology + Send>,
        base_resolution: (i64, i64),
        refinement_ratio: i64) -> Result<Self>
    {
        model.validate()?;
        topology.validate_resolution(base_resolution)?;

        if refinement_ratio < 2 {
            return Err(Error::Configuration(format!("refinement ratio must be at least 2, got {}", refinement_ratio)))
        }
        let n = model.levels;
        let interfaces: Vec<f64> = (0..=n).map(|k| k as f64 / n as f64).collect();
        let levels = midpoints(&interfaces);

        Ok(Self {
            model,
            mailbox: Mailbox::new(comm),
            topology,
            base_resolution,
            refinement_ratio,
            patches: Vec::new(),
            cumulative_2d: Vec::new(),
            interfaces,
            levels,
            round: 0,
            consolidation_round: 0,
            distributed: false,
            connected: false,
        })
    }


    /**
     * Create a cubed-sphere grid with every panel split into `split` x
     * `split` patches at refinement level zero.
     */
    pub fn cubed_sphere(model: ModelConfig, comm: C, resolution: i64, split: usize) -> Result<Self> {
        let boxes = CubedSphere.default_patches(resolution, model.halo, split)?;
        let mut grid = Self::new(model, comm, Box::new(CubedSphere), (resolution, resolution), 2)?;
        grid.add_patches(boxes)?;
        Ok(grid)
    }


    /**
     * Create a grid from a persisted layout.
     */
    pub fn from_layout(
        model: ModelConfig,
        comm: C,
        topology: Box<dyn PanelTopology + Send>,
        layout: &GridLayout) -> Result<Self>
    {
        let mut grid = Self::new(model, comm, topology, layout.base_resolution, layout.refinement_ratio)?;
        grid.load_layout(layout)?;
        Ok(grid)
    }


    pub fn model(&self) -> &ModelConfig {
        &self.model
    }


    pub fn rank(&self) -> usize {
        self.mailbox.rank()
    }


    pub fn size(&self) -> usize {
        self.mailbox.size()
    }


    pub fn is_root(&self) -> bool {
        self.rank() == 0
    }


    pub fn base_resolution(&self) -> (i64, i64) {
        self.base_resolution
    }


    pub fn refinement_ratio(&self) -> i64 {
        self.refinement_ratio
    }


    /**
     * Panel resolution at the given refinement level.
     */
    pub fn resolution(&self, level: u32) -> (i64, i64) {
        let factor = self.refinement_ratio.pow(level);
        (self.base_resolution.0 * factor, self.base_resolution.1 * factor)
    }


    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }


    pub fn patch(&self, index: usize) -> &GridPatch {
        &self.patches[index]
    }


    pub fn patch_mut(&mut self, index: usize) -> &mut GridPatch {
        &mut self.patches[index]
    }


    pub fn patches(&self) -> &[GridPatch] {
        &self.patches
    }


    /**
     * Indexes of the patches owned by this process.
     */
    pub fn active_indices(&self) -> Vec<usize> {
        self.active_patches().map(|p| p.index()).collect()
    }


    pub fn active_patches(&self) -> impl Iterator<Item = &GridPatch> {
        self.patches.iter().filter(|p| p.is_active())
    }


    pub fn active_patches_mut(&mut self) -> impl Iterator<Item = &mut GridPatch> {
        self.patches.iter_mut().filter(|p| p.is_active())
    }


    pub fn vertical_interfaces(&self) -> &[f64] {
        &self.interfaces
    }


    pub fn vertical_levels(&self) -> &[f64] {
        &self.levels
    }


    /**
     * Block until every process has called `barrier`.
     */
    pub fn barrier(&mut self) -> Result<()> {
        self.mailbox.barrier()
    }




    // ------------------------------------------------------------------------
    // Construction


    /**
     * Register a patch and return its global index. The box must use the
     * model's halo width, lie on a panel of the topology, fit inside the
     * panel at its refinement level, and be at least one halo wide on both
     * axes.
     */
    pub fn add_patch(&mut self, patch_box: PatchBox) -> Result<usize> {
        assert!(!self.distributed, "patches cannot be added after distribution");

        if patch_box.halo() != self.model.halo {
            return Err(Error::Configuration(format!(
                "patch halo {} does not match the model halo {}", patch_box.halo(), self.model.halo)))
        }
        if patch_box.panel() >= self.topology.panel_count() {
            return Err(Error::Configuration(format!(
                "panel {} does not exist (the topology has {} panels)", patch_box.panel(), self.topology.panel_count())))
        }
        let (wa, wb) = patch_box.interior_width();

        if wa < patch_box.halo() || wb < patch_box.halo() {
            return Err(Error::Configuration(format!(
                "patch interior {}x{} is narrower than its halo {}", wa, wb, patch_box.halo())))
        }
        let (na, nb) = self.resolution(patch_box.refinement_level());
        let panel = range2d(0..na, 0..nb);
        let (a1, b1) = patch_box.global_interior().end();

        if !panel.contains(patch_box.global_interior().start()) || !panel.contains((a1 - 1, b1 - 1)) {
            return Err(Error::Configuration(format!(
                "patch interior {:?} is outside the {}x{} panel", patch_box.global_interior(), na, nb)))
        }
        let index = self.patches.len();
        let offset = match self.patches.last() {
            Some(last) => self.cumulative_2d[last.index()] + last.total_node_count_2d(),
            None => 0,
        };
        self.cumulative_2d.push(offset);
        self.patches.push(GridPatch::new(index, patch_box));
        Ok(index)
    }


    pub fn add_patches<I>(&mut self, boxes: I) -> Result<()>
    where
        I: IntoIterator<Item = PatchBox>,
    {
        for patch_box in boxes {
            self.add_patch(patch_box)?;
        }
        Ok(())
    }


    /**
     * Assign patch `n` to rank `n mod size`. Owned patches allocate their
     * field storage; all others stay geometry-only stubs.
     */
    pub fn distribute_patches(&mut self) {
        assert!(!self.distributed, "patches are already distributed");

        let rank = self.mailbox.rank();
        let size = self.mailbox.size();

        for patch in &mut self.patches {
            let owner = patch.index() % size;

            if owner == rank {
                patch.initialize_data_local(&self.model, owner);
                fill_z_levels(patch, &self.levels);
            } else {
                patch.initialize_data_remote(owner);
            }
        }
        self.distributed = true;
        info!("[{}] owns {} of {} patches", rank, self.active_patches().count(), self.patches.len());
    }


    /**
     * Replace the vertical coordinate with the given level interfaces. There
     * must be one more interface than the model has levels, in strictly
     * increasing order. Level centers are the interface midpoints, and the Z
     * field of every owned patch is refilled from them.
     */
    pub fn initialize_vertical_coordinate(&mut self, interfaces: &[f64]) -> Result<()> {
        let n = self.model.levels;

        if interfaces.len() != n + 1 {
            return Err(Error::Configuration(format!(
                "{} vertical interfaces given for a model with {} levels", interfaces.len(), n)))
        }
        if interfaces.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Configuration("vertical interfaces must be strictly increasing".into()))
        }
        self.interfaces = interfaces.to_vec();
        self.levels = midpoints(interfaces);

        for patch in self.patches.iter_mut().filter(|p| p.is_active()) {
            fill_z_levels(patch, &self.levels)
        }
        Ok(())
    }




    // ------------------------------------------------------------------------
    // Connectivity


    /**
     * Return the patch covering an index on a panel at the given refinement
     * level. The index may lie beyond the panel; it is folded onto the
     * neighboring panel first, as the topology resolves it.
     */
    pub fn patch_from_coordinate_index(&self, level: u32, panel: usize, index: (i64, i64)) -> Option<usize> {
        let (panel, index) = self.topology.fold(panel, self.resolution(level), index)?;
        self.patches[..].patch_containing_point(panel, level, index, self.refinement_ratio)
    }


    /**
     * The patches owning the cells just outside a patch's interior, sampled
     * in walk order: bottom-left corner, bottom edge left to right,
     * bottom-right corner, right edge bottom to top, top-right corner, top
     * edge right to left, top-left corner, left edge top to bottom.
     */
    pub fn boundary_samples(&self, patch: usize) -> Vec<Option<usize>> {
        let pb = self.patches[patch].patch_box();
        let (panel, level) = (pb.panel(), pb.refinement_level());
        let (a0, b0) = pb.global_interior().start();
        let (a1, b1) = pb.global_interior().end();
        let lookup = |index| self.patch_from_coordinate_index(level, panel, index);

        let mut samples = Vec::with_capacity(pb.interior_perimeter() + 4);
        samples.push(lookup((a0 - 1, b0 - 1)));
        samples.extend((a0..a1).map(|a| lookup((a, b0 - 1))));
        samples.push(lookup((a1, b0 - 1)));
        samples.extend((b0..b1).map(|b| lookup((a1, b))));
        samples.push(lookup((a1, b1)));
        samples.extend((a0..a1).rev().map(|a| lookup((a, b1))));
        samples.push(lookup((a0 - 1, b1)));
        samples.extend((b0..b1).rev().map(|b| lookup((a0 - 1, b))));
        samples
    }


    /**
     * Build the exterior neighbor relations of every owned patch, plus the
     * outbound relations serving panel-vertex corners of other patches.
     * Fails if a diagonal connection does not have a halo's worth of
     * interior cells on both sides, or if the topology cannot relate two
     * patches.
     */
    pub fn initialize_connectivity(&mut self) -> Result<()> {
        assert!(self.distributed, "patches must be distributed before connecting them");
        assert!(!self.connected, "connectivity is already initialized");

        for patch in self.active_indices() {
            let mut relations = self.connect_patch(patch)?;
            relations.extend(self.vertex_feeds(patch));
            let connectivity = self.patches[patch].connectivity_mut();

            for relation in relations {
                connectivity.add_exterior_neighbor(relation)
            }
        }
        self.connected = true;

        let edges: usize = self.active_patches().map(|p| p.connectivity().edge_count()).sum();
        let corners: usize = self.active_patches().map(|p| p.connectivity().corner_count()).sum();
        let feeds: usize = self.active_patches().map(|p| p.connectivity().outbound_count()).sum();
        info!("[{}] connectivity: {} edge and {} corner relations, {} outbound", self.rank(), edges, corners, feeds);
        Ok(())
    }


    fn connect_patch(&self, patch: usize) -> Result<Vec<ExteriorNeighbor>> {
        use Direction::*;

        let pb = self.patches[patch].patch_box();
        let samples = self.boundary_samples(patch);
        let local = pb.local_interior();
        let (a0, b0) = local.start();
        let (a1, b1) = local.end();

        let walk = vec![
            PerimeterSide::Corner(BottomLeft, (a0, b0)),
            PerimeterSide::Edge(Bottom, (a0..a1).collect()),
            PerimeterSide::Corner(BottomRight, (a1 - 1, b0)),
            PerimeterSide::Edge(Right, (b0..b1).collect()),
            PerimeterSide::Corner(TopRight, (a1 - 1, b1 - 1)),
            PerimeterSide::Edge(Top, (a0..a1).rev().collect()),
            PerimeterSide::Corner(TopLeft, (a0, b1 - 1)),
            PerimeterSide::Edge(Left, (b0..b1).rev().collect()),
        ];
        let mut relations = Vec::new();
        let mut cursor = 0;

        for side in walk {
            match side {
                PerimeterSide::Corner(direction, anchor) => {
                    if let Some(neighbor) = samples[cursor] {
                        relations.push(self.connect(patch, direction, neighbor, anchor)?)
                    }
                    cursor += 1;
                }
                PerimeterSide::Edge(direction, running) => {
                    let n = running.len();
                    self.connect_edge(patch, direction, &running, &samples[cursor .. cursor + n], &mut relations)?;
                    cursor += n;
                }
            }
        }
        assert_eq!(cursor, samples.len(), "patch {} boundary walk left samples unconsumed", patch);
        assert_eq!(cursor, pb.interior_perimeter() + 4, "patch {} boundary walk has the wrong length", patch);
        Ok(relations)
    }


    /**
     * Coalesce one edge's samples into runs, one relation per run with a
     * neighbor, plus the two diagonal relations wherever the neighbor
     * changes.
     */
    fn connect_edge(
        &self,
        patch: usize,
        direction: Direction,
        running: &[i64],
        samples: &[Option<usize>],
        relations: &mut Vec<ExteriorNeighbor>) -> Result<()>
    {
        use Direction::*;

        let local = self.patches[patch].patch_box().local_interior();
        let (a0, b0) = local.start();
        let (a1, b1) = local.end();
        let n = samples.len();
        let mut start = 0;

        for k in 1..=n {
            if k < n && samples[k] == samples[start] {
                continue
            }
            if let Some(neighbor) = samples[start] {
                let (x, y) = (running[start], running[k - 1]);
                relations.push(self.connect(patch, direction, neighbor, (x.min(y), x.max(y) + 1))?);
            }
            if k < n {
                // s is the first cell of the new run, in walk order
                let s = running[k];
                let ((to_old, old_anchor), (to_new, new_anchor)) = match direction {
                    Bottom => ((BottomLeft, (s, b0)), (BottomRight, (s - 1, b0))),
                    Right  => ((BottomRight, (a1 - 1, s)), (TopRight, (a1 - 1, s - 1))),
                    Top    => ((TopRight, (s, b1 - 1)), (TopLeft, (s + 1, b1 - 1))),
                    Left   => ((TopLeft, (a0, s)), (BottomLeft, (a0, s + 1))),
                    corner => panic!("{:?} is not an edge", corner),
                };
                if let Some(old) = samples[start] {
                    relations.push(self.connect(patch, to_old, old, old_anchor)?)
                }
                if let Some(new) = samples[k] {
                    relations.push(self.connect(patch, to_new, new, new_anchor)?)
                }
            }
            start = k;
        }
        Ok(())
    }


    fn connect(&self, patch: usize, direction: Direction, neighbor: usize, span: (i64, i64)) -> Result<ExteriorNeighbor> {
        let pb = self.patches[patch].patch_box();
        let qb = self.patches[neighbor].patch_box();

        if direction.is_corner() && self.beyond_panel_vertex(pb, direction, span) {
            return self.connect_vertex(patch, direction, neighbor, span)
        }
        let opposing = self.topology.opposing_direction(pb.panel(), qb.panel(), direction)?;
        let relation = ExteriorNeighbor::new(
            direction,
            neighbor,
            opposing,
            span,
            (0, 0),
            pb.halo(),
            self.model.max_exchange_variables());

        if direction.is_corner() {
            self.check_diagonal(patch, &relation)?;
        }
        let key = pb.local_to_global(relation.halo_key(pb));
        let anchor = self.neighbor_local(pb, qb, key).ok_or_else(|| Error::Configuration(format!(
            "the {:?} halo of patch {} does not fold onto patch {}", direction, patch, neighbor)))?;

        Ok(relation.with_remote_anchor(anchor))
    }


    /**
     * The inbound relation filling a corner block that lies beyond a panel
     * vertex. The block folds onto a corner block of `neighbor`, which serves
     * it through an outbound relation.
     */
    fn connect_vertex(&self, patch: usize, direction: Direction, neighbor: usize, anchor: (i64, i64)) -> Result<ExteriorNeighbor> {
        let pb = self.patches[patch].patch_box();
        let qb = self.patches[neighbor].patch_box();
        let (facing, remote_anchor, flip) = self
            .vertex_source(pb, qb, direction, anchor)
            .ok_or_else(|| Error::Configuration(format!(
                "the {:?} halo of patch {} does not fold onto patch {}", direction, patch, neighbor)))?;

        let relation = ExteriorNeighbor::new(
            direction,
            neighbor,
            Opposing { direction: facing, reverse: false, flip },
            anchor,
            remote_anchor,
            pb.halo(),
            self.model.max_exchange_variables())
            .with_link(Link::Inbound);

        self.check_diagonal(patch, &relation)?;
        Ok(relation)
    }


    /**
     * Outbound relations of `patch`: one for each panel-vertex corner, of
     * any patch in the grid, whose halo block folds onto `patch`.
     */
    fn vertex_feeds(&self, patch: usize) -> Vec<ExteriorNeighbor> {
        use Direction::*;

        let qb = self.patches[patch].patch_box();
        let mut feeds = Vec::new();

        for other in &self.patches {
            let pb = other.patch_box();
            let (a0, b0) = pb.local_interior().start();
            let (a1, b1) = pb.local_interior().end();

            for &(direction, anchor) in &[
                (BottomLeft, (a0, b0)),
                (BottomRight, (a1 - 1, b0)),
                (TopRight, (a1 - 1, b1 - 1)),
                (TopLeft, (a0, b1 - 1)),
            ] {
                if !self.beyond_panel_vertex(pb, direction, anchor) {
                    continue
                }
                let (sa, sb) = direction.signs();
                let key = pb.local_to_global((anchor.0 + sa, anchor.1 + sb));

                if self.patch_from_coordinate_index(pb.refinement_level(), pb.panel(), key) != Some(patch) {
                    continue
                }
                if let Some((own, tip, flip)) = self.vertex_source(pb, qb, direction, anchor) {
                    let feed = ExteriorNeighbor::new(
                        own,
                        other.index(),
                        Opposing { direction, reverse: false, flip },
                        tip,
                        anchor,
                        qb.halo(),
                        self.model.max_exchange_variables());
                    feeds.push(feed.with_link(Link::Outbound))
                }
            }
        }
        feeds
    }


    /**
     * Whether the halo block beyond a corner anchor lies past both axes of
     * its panel.
     */
    fn beyond_panel_vertex(&self, pb: &PatchBox, direction: Direction, anchor: (i64, i64)) -> bool {
        let (sa, sb) = direction.signs();
        let (ga, gb) = pb.local_to_global((anchor.0 + sa, anchor.1 + sb));
        let (na, nb) = self.resolution(pb.refinement_level());
        (ga < 0 || ga >= na) && (gb < 0 || gb >= nb)
    }


    /**
     * Where the corner block of `from` beyond a panel vertex comes from on
     * `to`: the corner of `to` at that vertex, the local cell at its tip, and
     * whether the block's axes are swapped between the two frames.
     */
    fn vertex_source(&self, from: &PatchBox, to: &PatchBox, direction: Direction, anchor: (i64, i64)) -> Option<(Direction, (i64, i64), bool)> {
        let (sa, sb) = direction.signs();
        let resolution = self.resolution(from.refinement_level());
        let ghost = |u: i64| from.local_to_global((anchor.0 + sa * (1 + u), anchor.1 + sb));

        let (_, tip) = self.topology.fold(from.panel(), resolution, ghost(0))?;
        let remote_anchor = self.neighbor_local(from, to, ghost(0))?;
        let flip = match self.topology.fold(from.panel(), resolution, ghost(1)) {
            Some((_, next)) => next.0 == tip.0,
            None => false,
        };
        let (na, nb) = resolution;
        let signs = (
            if 2 * tip.0 < na { -1 } else { 1 },
            if 2 * tip.1 < nb { -1 } else { 1 },
        );
        Direction::from_signs(signs).map(|corner| (corner, remote_anchor, flip))
    }


    /**
     * A corner relation sends an h x h block of interior cells from its
     * anchor inward, and receives an h x h block that must lie inside the
     * neighbor.
     */
    fn check_diagonal(&self, patch: usize, relation: &ExteriorNeighbor) -> Result<()> {
        let pb = self.patches[patch].patch_box();
        let qb = self.patches[relation.neighbor()].patch_box();
        let h = pb.halo() as i64;
        let (sa, sb) = relation.direction().signs();
        let (ia, ib) = relation.span();
        let local = pb.local_interior();
        let (a0, b0) = local.start();
        let (a1, b1) = local.end();

        let fits = |i: i64, sign: i64, lo: i64, hi: i64| {
            if sign > 0 { i - (h - 1) >= lo } else { i + (h - 1) < hi }
        };
        let far = pb.local_to_global((ia + sa * h, ib + sb * h));

        if fits(ia, sa, a0, a1) && fits(ib, sb, b0, b1) && self.neighbor_local(pb, qb, far).is_some() {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "patch {} has fewer than {} interior cells on each side of its {:?} connection to patch {}",
                patch, h, relation.direction(), relation.neighbor())))
        }
    }


    /**
     * Fold a global index given in `from`'s frame onto `to`, returning
     * `to`'s local index if the cell lies in its interior.
     */
    fn neighbor_local(&self, from: &PatchBox, to: &PatchBox, index: (i64, i64)) -> Option<(i64, i64)> {
        let level = from.refinement_level();
        let (panel, folded) = self.topology.fold(from.panel(), self.resolution(level), index)?;
        let global = rescale_index(folded, level, to.refinement_level(), self.refinement_ratio);

        if panel == to.panel() && to.global_interior().contains(global) {
            Some(to.global_to_local(global))
        } else {
            None
        }
    }




    // ------------------------------------------------------------------------
    // Exchange


    /**
     * Fill the halo of every owned patch with its neighbors' interior values
     * for one data type and slot. Every process must call this together.
     * Blocks until every relation of every owned patch has received its
     * message; a peer that never sends stalls this call.
     */
    pub fn exchange(&mut self, data_type: DataType, slot: usize) -> Result<()> {
        assert!(data_type.is_exchangeable(), "{:?} cannot be exchanged", data_type);
        assert!(self.connected, "connectivity must be initialized before exchanging");

        if data_type == DataType::Tracers && self.model.tracers == 0 {
            return Err(Error::Protocol("cannot exchange tracers: the model has none".into()))
        }
        self.round += 1;

        let round = self.round;
        let rank = self.mailbox.rank();

        self.mailbox.barrier()?;

        for patch in self.patches.iter_mut().filter(|p| p.is_active()) {
            patch.prepare_exchange(data_type, &self.model)
        }
        let mut sent = 0;

        for p in self.active_indices() {
            self.patches[p].pack_exchange(data_type, slot);
            let patch = &self.patches[p];

            for relation in patch.connectivity().neighbors().iter().filter(|r| r.sends()) {
                let message = HaloMessage {
                    round,
                    source: p,
                    target: relation.neighbor(),
                    direction: relation.direction(),
                    anchor: relation.anchor(patch.patch_box()),
                    data_type,
                    payload: relation.send_buffer().to_vec(),
                };
                let owner = self.patches[relation.neighbor()].processor();
                self.mailbox.post(owner, &Envelope::Halo(message))?;
                sent += 1;
            }
        }
        let posted: usize = self.active_patches().map(|p| p.connectivity().pending()).sum();

        for _ in 0..posted {
            let message = match self.mailbox.receive(|e| matches!(e, Envelope::Halo(m) if m.round == round))? {
                Envelope::Halo(message) => message,
                _ => unreachable!(),
            };
            if message.data_type != data_type {
                return Err(Error::Protocol(format!(
                    "received {:?} halo data during a {:?} exchange", message.data_type, data_type)))
            }
            let target = message.target;
            let patch = self.patches
                .get_mut(target)
                .filter(|p| p.is_active())
                .ok_or_else(|| Error::Protocol(format!(
                    "rank {} received halo data for patch {}, which it does not own", rank, target)))?;

            patch.receive(&message, slot)?;
        }
        debug!("[{}] exchange round {} of {:?}: sent {}, received {}", rank, round, data_type, sent, posted);
        Ok(())
    }




    // ------------------------------------------------------------------------
    // Consolidation


    /**
     * Start a consolidation round for the given data types over every patch.
     * Every process must start the same rounds in the same order.
     */
    pub fn consolidation_status(&mut self, data_types: &[DataType]) -> Result<ConsolidationStatus> {
        let status = ConsolidationStatus::new(self.patches.len(), data_types)?;
        self.consolidation_round += 1;
        Ok(status.with_round(self.consolidation_round))
    }


    /**
     * Send every requested data type of every owned patch to rank zero.
     */
    pub fn consolidate_data_to_root(&self, status: &mut ConsolidationStatus) -> Result<()> {
        let data_types = status.data_types().to_vec();

        if data_types.contains(&DataType::Tracers) && self.model.tracers == 0 {
            return Err(Error::Protocol("cannot consolidate tracers: the model has none".into()))
        }
        for patch in self.active_patches() {
            for data_type in &data_types {
                let tag = generate_tag(patch.index(), *data_type)?;
                let payload = patch.consolidation_payload(*data_type);
                self.mailbox.post(0, &Envelope::Consolidate { round: status.round(), tag, payload })?;
                status.note_send();
            }
        }
        debug!("[{}] sent {} consolidation messages", self.rank(), status.sends());
        Ok(())
    }


    /**
     * Receive one consolidation message at rank zero and record it. Call
     * until `status.done()`; calling again after that is a protocol error.
     */
    pub fn consolidate_data_at_root(&mut self, status: &mut ConsolidationStatus) -> Result<ConsolidatedData> {
        assert!(self.is_root(), "only rank zero receives consolidated data");

        if status.done() {
            return Err(Error::Protocol("the consolidation round is already complete".into()))
        }
        let round = status.round();
        let (tag, payload) = match self.mailbox.receive(|e| matches!(e, Envelope::Consolidate { round: r, .. } if *r == round))? {
            Envelope::Consolidate { tag, payload, .. } => (tag, payload),
            _ => unreachable!(),
        };
        let (patch, data_type) = parse_tag(tag)?;
        let expected = self.patches
            .get(patch)
            .map(|p| p.consolidation_len(data_type, &self.model))
            .ok_or_else(|| Error::Protocol(format!(
                "consolidation message for patch {}, but the grid has {} patches", patch, self.patches.len())))?;

        if payload.len() != expected {
            return Err(Error::Protocol(format!(
                "{:?} for patch {} has {} values, expected {}", data_type, patch, payload.len(), expected)))
        }
        status.set_receive_status(tag)?;
        Ok(ConsolidatedData { patch, data_type, data: payload })
    }


    /**
     * Run a whole consolidation round. Rank zero returns every (patch, data
     * type) payload ordered by patch then data type; other ranks return an
     * empty list.
     */
    pub fn consolidate(&mut self, data_types: &[DataType]) -> Result<Vec<ConsolidatedData>> {
        let mut status = self.consolidation_status(data_types)?;
        let mut received = Vec::new();

        self.consolidate_data_to_root(&mut status)?;

        if self.is_root() {
            while !status.done() {
                received.push(self.consolidate_data_at_root(&mut status)?)
            }
            received.sort_by_key(|d| (d.patch, d.data_type.index()));
            info!("consolidated {} payloads at the root", received.len());
        }
        Ok(received)
    }




    // ------------------------------------------------------------------------
    // Checksums


    /**
     * Area-weighted checksum of State or Tracers, one value per component,
     * reduced to rank zero. Returns `Some` on rank zero and `None` elsewhere.
     */
    pub fn checksum(&mut self, data_type: DataType, slot: usize, kind: ChecksumType) -> Result<Option<Vec<f64>>> {
        let width = match data_type {
            DataType::State => self.model.components(),
            DataType::Tracers => self.model.tracers,
            other => panic!("cannot checksum {:?}", other),
        };
        if width == 0 {
            return Ok(if self.is_root() { Some(Vec::new()) } else { None })
        }
        let mut values = vec![0.0; width];

        for patch in self.active_patches() {
            patch.checksum(data_type, slot, kind, &self.model, &mut values)
        }
        let op = match kind {
            ChecksumType::Linf => ReduceOp::Max,
            _ => ReduceOp::Sum,
        };
        let reduced = self.mailbox.reduce(values, op)?;

        Ok(reduced.map(|mut values| {
            if kind == ChecksumType::L2 {
                for x in &mut values {
                    *x = x.sqrt()
                }
            }
            values
        }))
    }




    // ------------------------------------------------------------------------
    // Interpolation


    /**
     * Sample one data type at a list of `(alpha, beta, patch)` points and
     * sum the samples to rank zero. Each point is evaluated only by the
     * process owning its patch: `interpolate` receives the patch, the
     * point's coordinates, and a zeroed buffer to fill with one value per
     * component and level, component-major. The result is laid out
     * `[component][level][point]`; it is `Some` on rank zero and `None`
     * elsewhere.
     */
    pub fn reduce_interpolate<F>(&mut self, points: &[(f64, f64, usize)], data_type: DataType, mut interpolate: F) -> Result<Option<Vec<f64>>>
    where
        F: FnMut(&GridPatch, (f64, f64), &mut [f64]),
    {
        let width = match data_type {
            DataType::State => self.model.components(),
            DataType::Tracers => self.model.tracers,
            DataType::Vorticity | DataType::Divergence => 1,
            other => panic!("cannot interpolate {:?}", other),
        };
        if width == 0 {
            return Err(Error::Protocol("cannot interpolate tracers: the model has none".into()))
        }
        let count = points.len();
        let mut values = vec![0.0; width * self.model.levels * count];
        let mut sample = vec![0.0; width * self.model.levels];

        for (p, &(alpha, beta, n)) in points.iter().enumerate() {
            assert!(n < self.patches.len(), "point {} lies on patch {}, which does not exist", p, n);
            let patch = &self.patches[n];

            if patch.is_active() {
                sample.fill(0.0);
                interpolate(patch, (alpha, beta), &mut sample);

                for (m, x) in sample.iter().enumerate() {
                    values[m * count + p] = *x
                }
            }
        }
        self.mailbox.reduce(values, ReduceOp::Sum)
    }




    // ------------------------------------------------------------------------
    // Slot operations


    pub fn copy_data(&mut self, source: usize, target: usize, data_type: DataType) {
        assert!(data_type.has_slots(), "{:?} has no slots", data_type);

        for patch in self.active_patches_mut() {
            patch.copy_data(source, target, data_type)
        }
    }


    /**
     * Set slot `target` to the linear combination of slots weighted by
     * `coefficients`, on every owned patch.
     */
    pub fn linear_combine_data(&mut self, coefficients: &[f64], target: usize, data_type: DataType) {
        assert!(data_type.has_slots(), "{:?} has no slots", data_type);

        for patch in self.active_patches_mut() {
            patch.linear_combine_data(coefficients, target, data_type)
        }
    }


    pub fn zero_data(&mut self, slot: usize, data_type: DataType) {
        assert!(data_type.has_slots(), "{:?} has no slots", data_type);

        for patch in self.active_patches_mut() {
            patch.zero_data(slot, data_type)
        }
    }


    pub fn add_reference_state(&mut self, slot: usize) {
        for patch in self.active_patches_mut() {
            patch.add_reference_state(slot)
        }
    }




    // ------------------------------------------------------------------------
    // Sizing


    /**
     * Nodes in one horizontal layer of the largest patch, halo included.
     */
    pub fn largest_patch_nodes(&self) -> usize {
        self.patches.iter().map(|p| p.total_node_count_2d()).max().unwrap_or(0)
    }


    pub fn longest_active_perimeter(&self) -> usize {
        self.active_patches().map(|p| p.patch_box().interior_perimeter()).max().unwrap_or(0)
    }


    pub fn total_node_count(&self, location: DataLocation) -> usize {
        self.patches.iter().map(|p| p.total_node_count(location, &self.model)).sum()
    }


    pub fn total_degrees_of_freedom(&self, data_type: DataType, location: DataLocation) -> usize {
        self.patches.iter().map(|p| p.total_degrees_of_freedom(data_type, location, &self.model)).sum()
    }


    /**
     * The largest State or Tracers payload of any single patch.
     */
    pub fn maximum_degrees_of_freedom(&self) -> usize {
        self.patches
            .iter()
            .map(|p| p.consolidation_len(DataType::State, &self.model).max(p.consolidation_len(DataType::Tracers, &self.model)))
            .max()
            .unwrap_or(0)
    }


    /**
     * Offset of a patch's first node in a 2-D array concatenating every
     * patch in index order.
     */
    pub fn cumulative_patch_2d_node_index(&self, patch: usize) -> usize {
        self.cumulative_2d[patch]
    }




    // ------------------------------------------------------------------------
    // Layout


    pub fn to_layout(&self) -> GridLayout {
        GridLayout::new(self.base_resolution, self.refinement_ratio, self.patches.iter().map(|p| p.patch_box()))
    }


    /**
     * Add the patches of a persisted layout. The grid must be empty, and
     * the layout's resolution and refinement ratio must match it.
     */
    pub fn load_layout(&mut self, layout: &GridLayout) -> Result<()> {
        if !self.patches.is_empty() {
            return Err(Error::Configuration(format!(
                "cannot load a layout into a grid that already has {} patches", self.patches.len())))
        }
        if layout.base_resolution != self.base_resolution || layout.refinement_ratio != self.refinement_ratio {
            return Err(Error::Configuration(format!(
                "layout resolution {:?} (ratio {}) does not match the grid's {:?} (ratio {})",
                layout.base_resolution, layout.refinement_ratio, self.base_resolution, self.refinement_ratio)))
        }
        self.add_patches(layout.patch_boxes()?)
    }
}




fn midpoints(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}




fn fill_z_levels(patch: &mut GridPatch, levels: &[f64]) {
    let z = patch.field_mut(DataType::Z, DataLocation::Node);
    let (_, nk, ta, tb) = z.shape();

    for k in 0..nk {
        for i in 0..ta {
            for j in 0..tb {
                z[(0, k, i, j)] = levels[k]
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Grid;
    use crate::connectivity::Link;
    use crate::consolidation::ConsolidatedData;
    use crate::direction::Direction;
    use crate::error::Error;
    use crate::grid_data::{DataType, GridData};
    use crate::grid_patch::{ChecksumType, GridPatch};
    use crate::index_space::range2d;
    use crate::layout::GridLayout;
    use crate::message::{Communicator, LocalCommunicator};
    use crate::model::{DataLocation, ModelConfig};
    use crate::patch_box::PatchBox;
    use crate::topology::{CubedSphere, PanelTopology};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const SENTINEL: f64 = -1.0;

    fn on_ranks<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(LocalCommunicator) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let threads: Vec<_> = LocalCommunicator::group(size)
            .into_iter()
            .map(|comm| {
                let f = f.clone();
                thread::spawn(move || f(comm))
            })
            .collect();
        threads.into_iter().map(|t| t.join().unwrap()).collect()
    }

    fn single() -> LocalCommunicator {
        LocalCommunicator::group(1).remove(0)
    }

    fn connected(mut grid: Grid<LocalCommunicator>) -> Grid<LocalCommunicator> {
        grid.distribute_patches();
        grid.initialize_connectivity().unwrap();
        grid
    }

    fn cube(comm: LocalCommunicator, resolution: i64, halo: usize, split: usize, tracers: usize) -> Grid<LocalCommunicator> {
        let model = ModelConfig::shallow_water(halo, tracers);
        connected(Grid::cubed_sphere(model, comm, resolution, split).unwrap())
    }

    /// Resolution 12: even panels split in halves, odd panels in thirds.
    fn mixed_boxes(halo: usize) -> Vec<PatchBox> {
        let mut boxes = Vec::new();
        for panel in 0..6 {
            let split = if panel % 2 == 0 { 2 } else { 3 };
            let w = 12 / split;
            for i in 0..split {
                for j in 0..split {
                    let interior = range2d(i * w .. (i + 1) * w, j * w .. (j + 1) * w);
                    boxes.push(PatchBox::equiangular(panel, 0, halo, interior, 12).unwrap());
                }
            }
        }
        boxes
    }

    fn mixed(comm: LocalCommunicator, halo: usize) -> Grid<LocalCommunicator> {
        let model = ModelConfig::shallow_water(halo, 0);
        let mut grid = Grid::new(model, comm, Box::new(CubedSphere), (12, 12), 2).unwrap();
        grid.add_patches(mixed_boxes(halo)).unwrap();
        connected(grid)
    }

    fn stamp(panel: usize, index: (i64, i64), component: usize) -> f64 {
        panel as f64 * 1e6 + index.0 as f64 * 1e3 + index.1 as f64 + component as f64 * 0.125
    }

    /// Stamp the interior of one array on every owned patch with its global
    /// position and mark the halo with the sentinel.
    fn fill_array<F>(grid: &mut Grid<LocalCommunicator>, array: F)
    where
        F: Fn(&mut GridPatch) -> &mut GridData,
    {
        for n in grid.active_indices() {
            let b = grid.patch(n).patch_box().clone();
            let data = array(grid.patch_mut(n));
            let (nc, nk) = (data.components(), data.levels());
            for (i, j) in b.local_total().iter() {
                for c in 0..nc {
                    for k in 0..nk {
                        data[(c, k, i as usize, j as usize)] = if b.local_interior().contains((i, j)) {
                            stamp(b.panel(), b.local_to_global((i, j)), c * nk + k)
                        } else {
                            SENTINEL
                        }
                    }
                }
            }
        }
    }

    /// Compare every halo cell of one array on every owned patch with the
    /// value of the cell it folds onto. Returns the number of halo cells
    /// that were filled.
    fn check_array<F>(grid: &Grid<LocalCommunicator>, array: F) -> usize
    where
        F: Fn(&GridPatch) -> &GridData,
    {
        let mut filled = 0;
        for patch in grid.active_patches() {
            let b = patch.patch_box();
            let data = array(patch);
            let (nc, nk) = (data.components(), data.levels());
            for (i, j) in b.local_total().iter() {
                if b.local_interior().contains((i, j)) {
                    continue
                }
                let global = b.local_to_global((i, j));
                let folded = CubedSphere.fold(b.panel(), grid.resolution(0), global);
                for c in 0..nc {
                    for k in 0..nk {
                        let expected = match folded {
                            Some((panel, index)) => stamp(panel, index, c * nk + k),
                            None => SENTINEL,
                        };
                        assert_eq!(data[(c, k, i as usize, j as usize)], expected,
                            "patch {} halo cell {:?} component {} level {}", patch.index(), (i, j), c, k);
                    }
                }
                if folded.is_some() {
                    filled += 1
                }
            }
        }
        filled
    }

    fn fill_state(grid: &mut Grid<LocalCommunicator>) {
        fill_array(grid, |p| p.state_mut(0, DataLocation::Node))
    }

    fn check_halos(grid: &Grid<LocalCommunicator>) -> usize {
        check_array(grid, |p| p.state(0, DataLocation::Node))
    }

    fn assert_symmetric(grid: &Grid<LocalCommunicator>) {
        for p in grid.patches() {
            for r in p.connectivity().neighbors() {
                let q = grid.patch(r.neighbor());
                let reciprocal: Vec<_> = q.connectivity().neighbors().iter().filter(|s| {
                    s.link() == r.link().reciprocal() &&
                    s.neighbor() == p.index() &&
                    s.direction() == r.opposing() &&
                    s.opposing() == r.direction() &&
                    s.remote_anchor() == r.anchor(p.patch_box()) &&
                    r.remote_anchor() == s.anchor(q.patch_box())
                }).collect();
                assert_eq!(reciprocal.len(), 1, "patch {} {:?} to {}", p.index(), r.direction(), q.index());
                assert_eq!(reciprocal[0].boundary_size(), r.boundary_size());
            }
        }
    }

    #[test]
    fn six_panels_on_four_ranks() {
        let results = on_ranks(4, |comm| {
            let mut grid = cube(comm, 10, 2, 1, 0);
            let owners: Vec<_> = grid.patches().iter().map(|p| p.processor()).collect();

            for p in grid.active_patches() {
                let c = p.connectivity();
                assert_eq!((c.edge_count(), c.corner_count()), (4, 4));
                assert!(c.neighbors().iter().all(|n| n.boundary_size() == if n.direction().is_edge() { 10 } else { 2 }));
                assert!(c.neighbors().iter().filter(|n| n.direction().is_corner()).all(|n| n.link() != Link::Mutual));
                assert_eq!(grid.boundary_samples(p.index()).len(), 44);
                assert!(grid.boundary_samples(p.index()).iter().all(|s| s.is_some()));
            }
            let received: Vec<ConsolidatedData> = grid.consolidate(&[DataType::State]).unwrap();
            (owners, received.iter().map(|d| (d.patch, d.data_type, d.data.len())).collect::<Vec<_>>())
        });
        for (owners, _) in &results {
            assert_eq!(owners, &vec![0, 1, 2, 3, 0, 1]);
        }
        let expected: Vec<_> = (0..6).map(|n| (n, DataType::State, 3 * 3 * 14 * 14)).collect();
        assert_eq!(results[0].1, expected);
        assert!(results[1..].iter().all(|(_, received)| received.is_empty()));
    }

    #[test]
    fn back_to_back_consolidations_keep_their_rounds_apart() {
        let results = on_ranks(3, |comm| {
            let slow = comm.rank() == 2;
            let mut grid = cube(comm, 6, 1, 1, 0);
            let mut rounds = Vec::new();

            for round in 0..2 {
                if slow && round == 0 {
                    thread::sleep(Duration::from_millis(200));
                }
                for n in grid.active_indices() {
                    for location in &[DataLocation::Node, DataLocation::REdge] {
                        for x in grid.patch_mut(n).state_mut(0, *location).as_mut_slice() {
                            *x = (round + 1) as f64
                        }
                    }
                }
                rounds.push(grid.consolidate(&[DataType::State]).unwrap());
            }
            rounds
        });
        for (round, received) in results[0].iter().enumerate() {
            assert_eq!(received.iter().map(|d| d.patch).collect::<Vec<_>>(), (0..6).collect::<Vec<_>>());
            assert!(received.iter().all(|d| d.data.iter().all(|x| *x == (round + 1) as f64)));
        }
    }

    #[test]
    fn consolidating_after_completion_is_an_error() {
        let mut grid = cube(single(), 6, 1, 1, 1);
        let mut status = grid.consolidation_status(&[DataType::State, DataType::Tracers]).unwrap();
        grid.consolidate_data_to_root(&mut status).unwrap();
        assert_eq!(status.sends(), 12);

        while !status.done() {
            grid.consolidate_data_at_root(&mut status).unwrap();
        }
        assert_eq!(status.received_count(), 12);
        assert!(matches!(grid.consolidate_data_at_root(&mut status), Err(Error::Protocol(_))));
    }

    #[test]
    fn patches_are_dealt_round_robin() {
        let mut group = LocalCommunicator::group(5);
        let mut grid = Grid::cubed_sphere(ModelConfig::shallow_water(1, 0), group.remove(2), 8, 2).unwrap();
        grid.distribute_patches();
        assert!(grid.patches().iter().all(|p| p.processor() == p.index() % 5));
        assert_eq!(grid.active_indices(), vec![2, 7, 12, 17, 22]);
        assert!(!grid.patch(3).is_active());
    }

    #[test]
    fn every_walk_consumes_the_perimeter_plus_four() {
        let grid = mixed(single(), 2);
        for p in grid.patches() {
            assert_eq!(grid.boundary_samples(p.index()).len(), p.patch_box().interior_perimeter() + 4);
        }
    }

    #[test]
    fn connectivity_is_symmetric() {
        assert_symmetric(&cube(single(), 10, 2, 1, 0));
        assert_symmetric(&cube(single(), 12, 2, 3, 0));
        assert_symmetric(&mixed(single(), 2));
    }

    #[test]
    fn panel_corner_blocks_receive_their_vertex_diagonal() {
        let grid = cube(single(), 12, 2, 3, 0);
        let inbound = |p: &crate::grid_patch::GridPatch| {
            p.connectivity().neighbors().iter().filter(|n| n.link() == Link::Inbound).count()
        };
        for p in grid.patches() {
            let c = p.connectivity();
            let (a0, b0) = p.patch_box().global_interior().start();
            let (a1, b1) = p.patch_box().global_interior().end();
            let at_panel_corner = (a0 == 0 || a1 == 12) && (b0 == 0 || b1 == 12);
            assert_eq!(c.edge_count(), 4);
            assert_eq!(c.corner_count(), 4);
            assert_eq!(inbound(p), if at_panel_corner { 1 } else { 0 });
        }
        let outbound: usize = grid.patches().iter().map(|p| p.connectivity().outbound_count()).sum();
        assert_eq!(outbound, 24);
    }

    #[test]
    fn runs_split_where_the_neighbor_changes() {
        let grid = mixed(single(), 2);

        // Panel 0, block (1, 0) is [6, 12) x [0, 6); across its right edge
        // panel 1 is split in thirds, so the edge has two runs.
        let p = grid.patch(2);
        let right: Vec<_> = p.connectivity().neighbors().iter()
            .filter(|n| n.direction() == Direction::Right)
            .map(|n| (n.neighbor(), n.span()))
            .collect();
        assert_eq!(right, vec![(4, (2, 6)), (5, (6, 8))]);
        assert!(p.connectivity().neighbors().iter().any(|n| n.direction() == Direction::BottomRight && n.span() == (7, 6)));
        assert!(p.connectivity().neighbors().iter().any(|n| n.direction() == Direction::TopRight && n.span() == (7, 5)));
    }

    #[test]
    fn short_runs_cannot_hold_a_diagonal() {
        let model = ModelConfig::shallow_water(2, 0);
        let mut grid = Grid::new(model, single(), Box::new(CubedSphere), (10, 10), 2).unwrap();
        for interior in vec![
            range2d(0..5, 0..5),
            range2d(5..10, 0..5),
            range2d(0..4, 5..10),
            range2d(4..10, 5..10),
        ] {
            grid.add_patch(PatchBox::equiangular(0, 0, 2, interior, 10).unwrap()).unwrap();
        }
        for panel in 1..6 {
            grid.add_patch(PatchBox::equiangular(panel, 0, 2, range2d(0..10, 0..10), 10).unwrap()).unwrap();
        }
        grid.distribute_patches();
        assert!(matches!(grid.initialize_connectivity(), Err(Error::Configuration(_))));
    }

    #[test]
    fn bad_patches_are_rejected() {
        let model = ModelConfig::shallow_water(2, 0);
        let mut grid = Grid::new(model, single(), Box::new(CubedSphere), (10, 10), 2).unwrap();
        let add = |grid: &mut Grid<LocalCommunicator>, panel, halo, interior| {
            grid.add_patch(PatchBox::equiangular(panel, 0, halo, interior, 10).unwrap())
        };
        assert!(add(&mut grid, 0, 1, range2d(0..5, 0..5)).is_err());
        assert!(add(&mut grid, 6, 2, range2d(0..5, 0..5)).is_err());
        assert!(add(&mut grid, 0, 2, range2d(0..1, 0..5)).is_err());
        assert!(add(&mut grid, 0, 2, range2d(6..11, 0..5)).is_err());
        assert_eq!(add(&mut grid, 0, 2, range2d(5..10, 0..5)).unwrap(), 0);
        assert!(Grid::new(ModelConfig::shallow_water(2, 0), single(), Box::new(CubedSphere), (10, 12), 2).is_err());
    }

    #[test]
    fn lookup_crosses_levels_and_panels() {
        let model = ModelConfig::shallow_water(1, 0);
        let mut grid = Grid::new(model, single(), Box::new(CubedSphere), (8, 8), 2).unwrap();
        grid.add_patch(PatchBox::equiangular(0, 0, 1, range2d(0..4, 0..8), 8).unwrap()).unwrap();
        grid.add_patch(PatchBox::equiangular(0, 1, 1, range2d(8..16, 0..16), 16).unwrap()).unwrap();
        grid.add_patch(PatchBox::equiangular(1, 0, 1, range2d(0..8, 0..8), 8).unwrap()).unwrap();

        assert_eq!(grid.patch_from_coordinate_index(0, 0, (5, 7)), Some(1));
        assert_eq!(grid.patch_from_coordinate_index(1, 0, (3, 3)), Some(0));
        assert_eq!(grid.patch_from_coordinate_index(0, 0, (8, 3)), Some(2));
        assert_eq!(grid.patch_from_coordinate_index(0, 0, (-1, -1)), None);
        assert_eq!(grid.patch_from_coordinate_index(0, 4, (-1, -1)), Some(0));
        assert_eq!(grid.patch_from_coordinate_index(1, 4, (16, -1)), Some(1));
        assert_eq!(grid.patch_from_coordinate_index(0, 0, (3, -1)), None);
    }

    #[test]
    fn exchange_fills_halos_with_folded_neighbors() {
        let mut grid = cube(single(), 10, 2, 1, 0);
        fill_state(&mut grid);
        grid.exchange(DataType::State, 0).unwrap();
        assert_eq!(check_halos(&grid), 6 * (4 * 10 * 2 + 4 * 2 * 2));

        let mut grid = cube(single(), 12, 2, 3, 0);
        fill_state(&mut grid);
        grid.exchange(DataType::State, 0).unwrap();
        check_halos(&grid);

        let mut grid = mixed(single(), 2);
        fill_state(&mut grid);
        grid.exchange(DataType::State, 0).unwrap();
        check_halos(&grid);
    }

    #[test]
    fn exchange_across_ranks_matches_a_single_rank() {
        for size in &[2, 3, 4] {
            let filled: usize = on_ranks(*size, |comm| {
                let mut grid = cube(comm, 12, 2, 3, 0);
                fill_state(&mut grid);
                grid.exchange(DataType::State, 0).unwrap();
                grid.exchange(DataType::State, 0).unwrap();
                check_halos(&grid)
            }).into_iter().sum();

            let mut grid = cube(single(), 12, 2, 3, 0);
            fill_state(&mut grid);
            grid.exchange(DataType::State, 0).unwrap();
            assert_eq!(filled, check_halos(&grid));
        }
        on_ranks(3, |comm| {
            let mut grid = mixed(comm, 2);
            fill_state(&mut grid);
            grid.exchange(DataType::State, 0).unwrap();
            check_halos(&grid)
        });
    }

    #[test]
    fn tracer_slots_and_topography_derivatives_are_exchanged() {
        let full = 24 * (4 * 5 * 2 + 4 * 2 * 2);
        let mut grid = cube(single(), 10, 2, 2, 3);
        fill_array(&mut grid, |p| p.tracers_mut(1));
        fill_array(&mut grid, |p| p.field_mut(DataType::TopographyDeriv, DataLocation::Node));
        grid.exchange(DataType::Tracers, 1).unwrap();
        grid.exchange(DataType::TopographyDeriv, 0).unwrap();
        assert_eq!(check_array(&grid, |p| p.tracers(1)), full);
        assert_eq!(check_array(&grid, |p| p.field(DataType::TopographyDeriv, DataLocation::Node)), full);
        assert!(grid.active_patches().all(|p| p.tracers(0).as_slice().iter().all(|x| *x == 0.0)));

        let filled: Vec<(usize, usize)> = on_ranks(3, |comm| {
            let mut grid = cube(comm, 10, 2, 2, 3);
            fill_array(&mut grid, |p| p.tracers_mut(1));
            fill_array(&mut grid, |p| p.field_mut(DataType::TopographyDeriv, DataLocation::Node));
            grid.exchange(DataType::TopographyDeriv, 0).unwrap();
            grid.exchange(DataType::Tracers, 1).unwrap();
            (check_array(&grid, |p| p.tracers(1)),
             check_array(&grid, |p| p.field(DataType::TopographyDeriv, DataLocation::Node)))
        });
        assert_eq!(filled.iter().map(|f| f.0).sum::<usize>(), full);
        assert_eq!(filled.iter().map(|f| f.1).sum::<usize>(), full);
    }

    #[test]
    fn a_missing_halo_message_blocks_the_receiver() {
        let mut group = LocalCommunicator::group(2);
        let second = group.pop().unwrap();
        let first = group.pop().unwrap();
        let (done, finished) = crossbeam_channel::bounded(1);

        thread::spawn(move || {
            let mut grid = cube(first, 6, 1, 1, 0);
            let result = grid.exchange(DataType::State, 0);
            let _ = done.send(result.is_ok());
        });
        let peer = thread::spawn(move || {
            let mut grid = cube(second, 6, 1, 1, 0);
            grid.barrier().unwrap();
            grid
        });
        let _peer = peer.join().unwrap();
        assert!(finished.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn mismatched_payload_sizes_fail_fast() {
        let results = on_ranks(2, |comm| {
            let tracers = 1 + comm.rank();
            let mut grid = cube(comm, 6, 1, 1, tracers);
            let result = grid.exchange(DataType::Tracers, 0);
            grid.barrier().unwrap();
            matches!(result, Err(Error::Protocol(_)))
        });
        assert_eq!(results, vec![true, true]);
    }

    #[test]
    fn tracer_operations_need_tracers() {
        let mut grid = cube(single(), 6, 1, 1, 0);
        assert!(matches!(grid.exchange(DataType::Tracers, 0), Err(Error::Protocol(_))));
        assert!(matches!(grid.consolidate(&[DataType::Tracers]), Err(Error::Protocol(_))));
        assert_eq!(grid.checksum(DataType::Tracers, 0, ChecksumType::Sum).unwrap(), Some(vec![]));
        grid.zero_data(0, DataType::Tracers);
    }

    #[test]
    fn decomposed_checksums_match_a_single_rank() {
        let kinds = [ChecksumType::Sum, ChecksumType::L1, ChecksumType::L2, ChecksumType::Linf];
        let run = move |comm: LocalCommunicator| {
            let mut grid = cube(comm, 8, 1, 2, 0);
            fill_state(&mut grid);
            kinds.iter().map(|k| grid.checksum(DataType::State, 0, *k).unwrap()).collect::<Vec<_>>()
        };
        let parallel = on_ranks(4, run);
        let serial = on_ranks(1, run).remove(0);

        assert!(parallel[1..].iter().all(|r| r.iter().all(|c| c.is_none())));

        for (kind, (a, b)) in kinds.iter().zip(parallel[0].iter().zip(&serial)) {
            let (a, b) = (a.as_ref().unwrap(), b.as_ref().unwrap());
            assert_eq!(a.len(), 3);
            for (x, y) in a.iter().zip(b) {
                if *kind == ChecksumType::Linf {
                    assert_eq!(x, y)
                } else {
                    assert!((x - y).abs() <= 1e-10 * y.abs(), "{:?}: {} vs {}", kind, x, y)
                }
            }
        }
    }

    #[test]
    fn interpolated_samples_are_summed_to_the_root() {
        let run = |comm: LocalCommunicator| {
            let mut grid = cube(comm, 8, 1, 2, 0);
            fill_state(&mut grid);
            let points: Vec<_> = (0..grid.patch_count())
                .map(|n| {
                    let (a, b) = grid.patch(n).patch_box().global_interior().start();
                    (a as f64, b as f64 + 1.0, n)
                })
                .collect();
            grid.reduce_interpolate(&points, DataType::State, |patch, (alpha, beta), out| {
                let b = patch.patch_box();
                let (i, j) = b.global_to_local((alpha as i64, beta as i64));
                let state = patch.state(0, DataLocation::Node);
                for c in 0..state.components() {
                    out[c] = state[(c, 0, i as usize, j as usize)]
                }
            }).unwrap()
        };
        let sampled = run(single()).unwrap();
        let count = 24;
        assert_eq!(sampled.len(), 3 * count);

        let grid = cube(single(), 8, 1, 2, 0);
        for n in 0..count {
            let b = grid.patch(n).patch_box();
            let (a, bb) = b.global_interior().start();
            for c in 0..3 {
                assert_eq!(sampled[c * count + n], stamp(b.panel(), (a, bb + 1), c));
            }
        }
        let reduced = on_ranks(3, run);
        assert_eq!(reduced[0].as_ref(), Some(&sampled));
        assert!(reduced[1..].iter().all(Option::is_none));
    }

    #[test]
    fn interpolating_tracers_needs_tracers() {
        let mut grid = cube(single(), 6, 1, 1, 0);
        let result = grid.reduce_interpolate(&[(0.0, 0.0, 0)], DataType::Tracers, |_, _, _| ());
        assert!(matches!(result, Err(Error::Protocol(_))));

        let mut grid = cube(single(), 6, 1, 1, 2);
        let values = grid.reduce_interpolate(&[(0.0, 0.0, 0), (1.0, 0.0, 3)], DataType::Tracers, |patch, (alpha, _), out| {
            out[0] = patch.index() as f64;
            out[1] = alpha;
        }).unwrap();
        assert_eq!(values, Some(vec![0.0, 3.0, 0.0, 1.0]));
    }

    #[test]
    fn slot_operations_reach_every_owned_patch() {
        let mut grid = cube(single(), 6, 1, 1, 1);
        for n in 0..6 {
            let patch = grid.patch_mut(n);
            for x in patch.state_mut(0, DataLocation::Node).as_mut_slice() {
                *x = 1.0
            }
            for x in patch.state_mut(1, DataLocation::Node).as_mut_slice() {
                *x = 2.0
            }
        }
        grid.linear_combine_data(&[2.0, 1.0], 1, DataType::State);
        assert!(grid.patch(4).state(1, DataLocation::Node).as_slice().iter().all(|x| *x == 4.0));

        grid.copy_data(1, 0, DataType::State);
        grid.zero_data(1, DataType::State);
        assert!(grid.patch(5).state(0, DataLocation::Node).as_slice().iter().all(|x| *x == 4.0));
        assert!(grid.patch(5).state(1, DataLocation::Node).as_slice().iter().all(|x| *x == 0.0));
    }

    #[test]
    #[should_panic]
    fn slot_operations_need_slotted_types() {
        let mut grid = cube(single(), 6, 1, 1, 0);
        grid.copy_data(0, 1, DataType::Vorticity);
    }

    #[test]
    fn sizing_queries_cover_every_patch() {
        let grid = cube(single(), 8, 1, 2, 2);
        assert_eq!(grid.largest_patch_nodes(), 36);
        assert_eq!(grid.longest_active_perimeter(), 16);
        assert_eq!(grid.total_node_count(DataLocation::Node), 24 * 36);
        assert_eq!(grid.total_node_count(DataLocation::REdge), 24 * 72);
        assert_eq!(grid.total_degrees_of_freedom(DataType::Tracers, DataLocation::Node), 24 * 72);
        assert_eq!(grid.maximum_degrees_of_freedom(), 3 * 36 + 3 * 72);
        assert_eq!(grid.cumulative_patch_2d_node_index(3), 108);
    }

    #[test]
    fn vertical_coordinate_must_match_the_levels() {
        let model = ModelConfig::nonhydrostatic(3, 1, 0);
        let mut grid = Grid::cubed_sphere(model, single(), 4, 1).unwrap();
        grid.distribute_patches();
        assert_eq!(grid.vertical_interfaces().len(), 4);
        assert_eq!(grid.vertical_levels()[1], 0.5);

        assert!(grid.initialize_vertical_coordinate(&[0.0, 0.5, 1.0]).is_err());
        assert!(grid.initialize_vertical_coordinate(&[0.0, 0.5, 0.5, 1.0]).is_err());
        grid.initialize_vertical_coordinate(&[0.0, 0.25, 0.5, 1.0]).unwrap();

        assert_eq!(grid.vertical_levels(), &[0.125, 0.375, 0.75]);
        assert_eq!(grid.patch(2).field(DataType::Z, DataLocation::Node)[(0, 2, 0, 0)], 0.75);
    }

    #[test]
    fn layout_reloads_into_an_empty_grid_only() {
        let grid = cube(single(), 8, 1, 2, 0);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&grid.to_layout(), &mut bytes).unwrap();
        let layout: GridLayout = ciborium::de::from_reader(&bytes[..]).unwrap();

        let mut loaded = Grid::from_layout(ModelConfig::shallow_water(1, 0), single(), Box::new(CubedSphere), &layout).unwrap();
        assert_eq!(loaded.patch_count(), 24);
        assert!(grid.patches().iter().zip(loaded.patches()).all(|(a, b)| a.patch_box() == b.patch_box()));
        assert!(matches!(loaded.load_layout(&layout), Err(Error::Configuration(_))));

        let loaded = connected(loaded);
        assert_eq!(loaded.patch(7).connectivity().len(), grid.patch(7).connectivity().len());
    }
}
