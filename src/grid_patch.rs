use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::grid_data::{split_pair, DataType, GridData};
use crate::message::HaloMessage;
use crate::model::{DataLocation, ModelConfig};
use crate::patch_box::PatchBox;




#[derive(Clone, Copy, Debug, PartialEq, Eq)]


/**
 * Area-weighted aggregate computed by a checksum
 */
pub enum ChecksumType {
    Sum,
    L1,
    L2,
    Linf,
}




/**
 * Field storage of an active patch
 */
#[derive(Clone, Debug)]
struct PatchData {
    state_node: Vec<GridData>,
    state_redge: Vec<GridData>,
    tracers: Vec<GridData>,
    ref_state_node: GridData,
    ref_state_redge: GridData,
    vorticity: GridData,
    divergence: GridData,
    temperature: GridData,
    topography_deriv: GridData,
    element_area_node: GridData,
    element_area_redge: GridData,
    jacobian: GridData,
    topography: GridData,
    longitude: GridData,
    latitude: GridData,
    z_levels: GridData,
}




// ============================================================================
impl PatchData {

    fn new(model: &ModelConfig, patch_box: &PatchBox) -> Self {
        use DataLocation::*;

        let (ta, tb) = patch_box.total_width();
        let nc = model.components();
        let nk = model.levels;
        let field = |location, components, levels| GridData::new(location, components, levels, ta, tb);
        let tracer_slots = if model.tracers == 0 { 0 } else { model.tracer_slots };

        let mut element_area_node = field(Node, 1, nk);
        let mut element_area_redge = field(REdge, 1, nk + 1);
        fill_coordinate_area(&mut element_area_node, patch_box);
        fill_coordinate_area(&mut element_area_redge, patch_box);

        Self {
            state_node: (0..model.state_slots).map(|_| field(Node, nc, nk)).collect(),
            state_redge: (0..model.state_slots).map(|_| field(REdge, nc, nk + 1)).collect(),
            tracers: (0..tracer_slots).map(|_| field(Node, model.tracers, nk)).collect(),
            ref_state_node: field(Node, nc, nk),
            ref_state_redge: field(REdge, nc, nk + 1),
            vorticity: field(Node, 1, nk),
            divergence: field(Node, 1, nk),
            temperature: field(Node, 1, nk),
            topography_deriv: field(Node, 2, 1),
            element_area_node,
            element_area_redge,
            jacobian: field(Node, 1, nk),
            topography: field(Node, 1, 1),
            longitude: field(Node, 1, 1),
            latitude: field(Node, 1, 1),
            z_levels: field(Node, 1, nk),
        }
    }

    fn slots(&self, data_type: DataType) -> Vec<&Vec<GridData>> {
        match data_type {
            DataType::State => vec![&self.state_node, &self.state_redge],
            DataType::Tracers => vec![&self.tracers],
            other => panic!("{:?} has no slots", other),
        }
    }

    fn slots_mut(&mut self, data_type: DataType) -> Vec<&mut Vec<GridData>> {
        match data_type {
            DataType::State => vec![&mut self.state_node, &mut self.state_redge],
            DataType::Tracers => vec![&mut self.tracers],
            other => panic!("{:?} has no slots", other),
        }
    }

    fn field(&self, data_type: DataType, location: DataLocation) -> &GridData {
        use DataType::*;

        match (data_type, location) {
            (RefState, DataLocation::Node) => &self.ref_state_node,
            (RefState, DataLocation::REdge) => &self.ref_state_redge,
            (Vorticity, _) => &self.vorticity,
            (Divergence, _) => &self.divergence,
            (Temperature, _) => &self.temperature,
            (TopographyDeriv, _) => &self.topography_deriv,
            (Jacobian, _) => &self.jacobian,
            (Topography, _) => &self.topography,
            (Longitude, _) => &self.longitude,
            (Latitude, _) => &self.latitude,
            (Z, _) => &self.z_levels,
            (slotted, _) => panic!("{:?} is stored in slots", slotted),
        }
    }

    fn field_mut(&mut self, data_type: DataType, location: DataLocation) -> &mut GridData {
        use DataType::*;

        match (data_type, location) {
            (RefState, DataLocation::Node) => &mut self.ref_state_node,
            (RefState, DataLocation::REdge) => &mut self.ref_state_redge,
            (Vorticity, _) => &mut self.vorticity,
            (Divergence, _) => &mut self.divergence,
            (Temperature, _) => &mut self.temperature,
            (TopographyDeriv, _) => &mut self.topography_deriv,
            (Jacobian, _) => &mut self.jacobian,
            (Topography, _) => &mut self.topography,
            (Longitude, _) => &mut self.longitude,
            (Latitude, _) => &mut self.latitude,
            (Z, _) => &mut self.z_levels,
            (slotted, _) => panic!("{:?} is stored in slots", slotted),
        }
    }

    /**
     * The arrays that make up one data type, in the order they are packed.
     */
    fn arrays(&self, data_type: DataType, slot: usize) -> Vec<&GridData> {
        match data_type {
            DataType::State | DataType::Tracers => self
                .slots(data_type)
                .into_iter()
                .map(|slots| {
                    assert!(slot < slots.len(), "{:?} slot {} out of range", data_type, slot);
                    &slots[slot]
                })
                .collect(),
            DataType::RefState => vec![&self.ref_state_node, &self.ref_state_redge],
            other => vec![self.field(other, DataLocation::Node)],
        }
    }

    fn arrays_mut(&mut self, data_type: DataType, slot: usize) -> Vec<&mut GridData> {
        match data_type {
            DataType::State | DataType::Tracers => self
                .slots_mut(data_type)
                .into_iter()
                .map(|slots| {
                    assert!(slot < slots.len(), "{:?} slot {} out of range", data_type, slot);
                    &mut slots[slot]
                })
                .collect(),
            DataType::RefState => vec![&mut self.ref_state_node, &mut self.ref_state_redge],
            other => vec![self.field_mut(other, DataLocation::Node)],
        }
    }
}




/**
 * Default element areas: the product of the coordinate spacings on each
 * axis. The geometry layer overwrites these with true areas.
 */
fn fill_coordinate_area(area: &mut GridData, patch_box: &PatchBox) {
    let (_, nk, ta, tb) = area.shape();
    let a = patch_box.a_edges();
    let b = patch_box.b_edges();

    for k in 0..nk {
        for i in 0..ta {
            for j in 0..tb {
                area[(0, k, i, j)] = (a[i + 1] - a[i]) * (b[j + 1] - b[j]);
            }
        }
    }
}




/**
 * One patch of the grid. Every process holds a `GridPatch` for every patch
 * index; only the owning process holds field storage (the patch is then
 * "active"), everywhere else it is a stub carrying geometry only.
 * Connectivity is built for active patches.
 */
#[derive(Clone, Debug)]
pub struct GridPatch {
    index: usize,
    processor: usize,
    patch_box: PatchBox,
    connectivity: Connectivity,
    data: Option<PatchData>,
}




// ============================================================================
impl GridPatch {

    pub(crate) fn new(index: usize, patch_box: PatchBox) -> Self {
        Self {
            index,
            processor: 0,
            patch_box,
            connectivity: Connectivity::new(index),
            data: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Rank of the process that owns this patch.
    pub fn processor(&self) -> usize {
        self.processor
    }

    pub fn patch_box(&self) -> &PatchBox {
        &self.patch_box
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub(crate) fn connectivity_mut(&mut self) -> &mut Connectivity {
        &mut self.connectivity
    }

    pub fn is_active(&self) -> bool {
        self.data.is_some()
    }

    /// Allocate field storage; this process owns the patch.
    pub(crate) fn initialize_data_local(&mut self, model: &ModelConfig, processor: usize) {
        assert!(self.data.is_none(), "patch {} is already initialized", self.index);
        self.data = Some(PatchData::new(model, &self.patch_box));
        self.processor = processor;
    }

    /// Record the owner of a patch held elsewhere.
    pub(crate) fn initialize_data_remote(&mut self, processor: usize) {
        assert!(self.data.is_none(), "patch {} is already initialized", self.index);
        self.processor = processor;
    }

    fn data(&self) -> &PatchData {
        match &self.data {
            Some(data) => data,
            None => panic!("patch {} is not active on this process", self.index),
        }
    }

    fn data_mut(&mut self) -> &mut PatchData {
        match &mut self.data {
            Some(data) => data,
            None => panic!("patch {} is not active on this process", self.index),
        }
    }


    // ------------------------------------------------------------------------
    // Sizing

    /// Nodes in one horizontal layer, including the halo.
    pub fn total_node_count_2d(&self) -> usize {
        self.patch_box.total_nodes()
    }

    pub fn total_node_count(&self, location: DataLocation, model: &ModelConfig) -> usize {
        self.total_node_count_2d() * model.levels_at(location)
    }

    /// Number of values of a data type at a vertical location.
    pub fn total_degrees_of_freedom(&self, data_type: DataType, location: DataLocation, model: &ModelConfig) -> usize {
        use DataType::*;

        let layer = self.total_node_count_2d();

        match data_type {
            State | RefState => model.components() * self.total_node_count(location, model),
            Tracers => model.tracers * self.total_node_count(DataLocation::Node, model),
            Vorticity | Divergence | Temperature | Jacobian | Z => self.total_node_count(DataLocation::Node, model),
            TopographyDeriv => 2 * layer,
            Topography | Longitude | Latitude => layer,
        }
    }

    /// Number of values a consolidation message carries for a data type.
    pub fn consolidation_len(&self, data_type: DataType, model: &ModelConfig) -> usize {
        match data_type {
            DataType::State => {
                self.total_degrees_of_freedom(DataType::State, DataLocation::Node, model) +
                self.total_degrees_of_freedom(DataType::State, DataLocation::REdge, model)
            }
            other => self.total_degrees_of_freedom(other, DataLocation::Node, model),
        }
    }


    // ------------------------------------------------------------------------
    // Data access

    pub fn state(&self, slot: usize, location: DataLocation) -> &GridData {
        match location {
            DataLocation::Node => &self.data().state_node[slot],
            DataLocation::REdge => &self.data().state_redge[slot],
        }
    }

    pub fn state_mut(&mut self, slot: usize, location: DataLocation) -> &mut GridData {
        match location {
            DataLocation::Node => &mut self.data_mut().state_node[slot],
            DataLocation::REdge => &mut self.data_mut().state_redge[slot],
        }
    }

    pub fn tracers(&self, slot: usize) -> &GridData {
        &self.data().tracers[slot]
    }

    pub fn tracers_mut(&mut self, slot: usize) -> &mut GridData {
        &mut self.data_mut().tracers[slot]
    }

    /// Access a data type that is not stored in slots.
    pub fn field(&self, data_type: DataType, location: DataLocation) -> &GridData {
        self.data().field(data_type, location)
    }

    pub fn field_mut(&mut self, data_type: DataType, location: DataLocation) -> &mut GridData {
        self.data_mut().field_mut(data_type, location)
    }

    pub fn element_area(&self, location: DataLocation) -> &GridData {
        match location {
            DataLocation::Node => &self.data().element_area_node,
            DataLocation::REdge => &self.data().element_area_redge,
        }
    }

    pub fn element_area_mut(&mut self, location: DataLocation) -> &mut GridData {
        match location {
            DataLocation::Node => &mut self.data_mut().element_area_node,
            DataLocation::REdge => &mut self.data_mut().element_area_redge,
        }
    }


    // ------------------------------------------------------------------------
    // Exchange

    /// Post a receive on every relation for the given data type.
    pub(crate) fn prepare_exchange(&mut self, data_type: DataType, model: &ModelConfig) {
        self.connectivity.prepare_exchange(self.patch_box.halo(), model.exchange_variables(data_type))
    }

    /// Pack the send buffer of every relation that sends.
    pub(crate) fn pack_exchange(&mut self, data_type: DataType, slot: usize) {
        let data = match &self.data {
            Some(data) => data,
            None => panic!("patch {} is not active on this process", self.index),
        };
        let arrays = data.arrays(data_type, slot);

        for relation in self.connectivity.neighbors_mut().iter_mut().filter(|r| r.sends()) {
            relation.pack(&self.patch_box, &arrays)
        }
    }

    /// Complete the relation addressed by an incoming halo message and write
    /// its payload into the halo.
    pub(crate) fn receive(&mut self, message: &HaloMessage, slot: usize) -> Result<()> {
        let index = self.index;
        let data = match &mut self.data {
            Some(data) => data,
            None => panic!("patch {} is not active on this process", index),
        };
        let relation = self.connectivity
            .find_mut(message.source, message.direction, message.anchor)
            .ok_or_else(|| Error::Protocol(format!(
                "patch {} has no relation for a {:?} message from patch {} anchored at {:?}",
                index, message.direction, message.source, message.anchor)))?;

        relation.accept(&message.payload)?;
        relation.unpack(&self.patch_box, &mut data.arrays_mut(message.data_type, slot));
        Ok(())
    }


    // ------------------------------------------------------------------------
    // Consolidation

    /// Flatten slot zero (or the only array) of a data type for sending to
    /// the root.
    pub(crate) fn consolidation_payload(&self, data_type: DataType) -> Vec<f64> {
        self.data()
            .arrays(data_type, 0)
            .into_iter()
            .flat_map(|array| array.as_slice().iter().copied())
            .collect()
    }


    // ------------------------------------------------------------------------
    // Slot operations

    pub(crate) fn copy_data(&mut self, source: usize, target: usize, data_type: DataType) {
        for slots in self.data_mut().slots_mut(data_type) {
            if slots.is_empty() {
                continue
            }
            assert!(source < slots.len() && target < slots.len(), "slot index out of range");

            if source != target {
                let (to, from) = split_pair(slots, target, source);
                to.copy_from(from)
            }
        }
    }

    pub(crate) fn linear_combine_data(&mut self, coefficients: &[f64], target: usize, data_type: DataType) {
        for slots in self.data_mut().slots_mut(data_type) {
            if slots.is_empty() {
                continue
            }
            assert!(coefficients.len() <= slots.len(), "more coefficients than slots");
            assert!(target < coefficients.len(), "target slot has no coefficient");

            if coefficients[target] == 0.0 {
                slots[target].zero()
            } else {
                slots[target].scale(coefficients[target])
            }
            for (m, &c) in coefficients.iter().enumerate() {
                if m != target && c != 0.0 {
                    let (to, from) = split_pair(slots, target, m);
                    to.add_scaled(from, c)
                }
            }
        }
    }

    pub(crate) fn zero_data(&mut self, slot: usize, data_type: DataType) {
        for slots in self.data_mut().slots_mut(data_type) {
            if slots.is_empty() {
                continue
            }
            assert!(slot < slots.len(), "slot index out of range");
            slots[slot].zero()
        }
    }

    pub(crate) fn add_reference_state(&mut self, slot: usize) {
        let data = self.data_mut();
        assert!(slot < data.state_node.len(), "slot index out of range");
        data.state_node[slot].add_scaled(&data.ref_state_node, 1.0)
    }


    // ------------------------------------------------------------------------
    // Checksums

    /// Accumulate this patch's interior contribution to a checksum.
    pub(crate) fn checksum(&self, data_type: DataType, slot: usize, kind: ChecksumType, model: &ModelConfig, out: &mut [f64]) {
        let data = self.data();
        let interior = self.patch_box.local_interior();

        for (c, total) in out.iter_mut().enumerate() {
            let (array, area) = match data_type {
                DataType::State => match model.location(c) {
                    DataLocation::Node => (&data.state_node[slot], &data.element_area_node),
                    DataLocation::REdge => (&data.state_redge[slot], &data.element_area_redge),
                },
                DataType::Tracers => (&data.tracers[slot], &data.element_area_node),
                other => panic!("cannot checksum {:?}", other),
            };
            for k in 0..array.levels() {
                for (i, j) in interior.iter() {
                    let (i, j) = (i as usize, j as usize);
                    let v = array[(c, k, i, j)];
                    let a = area[(0, k, i, j)];

                    match kind {
                        ChecksumType::Sum => *total += v * a,
                        ChecksumType::L1 => *total += v.abs() * a,
                        ChecksumType::L2 => *total += v * v * a,
                        ChecksumType::Linf => *total = total.max(v.abs()),
                    }
                }
            }
        }
    }
}
