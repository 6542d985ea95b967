use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::grid_data::DataType;




/// Where a state component is stored vertically: at level midpoints (nodes)
/// or at level interfaces (r-edges).
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLocation {
    Node,
    REdge,
}




/// Physical constants carried along with the model. The grid core does not
/// interpret them; they are passed through to the physics layer.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalConstants {
    pub earth_radius: f64,
    pub gravity: f64,
    pub omega: f64,
    pub dry_air_gas_constant: f64,
    pub specific_heat: f64,
    pub reference_pressure: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            earth_radius: 6.37122e6,
            gravity: 9.80616,
            omega: 7.29212e-5,
            dry_air_gas_constant: 287.0,
            specific_heat: 1004.5,
            reference_pressure: 1.0e5,
        }
    }
}




/// Model configuration shared by every process: the dimensionality, the
/// state components and where they live vertically, the number of tracers,
/// the halo width, the number of vertical levels, and how many time-level
/// slots are kept for state and tracers.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub dimensionality: usize,
    pub component_locations: Vec<DataLocation>,
    pub tracers: usize,
    pub halo: usize,
    pub levels: usize,
    pub state_slots: usize,
    pub tracer_slots: usize,
    pub constants: PhysicalConstants,
}

impl ModelConfig {
    /// A two-dimensional configuration with three node-centered components
    /// (height and two velocities).
    pub fn shallow_water(halo: usize, tracers: usize) -> Self {
        Self {
            dimensionality: 2,
            component_locations: vec![DataLocation::Node; 3],
            tracers,
            halo,
            levels: 1,
            state_slots: 2,
            tracer_slots: 2,
            constants: PhysicalConstants::default(),
        }
    }

    /// A three-dimensional configuration with horizontal velocities and
    /// density at nodes, and potential temperature and vertical velocity at
    /// r-edges.
    pub fn nonhydrostatic(levels: usize, halo: usize, tracers: usize) -> Self {
        use DataLocation::*;
        Self {
            dimensionality: 3,
            component_locations: vec![Node, Node, REdge, REdge, Node],
            tracers,
            halo,
            levels,
            state_slots: 2,
            tracer_slots: 2,
            constants: PhysicalConstants::default(),
        }
    }

    pub fn components(&self) -> usize {
        self.component_locations.len()
    }

    pub fn location(&self, component: usize) -> DataLocation {
        self.component_locations[component]
    }

    /// Number of vertical positions for a given location.
    pub fn levels_at(&self, location: DataLocation) -> usize {
        match location {
            DataLocation::Node => self.levels,
            DataLocation::REdge => self.levels + 1,
        }
    }

    /// Check that this configuration is usable by a grid.
    pub fn validate(&self) -> Result<()> {
        match self.dimensionality {
            2 => {
                if self.levels != 1 {
                    return Err(Error::Configuration(format!(
                        "a two-dimensional model has one level, not {}", self.levels)))
                }
                if self.component_locations.iter().any(|l| *l == DataLocation::REdge) {
                    return Err(Error::Configuration(
                        "a two-dimensional model cannot stagger components to r-edges".into()))
                }
            }
            3 => {
                if self.levels == 0 {
                    return Err(Error::Configuration("a three-dimensional model needs levels".into()))
                }
            }
            d => return Err(Error::Configuration(format!("invalid dimensionality {}", d))),
        }
        if self.component_locations.is_empty() {
            return Err(Error::Configuration("the model has no state components".into()))
        }
        if self.halo == 0 {
            return Err(Error::Configuration("the halo width must be at least one".into()))
        }
        if self.state_slots == 0 || self.tracer_slots == 0 {
            return Err(Error::Configuration("at least one state and one tracer slot are required".into()))
        }
        Ok(())
    }

    /// Number of (component, level) columns sent per halo cell when
    /// exchanging the given data type.
    pub fn exchange_variables(&self, data_type: DataType) -> usize {
        let n = self.levels;
        match data_type {
            DataType::State => self.components() * (2 * n + 1),
            DataType::Tracers => self.tracers * n,
            DataType::Vorticity | DataType::Divergence | DataType::Temperature => n,
            DataType::TopographyDeriv => 2,
            other => panic!("{:?} is not an exchangeable data type", other),
        }
    }

    /// The largest number of exchange variables over every exchangeable data
    /// type, used to size relation buffers once.
    pub fn max_exchange_variables(&self) -> usize {
        DataType::ALL
            .iter()
            .filter(|d| d.is_exchangeable())
            .map(|d| self.exchange_variables(*d))
            .max()
            .unwrap_or(0)
    }
}
