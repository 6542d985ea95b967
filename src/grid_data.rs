use core::ops::{Index, IndexMut};
use serde::{Deserialize, Serialize};
use crate::model::DataLocation;




#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]


/**
 * Named families of per-patch data. Only some of them can be exchanged
 * between neighbors or consolidated at the root; see the predicates below.
 */
pub enum DataType {
    State,
    Tracers,
    RefState,
    Vorticity,
    Divergence,
    Temperature,
    TopographyDeriv,
    Jacobian,
    Topography,
    Longitude,
    Latitude,
    Z,
}




// ============================================================================
impl DataType {

    pub const COUNT: usize = 12;

    pub const ALL: [DataType; DataType::COUNT] = [
        DataType::State,
        DataType::Tracers,
        DataType::RefState,
        DataType::Vorticity,
        DataType::Divergence,
        DataType::Temperature,
        DataType::TopographyDeriv,
        DataType::Jacobian,
        DataType::Topography,
        DataType::Longitude,
        DataType::Latitude,
        DataType::Z,
    ];


    pub fn index(self) -> usize {
        self as usize
    }


    pub fn from_index(index: usize) -> Option<DataType> {
        Self::ALL.get(index).copied()
    }


    pub fn is_exchangeable(self) -> bool {
        use DataType::*;
        matches!(self, State | Tracers | Vorticity | Divergence | Temperature | TopographyDeriv)
    }


    pub fn is_consolidatable(self) -> bool {
        use DataType::*;
        matches!(self, State | Tracers | Jacobian | Topography | Longitude | Latitude | Z)
    }


    /**
     * Whether this data type is stored in several time-level slots.
     */
    pub fn has_slots(self) -> bool {
        matches!(self, DataType::State | DataType::Tracers)
    }
}




#[derive(Clone, Debug, PartialEq)]


/**
 * A dense 4-D array of doubles, indexed by (component, level, alpha, beta),
 * with beta varying fastest. Each array remembers whether its levels are
 * nodes or r-edges.
 */
pub struct GridData {
    location: DataLocation,
    shape: (usize, usize, usize, usize),
    data: Vec<f64>,
}




// ============================================================================
impl GridData {

    pub fn new(location: DataLocation, components: usize, levels: usize, a: usize, b: usize) -> Self {
        Self {
            location,
            shape: (components, levels, a, b),
            data: vec![0.0; components * levels * a * b],
        }
    }

    pub fn location(&self) -> DataLocation {
        self.location
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.shape
    }

    pub fn components(&self) -> usize {
        self.shape.0
    }

    pub fn levels(&self) -> usize {
        self.shape.1
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn offset(&self, index: (usize, usize, usize, usize)) -> usize {
        let (c, k, i, j) = index;
        let (nc, nk, ni, nj) = self.shape;

        assert!(
            c < nc && k < nk && i < ni && j < nj,
            "index {:?} out of bounds for shape {:?}", index, self.shape);

        ((c * nk + k) * ni + i) * nj + j
    }

    pub fn zero(&mut self) {
        for x in &mut self.data {
            *x = 0.0
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for x in &mut self.data {
            *x *= factor
        }
    }

    /**
     * Add `factor * other` to this array. The shapes must agree.
     */
    pub fn add_scaled(&mut self, other: &GridData, factor: f64) {
        assert_eq!(self.shape, other.shape, "grid data shape mismatch");

        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x += factor * y
        }
    }

    pub fn copy_from(&mut self, other: &GridData) {
        assert_eq!(self.shape, other.shape, "grid data shape mismatch");
        self.data.copy_from_slice(&other.data)
    }
}

impl Index<(usize, usize, usize, usize)> for GridData {
    type Output = f64;

    fn index(&self, index: (usize, usize, usize, usize)) -> &f64 {
        &self.data[self.offset(index)]
    }
}

impl IndexMut<(usize, usize, usize, usize)> for GridData {
    fn index_mut(&mut self, index: (usize, usize, usize, usize)) -> &mut f64 {
        let n = self.offset(index);
        &mut self.data[n]
    }
}




/**
 * Return mutable access to one element of a slice and shared access to a
 * different one.
 */
pub fn split_pair(slots: &mut [GridData], target: usize, source: usize) -> (&mut GridData, &GridData) {
    assert_ne!(target, source, "cannot borrow a slot against itself");

    if target < source {
        let (lower, upper) = slots.split_at_mut(source);
        (&mut lower[target], &upper[0])
    } else {
        let (lower, upper) = slots.split_at_mut(target);
        (&mut upper[0], &lower[source])
    }
}
