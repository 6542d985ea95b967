//! Tessera is the domain-decomposed mesh layer of a cubed-sphere atmospheric
//! model. The sphere is covered by six square panels, each tiled by
//! rectangular patches at one or more refinement levels. Patches are dealt
//! round-robin to processes; each process stores field data only for the
//! patches it owns, and keeps their halos consistent by exchanging messages
//! with the owners of neighboring patches, including across panel seams where
//! the index axes reverse or swap.
//!
//! The entry point is [`Grid`]: add patches, distribute them, initialize
//! connectivity, then exchange halos, consolidate fields at rank zero, and
//! compute checksums. Processes talk through a [`Communicator`], either the
//! in-process [`LocalCommunicator`] or the [`TcpCommunicator`].

pub mod connectivity;
pub mod consolidation;
pub mod direction;
pub mod error;
pub mod grid;
pub mod grid_data;
pub mod grid_patch;
pub mod index_space;
pub mod layout;
pub mod meshing;
pub mod message;
pub mod model;
pub mod patch_box;
pub mod topology;

pub use connectivity::{Connectivity, ExteriorNeighbor};
pub use consolidation::{ConsolidatedData, ConsolidationStatus};
pub use direction::Direction;
pub use error::{Error, Result};
pub use grid::Grid;
pub use grid_data::{DataType, GridData};
pub use grid_patch::{ChecksumType, GridPatch};
pub use index_space::{range2d, IndexSpace};
pub use layout::GridLayout;
pub use message::{Communicator, LocalCommunicator, TcpCommunicator, TcpHost};
pub use model::{DataLocation, ModelConfig, PhysicalConstants};
pub use patch_box::PatchBox;
pub use topology::{CubedSphere, Opposing, PanelTopology};
