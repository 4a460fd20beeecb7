pub mod grid;
pub mod lookup;

pub use grid::{Voxel, VoxelGrid, FOREGROUND, VOXEL_GRAY};
pub use lookup::LookupTable;
