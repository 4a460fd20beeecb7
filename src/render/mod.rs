pub mod scene;
pub mod topview;

pub use scene::{PersonMarker, SceneFrame, Segment3, VoxelPoint};
pub use topview::{render_top_view, TopView};
