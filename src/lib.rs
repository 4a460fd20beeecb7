pub mod calibration;
pub mod camera;
pub mod config;
pub mod histogram;
pub mod pipeline;
pub mod render;
pub mod segmentation;
pub mod tracker;
pub mod triangulation;
pub mod voxel;

#[cfg(test)]
mod test_support;
