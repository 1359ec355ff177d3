//! One `SampleSource` per supported on-disk layout.

pub mod dtu;
pub mod kitti;
pub mod shapenet;
pub mod volref;

pub use dtu::{DtuOptions, DtuSource};
pub use kitti::{KittiOptions, KittiSource};
pub use shapenet::ShapeNetImgSource;
pub use volref::VolRefSource;
