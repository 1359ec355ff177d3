//! File readers shared by the dataset adapters.
//!
//! All readers return `anyhow::Result` with the offending path in the context
//! chain; adapters wrap failures into `LoaderError::Decode`.

pub mod cloud;
pub mod image;
pub mod text;

pub use cloud::{read_kitti_labels, read_kitti_scan, RawScan};
pub use self::image::{load_color, load_color_downscaled, load_depth_mm};
pub use text::{
    read_intrinsics_file, read_kitti_calib_tr, read_kitti_poses, read_mvs_camera,
    read_pose_file, read_rendering_metadata, MvsCamera, RenderView,
};
