use crate::error::{LoaderError, Result};
use crate::geometry::{camera_from_world, tf_gl_world, Mat3};
use crate::readers::{load_color, load_depth_mm, read_intrinsics_file, read_pose_file};
use crate::sample::{Frame, FrameKind, Sample};
use crate::source::{SampleSource, Scope};
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// RGB-D sequence in the VolumeDeform reference layout:
///
/// ```text
/// root/
/// ├── colorIntrinsics.txt
/// ├── depthIntrinsics.txt
/// ├── frame-000000.color.png
/// ├── frame-000000.depth.png   (u16, millimetres)
/// ├── frame-000000.pose.txt    (camera-to-world)
/// └── ...
/// ```
///
/// Every sample carries the colour and the depth frame of one time step. The
/// dataset has no splits; the mode is ignored.
pub struct VolRefSource {
    root: PathBuf,
    k_color: Mat3,
    k_depth: Mat3,
}

impl VolRefSource {
    /// Opens a dataset root and reads both intrinsic files.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(LoaderError::not_found(&root, "dataset directory does not exist"));
        }
        let read_k = |file: &str| {
            read_intrinsics_file(&root.join(file)).map_err(|e| LoaderError::decode(file, e))
        };
        let k_color = read_k("colorIntrinsics.txt")?;
        let k_depth = read_k("depthIntrinsics.txt")?;
        Ok(Self {
            root,
            k_color,
            k_depth,
        })
    }

    pub fn k_color(&self) -> &Mat3 {
        &self.k_color
    }

    pub fn k_depth(&self) -> &Mat3 {
        &self.k_depth
    }
}

/// `frame-000012.` for `frame-000012.color.png`.
fn frame_prefix(color_path: &Path) -> Option<&str> {
    let name = color_path.file_name()?.to_str()?;
    let pos = name.find("color")?;
    Some(&name[..pos])
}

fn frame_index(prefix: &str) -> usize {
    prefix
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

impl SampleSource for VolRefSource {
    type Id = PathBuf;

    fn name(&self) -> &str {
        "vol_ref"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn enumerate(&self, _scope: &Scope<'_>) -> Result<Vec<PathBuf>> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| LoaderError::Io {
                path: self.root.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let stem = entry.path().file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if stem.contains("frame") && stem.contains("color") {
                ids.push(entry.into_path());
            }
        }
        debug!(root = %self.root.display(), nr_frames = ids.len(), "scanned colour frames");
        Ok(ids)
    }

    fn decode(&self, id: &PathBuf) -> Result<Sample> {
        let id_str = id.display().to_string();
        let decode = || -> anyhow::Result<Sample> {
            let prefix = frame_prefix(id).ok_or_else(|| anyhow!("not a colour frame"))?;
            let dir = id.parent().unwrap_or(self.root.as_path());
            let frame_idx = frame_index(prefix);

            let color = load_color(id)?;
            let depth = load_depth_mm(&dir.join(format!("{}depth.png", prefix)))?;
            let tf_world_cam = read_pose_file(&dir.join(format!("{}pose.txt", prefix)))?;
            let tf_cam_world = camera_from_world(&tf_world_cam, &tf_gl_world())
                .ok_or_else(|| anyhow!("singular pose"))?;

            Sample::builder(id_str.clone(), "vol_ref")
                .frame(Frame {
                    kind: FrameKind::Color,
                    frame_idx,
                    image: color,
                    tf_cam_world,
                    k: self.k_color,
                })
                .frame(Frame {
                    kind: FrameKind::Depth,
                    frame_idx,
                    image: depth,
                    tf_cam_world,
                    k: self.k_depth,
                })
                .build()
        };
        decode().map_err(|e| LoaderError::decode(&id_str, e))
    }
}
