use crate::dataloader::config::Mode;
use crate::error::{LoaderError, Result};
use crate::geometry::{Affine3, Mat3};
use crate::readers::{load_color_downscaled, read_mvs_camera};
use crate::sample::{Frame, FrameKind, Sample};
use crate::source::{SampleSource, Scope};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DtuOptions {
    /// Multiplies camera translations to bring scenes into a convenient range
    pub scene_scale_multiplier: f64,
    /// Integer factor images are shrunk by; intrinsics follow
    pub downscale: u32,
}

impl Default for DtuOptions {
    fn default() -> Self {
        Self {
            scene_scale_multiplier: 1.0,
            downscale: 1,
        }
    }
}

/// Calibration of every view of one scan, read once at enumeration.
#[derive(Debug)]
pub struct DtuScene {
    pub name: String,
    cameras: BTreeMap<usize, (Affine3, Mat3)>,
}

impl DtuScene {
    /// World-to-camera pose and intrinsics of view `frame_idx`.
    pub fn camera(&self, frame_idx: usize) -> Option<&(Affine3, Mat3)> {
        self.cameras.get(&frame_idx)
    }

    /// View whose camera centre is nearest to the centre of `tf_cam_world`,
    /// skipping view `exclude`.
    pub fn closest_view(&self, tf_cam_world: &Affine3, exclude: usize) -> Option<usize> {
        self.closest_among(tf_cam_world, exclude, self.cameras.keys().copied())
    }

    /// Same as `closest_view`, restricted to `candidates`.
    fn closest_among(
        &self,
        tf_cam_world: &Affine3,
        exclude: usize,
        candidates: impl IntoIterator<Item = usize>,
    ) -> Option<usize> {
        let query = tf_cam_world.inverse()?.translation();
        candidates
            .into_iter()
            .filter(|&idx| idx != exclude)
            .filter_map(|idx| {
                let (tf, _) = self.camera(idx)?;
                let centre = tf.inverse()?.translation();
                let dist: f64 = (0..3).map(|i| (centre[i] - query[i]).powi(2)).sum();
                Some((dist, idx))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, idx)| idx)
    }
}

/// One image of one scan.
#[derive(Clone)]
pub struct DtuView {
    pub scene: Arc<DtuScene>,
    pub frame_idx: usize,
    path: PathBuf,
}

impl PartialEq for DtuView {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DtuView {}

impl PartialOrd for DtuView {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DtuView {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.scene.name, self.frame_idx).cmp(&(&other.scene.name, other.frame_idx))
    }
}

impl fmt::Debug for DtuView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:08}", self.scene.name, self.frame_idx)
    }
}

/// DTU multi-view stereo in the MVSNet layout:
///
/// ```text
/// root/<train|test|val>/scanN/image/NNNNNNNN.png
/// root/<train|test|val>/scanN/cams/NNNNNNNN_cam.txt
/// ```
///
/// Each scan is one scene; the loader reads one scene at a time.
pub struct DtuSource {
    root: PathBuf,
    options: DtuOptions,
}

impl DtuSource {
    pub fn new(root: impl Into<PathBuf>, options: DtuOptions) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(LoaderError::not_found(&root, "dataset directory does not exist"));
        }
        if options.downscale == 0 {
            return Err(LoaderError::InvalidConfig {
                reason: "downscale must be >= 1".into(),
            });
        }
        Ok(Self { root, options })
    }

    /// Scan directories of `mode`, ordered by scan number.
    fn scene_dirs(&self, mode: Mode) -> Result<Vec<PathBuf>> {
        let mode_dir = self.root.join(mode.dir_name());
        if !mode_dir.is_dir() {
            return Err(LoaderError::not_found(&mode_dir, "no directory for this mode"));
        }
        let mut scenes: Vec<(usize, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&mode_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| LoaderError::Io {
                path: mode_dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let number = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("scan"))
                .and_then(|n| n.parse::<usize>().ok());
            match number {
                Some(n) => scenes.push((n, entry.into_path())),
                None => warn!(path = %entry.path().display(), "ignoring non-scan directory"),
            }
        }
        scenes.sort();
        Ok(scenes.into_iter().map(|(_, path)| path).collect())
    }

    fn load_scene(&self, scene_dir: &Path) -> Result<Vec<DtuView>> {
        let name = scene_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let image_dir = scene_dir.join("image");
        let mut images = Vec::new();
        for entry in WalkDir::new(&image_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| LoaderError::Io {
                path: image_dir.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "png") {
                continue;
            }
            match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<usize>().ok())
            {
                Some(idx) => images.push((idx, path.to_path_buf())),
                None => warn!(path = %path.display(), "ignoring image with non-numeric name"),
            }
        }

        let mut cameras = BTreeMap::new();
        for (idx, _) in &images {
            let cam_path = scene_dir.join("cams").join(format!("{:08}_cam.txt", idx));
            let cam = read_mvs_camera(&cam_path)
                .map_err(|e| LoaderError::decode(format!("{}/{:08}", name, idx), e))?;
            let tf_cam_world = cam
                .extrinsic
                .with_scaled_translation(self.options.scene_scale_multiplier);
            let k = cam
                .intrinsic
                .scale_image_plane(1.0 / self.options.downscale as f64);
            cameras.insert(*idx, (tf_cam_world, k));
        }
        debug!(scene = %name, nr_views = images.len(), "read scene cameras");

        let scene = Arc::new(DtuScene { name, cameras });
        Ok(images
            .into_iter()
            .map(|(frame_idx, path)| DtuView {
                scene: scene.clone(),
                frame_idx,
                path,
            })
            .collect())
    }
}

impl SampleSource for DtuSource {
    type Id = DtuView;

    fn name(&self) -> &str {
        "dtu"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn nr_scenes(&self, scope: &Scope<'_>) -> Result<usize> {
        Ok(self.scene_dirs(scope.mode)?.len())
    }

    fn enumerate(&self, scope: &Scope<'_>) -> Result<Vec<DtuView>> {
        let scenes = self.scene_dirs(scope.mode)?;
        let scene_dir = scenes.get(scope.scene).ok_or(LoaderError::IndexOutOfRange {
            index: scope.scene,
            len: scenes.len(),
        })?;
        self.load_scene(scene_dir)
    }

    fn closest_view(&self, ids: &[DtuView], frame: &Frame) -> Result<Option<usize>> {
        let Some(scene) = ids.first().map(|view| &view.scene) else {
            return Ok(None);
        };
        let closest = scene.closest_among(
            &frame.tf_cam_world,
            frame.frame_idx,
            ids.iter().map(|view| view.frame_idx),
        );
        Ok(closest.and_then(|idx| ids.iter().position(|view| view.frame_idx == idx)))
    }

    fn decode(&self, id: &DtuView) -> Result<Sample> {
        let id_str = format!("{:?}", id);
        let decode = || -> anyhow::Result<Sample> {
            let (tf_cam_world, k) = *id
                .scene
                .camera(id.frame_idx)
                .ok_or_else(|| anyhow::anyhow!("no camera for view"))?;
            let image = load_color_downscaled(&id.path, self.options.downscale)?;
            Sample::builder(id_str.clone(), id.scene.name.clone())
                .frame(Frame {
                    kind: FrameKind::Color,
                    frame_idx: id.frame_idx,
                    image,
                    tf_cam_world,
                    k,
                })
                .build()
        };
        decode().map_err(|e| LoaderError::decode(&id_str, e))
    }
}
