use crate::error::{LoaderError, Result};
use crate::geometry::{Affine3, Mat3};
use crate::readers::text::RenderView;
use crate::readers::{load_color, read_rendering_metadata};
use crate::sample::{Frame, FrameKind, Sample};
use crate::source::{SampleSource, Scope};
use anyhow::anyhow;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Renderings were made with the camera at `distance_ratio * 1.75` from the
/// object centre.
const MAX_CAMERA_DISTANCE: f64 = 1.75;

/// ShapeNet synset ids of the 13 rendered classes.
const SYNSETS: [(&str, &str); 13] = [
    ("airplane", "02691156"),
    ("bench", "02828884"),
    ("cabinet", "02933112"),
    ("car", "02958343"),
    ("chair", "03001627"),
    ("display", "03211117"),
    ("lamp", "03636649"),
    ("loudspeaker", "03691459"),
    ("rifle", "04090263"),
    ("sofa", "04256520"),
    ("table", "04379243"),
    ("telephone", "04401088"),
    ("watercraft", "04530566"),
];

/// Synset directory name for a class name.
pub fn synset_for(object_name: &str) -> Option<&'static str> {
    SYNSETS
        .iter()
        .find(|(name, _)| *name == object_name)
        .map(|(_, id)| *id)
}

/// Class name for a synset directory name.
pub fn object_for(synset: &str) -> Option<&'static str> {
    SYNSETS
        .iter()
        .find(|(_, id)| *id == synset)
        .map(|(name, _)| *name)
}

/// Rendering metadata of one model, read once at enumeration.
#[derive(Debug)]
pub struct ShapeNetModel {
    pub synset: String,
    pub model: String,
    views: Vec<RenderView>,
}

impl ShapeNetModel {
    pub fn view(&self, idx: usize) -> Option<&RenderView> {
        self.views.get(idx)
    }
}

/// One rendering of one model.
#[derive(Clone)]
pub struct ShapeNetView {
    pub model: Arc<ShapeNetModel>,
    pub view_idx: usize,
    path: PathBuf,
}

impl PartialEq for ShapeNetView {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ShapeNetView {}

impl PartialOrd for ShapeNetView {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShapeNetView {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.model.synset, &self.model.model, self.view_idx).cmp(&(
            &other.model.synset,
            &other.model.model,
            other.view_idx,
        ))
    }
}

impl fmt::Debug for ShapeNetView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:02}",
            self.model.synset, self.model.model, self.view_idx
        )
    }
}

/// World-to-camera pose of a rendering: a look-at from the spherical
/// coordinates toward the origin (Y up), rolled by the in-plane angle.
pub fn view_pose(view: &RenderView) -> Option<Affine3> {
    let az = view.azimuth.to_radians();
    let el = view.elevation.to_radians();
    let d = view.distance_ratio * MAX_CAMERA_DISTANCE;
    let eye = [
        d * el.cos() * az.sin(),
        d * el.sin(),
        d * el.cos() * az.cos(),
    ];
    let look = Affine3::look_at(eye, [0.0; 3], [0.0, 1.0, 0.0])?;
    let roll = Affine3::from_parts(Mat3::rotation_z(view.in_plane.to_radians()), [0.0; 3]);
    Some(roll * look)
}

/// Pinhole intrinsics of a `width` x `height` rendering with horizontal field
/// of view `fov_deg`.
pub fn view_intrinsics(fov_deg: f64, width: u32, height: u32) -> Mat3 {
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let f = cx / (fov_deg.to_radians() / 2.0).tan();
    Mat3::from_rows([[f, 0.0, cx], [0.0, f, cy], [0.0, 0.0, 1.0]])
}

/// ShapeNet renderings (`<synset>/<model>/rendering/NN.png` with
/// `rendering_metadata.txt`). Each model is one scene; the `object_name`
/// filter picks the class, and without it every class is listed.
/// The dataset has no splits.
pub struct ShapeNetImgSource {
    root: PathBuf,
}

impl ShapeNetImgSource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(LoaderError::not_found(&root, "dataset directory does not exist"));
        }
        Ok(Self { root })
    }

    fn synsets(&self, object_name: Option<&str>) -> Result<Vec<&'static str>> {
        match object_name {
            Some(name) => synset_for(name).map(|s| vec![s]).ok_or_else(|| {
                LoaderError::InvalidConfig {
                    reason: format!("unknown ShapeNet class '{}'", name),
                }
            }),
            None => Ok(SYNSETS.iter().map(|(_, id)| *id).collect()),
        }
    }

    /// Model directories of the selected classes, sorted.
    fn model_dirs(&self, object_name: Option<&str>) -> Result<Vec<PathBuf>> {
        let mut models = Vec::new();
        for synset in self.synsets(object_name)? {
            let synset_dir = self.root.join(synset);
            if !synset_dir.is_dir() {
                debug!(synset, "class not present, skipping");
                continue;
            }
            for entry in WalkDir::new(&synset_dir).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| LoaderError::Io {
                    path: synset_dir.clone(),
                    source: e.into(),
                })?;
                if entry.file_type().is_dir() {
                    models.push(entry.into_path());
                }
            }
        }
        models.sort();
        Ok(models)
    }

    fn load_model(&self, model_dir: &Path) -> Result<Vec<ShapeNetView>> {
        let name_of = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let model = name_of(model_dir);
        let synset = model_dir.parent().map(name_of).unwrap_or_default();
        let rendering = model_dir.join("rendering");
        let views = read_rendering_metadata(&rendering.join("rendering_metadata.txt"))
            .map_err(|e| LoaderError::decode(format!("{}/{}", synset, model), e))?;

        let record = Arc::new(ShapeNetModel {
            synset,
            model,
            views,
        });
        let mut ids = Vec::new();
        for entry in WalkDir::new(&rendering).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| LoaderError::Io {
                path: rendering.clone(),
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
                Some(view_idx) if view_idx < record.views.len() => ids.push(ShapeNetView {
                    model: record.clone(),
                    view_idx,
                    path: path.to_path_buf(),
                }),
                _ => warn!(path = %path.display(), "ignoring rendering without metadata"),
            }
        }
        Ok(ids)
    }
}

impl SampleSource for ShapeNetImgSource {
    type Id = ShapeNetView;

    fn name(&self) -> &str {
        "shapenet_img"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn nr_scenes(&self, scope: &Scope<'_>) -> Result<usize> {
        Ok(self
            .model_dirs(scope.filters.object_name.as_deref())?
            .len())
    }

    fn enumerate(&self, scope: &Scope<'_>) -> Result<Vec<ShapeNetView>> {
        let models = self.model_dirs(scope.filters.object_name.as_deref())?;
        let model_dir = models.get(scope.scene).ok_or(LoaderError::IndexOutOfRange {
            index: scope.scene,
            len: models.len(),
        })?;
        self.load_model(model_dir)
    }

    fn decode(&self, id: &ShapeNetView) -> Result<Sample> {
        let id_str = format!("{:?}", id);
        let decode = || -> anyhow::Result<Sample> {
            let view = id
                .model
                .view(id.view_idx)
                .ok_or_else(|| anyhow!("no metadata for view"))?;
            let image = load_color(&id.path)?;
            let tf_cam_world = view_pose(view).ok_or_else(|| anyhow!("degenerate camera"))?;
            let k = view_intrinsics(view.fov, image.width, image.height);
            let name = object_for(&id.model.synset).unwrap_or(id.model.synset.as_str());
            Sample::builder(id_str.clone(), name)
                .frame(Frame {
                    kind: FrameKind::Color,
                    frame_idx: id.view_idx,
                    image,
                    tf_cam_world,
                    k,
                })
                .build()
        };
        decode().map_err(|e| LoaderError::decode(&id_str, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(azimuth: f64, elevation: f64, in_plane: f64) -> RenderView {
        RenderView {
            azimuth,
            elevation,
            in_plane,
            distance_ratio: 1.0,
            fov: 25.0,
        }
    }

    #[test]
    fn test_synset_mapping() {
        assert_eq!(synset_for("chair"), Some("03001627"));
        assert_eq!(object_for("04530566"), Some("watercraft"));
        assert_eq!(synset_for("spaceship"), None);
    }

    #[test]
    fn test_view_pose_looks_at_origin() -> anyhow::Result<()> {
        let tf = view_pose(&view(0.0, 0.0, 0.0)).ok_or_else(|| anyhow!("degenerate"))?;
        // azimuth 0, elevation 0 puts the camera on +Z
        let origin_in_cam = tf.transform_point([0.0; 3]);
        assert!(origin_in_cam[0].abs() < 1e-9 && origin_in_cam[1].abs() < 1e-9);
        assert!((origin_in_cam[2] + MAX_CAMERA_DISTANCE).abs() < 1e-9);

        let raised = view_pose(&view(30.0, 45.0, 0.0)).ok_or_else(|| anyhow!("degenerate"))?;
        let eye = raised.inverse().ok_or_else(|| anyhow!("singular"))?.translation();
        assert!(eye[1] > 0.0);
        let dist = (eye[0] * eye[0] + eye[1] * eye[1] + eye[2] * eye[2]).sqrt();
        assert!((dist - MAX_CAMERA_DISTANCE).abs() < 1e-9);

        // in-plane roll keeps the optical axis
        let rolled = view_pose(&view(0.0, 0.0, 90.0)).ok_or_else(|| anyhow!("degenerate"))?;
        let p = rolled.transform_point([0.0; 3]);
        assert!((p[2] + MAX_CAMERA_DISTANCE).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_intrinsics_from_fov() {
        let k = view_intrinsics(90.0, 200, 100);
        assert!((k.0[0][0] - 100.0).abs() < 1e-9);
        assert_eq!(k.0[0][2], 100.0);
        assert_eq!(k.0[1][2], 50.0);
    }

    #[test]
    fn test_unknown_class() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = ShapeNetImgSource::new(dir.path())?;
        assert!(matches!(
            source.synsets(Some("spaceship")),
            Err(LoaderError::InvalidConfig { .. })
        ));
        assert_eq!(source.synsets(None)?.len(), 13);
        Ok(())
    }
}
