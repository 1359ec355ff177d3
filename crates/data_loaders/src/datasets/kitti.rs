use crate::dataloader::config::Mode;
use crate::error::{LoaderError, Result};
use crate::geometry::{camera_from_world, tf_gl_ros, Affine3};
use crate::readers::{read_kitti_calib_tr, read_kitti_labels, read_kitti_poses, read_kitti_scan};
use crate::sample::{PointCloud, Sample};
use crate::source::{SampleSource, Scope};
use anyhow::{anyhow, Context};
use rand::{rngs::StdRng, SeedableRng};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Per-scan processing options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KittiOptions {
    /// Move every scan into the world frame with the sequence pose table
    pub do_pose: bool,
    /// Drop points farther than this from the sensor (metres)
    pub cap_distance: Option<f32>,
    /// Scale the cloud into `[-1, 1]`
    pub normalize: bool,
    /// Permute points, seeded by the scan index
    pub shuffle_points: bool,
}

/// Standard SemanticKITTI split.
pub fn sequences_for(mode: Mode) -> Vec<String> {
    let ids: Vec<u32> = match mode {
        Mode::Train => vec![0, 1, 2, 3, 4, 5, 6, 7, 9, 10],
        Mode::Validation => vec![8],
        Mode::Test => (11..=21).collect(),
    };
    ids.into_iter().map(|id| format!("{:02}", id)).collect()
}

/// Velodyne-to-world transform of every scan of one sequence.
#[derive(Debug)]
pub struct PoseTable {
    tf_world_velo: Vec<Affine3>,
}

impl PoseTable {
    /// Reads `poses.txt` (camera poses) and `calib.txt` of a sequence and
    /// expresses the poses in the velodyne frame: `Tr^-1 * P * Tr`.
    pub fn load(sequence_dir: &Path) -> anyhow::Result<Self> {
        let tr = read_kitti_calib_tr(&sequence_dir.join("calib.txt"))?;
        let tr_inv = tr
            .inverse()
            .ok_or_else(|| anyhow!("Singular Tr in {}", sequence_dir.display()))?;
        let poses = read_kitti_poses(&sequence_dir.join("poses.txt"))?;
        Ok(Self {
            tf_world_velo: poses.into_iter().map(|p| tr_inv * p * tr).collect(),
        })
    }

    pub fn get(&self, scan: usize) -> Option<&Affine3> {
        self.tf_world_velo.get(scan)
    }

    pub fn len(&self) -> usize {
        self.tf_world_velo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tf_world_velo.is_empty()
    }
}

/// One velodyne scan, addressed by (sequence, scan index).
#[derive(Clone)]
pub struct KittiScan {
    pub sequence: String,
    pub scan: usize,
    path: PathBuf,
    poses: Option<Arc<PoseTable>>,
}

impl KittiScan {
    fn labels_path(&self) -> Option<PathBuf> {
        let sequence_dir = self.path.parent()?.parent()?;
        let stem = self.path.file_stem()?;
        let mut path = sequence_dir.join("labels").join(stem);
        path.set_extension("label");
        Some(path)
    }
}

impl PartialEq for KittiScan {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KittiScan {}

impl PartialOrd for KittiScan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KittiScan {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.sequence, self.scan).cmp(&(&other.sequence, other.scan))
    }
}

impl fmt::Debug for KittiScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:06}", self.sequence, self.scan)
    }
}

/// SemanticKITTI: `sequences/<seq>/velodyne/NNNNNN.bin`, optional
/// `labels/NNNNNN.label`, plus `poses.txt` and `calib.txt` per sequence.
///
/// Clouds are delivered in the OpenGL frame (Y up).
pub struct KittiSource {
    root: PathBuf,
    options: KittiOptions,
}

impl KittiSource {
    pub fn new(root: impl Into<PathBuf>, options: KittiOptions) -> Result<Self> {
        let root = root.into();
        if !root.join("sequences").is_dir() {
            return Err(LoaderError::not_found(&root, "missing 'sequences' directory"));
        }
        Ok(Self { root, options })
    }

    pub fn options(&self) -> &KittiOptions {
        &self.options
    }

    fn scan_sequence(&self, sequence: &str, explicit: bool) -> Result<Vec<KittiScan>> {
        let sequence_dir = self.root.join("sequences").join(sequence);
        let velodyne = sequence_dir.join("velodyne");
        if !velodyne.is_dir() {
            if explicit {
                return Err(LoaderError::not_found(&velodyne, "sequence not found"));
            }
            debug!(sequence, "sequence not present, skipping");
            return Ok(Vec::new());
        }

        let poses = if self.options.do_pose {
            let table = PoseTable::load(&sequence_dir)
                .map_err(|e| LoaderError::decode(format!("sequence {}", sequence), e))?;
            Some(Arc::new(table))
        } else {
            None
        };

        let mut scans = Vec::new();
        for entry in WalkDir::new(&velodyne).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| LoaderError::Io {
                path: velodyne.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "bin") {
                continue;
            }
            let Some(scan) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<usize>().ok())
            else {
                warn!(path = %path.display(), "ignoring scan with non-numeric name");
                continue;
            };
            scans.push(KittiScan {
                sequence: sequence.to_string(),
                scan,
                path: path.to_path_buf(),
                poses: poses.clone(),
            });
        }
        Ok(scans)
    }

    fn load_cloud(&self, id: &KittiScan) -> anyhow::Result<(PointCloud, Affine3)> {
        let raw = read_kitti_scan(&id.path)?;
        let mut cloud = PointCloud::new(raw.positions).with_remission(raw.remission)?;
        if let Some(labels_path) = id.labels_path().filter(|p| p.is_file()) {
            let labels = read_kitti_labels(&labels_path)?;
            if labels.is_empty() {
                warn!(path = %labels_path.display(), "empty label file");
            } else {
                cloud = cloud
                    .with_labels(labels)
                    .with_context(|| format!("Label count mismatch in {}", labels_path.display()))?;
            }
        }
        if let Some(max) = self.options.cap_distance {
            cloud = cloud.cap_distance(max);
        }

        let mut tf_world_velo = Affine3::IDENTITY;
        if let Some(poses) = &id.poses {
            tf_world_velo = *poses
                .get(id.scan)
                .ok_or_else(|| anyhow!("No pose for scan {} ({} poses)", id.scan, poses.len()))?;
            cloud = cloud.transformed(&tf_world_velo);
        }
        cloud = cloud.transformed(&tf_gl_ros());

        if self.options.normalize {
            cloud = cloud.normalized();
        }
        if self.options.shuffle_points {
            cloud = cloud.shuffled(&mut StdRng::seed_from_u64(id.scan as u64));
        }
        Ok((cloud, tf_world_velo))
    }
}

impl SampleSource for KittiSource {
    type Id = KittiScan;

    fn name(&self) -> &str {
        "semantic_kitti"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn enumerate(&self, scope: &Scope<'_>) -> Result<Vec<KittiScan>> {
        let (sequences, explicit) = match &scope.filters.sequence {
            Some(sequence) => (vec![sequence.clone()], true),
            None => (sequences_for(scope.mode), false),
        };
        let mut scans = Vec::new();
        for sequence in &sequences {
            scans.extend(self.scan_sequence(sequence, explicit)?);
        }
        Ok(scans)
    }

    fn decode(&self, id: &KittiScan) -> Result<Sample> {
        let id_str = format!("{:?}", id);
        let (cloud, tf_world_velo) = self
            .load_cloud(id)
            .map_err(|e| LoaderError::decode(&id_str, e))?;
        let pose = camera_from_world(&tf_world_velo, &tf_gl_ros())
            .ok_or_else(|| LoaderError::decode(&id_str, anyhow!("singular scan pose")))?;
        Sample::builder(id_str.clone(), id.sequence.clone())
            .cloud(cloud)
            .pose(pose)
            .build()
            .map_err(|e| LoaderError::decode(id_str, e))
    }
}
