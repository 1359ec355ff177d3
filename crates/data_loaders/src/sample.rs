use crate::geometry::{Affine3, Mat3};
use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::Rng;

/// The `Sample` struct represents one fully decoded unit of training data.
///
/// A sample carries any number of camera frames (colour and/or depth images,
/// each with its own pose and intrinsics), an optional point cloud, and the
/// primary camera pose/intrinsics of the sample. It is assembled by a
/// [`SampleBuilder`] only once every part has been decoded, so a sample in
/// the prefetch buffer is always complete.
///
/// Ownership moves into the buffer on push and out to the consumer on pop;
/// the producer keeps no copy.
///
/// # Examples:
/// - RGB-D frame: `{frames: [color, depth], cloud: None}`
/// - LiDAR scan: `{frames: [], cloud: Some(points + labels)}`
#[derive(Debug, Clone)]
pub struct Sample {
    id: String,
    name: String,
    frames: Vec<Frame>,
    cloud: Option<PointCloud>,
    tf_cam_world: Affine3,
    k: Mat3,
}

impl Sample {
    /// Starts a sample for the identifier rendered as `id`, belonging to the
    /// scene or object `name`.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> SampleBuilder {
        SampleBuilder {
            id: id.into(),
            name: name.into(),
            frames: Vec::new(),
            cloud: None,
            tf_cam_world: None,
            k: None,
        }
    }

    /// Identifier the sample was decoded from.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Scene, sequence or object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// First frame of the given kind.
    pub fn frame(&self, kind: FrameKind) -> Option<&Frame> {
        self.frames.iter().find(|f| f.kind == kind)
    }

    pub fn cloud(&self) -> Option<&PointCloud> {
        self.cloud.as_ref()
    }

    /// Primary camera pose: world to camera.
    pub fn tf_cam_world(&self) -> &Affine3 {
        &self.tf_cam_world
    }

    /// Primary camera intrinsics.
    pub fn k(&self) -> &Mat3 {
        &self.k
    }

    /// Consumes the sample, keeping the first frame of the given kind.
    pub fn into_frame(self, kind: FrameKind) -> Option<Frame> {
        self.frames.into_iter().find(|f| f.kind == kind)
    }

    /// Consumes the sample, keeping its first frame whatever the kind.
    pub fn into_first_frame(self) -> Option<Frame> {
        self.frames.into_iter().next()
    }

    pub fn into_cloud(self) -> Option<PointCloud> {
        self.cloud
    }
}

/// Collects the parts of a [`Sample`] while it is being decoded.
#[derive(Debug)]
pub struct SampleBuilder {
    id: String,
    name: String,
    frames: Vec<Frame>,
    cloud: Option<PointCloud>,
    tf_cam_world: Option<Affine3>,
    k: Option<Mat3>,
}

impl SampleBuilder {
    pub fn frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn cloud(mut self, cloud: PointCloud) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Overrides the primary pose (defaults to the first frame's pose).
    pub fn pose(mut self, tf_cam_world: Affine3) -> Self {
        self.tf_cam_world = Some(tf_cam_world);
        self
    }

    /// Overrides the primary intrinsics (defaults to the first frame's).
    pub fn intrinsics(mut self, k: Mat3) -> Self {
        self.k = Some(k);
        self
    }

    /// Finishes the sample. Fails when it carries neither a frame nor a cloud,
    /// or when its pose/intrinsics cannot be derived.
    pub fn build(self) -> Result<Sample> {
        ensure!(
            !self.frames.is_empty() || self.cloud.is_some(),
            "sample {} has neither frames nor a point cloud",
            self.id
        );
        let first = self.frames.first();
        let tf_cam_world = match (self.tf_cam_world, first) {
            (Some(tf), _) => tf,
            (None, Some(frame)) => frame.tf_cam_world,
            (None, None) => Affine3::IDENTITY,
        };
        let k = match (self.k, first) {
            (Some(k), _) => k,
            (None, Some(frame)) => frame.k,
            (None, None) => Mat3::IDENTITY,
        };
        Ok(Sample {
            id: self.id,
            name: self.name,
            frames: self.frames,
            cloud: self.cloud,
            tf_cam_world,
            k,
        })
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Which sensor stream a frame comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Color,
    Depth,
}

/// Raw pixel storage as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded image: raw pixels plus a normalized `f32` copy.
///
/// Pixels are interleaved row-major (`HWC`). For colour images the
/// normalized values are in `[0, 1]`; for depth images they are metres.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub raw: PixelData,
    pub normalized: Vec<f32>,
}

impl ImageBuffer {
    /// Builds a colour image from 8-bit interleaved RGB pixels.
    pub fn from_rgb8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        ensure!(
            pixels.len() == (width * height * 3) as usize,
            "expected {}x{}x3 pixels, got {}",
            width,
            height,
            pixels.len()
        );
        let normalized = pixels.iter().map(|&p| p as f32 / 255.0).collect();
        Ok(Self {
            width,
            height,
            channels: 3,
            raw: PixelData::U8(pixels),
            normalized,
        })
    }

    /// Builds a single-channel depth image, scaling raw values by `scale`
    /// (e.g. millimetres to metres).
    pub fn from_depth16(width: u32, height: u32, pixels: Vec<u16>, scale: f32) -> Result<Self> {
        ensure!(
            pixels.len() == (width * height) as usize,
            "expected {}x{} depth values, got {}",
            width,
            height,
            pixels.len()
        );
        let normalized = pixels.iter().map(|&d| d as f32 * scale).collect();
        Ok(Self {
            width,
            height,
            channels: 1,
            raw: PixelData::U16(pixels),
            normalized,
        })
    }

    /// Normalized value at pixel `(x, y)`, channel `c`.
    pub fn value(&self, x: u32, y: u32, c: u8) -> Option<f32> {
        if x >= self.width || y >= self.height || c >= self.channels {
            return None;
        }
        let idx = ((y * self.width + x) * self.channels as u32 + c as u32) as usize;
        self.normalized.get(idx).copied()
    }
}

/// One camera image with its calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Index of the frame within its scene.
    pub frame_idx: usize,
    pub image: ImageBuffer,
    pub tf_cam_world: Affine3,
    pub k: Mat3,
}

// ============================================================================
// Point clouds
// ============================================================================

/// Point positions with optional per-point attributes.
///
/// All attribute vectors, when present, have one entry per position; the
/// filtering operations below keep them aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub positions: Vec<[f32; 3]>,
    pub labels: Option<Vec<u32>>,
    pub remission: Option<Vec<f32>>,
}

impl PointCloud {
    pub fn new(positions: Vec<[f32; 3]>) -> Self {
        Self {
            positions,
            labels: None,
            remission: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<u32>) -> Result<Self> {
        ensure!(
            labels.len() == self.positions.len(),
            "{} labels for {} points",
            labels.len(),
            self.positions.len()
        );
        self.labels = Some(labels);
        Ok(self)
    }

    pub fn with_remission(mut self, remission: Vec<f32>) -> Result<Self> {
        ensure!(
            remission.len() == self.positions.len(),
            "{} remission values for {} points",
            remission.len(),
            self.positions.len()
        );
        self.remission = Some(remission);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Drops every point farther than `max_distance` from the origin.
    pub fn cap_distance(self, max_distance: f32) -> Self {
        let max_sq = max_distance * max_distance;
        let keep: Vec<bool> = self
            .positions
            .iter()
            .map(|p| p[0] * p[0] + p[1] * p[1] + p[2] * p[2] <= max_sq)
            .collect();
        self.retain_mask(&keep)
    }

    /// Applies `tf` to every position.
    pub fn transformed(mut self, tf: &Affine3) -> Self {
        for p in self.positions.iter_mut() {
            let q = tf.transform_point([p[0] as f64, p[1] as f64, p[2] as f64]);
            *p = [q[0] as f32, q[1] as f32, q[2] as f32];
        }
        self
    }

    /// Centres the cloud on its bounding box and scales it uniformly so the
    /// largest extent spans `[-1, 1]`.
    pub fn normalized(mut self) -> Self {
        if self.positions.is_empty() {
            return self;
        }
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for p in &self.positions {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        let centre: [f32; 3] = std::array::from_fn(|i| (min[i] + max[i]) * 0.5);
        let half_extent = (0..3).map(|i| (max[i] - min[i]) * 0.5).fold(0.0f32, f32::max);
        let scale = if half_extent > 0.0 { 1.0 / half_extent } else { 1.0 };
        for p in self.positions.iter_mut() {
            for i in 0..3 {
                p[i] = (p[i] - centre[i]) * scale;
            }
        }
        self
    }

    /// Permutes points (and their attributes) with `rng`.
    pub fn shuffled<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..self.positions.len()).collect();
        order.shuffle(rng);
        self.gather(&order)
    }

    fn retain_mask(self, keep: &[bool]) -> Self {
        let order: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect();
        self.gather(&order)
    }

    fn gather(self, order: &[usize]) -> Self {
        Self {
            positions: pick(&self.positions, order),
            labels: self.labels.as_deref().map(|l| pick(l, order)),
            remission: self.remission.as_deref().map(|r| pick(r, order)),
        }
    }
}

fn pick<T: Copy>(values: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| values[i]).collect()
}
