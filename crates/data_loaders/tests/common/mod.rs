#![allow(dead_code)]

use data_loaders::sample::{Frame, FrameKind, ImageBuffer, Sample};
use data_loaders::{DataLoader, LoaderError, SampleSource, Scope};

use anyhow::Result;
use image::{ImageBuffer as RawImage, Luma, Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// In-memory source
// ============================================================================

/// Serves a fixed list of names; each sample is a 1x1 colour frame whose
/// red channel is the position of the name in the sorted list.
pub struct MemorySource {
    root: PathBuf,
    names: Vec<String>,
    delay: Option<Duration>,
    fail_on: Option<String>,
    pub decoded: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            root: PathBuf::from("memory"),
            names: names.into_iter().map(Into::into).collect(),
            delay: None,
            fail_on: None,
            decoded: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `n` names `s000 .. s{n-1}`.
    pub fn numbered(n: usize) -> Self {
        Self::new((0..n).map(|i| format!("s{:03}", i)))
    }

    /// Sleeps this long in every decode.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.fail_on = Some(name.to_string());
        self
    }
}

impl SampleSource for MemorySource {
    type Id = String;

    fn name(&self) -> &str {
        "memory"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn enumerate(&self, _scope: &Scope<'_>) -> data_loaders::Result<Vec<String>> {
        Ok(self.names.clone())
    }

    fn decode(&self, id: &String) -> data_loaders::Result<Sample> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.decoded.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref() == Some(id.as_str()) {
            return Err(LoaderError::decode(id.clone(), anyhow::anyhow!("corrupt sample")));
        }
        let image = ImageBuffer::from_rgb8(1, 1, vec![0, 0, 0])
            .map_err(|e| LoaderError::decode(id.clone(), e))?;
        Sample::builder(id.clone(), id.clone())
            .frame(Frame {
                kind: FrameKind::Color,
                frame_idx: 0,
                image,
                tf_cam_world: Default::default(),
                k: Default::default(),
            })
            .build()
            .map_err(|e| LoaderError::decode(id.clone(), e))
    }
}

// ============================================================================
// Polling helpers
// ============================================================================

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Dequeues `n` samples (or gives up after the deadline) and returns their
/// names.
pub fn drain<S: SampleSource>(loader: &DataLoader<S>, n: usize) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut failure = None;
    wait_until(|| {
        loop {
            match loader.get_sample() {
                Ok(sample) => names.push(sample.name().to_string()),
                Err(LoaderError::EmptyBuffer) => break,
                Err(e) => {
                    failure = Some(e);
                    return true;
                }
            }
        }
        names.len() >= n
    });
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(names),
    }
}

// ============================================================================
// On-disk datasets
// ============================================================================

const IDENTITY_3X4: &str = "1 0 0 0 0 1 0 0 0 0 1 0";

/// VolRef layout with `n` frames; frame `i` sits at x = i.
pub fn write_volref(root: &Path, n: usize) -> Result<()> {
    fs::create_dir_all(root)?;
    fs::write(root.join("colorIntrinsics.txt"), "500 0 320 0\n0 500 240 0\n0 0 1 0\n0 0 0 1\n")?;
    fs::write(root.join("depthIntrinsics.txt"), "400 0 160 0\n0 400 120 0\n0 0 1 0\n0 0 0 1\n")?;
    for i in 0..n {
        let prefix = root.join(format!("frame-{:06}", i));
        RgbImage::from_pixel(4, 3, Rgb([i as u8, 128, 255]))
            .save(prefix.with_extension("color.png"))?;
        let depth: RawImage<Luma<u16>, Vec<u16>> = RawImage::from_pixel(4, 3, Luma([2000]));
        depth.save(prefix.with_extension("depth.png"))?;
        fs::write(
            prefix.with_extension("pose.txt"),
            format!("1 0 0 {}\n0 1 0 0\n0 0 1 0\n0 0 0 1\n", i),
        )?;
    }
    Ok(())
}

/// SemanticKITTI layout: the given sequences with `n` one-point scans each.
pub fn write_kitti(root: &Path, sequences: &[&str], n: usize) -> Result<()> {
    for seq in sequences {
        let seq_dir = root.join("sequences").join(seq);
        let velodyne = seq_dir.join("velodyne");
        let labels = seq_dir.join("labels");
        fs::create_dir_all(&velodyne)?;
        fs::create_dir_all(&labels)?;
        fs::write(seq_dir.join("calib.txt"), format!("Tr: {}\n", IDENTITY_3X4))?;
        let poses: String = (0..n).map(|_| format!("{}\n", IDENTITY_3X4)).collect();
        fs::write(seq_dir.join("poses.txt"), poses)?;
        for i in 0..n {
            let point: [f32; 4] = [i as f32, 1.0, 2.0, 0.5];
            let bytes: Vec<u8> = point.iter().flat_map(|v| v.to_le_bytes()).collect();
            fs::write(velodyne.join(format!("{:06}.bin", i)), bytes)?;
            fs::write(labels.join(format!("{:06}.label", i)), ((3u32 << 16) | 40).to_le_bytes())?;
        }
    }
    Ok(())
}

/// DTU layout under `<mode>/scanN` with `views` images per scan.
pub fn write_dtu(root: &Path, mode: &str, scans: &[usize], views: usize) -> Result<()> {
    for scan in scans {
        let scene = root.join(mode).join(format!("scan{}", scan));
        fs::create_dir_all(scene.join("image"))?;
        fs::create_dir_all(scene.join("cams"))?;
        for v in 0..views {
            RgbImage::from_pixel(8, 6, Rgb([*scan as u8, v as u8, 0]))
                .save(scene.join("image").join(format!("{:08}.png", v)))?;
            fs::write(
                scene.join("cams").join(format!("{:08}_cam.txt", v)),
                format!(
                    "extrinsic\n1 0 0 {}\n0 1 0 0\n0 0 1 0\n0 0 0 1\n\n\
                     intrinsic\n300 0 4\n0 300 3\n0 0 1\n\n425 2.5\n",
                    v
                ),
            )?;
        }
    }
    Ok(())
}

/// ShapeNet rendering layout for `models` of one synset, `views` each.
pub fn write_shapenet(root: &Path, synset: &str, models: &[&str], views: usize) -> Result<()> {
    for model in models {
        let rendering = root.join(synset).join(model).join("rendering");
        fs::create_dir_all(&rendering)?;
        let metadata: String = (0..views)
            .map(|v| format!("{} 30 0 0.8 25\n", v * 45))
            .collect();
        fs::write(rendering.join("rendering_metadata.txt"), metadata)?;
        for v in 0..views {
            RgbImage::from_pixel(16, 16, Rgb([200, 10, 10]))
                .save(rendering.join(format!("{:02}.png", v)))?;
        }
    }
    Ok(())
}
