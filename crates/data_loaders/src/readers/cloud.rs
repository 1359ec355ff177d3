//! Binary LiDAR scans in the KITTI layout.

use anyhow::{ensure, Context, Result};
use std::fs;
use std::path::Path;

/// Semantic class lives in the low 16 bits; the high bits are the instance id.
const SEMANTIC_MASK: u32 = 0xFFFF;

/// Points of one scan: positions and per-point remission.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScan {
    pub positions: Vec<[f32; 3]>,
    pub remission: Vec<f32>,
}

/// Decodes packed little-endian `f32` records of `x y z remission`.
pub fn parse_kitti_scan(bytes: &[u8]) -> Result<RawScan> {
    ensure!(
        bytes.len() % 16 == 0,
        "Scan size {} is not a multiple of 16 bytes",
        bytes.len()
    );
    let nr_points = bytes.len() / 16;
    let mut positions = Vec::with_capacity(nr_points);
    let mut remission = Vec::with_capacity(nr_points);
    for record in bytes.chunks_exact(16) {
        let mut values = [0f32; 4];
        for (value, raw) in values.iter_mut().zip(record.chunks_exact(4)) {
            *value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        positions.push([values[0], values[1], values[2]]);
        remission.push(values[3]);
    }
    Ok(RawScan {
        positions,
        remission,
    })
}

pub fn read_kitti_scan(path: &Path) -> Result<RawScan> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read scan {}", path.display()))?;
    parse_kitti_scan(&bytes).with_context(|| format!("Malformed scan {}", path.display()))
}

/// Decodes packed little-endian `u32` labels, keeping the semantic class.
pub fn parse_kitti_labels(bytes: &[u8]) -> Result<Vec<u32>> {
    ensure!(
        bytes.len() % 4 == 0,
        "Label file size {} is not a multiple of 4 bytes",
        bytes.len()
    );
    Ok(bytes
        .chunks_exact(4)
        .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) & SEMANTIC_MASK)
        .collect())
}

pub fn read_kitti_labels(path: &Path) -> Result<Vec<u32>> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read labels {}", path.display()))?;
    parse_kitti_labels(&bytes).with_context(|| format!("Malformed labels {}", path.display()))
}
