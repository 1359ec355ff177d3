//! Whitespace-delimited text formats: poses, intrinsics, calibration and
//! camera files.

use crate::geometry::{Affine3, Mat3};
use anyhow::{anyhow, bail, ensure, Context, Result};
use std::fs;
use std::path::Path;

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Parses every whitespace-separated value of `line` as `f64`.
fn parse_values(line: &str, line_num: usize) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("Invalid number '{}' on line {}", token, line_num + 1))
        })
        .collect()
}

/// Non-blank lines of `text`, parsed, with their (0-based) line numbers.
fn numeric_rows(text: &str) -> Result<Vec<Vec<f64>>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(num, line)| parse_values(line, num))
        .collect()
}

/// Builds a 4x4 transform from the 12 values of a row-major 3x4 matrix.
fn affine_from_3x4(values: &[f64]) -> Result<Affine3> {
    ensure!(
        values.len() == 12,
        "Expected 12 values for a 3x4 matrix, got {}",
        values.len()
    );
    Ok(Affine3::from_rows([
        [values[0], values[1], values[2], values[3]],
        [values[4], values[5], values[6], values[7]],
        [values[8], values[9], values[10], values[11]],
        [0.0, 0.0, 0.0, 1.0],
    ]))
}

// ============================================================================
// Pose / intrinsics files
// ============================================================================

/// Parses a 4x4 pose: 3 or 4 rows of 4 values. A missing last row is
/// `0 0 0 1`.
pub fn parse_pose(text: &str) -> Result<Affine3> {
    let rows = numeric_rows(text)?;
    ensure!(
        rows.len() >= 3,
        "Pose needs at least 3 rows, got {}",
        rows.len()
    );
    let mut m = Affine3::IDENTITY.0;
    for (r, row) in rows.iter().take(4).enumerate() {
        ensure!(
            row.len() == 4,
            "Pose row {} has {} values, expected 4",
            r + 1,
            row.len()
        );
        m[r].copy_from_slice(row);
    }
    Ok(Affine3::from_rows(m))
}

pub fn read_pose_file(path: &Path) -> Result<Affine3> {
    parse_pose(&read_text(path)?).with_context(|| format!("Malformed pose file {}", path.display()))
}

/// Parses a 3x3 intrinsic matrix from the first three values of the first
/// three rows. Wider files (e.g. 4x4 intrinsics) are accepted.
pub fn parse_intrinsics(text: &str) -> Result<Mat3> {
    let rows = numeric_rows(text)?;
    ensure!(
        rows.len() >= 3,
        "Intrinsics need 3 rows, got {}",
        rows.len()
    );
    let mut k = [[0.0; 3]; 3];
    for (r, row) in rows.iter().take(3).enumerate() {
        ensure!(
            row.len() >= 3,
            "Intrinsics row {} has {} values, expected 3",
            r + 1,
            row.len()
        );
        k[r].copy_from_slice(&row[..3]);
    }
    Ok(Mat3::from_rows(k))
}

pub fn read_intrinsics_file(path: &Path) -> Result<Mat3> {
    parse_intrinsics(&read_text(path)?)
        .with_context(|| format!("Malformed intrinsics file {}", path.display()))
}

// ============================================================================
// KITTI
// ============================================================================

/// One `3x4` pose per line, row-major.
pub fn parse_kitti_poses(text: &str) -> Result<Vec<Affine3>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(num, line)| {
            affine_from_3x4(&parse_values(line, num)?)
                .with_context(|| format!("Bad pose on line {}", num + 1))
        })
        .collect()
}

pub fn read_kitti_poses(path: &Path) -> Result<Vec<Affine3>> {
    parse_kitti_poses(&read_text(path)?)
        .with_context(|| format!("Malformed pose table {}", path.display()))
}

/// The velodyne-to-camera transform from the `Tr:` line of a calibration file.
pub fn parse_kitti_calib_tr(text: &str) -> Result<Affine3> {
    let (num, values) = text
        .lines()
        .enumerate()
        .find_map(|(num, line)| line.trim().strip_prefix("Tr:").map(|rest| (num, rest)))
        .ok_or_else(|| anyhow!("No 'Tr:' line"))?;
    affine_from_3x4(&parse_values(values, num)?)
}

pub fn read_kitti_calib_tr(path: &Path) -> Result<Affine3> {
    parse_kitti_calib_tr(&read_text(path)?)
        .with_context(|| format!("Malformed calibration file {}", path.display()))
}

// ============================================================================
// MVSNet camera files
// ============================================================================

/// Contents of an MVSNet `*_cam.txt` file.
#[derive(Debug, Clone, PartialEq)]
pub struct MvsCamera {
    /// World-to-camera transform
    pub extrinsic: Affine3,
    pub intrinsic: Mat3,
    /// `(depth_min, depth_interval)` when the file has a depth line
    pub depth_range: Option<(f64, f64)>,
}

/// Parses
/// ```text
/// extrinsic
/// <4 rows of 4>
///
/// intrinsic
/// <3 rows of 3>
///
/// <depth_min> <depth_interval> [...]
/// ```
pub fn parse_mvs_camera(text: &str) -> Result<MvsCamera> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(num, line)| (num, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .collect();

    let block = |header: &str, nr_rows: usize, nr_cols: usize| -> Result<Vec<Vec<f64>>> {
        let start = lines
            .iter()
            .position(|(_, line)| line.eq_ignore_ascii_case(header))
            .ok_or_else(|| anyhow!("Missing '{}' block", header))?;
        let rows = lines
            .get(start + 1..start + 1 + nr_rows)
            .ok_or_else(|| anyhow!("Truncated '{}' block", header))?;
        rows.iter()
            .map(|(num, line)| {
                let values = parse_values(line, *num)?;
                ensure!(
                    values.len() == nr_cols,
                    "'{}' row on line {} has {} values, expected {}",
                    header,
                    num + 1,
                    values.len(),
                    nr_cols
                );
                Ok(values)
            })
            .collect()
    };

    let e = block("extrinsic", 4, 4)?;
    let k = block("intrinsic", 3, 3)?;
    let extrinsic = Affine3::from_rows([
        [e[0][0], e[0][1], e[0][2], e[0][3]],
        [e[1][0], e[1][1], e[1][2], e[1][3]],
        [e[2][0], e[2][1], e[2][2], e[2][3]],
        [e[3][0], e[3][1], e[3][2], e[3][3]],
    ]);
    let intrinsic = Mat3::from_rows([
        [k[0][0], k[0][1], k[0][2]],
        [k[1][0], k[1][1], k[1][2]],
        [k[2][0], k[2][1], k[2][2]],
    ]);

    // The optional depth line follows the intrinsic block
    let intrinsic_start = lines
        .iter()
        .position(|(_, line)| line.eq_ignore_ascii_case("intrinsic"))
        .unwrap_or(0);
    let depth_range = match lines.get(intrinsic_start + 4) {
        Some((num, line)) => {
            let values = parse_values(line, *num)?;
            if values.len() < 2 {
                bail!("Depth line {} needs at least 2 values", num + 1);
            }
            Some((values[0], values[1]))
        }
        None => None,
    };

    Ok(MvsCamera {
        extrinsic,
        intrinsic,
        depth_range,
    })
}

pub fn read_mvs_camera(path: &Path) -> Result<MvsCamera> {
    parse_mvs_camera(&read_text(path)?)
        .with_context(|| format!("Malformed camera file {}", path.display()))
}

// ============================================================================
// ShapeNet rendering metadata
// ============================================================================

/// One line of `rendering_metadata.txt`. Angles are in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderView {
    pub azimuth: f64,
    pub elevation: f64,
    pub in_plane: f64,
    pub distance_ratio: f64,
    pub fov: f64,
}

pub fn parse_rendering_metadata(text: &str) -> Result<Vec<RenderView>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(num, line)| {
            let v = parse_values(line, num)?;
            ensure!(
                v.len() == 5,
                "Line {} has {} values, expected 5",
                num + 1,
                v.len()
            );
            Ok(RenderView {
                azimuth: v[0],
                elevation: v[1],
                in_plane: v[2],
                distance_ratio: v[3],
                fov: v[4],
            })
        })
        .collect()
}

pub fn read_rendering_metadata(path: &Path) -> Result<Vec<RenderView>> {
    parse_rendering_metadata(&read_text(path)?)
        .with_context(|| format!("Malformed rendering metadata {}", path.display()))
}
