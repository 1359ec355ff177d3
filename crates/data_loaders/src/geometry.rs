//! Small fixed-size matrix types for camera poses and intrinsics.
//!
//! `Affine3` is a row-major 4x4 transform. Poses follow the `tf_a_b` naming:
//! `tf_cam_world` maps world coordinates into camera coordinates.

use std::f64::consts::PI;
use std::ops::Mul;

/// Row-major 3x3 matrix, used for intrinsics and rotations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat3(pub [[f64; 3]; 3]);

impl Mat3 {
    pub const IDENTITY: Mat3 = Mat3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Mat3(rows)
    }

    /// Rotation of `angle` radians about the X axis.
    pub fn rotation_x(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Mat3([[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]])
    }

    /// Rotation of `angle` radians about the Z axis.
    pub fn rotation_z(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Mat3([[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn transpose(&self) -> Self {
        let m = &self.0;
        Mat3(std::array::from_fn(|r| std::array::from_fn(|c| m[c][r])))
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse via the adjugate; `None` for singular matrices.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let m = &self.0;
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        let adj = [
            [cof(1, 2, 1, 2), -cof(0, 2, 1, 2), cof(0, 1, 1, 2)],
            [-cof(1, 2, 0, 2), cof(0, 2, 0, 2), -cof(0, 1, 0, 2)],
            [cof(1, 2, 0, 1), -cof(0, 2, 0, 1), cof(0, 1, 0, 1)],
        ];
        Some(Mat3(adj.map(|row| row.map(|v| v / det))))
    }

    pub fn mul_vec(&self, v: [f64; 3]) -> [f64; 3] {
        self.0.map(|row| row[0] * v[0] + row[1] * v[1] + row[2] * v[2])
    }

    /// Scales the first two rows, i.e. rescales an intrinsic matrix for an
    /// image resized by `factor`.
    pub fn scale_image_plane(&self, factor: f64) -> Self {
        let mut m = self.0;
        for row in m.iter_mut().take(2) {
            for v in row.iter_mut() {
                *v *= factor;
            }
        }
        Mat3(m)
    }

    pub fn approx_eq(&self, other: &Mat3, eps: f64) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl Mul for Mat3 {
    type Output = Mat3;

    fn mul(self, rhs: Mat3) -> Mat3 {
        let (a, b) = (&self.0, &rhs.0);
        Mat3(std::array::from_fn(|r| {
            std::array::from_fn(|c| (0..3).map(|k| a[r][k] * b[k][c]).sum())
        }))
    }
}

/// Row-major 4x4 affine transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine3(pub [[f64; 4]; 4]);

impl Default for Affine3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Default for Mat3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine3 {
    pub const IDENTITY: Affine3 = Affine3([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Affine3(rows)
    }

    pub fn from_parts(linear: Mat3, translation: [f64; 3]) -> Self {
        let l = &linear.0;
        let t = translation;
        Affine3([
            [l[0][0], l[0][1], l[0][2], t[0]],
            [l[1][0], l[1][1], l[1][2], t[1]],
            [l[2][0], l[2][1], l[2][2], t[2]],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    pub fn rotation_x(angle: f64) -> Self {
        Self::from_parts(Mat3::rotation_x(angle), [0.0; 3])
    }

    pub fn linear(&self) -> Mat3 {
        let m = &self.0;
        Mat3(std::array::from_fn(|r| std::array::from_fn(|c| m[r][c])))
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.0[0][3], self.0[1][3], self.0[2][3]]
    }

    /// Inverse of the affine map (the last row is taken as `0 0 0 1`).
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.linear().inverse()?;
        let t = inv.mul_vec(self.translation());
        Some(Self::from_parts(inv, [-t[0], -t[1], -t[2]]))
    }

    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let l = self.linear().mul_vec(p);
        let t = self.translation();
        [l[0] + t[0], l[1] + t[1], l[2] + t[2]]
    }

    /// Same transform with the translation multiplied by `scale`.
    pub fn with_scaled_translation(&self, scale: f64) -> Self {
        let t = self.translation();
        Self::from_parts(self.linear(), [t[0] * scale, t[1] * scale, t[2] * scale])
    }

    /// World-to-camera transform of a camera at `eye` looking at `target`,
    /// OpenGL convention (camera looks down -Z, +Y up).
    pub fn look_at(eye: [f64; 3], target: [f64; 3], up: [f64; 3]) -> Option<Self> {
        let f = normalize(sub(target, eye))?;
        let s = normalize(cross(f, up))?;
        let u = cross(s, f);
        let rot = Mat3([s, u, [-f[0], -f[1], -f[2]]]);
        let t = rot.mul_vec(eye);
        Some(Self::from_parts(rot, [-t[0], -t[1], -t[2]]))
    }

    pub fn approx_eq(&self, other: &Affine3, eps: f64) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl Mul for Affine3 {
    type Output = Affine3;

    fn mul(self, rhs: Affine3) -> Affine3 {
        let (a, b) = (&self.0, &rhs.0);
        Affine3(std::array::from_fn(|r| {
            std::array::from_fn(|c| (0..4).map(|k| a[r][k] * b[k][c]).sum())
        }))
    }
}

/// Converts a dataset world frame (Z forward / Y down) into the consumer's
/// OpenGL world frame: 180 degrees about X.
pub fn tf_gl_world() -> Affine3 {
    Affine3::rotation_x(PI)
}

/// Converts a ROS world frame (Z up) into the OpenGL world frame (Y up).
pub fn tf_gl_ros() -> Affine3 {
    Affine3::rotation_x(-PI / 2.0)
}

/// Camera-from-world pose of a camera whose camera-to-world pose
/// `tf_world_cam` is given in the dataset convention: the frame is converted
/// first, then inverted.
pub fn camera_from_world(tf_world_cam: &Affine3, convention: &Affine3) -> Option<Affine3> {
    (*convention * *tf_world_cam).inverse()
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f64; 3]) -> Option<[f64; 3]> {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    (n > f64::EPSILON).then(|| [v[0] / n, v[1] / n, v[2] / n])
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_mat3_inverse() {
        let k = Mat3::from_rows([[500.0, 0.0, 320.0], [0.0, 510.0, 240.0], [0.0, 0.0, 1.0]]);
        let inv = k.inverse().unwrap();
        assert!((k * inv).approx_eq(&Mat3::IDENTITY, EPS));
        assert!(Mat3([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]])
            .inverse()
            .is_none());
    }

    #[test]
    fn test_affine_inverse_roundtrip() {
        let tf = Affine3::from_parts(
            Mat3::rotation_z(0.3) * Mat3::rotation_x(1.1),
            [1.0, -2.0, 0.5],
        );
        let inv = tf.inverse().unwrap();
        assert!((tf * inv).approx_eq(&Affine3::IDENTITY, EPS));
        let p = [0.2, 0.4, -3.0];
        let back = inv.transform_point(tf.transform_point(p));
        for i in 0..3 {
            assert!((back[i] - p[i]).abs() < EPS);
        }
    }

    #[test]
    fn test_gl_conversion_flips_y_and_z() {
        let p = tf_gl_world().transform_point([1.0, 2.0, 3.0]);
        assert!((p[0] - 1.0).abs() < EPS);
        assert!((p[1] + 2.0).abs() < EPS);
        assert!((p[2] + 3.0).abs() < EPS);

        let q = tf_gl_ros().transform_point([0.0, 0.0, 1.0]);
        assert!((q[1] - 1.0).abs() < EPS, "ROS up should become GL up: {:?}", q);
    }

    #[test]
    fn test_camera_from_world_order() {
        let tf_world_cam = Affine3::from_parts(Mat3::IDENTITY, [0.0, 0.0, 2.0]);
        let tf_cam_world = camera_from_world(&tf_world_cam, &tf_gl_world()).unwrap();
        // The camera centre in GL world coordinates is (0, 0, -2).
        let centre = tf_cam_world.inverse().unwrap().translation();
        assert!((centre[2] + 2.0).abs() < EPS);
        let origin_in_cam = tf_cam_world.transform_point([0.0, 0.0, -2.0]);
        assert!(origin_in_cam.iter().all(|v| v.abs() < EPS));
    }

    #[test]
    fn test_look_at_points_camera_down_negative_z() {
        let view = Affine3::look_at([0.0, 0.0, 5.0], [0.0; 3], [0.0, 1.0, 0.0]).unwrap();
        let target = view.transform_point([0.0, 0.0, 0.0]);
        assert!((target[2] + 5.0).abs() < EPS);
        assert!(target[0].abs() < EPS && target[1].abs() < EPS);
        assert!(Affine3::look_at([0.0, 1.0, 0.0], [0.0; 3], [0.0, 1.0, 0.0]).is_none());
    }

    #[test]
    fn test_scale_image_plane() {
        let k = Mat3::from_rows([[100.0, 0.0, 50.0], [0.0, 100.0, 40.0], [0.0, 0.0, 1.0]]);
        let half = k.scale_image_plane(0.5);
        assert_eq!(half.0[0], [50.0, 0.0, 25.0]);
        assert_eq!(half.0[1], [0.0, 50.0, 20.0]);
        assert_eq!(half.0[2], [0.0, 0.0, 1.0]);
    }
}
