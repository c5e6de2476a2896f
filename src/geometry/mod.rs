//! Pure geometric primitives shared by the duty classifier: box overlap,
//! centroid distance, inclusive point containment, and a perspective-n-point
//! head pose estimate from facial landmarks.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel space. `x1 < x2` and `y1 < y2` for
/// well-formed boxes; degenerate boxes are tolerated and contribute zero area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Head orientation in degrees. Unbounded range; callers clamp or window
/// as needed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Intersection over union of two boxes. Returns 0 for degenerate or
/// non-overlapping boxes; the union guard keeps this division-safe.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    if x1 >= x2 || y1 >= y2 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }

    inter / union
}

/// Euclidean distance between box centers.
pub fn centroid_distance(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt()
}

/// Inclusive containment test.
pub fn point_in_rect(point: (f64, f64), rect: &BoundingBox) -> bool {
    let (x, y) = point;
    rect.x1 <= x && x <= rect.x2 && rect.y1 <= y && y <= rect.y2
}

/// Fixed 3D face model matched against the five observed landmarks,
/// in the order nose, left eye, right eye, left ear, right ear.
const FACE_MODEL: [[f64; 3]; 5] = [
    [0.0, 0.0, 0.0],
    [-30.0, 65.0, -5.0],
    [30.0, 65.0, -5.0],
    [-60.0, 50.0, -20.0],
    [60.0, 50.0, -20.0],
];

const PNP_MAX_ITERATIONS: usize = 60;
const PNP_MAX_MEAN_ERROR_PX: f64 = 10.0;

/// Estimates head pose from the five facial landmarks. All landmarks must be
/// present; the camera model is synthesized from the observed point spread
/// (focal length 1.5x the largest coordinate, principal point at the
/// centroid). Returns `None` when the solver fails to converge or the
/// landmark geometry is degenerate.
pub fn estimate_head_pose(
    nose: Option<(f64, f64)>,
    left_eye: Option<(f64, f64)>,
    right_eye: Option<(f64, f64)>,
    left_ear: Option<(f64, f64)>,
    right_ear: Option<(f64, f64)>,
) -> Option<HeadPose> {
    let image_points = [nose?, left_eye?, right_eye?, left_ear?, right_ear?];

    // A face always spans more than a pixel; anything tighter is detector
    // noise the solver would happily overfit with an unbounded translation.
    let spread_x = max_coord(&image_points, 0) - min_coord(&image_points, 0);
    let spread_y = max_coord(&image_points, 1) - min_coord(&image_points, 1);
    if spread_x < 1.0 && spread_y < 1.0 {
        return None;
    }

    let focal = image_points
        .iter()
        .flat_map(|p| [p.0, p.1])
        .fold(1.0_f64, f64::max)
        * 1.5;
    let cx = image_points.iter().map(|p| p.0).sum::<f64>() / 5.0;
    let cy = image_points.iter().map(|p| p.1).sum::<f64>() / 5.0;

    let rotation = solve_pnp(&image_points, focal, cx, cy)?;

    // Factor out the model-to-image y-flip so a camera-facing head reads as
    // pitch = yaw = roll = 0.
    let face = mat_mul(&rotation_x(std::f64::consts::PI), &rotation);
    Some(euler_degrees(&face))
}

fn min_coord(points: &[(f64, f64); 5], axis: usize) -> f64 {
    points
        .iter()
        .map(|p| if axis == 0 { p.0 } else { p.1 })
        .fold(f64::INFINITY, f64::min)
}

fn max_coord(points: &[(f64, f64); 5], axis: usize) -> f64 {
    points
        .iter()
        .map(|p| if axis == 0 { p.0 } else { p.1 })
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Gauss-Newton refinement of (axis-angle rotation, translation) against the
/// face model, seeded from the ear spread and the nose position.
fn solve_pnp(image_points: &[(f64, f64); 5], focal: f64, cx: f64, cy: f64) -> Option<[[f64; 3]; 3]> {
    // Seed depth from the ear-to-ear spread (120 model units), and the
    // translation from the nose, which sits at the model origin.
    let ear_du = (image_points[4].0 - image_points[3].0).abs().max(1.0);
    let tz = (focal * 120.0 / ear_du).max(1.0);
    let tx = (image_points[0].0 - cx) * tz / focal;
    let ty = (image_points[0].1 - cy) * tz / focal;

    // Image y grows downward, so start from a half-turn about x.
    let mut params = [std::f64::consts::PI, 0.0, 0.0, tx, ty, tz];
    let mut lambda = 1e-3;
    let mut cost = residual_cost(&params, image_points, focal, cx, cy)?;

    for _ in 0..PNP_MAX_ITERATIONS {
        let residuals = residuals(&params, image_points, focal, cx, cy)?;
        let jacobian = numeric_jacobian(&params, image_points, focal, cx, cy)?;

        // Normal equations with Levenberg damping.
        let mut jtj = [[0.0_f64; 6]; 6];
        let mut jtr = [0.0_f64; 6];
        for row in 0..10 {
            for i in 0..6 {
                jtr[i] += jacobian[row][i] * residuals[row];
                for j in 0..6 {
                    jtj[i][j] += jacobian[row][i] * jacobian[row][j];
                }
            }
        }
        for i in 0..6 {
            jtj[i][i] += lambda * (1.0 + jtj[i][i]);
        }

        let Some(step) = solve_linear_6(jtj, jtr) else {
            return None;
        };

        let mut next = params;
        for i in 0..6 {
            next[i] -= step[i];
        }

        match residual_cost(&next, image_points, focal, cx, cy) {
            Some(next_cost) if next_cost < cost => {
                let step_norm: f64 = step.iter().map(|s| s * s).sum::<f64>().sqrt();
                params = next;
                cost = next_cost;
                lambda = (lambda * 0.5).max(1e-9);
                if step_norm < 1e-10 {
                    break;
                }
            }
            _ => {
                lambda *= 10.0;
                if lambda > 1e6 {
                    break;
                }
            }
        }
    }

    let mean_error = (cost / 5.0).sqrt();
    if !mean_error.is_finite() || mean_error > PNP_MAX_MEAN_ERROR_PX {
        return None;
    }

    Some(rodrigues([params[0], params[1], params[2]]))
}

fn residuals(
    params: &[f64; 6],
    image_points: &[(f64, f64); 5],
    focal: f64,
    cx: f64,
    cy: f64,
) -> Option<[f64; 10]> {
    let rotation = rodrigues([params[0], params[1], params[2]]);
    let mut out = [0.0_f64; 10];
    for (i, model) in FACE_MODEL.iter().enumerate() {
        let xc = rotation[0][0] * model[0] + rotation[0][1] * model[1] + rotation[0][2] * model[2]
            + params[3];
        let yc = rotation[1][0] * model[0] + rotation[1][1] * model[1] + rotation[1][2] * model[2]
            + params[4];
        let zc = rotation[2][0] * model[0] + rotation[2][1] * model[1] + rotation[2][2] * model[2]
            + params[5];
        if zc <= 1e-6 {
            return None;
        }
        out[2 * i] = focal * xc / zc + cx - image_points[i].0;
        out[2 * i + 1] = focal * yc / zc + cy - image_points[i].1;
    }
    Some(out)
}

fn residual_cost(
    params: &[f64; 6],
    image_points: &[(f64, f64); 5],
    focal: f64,
    cx: f64,
    cy: f64,
) -> Option<f64> {
    let r = residuals(params, image_points, focal, cx, cy)?;
    Some(r.iter().map(|v| v * v).sum())
}

fn numeric_jacobian(
    params: &[f64; 6],
    image_points: &[(f64, f64); 5],
    focal: f64,
    cx: f64,
    cy: f64,
) -> Option<[[f64; 6]; 10]> {
    let base = residuals(params, image_points, focal, cx, cy)?;
    let mut jac = [[0.0_f64; 6]; 10];
    for col in 0..6 {
        let eps = 1e-6 * params[col].abs().max(1e-3);
        let mut bumped = *params;
        bumped[col] += eps;
        let shifted = residuals(&bumped, image_points, focal, cx, cy)?;
        for row in 0..10 {
            jac[row][col] = (shifted[row] - base[row]) / eps;
        }
    }
    Some(jac)
}

/// Gaussian elimination with partial pivoting for the 6x6 normal equations.
fn solve_linear_6(mut a: [[f64; 6]; 6], mut b: [f64; 6]) -> Option<[f64; 6]> {
    for col in 0..6 {
        let mut pivot = col;
        for row in (col + 1)..6 {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..6 {
            let factor = a[row][col] / a[col][col];
            for k in col..6 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0_f64; 6];
    for col in (0..6).rev() {
        let mut sum = b[col];
        for k in (col + 1)..6 {
            sum -= a[col][k] * x[k];
        }
        x[col] = sum / a[col][col];
    }
    Some(x)
}

/// Axis-angle to rotation matrix.
fn rodrigues(rvec: [f64; 3]) -> [[f64; 3]; 3] {
    let theta = (rvec[0] * rvec[0] + rvec[1] * rvec[1] + rvec[2] * rvec[2]).sqrt();
    if theta < 1e-12 {
        return identity();
    }
    let (kx, ky, kz) = (rvec[0] / theta, rvec[1] / theta, rvec[2] / theta);
    let (s, c) = theta.sin_cos();
    let v = 1.0 - c;
    [
        [
            c + kx * kx * v,
            kx * ky * v - kz * s,
            kx * kz * v + ky * s,
        ],
        [
            ky * kx * v + kz * s,
            c + ky * ky * v,
            ky * kz * v - kx * s,
        ],
        [
            kz * kx * v - ky * s,
            kz * ky * v + kx * s,
            c + kz * kz * v,
        ],
    ]
}

fn identity() -> [[f64; 3]; 3] {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

fn rotation_x(angle: f64) -> [[f64; 3]; 3] {
    let (s, c) = angle.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

fn mat_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0_f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for (k, b_row) in b.iter().enumerate() {
                out[i][j] += a[i][k] * b_row[j];
            }
        }
    }
    out
}

/// Euler angles (degrees) for R = Rz(roll) * Ry(yaw) * Rx(pitch).
fn euler_degrees(r: &[[f64; 3]; 3]) -> HeadPose {
    let sy = (r[0][0] * r[0][0] + r[1][0] * r[1][0]).sqrt();
    let (pitch, yaw, roll) = if sy > 1e-6 {
        (
            r[2][1].atan2(r[2][2]),
            (-r[2][0]).atan2(sy),
            r[1][0].atan2(r[0][0]),
        )
    } else {
        ((-r[1][2]).atan2(r[1][1]), (-r[2][0]).atan2(sy), 0.0)
    };
    HeadPose {
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
        roll: roll.to_degrees(),
    }
}
