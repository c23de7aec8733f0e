// SPDX-License-Identifier: GPL-3.0-or-later

//! Kannala-Brandt fisheye camera model.
//!
//! Forward model: `θ_d = θ·(1 + k1·θ² + k2·θ⁴ + k3·θ⁶ + k4·θ⁸)` with
//! `θ = atan(r)` for a normalized-plane radius `r`. The distorted point keeps
//! the *angle* as its magnitude (`|distorted| == θ_d`, not `tan(θ_d)`), which
//! is the OpenCV fisheye convention and what all calibrations here assume.
//!
//! The inverse is a bracketed Newton iteration targeting the smallest
//! preimage, and `estimate_new_camera_matrix` is a
//! port of OpenCV's `fisheye::estimateNewCameraMatrixForUndistortRectify`
//! (calib3d/src/fisheye.cpp) so existing balance/fov_scale calibration
//! workflows produce identical matrices.

use nalgebra::Vector2;

/// Cutoff below which a distorted radius is treated as on the optical axis.
const THETA_EPS: f64 = 1e-8;
/// Newton step magnitude at which the inverse iteration stops.
const NEWTON_TOL: f64 = 1e-10;
const NEWTON_MAX_ITER: usize = 20;
/// Scan resolution for bracketing the smallest preimage of θ_d.
const SCAN_STEPS: usize = 128;

#[derive(Default, Clone, Copy, Debug, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct DistortionCoeffs {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
}

/// Resolved pinhole intrinsics in pixels. `alpha` is the skew term, almost
/// always 0 for the cameras this crate targets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrix {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub alpha: f64,
}

/// Projection matrix for the rectified output, in output pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewCameraMatrix {
    pub new_fx: f64,
    pub new_fy: f64,
    pub new_cx: f64,
    pub new_cy: f64,
}

pub fn distort_theta(theta: f64, d: &DistortionCoeffs) -> f64 {
    let theta2 = theta * theta;
    let theta4 = theta2 * theta2;
    let theta6 = theta4 * theta2;
    let theta8 = theta4 * theta4;
    theta * (1.0 + d.k1 * theta2 + d.k2 * theta4 + d.k3 * theta6 + d.k4 * theta8)
}

fn distort_theta_derivative(theta: f64, d: &DistortionCoeffs) -> f64 {
    let theta2 = theta * theta;
    let theta4 = theta2 * theta2;
    let theta6 = theta4 * theta2;
    let theta8 = theta4 * theta4;
    1.0 + 3.0 * d.k1 * theta2 + 5.0 * d.k2 * theta4 + 7.0 * d.k3 * theta6 + 9.0 * d.k4 * theta8
}

/// Solves `distort_theta(θ) == theta_d` for the smallest non-negative root
/// (mirrored for negative `theta_d`).
///
/// The model is only meaningful up to 90° incidence, so `theta_d` is clipped
/// to ±π/2 first. Strong coefficients can make the polynomial non-monotonic
/// inside (0, π/2), giving θ_d several preimages; only the smallest is the
/// physically meaningful one, and an undamped Newton iteration can land on a
/// larger root. The first upcrossing is therefore bracketed with a coarse
/// scan and refined with bracket-guarded Newton; when no upcrossing exists
/// below π/2 a plain Newton iteration from θ_d decides.
pub fn undistort_theta(theta_d: f64, d: &DistortionCoeffs) -> f64 {
    let theta_d = theta_d.clamp(-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2);
    if theta_d.abs() < THETA_EPS {
        return theta_d;
    }
    let target = theta_d.abs();

    let scan_step = std::f64::consts::FRAC_PI_2 / SCAN_STEPS as f64;
    let mut bracket = None;
    for i in 1..=SCAN_STEPS {
        let x = scan_step * i as f64;
        if distort_theta(x, d) >= target {
            bracket = Some((scan_step * (i - 1) as f64, x));
            break;
        }
    }

    let theta = match bracket {
        Some((mut lo, mut hi)) => {
            let mut theta = hi;
            for _ in 0..NEWTON_MAX_ITER {
                let residual = distort_theta(theta, d) - target;
                if residual < 0.0 {
                    lo = theta;
                } else {
                    hi = theta;
                }
                let newton = theta - residual / distort_theta_derivative(theta, d);
                // Fall back to bisection whenever Newton leaves the bracket,
                // e.g. near a peak where the derivative vanishes.
                let next = if newton > lo && newton < hi { newton } else { 0.5 * (lo + hi) };
                if (next - theta).abs() < NEWTON_TOL {
                    theta = next;
                    break;
                }
                theta = next;
            }
            theta
        }
        None => {
            let mut theta = target;
            for _ in 0..NEWTON_MAX_ITER {
                let step = (distort_theta(theta, d) - target) / distort_theta_derivative(theta, d);
                theta -= step;
                if step.abs() < NEWTON_TOL {
                    break;
                }
            }
            theta
        }
    };
    theta.copysign(theta_d)
}

/// Inverse mapping on the normalized plane: takes a distorted point (whose
/// magnitude is θ_d) and returns the undistorted pinhole point (magnitude
/// tan θ).
pub fn undistort_point(point: Vector2<f64>, d: &DistortionCoeffs) -> Vector2<f64> {
    let theta_d = point.norm();
    if theta_d < THETA_EPS {
        return point;
    }
    let theta = undistort_theta(theta_d, d);
    point * (theta.tan() / theta_d)
}

/// Port of OpenCV `fisheye::estimateNewCameraMatrixForUndistortRectify`.
///
/// Undistorts the four edge-midpoints of the input image, then picks the
/// focal length that places their bounding box at the output edges:
/// `balance == 0` takes the largest candidate focal (fully zoomed in, no
/// invalid border), `balance == 1` the smallest (full field of view), with a
/// linear blend in between. `fov_scale > 0` divides the focal afterwards.
pub fn estimate_new_camera_matrix(
    input_size: (u32, u32),
    output_size: (u32, u32),
    k: &CameraMatrix,
    d: &DistortionCoeffs,
    balance: f64,
    fov_scale: f64,
) -> NewCameraMatrix {
    let w = input_size.0 as f64;
    let h = input_size.1 as f64;
    let balance = balance.clamp(0.0, 1.0);

    let edge_midpoints = [
        Vector2::new(w / 2.0, 0.0),
        Vector2::new(w, h / 2.0),
        Vector2::new(w / 2.0, h),
        Vector2::new(0.0, h / 2.0),
    ];

    let undistorted: Vec<Vector2<f64>> = edge_midpoints
        .iter()
        .map(|p| {
            let normalized = Vector2::new((p.x - k.cx) / k.fx, (p.y - k.cy) / k.fy);
            undistort_point(normalized, d)
        })
        .collect();

    let mut cn = undistorted.iter().sum::<Vector2<f64>>() / 4.0;

    // Rescale y by fx/fy so the bounding computation is isotropic.
    let aspect = k.fx / k.fy;
    cn.y *= aspect;
    let scaled: Vec<Vector2<f64>> = undistorted
        .iter()
        .map(|p| Vector2::new(p.x, p.y * aspect))
        .collect();

    let min_x = scaled.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = scaled.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = scaled.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = scaled.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

    let f1 = w * 0.5 / (cn.x - min_x);
    let f2 = w * 0.5 / (max_x - cn.x);
    let f3 = h * 0.5 * aspect / (cn.y - min_y);
    let f4 = h * 0.5 * aspect / (max_y - cn.y);

    let f_min = f1.min(f2).min(f3.min(f4));
    let f_max = f1.max(f2).max(f3.max(f4));

    let mut f = balance * f_min + (1.0 - balance) * f_max;
    if fov_scale > 0.0 {
        f /= fov_scale;
    }

    let new_fx = f;
    let new_fy = f / aspect;
    let new_cx = -cn.x * f + w * 0.5;
    let new_cy = (-cn.y * f + h * aspect * 0.5) / aspect;

    // Rescale to the requested output resolution.
    let rx = output_size.0 as f64 / w;
    let ry = output_size.1 as f64 / h;

    NewCameraMatrix {
        new_fx: new_fx * rx,
        new_fy: new_fy * ry,
        new_cx: new_cx * rx,
        new_cy: new_cy * ry,
    }
}

/// Memoization key for the estimated matrix; compares every input that feeds
/// the estimation so any change invalidates the cached result.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct NewCameraMatrixKey {
    pub input_size: (u32, u32),
    pub output_size: (u32, u32),
    pub camera: CameraMatrix,
    pub distortion: DistortionCoeffs,
    pub balance: f64,
    pub fov_scale: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_D: DistortionCoeffs = DistortionCoeffs {
        k1: 0.03562009,
        k2: -0.02587979,
        k3: 0.00564249,
        k4: -0.00107043,
    };

    const TEST_K: CameraMatrix = CameraMatrix {
        fx: 991.0,
        fy: 991.0,
        cx: 1612.0,
        cy: 1617.0,
        alpha: 0.0,
    };

    #[test]
    fn zero_distortion_is_identity() {
        let d = DistortionCoeffs::default();
        for theta in [0.0, 0.1, 0.5, 1.0, 1.5] {
            assert_eq!(distort_theta(theta, &d), theta);
        }
    }

    #[test]
    fn forward_inverse_round_trip() {
        let coeff_sets = [
            TEST_D,
            DistortionCoeffs { k1: 0.19, k2: -0.15, k3: 0.1, k4: -0.05 },
            DistortionCoeffs { k1: -0.1, k2: 0.05, k3: -0.02, k4: 0.01 },
        ];
        for d in &coeff_sets {
            let mut theta = 0.01;
            let mut last_theta_d = 0.0;
            while theta < std::f64::consts::FRAC_PI_2 {
                let theta_d = distort_theta(theta, d);
                if theta_d <= last_theta_d {
                    // Past the polynomial's peak θ_d no longer identifies θ;
                    // the inverse is only defined on the injective range.
                    break;
                }
                let recovered = undistort_theta(theta_d, d);
                assert!(
                    (recovered - theta).abs() < 1e-6,
                    "theta {theta} -> {theta_d} -> {recovered} with {d:?}"
                );
                last_theta_d = theta_d;
                theta += 0.05;
            }
        }
    }

    #[test]
    fn non_monotonic_coefficients_recover_smallest_preimage() {
        // This set peaks near θ ≈ 1.27, so θ_d = distort(1.21) has a second
        // preimage around 1.2966; the inversion must return the smaller one.
        let d = DistortionCoeffs { k1: 0.19, k2: -0.15, k3: 0.1, k4: -0.05 };
        let theta_d = distort_theta(1.21, &d);
        let recovered = undistort_theta(theta_d, &d);
        assert!((recovered - 1.21).abs() < 1e-6, "recovered {recovered}");
        let mirrored = undistort_theta(-theta_d, &d);
        assert!((mirrored + 1.21).abs() < 1e-6, "mirrored {mirrored}");
    }

    #[test]
    fn distorted_radius_is_theta_d_not_tan() {
        // The defining OpenCV-compatibility invariant: the forward-mapped
        // magnitude must equal θ_d itself.
        let p: Vector2<f64> = Vector2::new(0.6, -0.45);
        let r = p.norm();
        let theta_d = distort_theta(r.atan(), &TEST_D);
        let scale = theta_d / r;
        let distorted = p * scale;
        assert!((distorted.norm() - theta_d).abs() < 1e-12);
        assert!((distorted.norm() - theta_d.tan()).abs() > 1e-3);
    }

    #[test]
    fn on_axis_point_passes_through() {
        let p = Vector2::new(1e-12, 0.0);
        assert_eq!(undistort_point(p, &TEST_D), p);
    }

    #[test]
    fn balance_endpoints_and_linearity() {
        let input = (3264, 3264);
        let output = (3264, 3264);
        let zoomed = estimate_new_camera_matrix(input, output, &TEST_K, &TEST_D, 0.0, 1.0);
        let wide = estimate_new_camera_matrix(input, output, &TEST_K, &TEST_D, 1.0, 1.0);
        let mid = estimate_new_camera_matrix(input, output, &TEST_K, &TEST_D, 0.5, 1.0);

        // balance 0 keeps the largest candidate focal (zoomed in), balance 1
        // the smallest (full FOV).
        assert!(zoomed.new_fx >= wide.new_fx);
        let lerp = 0.5 * wide.new_fx + 0.5 * zoomed.new_fx;
        assert!((mid.new_fx - lerp).abs() < 1e-9);
    }

    #[test]
    fn fov_scale_divides_focal() {
        let input = (3264, 3264);
        let base = estimate_new_camera_matrix(input, input, &TEST_K, &TEST_D, 0.0, 1.0);
        let wide = estimate_new_camera_matrix(input, input, &TEST_K, &TEST_D, 0.0, 2.0);
        assert!((wide.new_fx - base.new_fx / 2.0).abs() < 1e-9);
    }

    #[test]
    fn output_size_scales_per_axis() {
        let input = (3264, 3264);
        let full = estimate_new_camera_matrix(input, input, &TEST_K, &TEST_D, 0.0, 1.0);
        let scaled = estimate_new_camera_matrix(input, (1632, 816), &TEST_K, &TEST_D, 0.0, 1.0);
        assert!((scaled.new_fx - full.new_fx * 0.5).abs() < 1e-9);
        assert!((scaled.new_fy - full.new_fy * 0.25).abs() < 1e-9);
        assert!((scaled.new_cx - full.new_cx * 0.5).abs() < 1e-9);
        assert!((scaled.new_cy - full.new_cy * 0.25).abs() < 1e-9);
    }

    #[test]
    fn pathological_theta_d_is_clipped() {
        // Values beyond ±π/2 must not blow up the iteration.
        let theta = undistort_theta(10.0, &TEST_D);
        assert!(theta.is_finite());
        assert!(theta <= std::f64::consts::FRAC_PI_2 + 0.5);
    }
}
