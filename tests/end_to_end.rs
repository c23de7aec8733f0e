// SPDX-License-Identifier: GPL-3.0-or-later

//! Acceptance test: dewarp a synthetic fisheye frame with the CPU kernel and
//! compare against an f64 reference mapping computed from the public camera
//! model. The fixture encodes its own coordinates in the red/green channels,
//! so the expected color at any sub-pixel source position is known in closed
//! form.

use fisheye_core::camera_model::{
    distort_theta, estimate_new_camera_matrix, CameraMatrix, DistortionCoeffs,
};
use fisheye_core::{Fisheye, VideoFrame};

const IN_W: u32 = 3264;
const IN_H: u32 = 3264;
const OUT_W: u32 = 640;
const OUT_H: u32 = 480;

const K: CameraMatrix = CameraMatrix { fx: 991.0, fy: 991.0, cx: 1612.0, cy: 1617.0, alpha: 0.0 };
const D: DistortionCoeffs = DistortionCoeffs {
    k1: 0.03562009,
    k2: -0.02587979,
    k3: 0.00564249,
    k4: -0.00107043,
};

fn coordinate_gradient() -> VideoFrame {
    let mut data = vec![0u8; (IN_W * IN_H * 4) as usize];
    for y in 0..IN_H {
        for x in 0..IN_W {
            let i = ((y * IN_W + x) * 4) as usize;
            data[i] = (x as f64 * 255.0 / (IN_W - 1) as f64).round() as u8;
            data[i + 1] = (y as f64 * 255.0 / (IN_H - 1) as f64).round() as u8;
            data[i + 2] = 128;
            data[i + 3] = 255;
        }
    }
    VideoFrame::rgba(data, IN_W, IN_H, 33_333).unwrap()
}

/// f64 rendition of the rectilinear kernel for one output pixel.
fn reference_map(ox: u32, oy: u32, new_fx: f64, new_fy: f64, new_cx: f64, new_cy: f64) -> (f64, f64) {
    let nx = (ox as f64 - new_cx) / new_fx;
    let ny = (oy as f64 - new_cy) / new_fy;
    let r = (nx * nx + ny * ny).sqrt();
    let theta_d = distort_theta(r.atan(), &D);
    let scale = theta_d / r.max(1e-8);
    (K.fx * nx * scale + K.cx, K.fy * ny * scale + K.cy)
}

#[test]
fn rectilinear_dewarp_matches_reference_mapping() {
    let mut fisheye = Fisheye::from_json(
        r#"{
            "k": { "fx": 991.0, "fy": 991.0, "cx": 1612.0, "cy": 1617.0 },
            "d": { "k1": 0.03562009, "k2": -0.02587979, "k3": 0.00564249, "k4": -0.00107043 },
            "size": { "width": 640, "height": 480 },
            "balance": 0.0,
            "fovScale": 1.0,
            "projection": { "type": "rectilinear" }
        }"#,
    )
    .unwrap();

    let frame = coordinate_gradient();
    let output = fisheye.undistort_cpu(&frame).unwrap();
    assert_eq!(output.width, OUT_W);
    assert_eq!(output.height, OUT_H);
    assert_eq!(output.timestamp_us, 33_333);

    let new_k = estimate_new_camera_matrix((IN_W, IN_H), (OUT_W, OUT_H), &K, &D, 0.0, 1.0);

    let mut compared = 0u64;
    let mut within_tolerance = 0u64;
    let mut squared_error = 0.0f64;
    for oy in 0..OUT_H {
        for ox in 0..OUT_W {
            let i = ((oy * OUT_W + ox) * 4) as usize;
            let pixel = &output.data[i..i + 4];
            let (u, v) = reference_map(ox, oy, new_k.new_fx, new_k.new_fy, new_k.new_cx, new_k.new_cy);
            let inside = u >= 0.0 && u <= (IN_W - 1) as f64 && v >= 0.0 && v <= (IN_H - 1) as f64;
            let clearly_outside = u < -1.0 || u > IN_W as f64 || v < -1.0 || v > IN_H as f64;
            if inside {
                let expected = [
                    u * 255.0 / (IN_W - 1) as f64,
                    v * 255.0 / (IN_H - 1) as f64,
                    128.0,
                ];
                compared += 1;
                let mut ok = true;
                for c in 0..3 {
                    let diff = pixel[c] as f64 - expected[c];
                    squared_error += diff * diff;
                    if diff.abs() > 10.0 {
                        ok = false;
                    }
                }
                if ok {
                    within_tolerance += 1;
                }
                assert_eq!(pixel[3], 255);
            } else if clearly_outside {
                assert_eq!(pixel, [0, 0, 0, 255]);
            }
            // Sub-pixel boundary cases are left to either side; the f32
            // kernel and the f64 reference may legitimately disagree there.
        }
    }

    assert!(compared > 0, "reference mapping produced no valid pixels");
    let good = within_tolerance as f64 / compared as f64;
    assert!(good > 0.9, "only {:.1}% of pixels within tolerance", good * 100.0);
    let mse = squared_error / (compared * 3) as f64;
    assert!(mse < 100.0, "MSE {mse}");
}

#[test]
fn original_projection_downscales_without_correction() {
    let mut fisheye = Fisheye::from_json(
        r#"{
            "size": { "width": 816, "height": 816 },
            "projection": { "type": "original" }
        }"#,
    )
    .unwrap();

    let frame = coordinate_gradient();
    let output = fisheye.undistort_cpu(&frame).unwrap();
    assert_eq!(output.width, 816);
    assert_eq!(output.height, 816);

    // A 4:1 downscale of the coordinate gradient keeps the gradient: each
    // output pixel samples input (4x, 4y) exactly.
    for (ox, oy) in [(0u32, 0u32), (100, 200), (815, 815), (407, 3)] {
        let i = ((oy * 816 + ox) * 4) as usize;
        let expected_r = (ox as f64 * 4.0 * 255.0 / (IN_W - 1) as f64).round() as u8;
        let expected_g = (oy as f64 * 4.0 * 255.0 / (IN_H - 1) as f64).round() as u8;
        assert!((output.data[i] as i32 - expected_r as i32).abs() <= 1);
        assert!((output.data[i + 1] as i32 - expected_g as i32).abs() <= 1);
        assert_eq!(output.data[i + 2], 128);
    }
}
