// SPDX-License-Identifier: GPL-3.0-or-later

//! CPU implementation of the projection kernel. Semantically identical to
//! dewarp.wgsl, kept in f32 so both paths produce the same pixels. Used by
//! tests and exposed for hosts without a usable GPU.

use rayon::prelude::*;

use super::{
    KernelParams, PANE_FOUR, PANE_NONE, PANE_TWO_HORIZONTAL, PANE_TWO_VERTICAL,
    PROJECTION_CYLINDRICAL, PROJECTION_EQUIRECTANGULAR, PROJECTION_ORIGINAL,
};
use crate::config::{FOUR_PANE_PAN_DEG, TWO_PANE_PAN_DEG};

/// Rays bending behind the camera are rejected rather than wrapped.
const MIN_FORWARD_Z: f32 = 0.001;
/// Division floor for the forward-distortion radius.
const MIN_RADIUS: f32 = 1e-8;

fn rotate_pan_tilt(x: f32, y: f32, z: f32, pan: f32, tilt: f32) -> (f32, f32, f32) {
    let (st, ct) = tilt.sin_cos();
    let (sp, cp) = pan.sin_cos();
    let (x1, y1, z1) = (x, ct * y - st * z, st * y + ct * z);
    (cp * x1 + sp * z1, y1, -sp * x1 + cp * z1)
}

fn bounds_checked(p: &KernelParams, u: f32, v: f32) -> Option<(f32, f32)> {
    if u >= 0.0 && u <= (p.width - 1) as f32 && v >= 0.0 && v <= (p.height - 1) as f32 {
        Some((u, v))
    } else {
        None
    }
}

/// Maps one output pixel to its (sub-pixel) source position in the input
/// frame, or `None` when the pixel has no valid source.
pub fn map_output_pixel(p: &KernelParams, ox: u32, oy: u32) -> Option<(f32, f32)> {
    if p.projection == PROJECTION_ORIGINAL {
        let u = ox as f32 * p.width as f32 / p.output_width as f32;
        let v = oy as f32 * p.height as f32 / p.output_height as f32;
        return bounds_checked(p, u, v);
    }

    // Pane layouts carve the canvas into rectilinear sub-views with preset
    // pans; otherwise the whole canvas is one view with the configured PTZ.
    let (lx, ly, viewport_w, viewport_h, pan, tilt, zoom, rectilinear) = match p.pane_layout {
        PANE_TWO_HORIZONTAL => {
            let pane_w = p.output_width / 2;
            let idx = usize::from(ox >= pane_w);
            let lx = ox - idx as u32 * pane_w;
            (lx as f32, oy as f32, pane_w, p.output_height, TWO_PANE_PAN_DEG[idx].to_radians() as f32, 0.0, 1.0, true)
        }
        PANE_TWO_VERTICAL => {
            let pane_h = p.output_height / 2;
            let idx = usize::from(oy >= pane_h);
            let ly = oy - idx as u32 * pane_h;
            (ox as f32, ly as f32, p.output_width, pane_h, TWO_PANE_PAN_DEG[idx].to_radians() as f32, 0.0, 1.0, true)
        }
        PANE_FOUR => {
            let pane_w = p.output_width / 2;
            let pane_h = p.output_height / 2;
            let col = usize::from(ox >= pane_w);
            let row = usize::from(oy >= pane_h);
            let lx = ox - col as u32 * pane_w;
            let ly = oy - row as u32 * pane_h;
            let idx = row * 2 + col;
            (lx as f32, ly as f32, pane_w, pane_h, FOUR_PANE_PAN_DEG[idx].to_radians() as f32, 0.0, 1.0, true)
        }
        _ => {
            debug_assert_eq!(p.pane_layout, PANE_NONE);
            let rectilinear = p.projection != PROJECTION_EQUIRECTANGULAR && p.projection != PROJECTION_CYLINDRICAL;
            (ox as f32, oy as f32, p.output_width, p.output_height, p.pan, p.tilt, p.zoom.max(MIN_RADIUS), rectilinear)
        }
    };

    // Undistorted normalized-plane point for this output pixel.
    let (nx, ny) = if rectilinear {
        let nx = (lx - p.new_cx) / p.new_fx / zoom;
        let ny = (ly - p.new_cy) / p.new_fy / zoom;
        let (dx, dy, dz) = rotate_pan_tilt(nx, ny, 1.0, pan, tilt);
        if dz <= MIN_FORWARD_Z {
            return None;
        }
        (dx / dz, dy / dz)
    } else {
        let lon = (lx / viewport_w as f32 - 0.5) * 2.0 * std::f32::consts::PI;
        let lat = if p.projection == PROJECTION_CYLINDRICAL {
            let f_cyl = viewport_w as f32 / (2.0 * std::f32::consts::PI);
            ((ly - viewport_h as f32 / 2.0) / f_cyl).atan()
        } else {
            (ly / viewport_h as f32 - 0.5) * std::f32::consts::PI
        };
        let lon = lon / zoom + pan;
        let lat = lat / zoom + tilt;
        let (sl, cl) = lon.sin_cos();
        let (st, ct) = lat.sin_cos();
        let (dx, dy, dz) = (sl * ct, st, cl * ct);
        if dz <= MIN_FORWARD_Z {
            return None;
        }
        (dx / dz, dy / dz)
    };

    // Forward Kannala-Brandt distortion back into the fisheye image.
    let r = (nx * nx + ny * ny).sqrt();
    let theta = r.atan();
    let theta2 = theta * theta;
    let theta4 = theta2 * theta2;
    let theta6 = theta4 * theta2;
    let theta8 = theta4 * theta4;
    let theta_d = theta * (1.0 + p.k1 * theta2 + p.k2 * theta4 + p.k3 * theta6 + p.k4 * theta8);
    let scale = theta_d / r.max(MIN_RADIUS);
    let dx = nx * scale;
    let dy = ny * scale;

    let u = p.fx * (dx + p.alpha * dy) + p.cx;
    let v = p.fy * dy + p.cy;
    bounds_checked(p, u, v)
}

fn sample_bilinear(input: &[u8], width: u32, height: u32, u: f32, v: f32) -> [u8; 4] {
    let x0 = u.floor();
    let y0 = v.floor();
    let tx = u - x0;
    let ty = v - y0;
    let x0 = (x0 as u32).min(width - 1) as usize;
    let y0 = (y0 as u32).min(height - 1) as usize;
    let x1 = (x0 + 1).min(width as usize - 1);
    let y1 = (y0 + 1).min(height as usize - 1);

    let stride = width as usize * 4;
    let p00 = &input[y0 * stride + x0 * 4..][..4];
    let p10 = &input[y0 * stride + x1 * 4..][..4];
    let p01 = &input[y1 * stride + x0 * 4..][..4];
    let p11 = &input[y1 * stride + x1 * 4..][..4];

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - tx) + p10[c] as f32 * tx;
        let bottom = p01[c] as f32 * (1.0 - tx) + p11[c] as f32 * tx;
        out[c] = (top * (1.0 - ty) + bottom * ty).round() as u8;
    }
    out
}

/// Dewarps one RGBA frame. `input` must hold `width × height` tightly packed
/// RGBA pixels; the returned buffer is `output_width × output_height`.
pub fn dewarp_frame(params: &KernelParams, input: &[u8]) -> Vec<u8> {
    let out_stride = params.output_width as usize * 4;
    let mut output = vec![0u8; out_stride * params.output_height as usize];

    output
        .par_chunks_mut(out_stride)
        .enumerate()
        .for_each(|(oy, row)| {
            for ox in 0..params.output_width {
                let pixel = match map_output_pixel(params, ox, oy as u32) {
                    Some((u, v)) => sample_bilinear(input, params.width, params.height, u, v),
                    None => [0, 0, 0, 255],
                };
                row[ox as usize * 4..ox as usize * 4 + 4].copy_from_slice(&pixel);
            }
        });

    output
}
