// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-frame kernel parameters and the plumbing that turns a validated
//! [`FisheyeConfig`] into them. The same `KernelParams` block drives both the
//! compute shader and the CPU reference path so their outputs stay in
//! lockstep.

pub mod cpu_dewarp;

use crate::camera_model::{
    estimate_new_camera_matrix, CameraMatrix, NewCameraMatrix, NewCameraMatrixKey,
};
use crate::config::{default_camera_matrix, FisheyeConfig, Mode, PaneLayout, Projection, RectilinearFocal};

pub const PROJECTION_RECTILINEAR: u32 = 0;
pub const PROJECTION_EQUIRECTANGULAR: u32 = 1;
pub const PROJECTION_CYLINDRICAL: u32 = 2;
pub const PROJECTION_ORIGINAL: u32 = 3;

pub const PANE_NONE: u32 = 0;
pub const PANE_TWO_HORIZONTAL: u32 = 1;
pub const PANE_TWO_VERTICAL: u32 = 2;
pub const PANE_FOUR: u32 = 3;

// Must be kept in sync with dewarp.wgsl
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq)]
pub struct KernelParams {
    pub width: u32,         // input width
    pub height: u32,        // input height
    pub output_width: u32,
    pub output_height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
    pub k4: f32,
    pub new_fx: f32,        // output projection matrix, in pane viewport pixels when panes are active
    pub new_fy: f32,
    pub new_cx: f32,
    pub new_cy: f32,
    pub alpha: f32,         // skew
    pub projection: u32,    // PROJECTION_*
    pub pane_layout: u32,   // PANE_*
    pub pan: f32,           // radians
    pub tilt: f32,          // radians
    pub zoom: f32,
    pub _padding: [f32; 2],
}
unsafe impl bytemuck::Zeroable for KernelParams {}
unsafe impl bytemuck::Pod for KernelParams {}

/// Size of one pane viewport. This is the output size the new camera matrix
/// is estimated for, so each pane gets the full rectilinear view.
pub fn pane_viewport(output_size: (u32, u32), mode: Option<&Mode>) -> (u32, u32) {
    match mode {
        Some(Mode::Pane(PaneLayout::TwoHorizontal)) => (output_size.0 / 2, output_size.1),
        Some(Mode::Pane(PaneLayout::TwoVertical)) => (output_size.0, output_size.1 / 2),
        Some(Mode::Pane(PaneLayout::Four)) => (output_size.0 / 2, output_size.1 / 2),
        _ => output_size,
    }
}

/// Builds `KernelParams` snapshots, memoizing the new-camera-matrix
/// estimation (the only expensive step) across frames. The cache key covers
/// every input that feeds the estimation, so any config or input-size change
/// naturally recomputes it.
#[derive(Default, Clone, Debug)]
pub struct ParamsBuilder {
    cache: Option<(NewCameraMatrixKey, NewCameraMatrix)>,
}

impl ParamsBuilder {
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    fn new_camera_matrix(
        &mut self,
        config: &FisheyeConfig,
        input_size: (u32, u32),
        viewport: (u32, u32),
        camera: &CameraMatrix,
    ) -> NewCameraMatrix {
        if let Projection::Rectilinear(RectilinearFocal::Manual { new_fx, new_fy, new_cx, new_cy }) =
            config.projection
        {
            // Manual focal is given at input scale; rescale per axis like the
            // estimated one. Principal point defaults to the viewport center.
            let rx = viewport.0 as f64 / input_size.0 as f64;
            let ry = viewport.1 as f64 / input_size.1 as f64;
            return NewCameraMatrix {
                new_fx: new_fx * rx,
                new_fy: new_fy * ry,
                new_cx: new_cx.map_or(viewport.0 as f64 / 2.0, |c| c * rx),
                new_cy: new_cy.map_or(viewport.1 as f64 / 2.0, |c| c * ry),
            };
        }

        let key = NewCameraMatrixKey {
            input_size,
            output_size: viewport,
            camera: *camera,
            distortion: config.distortion,
            balance: config.balance,
            fov_scale: config.fov_scale,
        };
        if let Some((cached_key, cached)) = &self.cache {
            if *cached_key == key {
                return *cached;
            }
        }
        let matrix = estimate_new_camera_matrix(
            input_size,
            viewport,
            camera,
            &config.distortion,
            config.balance,
            config.fov_scale,
        );
        self.cache = Some((key, matrix));
        matrix
    }

    /// Flattens a config into the uniform block for one frame size.
    pub fn build(&mut self, config: &FisheyeConfig, input_size: (u32, u32)) -> KernelParams {
        let camera = config
            .camera
            .map(|k| k.resolve(input_size))
            .unwrap_or_else(|| default_camera_matrix(input_size));

        let viewport = pane_viewport(config.output_size, config.mode.as_ref());
        // Only rectilinear rendering (full canvas or panes) consumes the
        // projection matrix; the panorama and pass-through kernels ignore it.
        let needs_matrix = matches!(config.projection, Projection::Rectilinear(_))
            || matches!(config.mode, Some(Mode::Pane(_)));
        let new_k = if needs_matrix {
            self.new_camera_matrix(config, input_size, viewport, &camera)
        } else {
            NewCameraMatrix { new_fx: 0.0, new_fy: 0.0, new_cx: 0.0, new_cy: 0.0 }
        };

        let projection = match config.projection {
            Projection::Rectilinear(_) => PROJECTION_RECTILINEAR,
            Projection::Equirectangular => PROJECTION_EQUIRECTANGULAR,
            Projection::Cylindrical => PROJECTION_CYLINDRICAL,
            Projection::Original => PROJECTION_ORIGINAL,
        };

        let (pane_layout, pan, tilt, zoom) = match &config.mode {
            Some(Mode::Ptz(ptz)) => (
                PANE_NONE,
                ptz.pan_deg.to_radians() as f32,
                ptz.tilt_deg.to_radians() as f32,
                ptz.zoom as f32,
            ),
            Some(Mode::Pane(layout)) => {
                let id = match layout {
                    PaneLayout::TwoHorizontal => PANE_TWO_HORIZONTAL,
                    PaneLayout::TwoVertical => PANE_TWO_VERTICAL,
                    PaneLayout::Four => PANE_FOUR,
                };
                (id, 0.0, 0.0, 1.0)
            }
            None => (PANE_NONE, 0.0, 0.0, 1.0),
        };

        KernelParams {
            width: input_size.0,
            height: input_size.1,
            output_width: config.output_size.0,
            output_height: config.output_size.1,
            fx: camera.fx as f32,
            fy: camera.fy as f32,
            cx: camera.cx as f32,
            cy: camera.cy as f32,
            k1: config.distortion.k1 as f32,
            k2: config.distortion.k2 as f32,
            k3: config.distortion.k3 as f32,
            k4: config.distortion.k4 as f32,
            new_fx: new_k.new_fx as f32,
            new_fy: new_k.new_fy as f32,
            new_cx: new_k.new_cx as f32,
            new_cy: new_k.new_cy as f32,
            alpha: camera.alpha as f32,
            projection,
            pane_layout,
            pan,
            tilt,
            zoom,
            _padding: [0.0; 2],
        }
    }
}

/// One-shot snapshot without the memoizing builder; the CPU path and tests
/// use this directly.
pub fn build_kernel_params(config: &FisheyeConfig, input_size: (u32, u32)) -> KernelParams {
    ParamsBuilder::default().build(config, input_size)
}
