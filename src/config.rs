// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration surface.
//!
//! Callers may pass either a flat parameter object or a grouped one (the
//! shape the original JS API accepted); both deserialize through
//! [`FisheyeOptions`] and normalize into the single canonical
//! [`FisheyeConfig`], so validation (ptz/pane exclusivity, dimension checks,
//! default principal point) lives in exactly one place.

use serde::Deserialize;

use crate::camera_model::{CameraMatrix, DistortionCoeffs};
use crate::FisheyeError;

/// User-supplied intrinsics. `cx`/`cy` default to half the *input* frame
/// size, which is unknown until the first frame arrives, hence the lazy
/// resolve.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    #[serde(default)]
    pub cx: Option<f64>,
    #[serde(default)]
    pub cy: Option<f64>,
    #[serde(default)]
    pub alpha: Option<f64>,
}

impl CameraIntrinsics {
    pub fn resolve(&self, input_size: (u32, u32)) -> CameraMatrix {
        CameraMatrix {
            fx: self.fx,
            fy: self.fy,
            cx: self.cx.unwrap_or(input_size.0 as f64 / 2.0),
            cy: self.cy.unwrap_or(input_size.1 as f64 / 2.0),
            alpha: self.alpha.unwrap_or(0.0),
        }
    }
}

/// Fallback when no intrinsics were configured at all: focal equal to the
/// frame width, principal point at the center.
pub fn default_camera_matrix(input_size: (u32, u32)) -> CameraMatrix {
    CameraMatrix {
        fx: input_size.0 as f64,
        fy: input_size.0 as f64,
        cx: input_size.0 as f64 / 2.0,
        cy: input_size.1 as f64 / 2.0,
        alpha: 0.0,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RectilinearFocal {
    /// Derive the new camera matrix from the calibration (balance/fov_scale).
    Auto,
    /// Caller-provided focal, given at input scale and rescaled to the
    /// output resolution. Principal point defaults to the output center.
    Manual {
        new_fx: f64,
        new_fy: f64,
        new_cx: Option<f64>,
        new_cy: Option<f64>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Rectilinear(RectilinearFocal),
    Equirectangular,
    Cylindrical,
    /// Pass-through: linear output→input scaling, no distortion correction.
    Original,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ptz {
    pub pan_deg: f64,
    pub tilt_deg: f64,
    pub zoom: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PaneLayout {
    TwoHorizontal,
    TwoVertical,
    Four,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    Ptz(Ptz),
    Pane(PaneLayout),
}

/// Fixed per-pane view directions (yaw presets, degrees). Policy constants,
/// not derived from the camera model.
/// Must be kept in sync with dewarp.wgsl.
pub(crate) const TWO_PANE_PAN_DEG: [f64; 2] = [-45.0, 45.0];
pub(crate) const FOUR_PANE_PAN_DEG: [f64; 4] = [-67.5, -22.5, 22.5, 67.5];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FisheyeConfig {
    pub camera: Option<CameraIntrinsics>,
    pub distortion: DistortionCoeffs,
    pub output_size: (u32, u32),
    pub balance: f64,
    pub fov_scale: f64,
    pub projection: Projection,
    pub mode: Option<Mode>,
}

impl Default for FisheyeConfig {
    fn default() -> Self {
        Self {
            camera: None,
            distortion: DistortionCoeffs::default(),
            output_size: (1280, 720),
            balance: 0.0,
            fov_scale: 1.0,
            projection: Projection::Rectilinear(RectilinearFocal::Auto),
            mode: None,
        }
    }
}

impl FisheyeConfig {
    pub fn validate(&self) -> Result<(), FisheyeError> {
        if self.output_size.0 == 0 || self.output_size.1 == 0 {
            return Err(FisheyeError::Config(format!(
                "output dimensions must be positive, got {}x{}",
                self.output_size.0, self.output_size.1
            )));
        }
        if self.fov_scale <= 0.0 {
            return Err(FisheyeError::Config(format!("fovScale must be positive, got {}", self.fov_scale)));
        }
        if let Some(Mode::Ptz(ptz)) = &self.mode {
            if ptz.zoom <= 0.0 {
                return Err(FisheyeError::Config(format!("zoom must be positive, got {}", ptz.zoom)));
            }
        }
        Ok(())
    }
}

/// What a config merge actually changed, so the orchestrator can decide
/// which GPU resources to tear down.
#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct UpdateEffects {
    pub output_size_changed: bool,
}

// ---------------------------------------------------------------------------
// External option shapes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum FisheyeOptions {
    Grouped(GroupedOptions),
    Flat(FlatOptions),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroupedOptions {
    #[serde(default)]
    pub k: Option<CameraIntrinsics>,
    #[serde(default)]
    pub d: Option<DistortionCoeffs>,
    #[serde(default)]
    pub size: Option<SizeOptions>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub fov_scale: Option<f64>,
    #[serde(default)]
    pub projection: Option<ProjectionOptions>,
    #[serde(default)]
    pub ptz: Option<PtzOptions>,
    #[serde(default)]
    pub pane: Option<PaneOptions>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeOptions {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProjectionOptions {
    #[serde(rename_all = "camelCase")]
    Rectilinear {
        #[serde(default)]
        new_fx: Option<f64>,
        #[serde(default)]
        new_fy: Option<f64>,
        #[serde(default)]
        new_cx: Option<f64>,
        #[serde(default)]
        new_cy: Option<f64>,
    },
    Equirectangular,
    Cylindrical,
    Original,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PtzOptions {
    #[serde(default)]
    pub pan: f64,
    #[serde(default)]
    pub tilt: f64,
    #[serde(default)]
    pub zoom: Option<f64>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PaneOptions {
    #[serde(rename_all = "camelCase")]
    TwoPane { orientation: PaneOrientation },
    FourPane,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum PaneOrientation {
    Horizontal,
    Vertical,
}

/// Flat parameter object: everything at the top level, as the original API's
/// convenience form.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FlatOptions {
    #[serde(default)]
    pub fx: Option<f64>,
    #[serde(default)]
    pub fy: Option<f64>,
    #[serde(default)]
    pub cx: Option<f64>,
    #[serde(default)]
    pub cy: Option<f64>,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub k1: Option<f64>,
    #[serde(default)]
    pub k2: Option<f64>,
    #[serde(default)]
    pub k3: Option<f64>,
    #[serde(default)]
    pub k4: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub fov_scale: Option<f64>,
    #[serde(default)]
    pub projection: Option<FlatProjection>,
    #[serde(default)]
    pub new_fx: Option<f64>,
    #[serde(default)]
    pub new_fy: Option<f64>,
    #[serde(default)]
    pub new_cx: Option<f64>,
    #[serde(default)]
    pub new_cy: Option<f64>,
    #[serde(default)]
    pub pan: Option<f64>,
    #[serde(default)]
    pub tilt: Option<f64>,
    #[serde(default)]
    pub zoom: Option<f64>,
    #[serde(default)]
    pub pane: Option<FlatPane>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FlatProjection {
    Rectilinear,
    Equirectangular,
    Cylindrical,
    Original,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FlatPane {
    TwoPaneHorizontal,
    TwoPaneVertical,
    FourPane,
}

impl FisheyeOptions {
    pub fn from_json(json: &str) -> Result<Self, FisheyeError> {
        serde_json::from_str(json).map_err(|e| FisheyeError::Config(format!("failed to parse options: {e}")))
    }

    pub fn into_config(self) -> Result<FisheyeConfig, FisheyeError> {
        let mut config = FisheyeConfig::default();
        self.apply_to(&mut config)?;
        Ok(config)
    }

    /// Merges these (partial) options into an existing config, validates the
    /// result and reports which resource-relevant fields changed. On error
    /// the config is left untouched.
    pub fn apply_to(self, config: &mut FisheyeConfig) -> Result<UpdateEffects, FisheyeError> {
        let mut next = *config;
        match self {
            FisheyeOptions::Grouped(g) => g.apply_to(&mut next)?,
            FisheyeOptions::Flat(f) => f.apply_to(&mut next)?,
        }
        next.validate()?;
        let effects = UpdateEffects { output_size_changed: next.output_size != config.output_size };
        *config = next;
        Ok(effects)
    }
}

impl GroupedOptions {
    fn apply_to(self, config: &mut FisheyeConfig) -> Result<(), FisheyeError> {
        if self.ptz.is_some() && self.pane.is_some() {
            return Err(FisheyeError::Config("ptz and pane are mutually exclusive".into()));
        }
        if let Some(k) = self.k {
            config.camera = Some(k);
        }
        if let Some(d) = self.d {
            config.distortion = d;
        }
        if let Some(size) = self.size {
            config.output_size = (size.width, size.height);
        }
        if let Some(balance) = self.balance {
            config.balance = balance.clamp(0.0, 1.0);
        }
        if let Some(fov_scale) = self.fov_scale {
            config.fov_scale = fov_scale;
        }
        if let Some(projection) = self.projection {
            config.projection = projection.normalize();
        }
        if let Some(ptz) = self.ptz {
            config.mode = Some(Mode::Ptz(Ptz {
                pan_deg: ptz.pan,
                tilt_deg: ptz.tilt,
                zoom: ptz.zoom.unwrap_or(1.0),
            }));
        }
        if let Some(pane) = self.pane {
            config.mode = Some(Mode::Pane(match pane {
                PaneOptions::TwoPane { orientation: PaneOrientation::Horizontal } => PaneLayout::TwoHorizontal,
                PaneOptions::TwoPane { orientation: PaneOrientation::Vertical } => PaneLayout::TwoVertical,
                PaneOptions::FourPane => PaneLayout::Four,
            }));
        }
        Ok(())
    }
}

impl ProjectionOptions {
    fn normalize(self) -> Projection {
        match self {
            ProjectionOptions::Rectilinear { new_fx: Some(fx), new_fy: Some(fy), new_cx, new_cy } => {
                Projection::Rectilinear(RectilinearFocal::Manual { new_fx: fx, new_fy: fy, new_cx, new_cy })
            }
            ProjectionOptions::Rectilinear { .. } => Projection::Rectilinear(RectilinearFocal::Auto),
            ProjectionOptions::Equirectangular => Projection::Equirectangular,
            ProjectionOptions::Cylindrical => Projection::Cylindrical,
            ProjectionOptions::Original => Projection::Original,
        }
    }
}

impl FlatOptions {
    fn apply_to(self, config: &mut FisheyeConfig) -> Result<(), FisheyeError> {
        let has_ptz = self.pan.is_some() || self.tilt.is_some() || self.zoom.is_some();
        if has_ptz && self.pane.is_some() {
            return Err(FisheyeError::Config("ptz and pane are mutually exclusive".into()));
        }

        let has_k = self.fx.is_some() || self.fy.is_some() || self.cx.is_some()
            || self.cy.is_some() || self.alpha.is_some();
        if has_k {
            let mut k = match config.camera {
                Some(k) => k,
                None => match (self.fx, self.fy) {
                    (Some(fx), Some(fy)) => CameraIntrinsics { fx, fy, cx: None, cy: None, alpha: None },
                    _ => return Err(FisheyeError::Config("fx and fy are required when setting intrinsics".into())),
                },
            };
            if let Some(fx) = self.fx { k.fx = fx; }
            if let Some(fy) = self.fy { k.fy = fy; }
            if self.cx.is_some() { k.cx = self.cx; }
            if self.cy.is_some() { k.cy = self.cy; }
            if self.alpha.is_some() { k.alpha = self.alpha; }
            config.camera = Some(k);
        }

        if let Some(k1) = self.k1 { config.distortion.k1 = k1; }
        if let Some(k2) = self.k2 { config.distortion.k2 = k2; }
        if let Some(k3) = self.k3 { config.distortion.k3 = k3; }
        if let Some(k4) = self.k4 { config.distortion.k4 = k4; }

        if let Some(w) = self.width { config.output_size.0 = w; }
        if let Some(h) = self.height { config.output_size.1 = h; }
        if let Some(balance) = self.balance { config.balance = balance.clamp(0.0, 1.0); }
        if let Some(fov_scale) = self.fov_scale { config.fov_scale = fov_scale; }

        if let Some(projection) = self.projection {
            config.projection = match projection {
                FlatProjection::Rectilinear => match (self.new_fx, self.new_fy) {
                    (Some(fx), Some(fy)) => Projection::Rectilinear(RectilinearFocal::Manual {
                        new_fx: fx,
                        new_fy: fy,
                        new_cx: self.new_cx,
                        new_cy: self.new_cy,
                    }),
                    _ => Projection::Rectilinear(RectilinearFocal::Auto),
                },
                FlatProjection::Equirectangular => Projection::Equirectangular,
                FlatProjection::Cylindrical => Projection::Cylindrical,
                FlatProjection::Original => Projection::Original,
            };
        }

        if has_ptz {
            config.mode = Some(Mode::Ptz(Ptz {
                pan_deg: self.pan.unwrap_or(0.0),
                tilt_deg: self.tilt.unwrap_or(0.0),
                zoom: self.zoom.unwrap_or(1.0),
            }));
        }
        if let Some(pane) = self.pane {
            config.mode = Some(Mode::Pane(match pane {
                FlatPane::TwoPaneHorizontal => PaneLayout::TwoHorizontal,
                FlatPane::TwoPaneVertical => PaneLayout::TwoVertical,
                FlatPane::FourPane => PaneLayout::Four,
            }));
        }
        Ok(())
    }
}
