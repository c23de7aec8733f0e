// SPDX-License-Identifier: GPL-3.0-or-later

//! Fisheye dewarping core: Kannala-Brandt camera model, OpenCV-compatible
//! new-camera-matrix estimation and a wgpu compute resampling pipeline with a
//! CPU reference path.
//!
//! ```no_run
//! use fisheye_core::{Fisheye, FisheyeOptions, VideoFrame};
//!
//! # fn main() -> Result<(), fisheye_core::FisheyeError> {
//! let options = FisheyeOptions::from_json(r#"{
//!     "k": { "fx": 991.0, "fy": 991.0 },
//!     "d": { "k1": 0.0356, "k2": -0.0259, "k3": 0.0056, "k4": -0.0011 },
//!     "size": { "width": 1280, "height": 720 }
//! }"#)?;
//! let mut fisheye = Fisheye::from_options(options)?;
//! let frame = VideoFrame::rgba(vec![0; 3264 * 3264 * 4], 3264, 3264, 0)?;
//! let corrected = fisheye.undistort(&frame)?;
//! # Ok(()) }
//! ```

pub mod camera_model;
pub mod config;
pub mod dewarping;
pub mod error;
pub mod frame;
pub mod gpu;

pub use config::{FisheyeConfig, FisheyeOptions, Mode, PaneLayout, Projection, Ptz, RectilinearFocal};
pub use error::FisheyeError;
pub use frame::VideoFrame;

use dewarping::ParamsBuilder;
use gpu::wgpu::WgpuDewarper;

enum State {
    Uninitialized,
    Ready(WgpuDewarper),
    Destroyed,
}

/// Dewarping session. Methods are not internally synchronized; callers must
/// serialize access to one instance. Independent instances only share the
/// process-wide adapter cache.
pub struct Fisheye {
    config: FisheyeConfig,
    params: ParamsBuilder,
    state: State,
}

impl Fisheye {
    pub fn new() -> Self {
        Self {
            config: FisheyeConfig::default(),
            params: ParamsBuilder::default(),
            state: State::Uninitialized,
        }
    }

    pub fn from_options(options: FisheyeOptions) -> Result<Self, FisheyeError> {
        Ok(Self {
            config: options.into_config()?,
            params: ParamsBuilder::default(),
            state: State::Uninitialized,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, FisheyeError> {
        Self::from_options(FisheyeOptions::from_json(json)?)
    }

    pub fn config(&self) -> &FisheyeConfig {
        &self.config
    }

    /// Merges a (partial) option object into the current config. Output-side
    /// GPU resources are released only when the output size actually changed;
    /// everything else is picked up by the next frame's uniform snapshot.
    pub fn update_config(&mut self, options: FisheyeOptions) -> Result<(), FisheyeError> {
        if matches!(self.state, State::Destroyed) {
            return Err(FisheyeError::Destroyed);
        }
        let effects = options.apply_to(&mut self.config)?;
        self.params.invalidate();
        if effects.output_size_changed {
            if let State::Ready(dewarper) = &mut self.state {
                dewarper.release_output();
            }
        }
        Ok(())
    }

    /// Dewarps one frame on the GPU, initializing the device and pipeline on
    /// first use. Due to the double-buffered readback, the returned pixels
    /// may belong to the previous frame in steady state; the timestamp of the
    /// input frame is carried through either way.
    pub fn undistort(&mut self, frame: &VideoFrame) -> Result<VideoFrame, FisheyeError> {
        if matches!(self.state, State::Destroyed) {
            return Err(FisheyeError::Destroyed);
        }
        check_frame_dims(frame)?;
        if matches!(self.state, State::Uninitialized) {
            self.config.validate()?;
            self.state = State::Ready(WgpuDewarper::new()?);
            log::info!("GPU backend initialized");
        }
        let params = self.params.build(&self.config, (frame.width, frame.height));
        let State::Ready(dewarper) = &mut self.state else {
            return Err(FisheyeError::Internal("backend not initialized".into()));
        };
        dewarper.process(&params, frame)
    }

    /// Dewarps one frame with the CPU kernel. Does not touch the GPU, so it
    /// also works where no adapter is available; it is not an automatic
    /// fallback for [`undistort`](Self::undistort).
    pub fn undistort_cpu(&mut self, frame: &VideoFrame) -> Result<VideoFrame, FisheyeError> {
        if matches!(self.state, State::Destroyed) {
            return Err(FisheyeError::Destroyed);
        }
        check_frame_dims(frame)?;
        self.config.validate()?;
        let params = self.params.build(&self.config, (frame.width, frame.height));
        let data = dewarping::cpu_dewarp::dewarp_frame(&params, &frame.data);
        Ok(VideoFrame {
            data,
            width: params.output_width,
            height: params.output_height,
            timestamp_us: frame.timestamp_us,
        })
    }

    /// Releases the GPU handles. Terminal: every later call on this instance
    /// fails with [`FisheyeError::Destroyed`].
    pub fn destroy(&mut self) {
        if !matches!(self.state, State::Destroyed) {
            log::info!("destroying fisheye instance");
        }
        self.state = State::Destroyed;
    }
}

impl Default for Fisheye {
    fn default() -> Self {
        Self::new()
    }
}

fn check_frame_dims(frame: &VideoFrame) -> Result<(), FisheyeError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(FisheyeError::Config(format!(
            "input frame dimensions must be positive, got {}x{}",
            frame.width, frame.height
        )));
    }
    let expected = VideoFrame::byte_len(frame.width, frame.height);
    if frame.data.len() != expected {
        return Err(FisheyeError::BufferSize { expected, got: frame.data.len() });
    }
    Ok(())
}
