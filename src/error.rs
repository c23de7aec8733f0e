// SPDX-License-Identifier: GPL-3.0-or-later

#[derive(thiserror::Error, Debug)]
pub enum FisheyeError {
    #[error("No compatible GPU adapter available")]
    NoAdapter,
    #[error("Failed to acquire GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Fisheye instance was destroyed")]
    Destroyed,
    #[error("Frame buffer size mismatch: expected {expected} bytes, got {got}")]
    BufferSize { expected: usize, got: usize },
    #[error("GPU readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    #[error("Internal GPU state error: {0}")]
    Internal(String),
}
