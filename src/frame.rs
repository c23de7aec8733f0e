// SPDX-License-Identifier: GPL-3.0-or-later

use crate::FisheyeError;

/// A raw RGBA8 video frame. The crate only uploads/downloads these bytes;
/// converting from planar YUV layouts is the caller's job.
#[derive(Clone, Debug, Default)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_us: i64,
}

impl VideoFrame {
    pub fn rgba(data: Vec<u8>, width: u32, height: u32, timestamp_us: i64) -> Result<Self, FisheyeError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(FisheyeError::BufferSize { expected, got: data.len() });
        }
        Ok(Self { data, width, height, timestamp_us })
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_size() {
        assert!(VideoFrame::rgba(vec![0; 16], 2, 2, 0).is_ok());
        assert!(matches!(
            VideoFrame::rgba(vec![0; 15], 2, 2, 0),
            Err(FisheyeError::BufferSize { expected: 16, got: 15 })
        ));
    }
}
