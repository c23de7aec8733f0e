// SPDX-License-Identifier: GPL-3.0-or-later

pub mod wgpu;

/// Bytes per padded output row. Texture-to-buffer copies require
/// `COPY_BYTES_PER_ROW_ALIGNMENT`-aligned rows, so readback goes through a
/// padded staging layout and is re-packed on the CPU.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let align = ::wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let unpadded = width * 4;
    unpadded + (align - unpadded % align) % align
}

/// Role bookkeeping for the two readback buffers.
///
/// Each frame's copy lands in the write slot while the CPU maps the other
/// slot, which holds the previous frame. Until that slot has been filled once
/// (the first frame, or right after a resize) the just-written slot is read
/// instead. The one-frame latency in the steady state is deliberate: it keeps
/// the map wait off the critical path of the next submission.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReadbackRing {
    write_slot: usize,
    filled: [bool; 2],
}

impl ReadbackRing {
    /// Slot the current frame's copy should target.
    pub fn write_slot(&self) -> usize {
        self.write_slot
    }

    /// Slot to map after submitting, then advances the ring.
    pub fn commit(&mut self) -> usize {
        let write = self.write_slot;
        let other = 1 - write;
        self.filled[write] = true;
        let read = if self.filled[other] { other } else { write };
        self.write_slot = other;
        read
    }

    /// Forgets buffer contents, e.g. after the buffers were reallocated.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_table() {
        for (width, padded) in [
            (1, 256),
            (64, 256),
            (65, 512),
            (100, 512),
            (255, 1024),
            (256, 1024),
            (257, 1280),
            (1920, 7680),
            (1921, 7936),
        ] {
            assert_eq!(padded_bytes_per_row(width), padded, "width {width}");
        }
    }

    #[test]
    fn first_frame_reads_its_own_slot() {
        let mut ring = ReadbackRing::default();
        let write = ring.write_slot();
        assert_eq!(ring.commit(), write);
    }

    #[test]
    fn steady_state_reads_previous_frame_slot() {
        let mut ring = ReadbackRing::default();
        ring.commit();
        // From the second frame on, the mapped slot is the one written the
        // frame before.
        let write = ring.write_slot();
        assert_eq!(ring.commit(), 1 - write);
        let write = ring.write_slot();
        assert_eq!(ring.commit(), 1 - write);
    }

    #[test]
    fn slots_alternate_every_frame() {
        let mut ring = ReadbackRing::default();
        let first = ring.write_slot();
        ring.commit();
        assert_eq!(ring.write_slot(), 1 - first);
        ring.commit();
        assert_eq!(ring.write_slot(), first);
    }

    #[test]
    fn reset_forgets_previous_contents() {
        let mut ring = ReadbackRing::default();
        ring.commit();
        ring.commit();
        ring.reset();
        let write = ring.write_slot();
        assert_eq!(ring.commit(), write);
    }
}
