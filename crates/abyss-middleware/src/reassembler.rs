//! Multi-datagram image reassembly.
//!
//! Camera frames are too large for one datagram, so the vehicle splits each
//! base64 frame into chunks that share a `frame_id`.  UDP may drop, repeat
//! or reorder them.  [`ImageReassembler`] keeps one slot buffer per frame:
//!
//! ```text
//!   collecting ──(all slots filled)──▶ complete (returned, buffer removed)
//!       │
//!       └──(frame_id < highest completed − window)──▶ evicted
//! ```
//!
//! Output depends only on the set of chunks received, never on their arrival
//! order.  Re-delivered chunks are ignored.
//!
//! # Example
//!
//! ```rust
//! use abyss_middleware::reassembler::ImageReassembler;
//! use abyss_types::ImageChunk;
//!
//! let mut r = ImageReassembler::new();
//! let chunk = |i: u32, d: &str| ImageChunk {
//!     frame_id: 7, chunk_index: i, total_chunks: 2, data: d.to_string(),
//! };
//! assert!(r.offer(chunk(1, "CD")).unwrap().is_none());
//! let frame = r.offer(chunk(0, "AB")).unwrap().unwrap();
//! assert_eq!(frame.data, "ABCD");
//! assert!(!r.is_pending(7));
//! ```

use std::collections::HashMap;

use abyss_types::{AssembledFrame, DecodeError, ImageChunk};
use tracing::{debug, warn};

use crate::codec::MAX_TOTAL_CHUNKS;

/// Frames more than this many ids behind the newest completed frame are
/// purged.
pub const DEFAULT_STALE_WINDOW: u64 = 10;

struct FrameBuffer {
    slots: Vec<Option<String>>,
    filled: usize,
}

impl FrameBuffer {
    fn new(total_chunks: usize) -> Self {
        Self {
            slots: vec![None; total_chunks],
            filled: 0,
        }
    }

    /// Returns `false` when the slot was already filled.
    fn fill(&mut self, index: usize, data: String) -> bool {
        let slot = &mut self.slots[index];
        if slot.is_some() {
            return false;
        }
        *slot = Some(data);
        self.filled += 1;
        true
    }

    fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    fn assemble(self) -> String {
        self.slots.into_iter().flatten().collect()
    }
}

/// Accumulates [`ImageChunk`]s into [`AssembledFrame`]s, per `frame_id`.
pub struct ImageReassembler {
    buffers: HashMap<u64, FrameBuffer>,
    highest_completed: Option<u64>,
    stale_window: u64,
}

impl Default for ImageReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageReassembler {
    /// Create a reassembler with the default staleness window.
    pub fn new() -> Self {
        Self::with_stale_window(DEFAULT_STALE_WINDOW)
    }

    /// Create a reassembler that purges partial frames more than `window`
    /// ids behind the newest completed frame.
    pub fn with_stale_window(window: u64) -> Self {
        Self {
            buffers: HashMap::new(),
            highest_completed: None,
            stale_window: window,
        }
    }

    /// Feed one chunk.
    ///
    /// The slot count for a frame is fixed by the first chunk seen for it;
    /// later chunks that disagree on `total_chunks` are accepted when their
    /// index still fits.  Returns the assembled frame when this chunk filled
    /// the last empty slot.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Malformed`] when `total_chunks` exceeds
    /// [`MAX_TOTAL_CHUNKS`], and [`DecodeError::ChunkOutOfRange`] when the
    /// index does not fit the frame's slot count.  Nothing is allocated in
    /// either case.
    pub fn offer(&mut self, chunk: ImageChunk) -> Result<Option<AssembledFrame>, DecodeError> {
        let ImageChunk {
            frame_id,
            chunk_index,
            total_chunks,
            data,
        } = chunk;

        if total_chunks > MAX_TOTAL_CHUNKS {
            return Err(DecodeError::Malformed {
                kind: "image_chunk",
                reason: format!("total_chunks {total_chunks} exceeds limit {MAX_TOTAL_CHUNKS}"),
            });
        }
        let slots = self
            .buffers
            .get(&frame_id)
            .map_or(total_chunks as usize, |b| b.slots.len());
        if chunk_index as usize >= slots {
            return Err(DecodeError::ChunkOutOfRange {
                frame_id,
                chunk_index,
                total_chunks: u32::try_from(slots).unwrap_or(u32::MAX),
            });
        }
        if slots != total_chunks as usize {
            warn!(
                frame_id,
                expected = slots,
                got = total_chunks,
                "chunk disagrees on total_chunks; keeping first-seen count"
            );
        }

        let buffer = self
            .buffers
            .entry(frame_id)
            .or_insert_with(|| FrameBuffer::new(slots));
        if !buffer.fill(chunk_index as usize, data) {
            debug!(frame_id, chunk_index, "duplicate chunk ignored");
            return Ok(None);
        }
        if !buffer.is_complete() {
            return Ok(None);
        }

        let Some(buffer) = self.buffers.remove(&frame_id) else {
            return Ok(None);
        };
        let frame = AssembledFrame {
            frame_id,
            data: buffer.assemble(),
        };
        let highest = self.highest_completed.map_or(frame_id, |h| h.max(frame_id));
        self.highest_completed = Some(highest);
        self.purge_stale(highest);

        debug!(frame_id, bytes = frame.data.len(), "frame assembled");
        Ok(Some(frame))
    }

    fn purge_stale(&mut self, highest: u64) {
        let floor = highest.saturating_sub(self.stale_window);
        let before = self.buffers.len();
        self.buffers.retain(|&id, _| id >= floor);
        let purged = before - self.buffers.len();
        if purged > 0 {
            debug!(purged, floor, "evicted stale partial frames");
        }
    }

    /// Number of frames still collecting chunks.
    pub fn pending_frames(&self) -> usize {
        self.buffers.len()
    }

    /// True while a buffer exists for `frame_id`.
    pub fn is_pending(&self, frame_id: u64) -> bool {
        self.buffers.contains_key(&frame_id)
    }

    /// Highest frame id ever completed.
    pub fn highest_completed(&self) -> Option<u64> {
        self.highest_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(frame_id: u64, chunk_index: u32, total_chunks: u32, data: &str) -> ImageChunk {
        ImageChunk {
            frame_id,
            chunk_index,
            total_chunks,
            data: data.to_string(),
        }
    }

    #[test]
    fn out_of_order_chunks_assemble_in_index_order() {
        let mut r = ImageReassembler::new();
        assert!(r.offer(chunk(7, 2, 3, "CC")).unwrap().is_none());
        assert!(r.offer(chunk(7, 0, 3, "AA")).unwrap().is_none());
        let frame = r.offer(chunk(7, 1, 3, "BB")).unwrap().expect("frame 7 complete");
        assert_eq!(frame.frame_id, 7);
        assert_eq!(frame.data, "AABBCC");
        assert!(!r.is_pending(7));
        assert_eq!(r.pending_frames(), 0);
    }

    #[test]
    fn every_permutation_yields_identical_output() {
        let parts = ["p0", "p1", "p2", "p3"];
        let orders = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [0, 2, 1, 3],
            [3, 0, 2, 1],
        ];
        for order in orders {
            let mut r = ImageReassembler::new();
            let mut result = None;
            for i in order {
                if let Some(f) = r.offer(chunk(1, i, 4, parts[i as usize])).unwrap() {
                    result = Some(f);
                }
            }
            assert_eq!(result.expect("complete").data, "p0p1p2p3", "order {order:?}");
        }
    }

    #[test]
    fn duplicate_chunks_are_idempotent() {
        let mut r = ImageReassembler::new();
        assert!(r.offer(chunk(2, 0, 2, "AA")).unwrap().is_none());
        assert!(r.offer(chunk(2, 0, 2, "AA")).unwrap().is_none());
        let frame = r.offer(chunk(2, 1, 2, "BB")).unwrap().unwrap();
        assert_eq!(frame.data, "AABB");
    }

    #[test]
    fn single_chunk_frame_completes_immediately() {
        let mut r = ImageReassembler::new();
        let frame = r.offer(chunk(4, 0, 1, "ONLY")).unwrap().unwrap();
        assert_eq!(frame.data, "ONLY");
        assert_eq!(r.highest_completed(), Some(4));
    }

    #[test]
    fn stale_partial_frame_is_evicted() {
        let mut r = ImageReassembler::new();
        // Frame 5: one of four chunks.
        assert!(r.offer(chunk(5, 0, 4, "x")).unwrap().is_none());
        assert!(r.is_pending(5));
        // Frame 16 completes.
        assert!(r.offer(chunk(16, 0, 1, "done")).unwrap().is_some());
        assert!(!r.is_pending(5), "frame 5 is more than 10 behind 16");
    }

    #[test]
    fn partial_frame_inside_window_survives() {
        let mut r = ImageReassembler::new();
        r.offer(chunk(6, 0, 2, "x")).unwrap();
        r.offer(chunk(16, 0, 1, "done")).unwrap();
        // 16 - 10 = 6, so frame 6 is exactly at the boundary and kept.
        assert!(r.is_pending(6));
        r.offer(chunk(17, 0, 1, "done")).unwrap();
        assert!(!r.is_pending(6));
    }

    #[test]
    fn no_buffer_below_window_after_completion() {
        let mut r = ImageReassembler::new();
        for id in 0..30u64 {
            r.offer(chunk(id, 0, 3, "x")).unwrap();
        }
        r.offer(chunk(40, 0, 1, "y")).unwrap();
        for id in 0..30u64 {
            assert!(!r.is_pending(id), "frame {id} should have been purged");
        }
    }

    #[test]
    fn highest_completed_never_moves_backwards() {
        let mut r = ImageReassembler::new();
        r.offer(chunk(50, 0, 1, "a")).unwrap();
        r.offer(chunk(20, 0, 1, "b")).unwrap();
        assert_eq!(r.highest_completed(), Some(50));
    }

    #[test]
    fn first_seen_total_wins() {
        let mut r = ImageReassembler::new();
        r.offer(chunk(3, 0, 2, "A")).unwrap();
        // Disagreeing total, index still fits the first-seen two slots.
        let frame = r.offer(chunk(3, 1, 5, "B")).unwrap().unwrap();
        assert_eq!(frame.data, "AB");
    }

    #[test]
    fn out_of_range_chunk_allocates_nothing() {
        let mut r = ImageReassembler::new();
        assert!(matches!(
            r.offer(chunk(9, 4, 2, "x")),
            Err(DecodeError::ChunkOutOfRange { frame_id: 9, .. })
        ));
        assert!(matches!(r.offer(chunk(9, 0, 0, "x")), Err(DecodeError::ChunkOutOfRange { .. })));
        assert_eq!(r.pending_frames(), 0);
    }

    #[test]
    fn oversized_frame_allocates_nothing() {
        let mut r = ImageReassembler::new();
        assert!(matches!(
            r.offer(chunk(1, 0, u32::MAX, "x")),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(r.offer(chunk(2, 0, MAX_TOTAL_CHUNKS + 1, "x")).is_err());
        assert_eq!(r.pending_frames(), 0);

        // A frame at the limit is still buffered.
        assert!(r.offer(chunk(3, 0, MAX_TOTAL_CHUNKS, "x")).unwrap().is_none());
        assert!(r.is_pending(3));
    }

    #[test]
    fn custom_window_is_respected() {
        let mut r = ImageReassembler::with_stale_window(2);
        r.offer(chunk(1, 0, 2, "x")).unwrap();
        r.offer(chunk(4, 0, 1, "y")).unwrap();
        assert!(!r.is_pending(1));
    }
}
