use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// RTP clock rate for video (RFC 6184 §8.1).
pub const VIDEO_CLOCK_RATE: u64 = 90_000;

/// Running frame index shared by the fan-out and the PLAY handler.
///
/// The RTP timestamp of frame `n` is `n * 90000 / fps`, truncated to 32 bits.
#[derive(Debug, Clone)]
pub struct MediaClock {
    frame_index: Arc<AtomicU64>,
    fps: u32,
}

impl MediaClock {
    pub fn new(fps: u32) -> Self {
        Self {
            frame_index: Arc::new(AtomicU64::new(0)),
            fps: fps.max(1),
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Index of the frame that will be sent next.
    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::SeqCst)
    }

    /// Move to the next frame, returning the index that was current.
    pub fn advance(&self) -> u64 {
        self.frame_index.fetch_add(1, Ordering::SeqCst)
    }

    pub fn timestamp_for(&self, frame_index: u64) -> u32 {
        (frame_index.wrapping_mul(VIDEO_CLOCK_RATE) / self.fps as u64) as u32
    }

    /// Timestamp the next frame will carry (used for `RTP-Info`).
    pub fn current_timestamp(&self) -> u32 {
        self.timestamp_for(self.frame_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_follows_frame_index() {
        let clock = MediaClock::new(30);
        assert_eq!(clock.timestamp_for(0), 0);
        assert_eq!(clock.timestamp_for(1), 3000);
        assert_eq!(clock.timestamp_for(30), 90_000);
    }

    #[test]
    fn advance_returns_previous_index() {
        let clock = MediaClock::new(25);
        assert_eq!(clock.advance(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.frame_index(), 2);
        assert_eq!(clock.current_timestamp(), 7200);
    }

    #[test]
    fn clones_share_the_counter() {
        let clock = MediaClock::new(30);
        let other = clock.clone();
        clock.advance();
        assert_eq!(other.frame_index(), 1);
    }

    #[test]
    fn timestamp_wraps_at_32_bits() {
        let clock = MediaClock::new(1);
        let idx = (u32::MAX as u64 / VIDEO_CLOCK_RATE) + 1;
        assert_eq!(
            clock.timestamp_for(idx),
            (idx * VIDEO_CLOCK_RATE) as u32
        );
    }
}
