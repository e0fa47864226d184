//! Latest-frame handoff from the acquisition thread to the display
//!
//! Lossy by design: a frame nobody read before the next publish is simply
//! replaced. Readers always get a whole frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::capture::Frame;

pub struct FramePublisher {
    latest: ArcSwap<Frame>,
    published: AtomicU64,
}

impl Default for FramePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePublisher {
    /// Starts out holding [`Frame::placeholder`].
    pub fn new() -> Self {
        Self {
            latest: ArcSwap::from_pointee(Frame::placeholder()),
            published: AtomicU64::new(0),
        }
    }

    /// Producer: replace the latest frame.
    pub fn publish(&self, frame: Frame) {
        self.latest.store(Arc::new(frame));
        self.published.fetch_add(1, Ordering::Release);
    }

    /// Consumer: current frame. Never blocks.
    pub fn latest(&self) -> Arc<Frame> {
        self.latest.load_full()
    }

    /// Number of frames published so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn placeholder_before_first_publish() {
        let publisher = FramePublisher::new();
        assert_eq!(publisher.latest().sequence, 0);
        assert_eq!(publisher.latest().width(), 255);
        assert_eq!(publisher.published(), 0);
    }

    #[test]
    fn repeated_reads_return_the_same_frame() {
        let publisher = FramePublisher::new();
        publisher.publish(Frame::new(vec![1u16; 6], 3, 1).unwrap());
        let first = publisher.latest();
        let second = publisher.latest();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn newer_frame_supersedes_older() {
        let publisher = FramePublisher::new();
        publisher.publish(Frame::new(vec![1u16; 6], 3, 1).unwrap());
        publisher.publish(Frame::new(vec![2u16; 8], 4, 2).unwrap());
        let latest = publisher.latest();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.width(), 4);
        assert_eq!(publisher.published(), 2);
    }

    #[test]
    fn concurrent_readers_never_see_torn_frames() {
        let publisher = Arc::new(FramePublisher::new());
        let writer = {
            let publisher = Arc::clone(&publisher);
            thread::spawn(move || {
                for seq in 1..=500u64 {
                    let value = (seq % 1000) as u16;
                    publisher.publish(Frame::new(vec![value; 64], 8, seq).unwrap());
                }
            })
        };

        for _ in 0..2_000 {
            let frame = publisher.latest();
            if frame.sequence == 0 {
                continue;
            }
            let first = frame.pixels()[0];
            assert!(frame.pixels().iter().all(|s| *s == first));
            assert_eq!(u64::from(first), frame.sequence % 1000);
        }

        writer.join().unwrap();
        assert_eq!(publisher.latest().sequence, 500);
    }
}
