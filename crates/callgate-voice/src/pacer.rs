//! Paced playback of reply audio toward the telephony leg
//!
//! The carrier expects one 160-byte μ-law frame every 20 ms, whether or not
//! there is anything to say. [`PlaybackQueue`] turns a bursty stream of
//! synthesized audio into exactly-sized frames (padding or filling with
//! silence), and [`PacerClock`] schedules the sends against a fixed
//! timeline so per-tick jitter does not accumulate.

use crate::codec::MULAW_SILENCE;
use crate::{FRAME_BYTES, FRAME_MS};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const FRAME_DURATION: Duration = Duration::from_millis(FRAME_MS as u64);
const MIN_DELAY: Duration = Duration::from_millis(1);
const MAX_DELAY: Duration = Duration::from_millis(2 * FRAME_MS as u64);

/// What a paced frame carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// A full frame of queued audio
    Audio,
    /// The queue tail, padded with silence
    Padded,
    /// Nothing queued
    Silence,
}

/// One outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacedFrame {
    pub payload: [u8; FRAME_BYTES],
    pub kind: FrameKind,
    /// Marks whose audio has now been fully sent, in queue order
    pub marks: Vec<String>,
}

/// FIFO of μ-law reply audio with positioned marks.
///
/// Never blocks; an empty queue produces silence.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    bytes: VecDeque<u8>,
    /// (absolute byte position, name); positions count from queue creation
    marks: VecDeque<(u64, String)>,
    enqueued: u64,
    consumed: u64,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append μ-law bytes.
    pub fn push(&mut self, mulaw: &[u8]) {
        self.bytes.extend(mulaw);
        self.enqueued += mulaw.len() as u64;
    }

    /// Place a named mark after everything queued so far.
    pub fn push_mark(&mut self, name: impl Into<String>) {
        self.marks.push_back((self.enqueued, name.into()));
    }

    /// Dequeue the next 160-byte frame.
    pub fn next_frame(&mut self) -> PacedFrame {
        let mut payload = [MULAW_SILENCE; FRAME_BYTES];
        let take = self.bytes.len().min(FRAME_BYTES);
        for (slot, byte) in payload.iter_mut().zip(self.bytes.drain(..take)) {
            *slot = byte;
        }
        self.consumed += take as u64;

        let kind = match take {
            FRAME_BYTES => FrameKind::Audio,
            0 => FrameKind::Silence,
            _ => FrameKind::Padded,
        };

        let mut marks = Vec::new();
        while let Some((position, _)) = self.marks.front() {
            if *position > self.consumed {
                break;
            }
            if let Some((_, name)) = self.marks.pop_front() {
                marks.push(name);
            }
        }

        PacedFrame { payload, kind, marks }
    }

    /// Drop all queued audio and pending marks; returns the number of bytes dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.bytes.len();
        self.bytes.clear();
        self.marks.clear();
        self.enqueued = self.consumed;
        dropped
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn pending_marks(&self) -> usize {
        self.marks.len()
    }
}

/// Drift-correcting schedule for the 20 ms send loop.
///
/// Frame `n` is due at `start + n × 20 ms`. After each send the clock
/// returns the delay to the next due time, clamped to [1 ms, 40 ms], so a
/// late tick is followed by a shorter wait and an early one by a longer wait.
#[derive(Debug, Clone)]
pub struct PacerClock {
    start: Instant,
    frames_sent: u32,
}

impl PacerClock {
    pub fn new(start: Instant) -> Self {
        Self { start, frames_sent: 0 }
    }

    /// Record that a frame was sent at `now` and return how long to wait
    /// before sending the next one.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        let expected = self.start + FRAME_DURATION * self.frames_sent;
        self.frames_sent = self.frames_sent.saturating_add(1);
        let target = expected + FRAME_DURATION;
        target
            .checked_duration_since(now)
            .unwrap_or(Duration::ZERO)
            .clamp(MIN_DELAY, MAX_DELAY)
    }

    /// Same as [`next_delay`](Self::next_delay), as an absolute deadline.
    pub fn next_deadline(&mut self, now: Instant) -> Instant {
        now + self.next_delay(now)
    }

    pub fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    pub fn start(&self) -> Instant {
        self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- queue --------------------------------------------------------------

    #[test]
    fn fifty_underrun_ticks_are_all_silence() {
        let mut queue = PlaybackQueue::new();
        for _ in 0..50 {
            let frame = queue.next_frame();
            assert_eq!(frame.kind, FrameKind::Silence);
            assert!(frame.payload.iter().all(|&b| b == 0xFF));
            assert!(frame.marks.is_empty());
        }
    }

    #[test]
    fn full_frames_dequeue_exactly_160_bytes() {
        let mut queue = PlaybackQueue::new();
        let audio: Vec<u8> = (0..400u32).map(|i| (i % 200) as u8).collect();
        queue.push(&audio);

        let first = queue.next_frame();
        assert_eq!(first.kind, FrameKind::Audio);
        assert_eq!(&first.payload[..], &audio[..160]);

        let second = queue.next_frame();
        assert_eq!(second.kind, FrameKind::Audio);
        assert_eq!(&second.payload[..], &audio[160..320]);

        let third = queue.next_frame();
        assert_eq!(third.kind, FrameKind::Padded);
        assert_eq!(&third.payload[..80], &audio[320..]);
        assert!(third.payload[80..].iter().all(|&b| b == MULAW_SILENCE));
        assert!(queue.is_empty());

        assert_eq!(queue.next_frame().kind, FrameKind::Silence);
    }

    #[test]
    fn mark_reported_after_its_audio_is_sent() {
        let mut queue = PlaybackQueue::new();
        queue.push(&[0x10; 200]);
        queue.push_mark("reply-1");
        queue.push(&[0x20; 160]);

        assert!(queue.next_frame().marks.is_empty());
        // bytes 160..320 include the mark position (200)
        assert_eq!(queue.next_frame().marks, vec!["reply-1".to_string()]);
        assert!(queue.next_frame().marks.is_empty());
        assert_eq!(queue.pending_marks(), 0);
    }

    #[test]
    fn mark_on_empty_queue_fires_on_next_tick() {
        let mut queue = PlaybackQueue::new();
        queue.push_mark("idle");
        let frame = queue.next_frame();
        assert_eq!(frame.kind, FrameKind::Silence);
        assert_eq!(frame.marks, vec!["idle".to_string()]);
    }

    #[test]
    fn clear_drops_audio_and_marks() {
        let mut queue = PlaybackQueue::new();
        queue.push(&[0x30; 500]);
        queue.push_mark("lost");
        queue.next_frame();

        assert_eq!(queue.clear(), 340);
        assert!(queue.is_empty());
        assert_eq!(queue.pending_marks(), 0);

        let frame = queue.next_frame();
        assert_eq!(frame.kind, FrameKind::Silence);
        assert!(frame.marks.is_empty());

        // positions stay consistent after a clear
        queue.push(&[0x40; 160]);
        queue.push_mark("after");
        assert_eq!(queue.next_frame().marks, vec!["after".to_string()]);
    }

    // ---- clock --------------------------------------------------------------

    #[test]
    fn on_time_ticks_wait_one_frame() {
        let start = Instant::now();
        let mut clock = PacerClock::new(start);
        let mut now = start;
        for _ in 0..10 {
            let delay = clock.next_delay(now);
            assert_eq!(delay, FRAME_DURATION);
            now += delay;
        }
        assert_eq!(clock.frames_sent(), 10);
    }

    #[test]
    fn late_tick_is_followed_by_shorter_wait() {
        let start = Instant::now();
        let mut clock = PacerClock::new(start);
        assert_eq!(clock.next_delay(start + Duration::from_millis(7)), Duration::from_millis(13));
    }

    #[test]
    fn delay_is_clamped() {
        let start = Instant::now();
        let mut clock = PacerClock::new(start);
        // far behind schedule
        assert_eq!(clock.next_delay(start + Duration::from_millis(500)), MIN_DELAY);

        let mut clock = PacerClock::new(start + Duration::from_millis(100));
        // woke long before the timeline began
        assert_eq!(clock.next_delay(start), MAX_DELAY);
    }

    #[test]
    fn cadence_stays_bounded_over_jittered_ticks() {
        let start = Instant::now();
        let mut clock = PacerClock::new(start);
        let mut now = start;
        let mut seed: u32 = 0x2545_F491;

        for n in 0..1000u32 {
            let ideal = start + FRAME_DURATION * n;
            let error = if now > ideal { now - ideal } else { ideal - now };
            assert!(error < Duration::from_millis(40), "frame {n} off by {error:?}");

            let delay = clock.next_delay(now);
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let oversleep = Duration::from_millis(((seed >> 16) % 9) as u64);
            now += delay + oversleep;
        }

        let elapsed = now - start;
        assert!(elapsed >= Duration::from_millis(20_000));
        assert!(elapsed <= Duration::from_millis(20_008));
    }

    #[test]
    fn recovers_from_a_stall() {
        let start = Instant::now();
        let mut clock = PacerClock::new(start);
        let mut now = start;
        for _ in 0..5 {
            now += clock.next_delay(now);
        }
        // 95 ms stall
        now += Duration::from_millis(95);
        let mut waits = Vec::new();
        for _ in 0..8 {
            let delay = clock.next_delay(now);
            waits.push(delay);
            now += delay;
        }
        assert_eq!(waits[0], MIN_DELAY);
        assert_eq!(*waits.last().unwrap(), FRAME_DURATION);
        let ideal = start + FRAME_DURATION * clock.frames_sent();
        assert_eq!(now, ideal);
    }
}
