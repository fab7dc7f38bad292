use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Process-wide frame counters for the video stream.
#[derive(Default)]
pub struct Meter {
    streamed_frames: AtomicU64,
    skipped_frames: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            streamed_frames: AtomicU64::new(0),
            skipped_frames: AtomicU64::new(0),
        }
    }

    pub fn tick_streamed(&self) {
        self.streamed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped(&self) {
        self.skipped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_streamed(&self) -> u64 {
        self.streamed_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_skipped(&self) -> u64 {
        self.skipped_frames.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let streamed = METER.get_reset_streamed();
            let skipped = METER.get_reset_skipped();
            let elapsed = start.elapsed().as_secs_f32();

            if streamed > 0 {
                log::info!("Streamed frames per second: {:.2}", streamed as f32 / elapsed);
            }
            if skipped > 0 {
                log::warn!("Skipped {skipped} frames in the last {elapsed:.1}s");
            }
        }
    })
}
