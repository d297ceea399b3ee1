use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

/// Where the clock uniform's value comes from.
pub trait TimeSource: Send {
    /// Milliseconds elapsed since the source started.
    fn now_ms(&mut self) -> f64;
}

/// Monotonic wall clock, started when the source is created.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&mut self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Always reports the same timestamp; used for still renders and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    millis: f64,
}

impl FixedTimeSource {
    pub fn new(millis: f64) -> Self {
        Self { millis }
    }

    pub fn millis(&self) -> f64 {
        self.millis
    }
}

impl TimeSource for FixedTimeSource {
    fn now_ms(&mut self) -> f64 {
        self.millis
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Shared flag that stops an animation loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fixed-rate frame schedule for the clock uniform.
///
/// The driver only decides *when* a frame is due; the engine does the
/// redraw on the thread that owns the GPU context.
#[derive(Debug)]
pub(crate) struct AnimationDriver {
    ticks: Receiver<Instant>,
    token: CancelToken,
    interval: Duration,
}

impl AnimationDriver {
    pub fn start(interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        tracing::debug!(?interval, "animation loop started");
        Self {
            ticks: crossbeam_channel::tick(interval),
            token: CancelToken::new(),
            interval,
        }
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        if !self.token.is_canceled() {
            tracing::debug!(interval = ?self.interval, "animation loop canceled");
        }
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_canceled()
    }

    /// Whether at least one tick elapsed since the last call. Missed ticks
    /// collapse into a single frame.
    pub fn frame_due(&self) -> bool {
        !self.is_canceled() && self.ticks.try_iter().count() > 0
    }

    /// Blocks until the next tick. Returns `false` once the loop is canceled.
    pub fn wait_frame(&self) -> bool {
        if self.is_canceled() {
            return false;
        }
        if self.ticks.recv().is_err() {
            return false;
        }
        !self.is_canceled()
    }
}
