//! Cross-process access control for one named surface.
//!
//! A surface has exactly one access mutex and one frame counter, both derived
//! from the surface name and opened through a [`SyncBackend`]. Acquisition is
//! always bounded by a timeout: an owner that died while holding the lock must
//! never wedge the other side, so a failed acquire only means "skip this frame".

pub mod local;
#[cfg(target_os = "windows")]
pub mod win32;

use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::RegistrationError;
use crate::types::validate_surface_name;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid primitive name: {0}")]
    InvalidName(#[from] RegistrationError),
    #[error("failed to open `{name}`: {reason}")]
    Open { name: String, reason: String },
}

/// Named mutual-exclusion primitive visible to every process using the name.
pub trait NamedLock: Send {
    /// Waits at most `timeout`. Returns false when another holder kept it.
    fn try_acquire(&self, timeout: Duration) -> bool;
    fn release(&self);
}

/// Named, monotonically increasing frame version.
pub trait NamedCounter: Send {
    /// Bumps the version and returns the new value.
    fn increment(&self) -> u64;
    fn read(&self) -> u64;
}

pub trait SyncBackend {
    type Lock: NamedLock;
    type Counter: NamedCounter;

    fn open_lock(&self, name: &str) -> Result<Self::Lock, SyncError>;
    fn open_counter(&self, name: &str) -> Result<Self::Counter, SyncError>;
}

pub fn access_lock_name(surface: &str) -> String {
    format!("{surface}_AccessMutex")
}

pub fn frame_counter_name(surface: &str) -> String {
    format!("{surface}_FrameCount")
}

/// Access mutex plus frame counter for one surface, as seen by one session.
pub struct SynchronizationGuard<L: NamedLock, C: NamedCounter> {
    name: String,
    lock: L,
    counter: C,
    timeout: Duration,
    held: bool,
    last_seen_frame: u64,
    last_frame_at: Option<Instant>,
}

impl<L: NamedLock, C: NamedCounter> SynchronizationGuard<L, C> {
    pub fn open<B>(backend: &B, surface: &str, timeout: Duration) -> Result<Self, SyncError>
    where
        B: SyncBackend<Lock = L, Counter = C>,
    {
        validate_surface_name(surface)?;
        let lock = backend.open_lock(&access_lock_name(surface))?;
        let counter = backend.open_counter(&frame_counter_name(surface))?;
        let last_seen_frame = counter.read();
        debug!("[SurfaceShare/Sync] Opened access mutex and frame counter for `{}`", surface);
        Ok(Self {
            name: surface.to_owned(),
            lock,
            counter,
            timeout,
            held: false,
            last_seen_frame,
            last_frame_at: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bounded attempt at the surface mutex. Contention is expected under
    /// concurrent access and is not logged.
    pub fn acquire(&mut self) -> bool {
        if self.held {
            return true;
        }
        self.held = self.lock.try_acquire(self.timeout);
        self.held
    }

    pub fn release(&mut self) {
        if self.held {
            self.lock.release();
            self.held = false;
        }
    }

    /// Publishes a new frame version for receivers.
    pub fn mark_new_frame(&mut self) -> u64 {
        let frame = self.counter.increment();
        self.last_seen_frame = frame;
        frame
    }

    pub fn frame_number(&self) -> u64 {
        self.counter.read()
    }

    /// True if the version moved since the last call (or since opening).
    pub fn is_new_frame(&mut self) -> bool {
        let current = self.counter.read();
        if current != self.last_seen_frame {
            self.last_seen_frame = current;
            true
        } else {
            false
        }
    }

    /// Sleeps the calling thread so successive calls are at least
    /// `1 / target_fps` apart. Zero disables throttling.
    pub fn throttle(&mut self, target_fps: u32) {
        if target_fps == 0 {
            return;
        }
        let frame_time = Duration::from_secs_f64(1.0 / f64::from(target_fps));
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < frame_time {
                std::thread::sleep(frame_time - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl<L: NamedLock, C: NamedCounter> Drop for SynchronizationGuard<L, C> {
    fn drop(&mut self) {
        self.release();
    }
}
