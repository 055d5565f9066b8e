//! Background sweeping of idle readers and cached ranges.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::VfsError;

/// Something that drops state unused for longer than its timeout.
pub trait IdleSweep: Send + Sync {
    /// Remove entries idle as of `now`.
    ///
    /// # Returns
    /// Number of entries removed.
    fn sweep_idle(&self, now: Instant) -> usize;
}

/// Owns a thread that calls [`IdleSweep::sweep_idle`] on each target every
/// interval. Targets are held weakly; the thread exits when the handle is
/// dropped or every target is gone.
pub struct Reaper {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Start sweeping `targets` every `interval`.
    pub fn spawn(
        interval: Duration,
        targets: Vec<Weak<dyn IdleSweep>>,
    ) -> Result<Self, VfsError> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("s3fs-reaper".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let now: Instant = Instant::now();
                let mut alive: usize = 0;
                for target in &targets {
                    if let Some(target) = target.upgrade() {
                        alive += 1;
                        let removed: usize = target.sweep_idle(now);
                        if removed > 0 {
                            debug!(removed, "Reaped idle entries");
                        }
                    }
                }
                if alive == 0 {
                    trace!("All sweep targets dropped, reaper exiting");
                    break;
                }
            })
            .map_err(VfsError::ThreadSpawn)?;

        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
