//! Tick driver
//!
//! A dedicated thread that advances the engine every `tick_interval_ms`.
//! MIDI input, macro values and cancellations can be queued to the same
//! thread so that every write they cause is serialized with the ticks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::automation::RunId;
use crate::control::MacroId;
use crate::engine::Engine;
use crate::error::{MixError, Result};

const QUEUE_CAPACITY: usize = 1024;

/// Work queued to the driver thread
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    /// Raw MIDI bytes from an input port
    Midi(Vec<u8>),
    SetMacro { macro_id: MacroId, value: f64 },
    Cancel(RunId),
    Shutdown,
}

/// Handle to the running tick thread
///
/// Dropping the handle shuts the thread down.
pub struct TickDriver {
    engine: Arc<Engine>,
    sender: Sender<DriverCommand>,
    handle: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// Spawn the tick thread for an engine
    pub fn spawn(engine: Arc<Engine>) -> Result<Self> {
        let (sender, receiver) = bounded(QUEUE_CAPACITY);
        let interval = Duration::from_millis(engine.config().scheduler.tick_interval_ms);

        let thread_engine = engine.clone();
        let handle = thread::Builder::new()
            .name("mixpilot-tick".to_string())
            .spawn(move || run_loop(thread_engine, receiver, interval))?;

        info!("[DRIVER] tick thread started ({} ms)", interval.as_millis());
        Ok(Self {
            engine,
            sender,
            handle: Some(handle),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Queue a command for the tick thread
    ///
    /// # Errors
    /// `EngineStopped` once the thread has exited.
    pub fn send(&self, command: DriverCommand) -> Result<()> {
        if self.handle.is_none() {
            return Err(MixError::EngineStopped);
        }
        self.sender.send(command).map_err(|_| MixError::EngineStopped)
    }

    pub fn send_midi(&self, bytes: &[u8]) -> Result<()> {
        self.send(DriverCommand::Midi(bytes.to_vec()))
    }

    pub fn set_macro(&self, macro_id: MacroId, value: f64) -> Result<()> {
        self.send(DriverCommand::SetMacro { macro_id, value })
    }

    pub fn cancel(&self, run_id: RunId) -> Result<()> {
        self.send(DriverCommand::Cancel(run_id))
    }

    /// Process everything already queued, cancel active runs and join
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Err(MixError::EngineStopped);
        };
        // the thread may already be gone; joining still reaps it
        let _ = self.sender.send(DriverCommand::Shutdown);
        if handle.join().is_err() {
            warn!("[DRIVER] tick thread panicked");
        }
        info!("[DRIVER] tick thread stopped");
        Ok(())
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown();
        }
    }
}

fn run_loop(engine: Arc<Engine>, receiver: Receiver<DriverCommand>, interval: Duration) {
    let mut next_tick = Instant::now();

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(wait) {
            Ok(DriverCommand::Shutdown) => break,
            Ok(command) => handle_command(&engine, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_tick {
            let summary = engine.tick();
            if summary.writes > 0 || !summary.completed.is_empty() || !summary.cancelled.is_empty() {
                debug!(
                    "[DRIVER] tick: {} writes, {} completed, {} cancelled",
                    summary.writes,
                    summary.completed.len(),
                    summary.cancelled.len()
                );
            }
            next_tick += interval;
            // fall behind rather than burst after a stall
            if next_tick < now {
                next_tick = now + interval;
            }
        }
    }

    engine.shutdown();
}

fn handle_command(engine: &Engine, command: DriverCommand) {
    match command {
        DriverCommand::Midi(bytes) => {
            if let Some(dispatch) = engine.on_midi_message(&bytes) {
                for failure in &dispatch.failures {
                    warn!("[DRIVER] MIDI write to {} failed: {}", failure.param, failure.message);
                }
            }
        }
        DriverCommand::SetMacro { macro_id, value } => match engine.set_macro_value(macro_id, value) {
            Ok(report) if !report.is_complete() => {
                warn!(
                    "[DRIVER] macro {} applied to {} of {} targets",
                    macro_id,
                    report.applied.len(),
                    report.applied.len() + report.failures.len()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("[DRIVER] macro {}: {}", macro_id, e),
        },
        DriverCommand::Cancel(run_id) => {
            if let Err(e) = engine.cancel_automation(run_id) {
                warn!("[DRIVER] cancel {}: {}", run_id, e);
            }
        }
        DriverCommand::Shutdown => {}
    }
}
