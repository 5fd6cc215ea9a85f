//! Host side of the protocol.
//!
//! Reads an Intel HEX image, plans the Erase/Write/Finish sequence and
//! streams it to the device. The device never answers, so pacing between
//! frames is what keeps the host from outrunning flash programming.

pub mod events;
pub mod hex;
pub mod pager;
pub mod plan;
pub mod simulate;

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

pub use events::{LoadEvent, LoadPhase, LoaderObserver, TracingObserver};
pub use hex::{HexError, HexFile, HexRegion};
pub use pager::Pager;
pub use plan::{PlanError, PlannedFrame, UpdatePlan, config_from_regions};
pub use simulate::{SimulationReport, simulate};

use crate::protocol::EncodeError;
use crate::protocol::constants::{CMD_ERASE, CMD_FINISH, CMD_WRITE, SYNC_BYTE, SYNC_END};

/// Preamble burst size.
const SYNC_BURST: usize = 100;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Serial write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Host loader settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Serial port path.
    pub port: Option<String>,
    pub baud: u32,
    /// How long to repeat the auto-baud preamble while the device resets.
    pub sync_ms: u64,
    /// Quiet time after the preamble terminator.
    pub sync_settle_ms: u64,
    /// Extra delay after every frame.
    pub frame_gap_ms: u64,
    /// Sleep between frames. Off for in-memory transfers.
    pub pace: bool,
    /// Configuration bytes sent with Finish.
    pub config_bytes: Vec<u8>,
    /// Take the configuration bytes from the image instead.
    pub config_from_hex: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            sync_ms: 2000,
            sync_settle_ms: 1000,
            frame_gap_ms: 300,
            pace: true,
            config_bytes: Vec::new(),
            config_from_hex: false,
        }
    }
}

impl LoaderConfig {
    /// Settings for a transfer into memory: one preamble burst, no sleeps.
    pub fn unpaced() -> Self {
        Self {
            pace: false,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LoaderConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Totals of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub frames: usize,
    pub wire_bytes: usize,
    pub erased_blocks: u32,
    pub written_bytes: usize,
}

/// Streams an update plan to a device.
pub struct Loader<W: Write, O: LoaderObserver> {
    port: W,
    config: LoaderConfig,
    observer: Arc<O>,
    phase: LoadPhase,
    wire_bytes: usize,
}

impl<W: Write> Loader<W, TracingObserver> {
    /// Create a loader with the default tracing observer.
    pub fn new(port: W, config: LoaderConfig) -> Self {
        Self::with_observer(port, config, Arc::new(TracingObserver))
    }
}

impl<W: Write, O: LoaderObserver> Loader<W, O> {
    pub fn with_observer(port: W, config: LoaderConfig, observer: Arc<O>) -> Self {
        Self {
            port,
            config,
            observer,
            phase: LoadPhase::Idle,
            wire_bytes: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.port
    }

    fn enter(&mut self, phase: LoadPhase) {
        if self.phase != phase {
            self.observer.on_event(&LoadEvent::PhaseChanged {
                from: self.phase,
                to: phase,
            });
            self.phase = phase;
        }
    }

    fn pause(&self, duration: Duration) {
        if self.config.pace && !duration.is_zero() {
            thread::sleep(duration);
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), LoaderError> {
        self.port.write_all(bytes)?;
        self.wire_bytes += bytes.len();
        Ok(())
    }

    /// Repeat the auto-baud byte, then send the terminator.
    pub fn send_preamble(&mut self) -> Result<(), LoaderError> {
        self.enter(LoadPhase::Sync);

        let burst = [SYNC_BYTE; SYNC_BURST];
        let deadline = Instant::now() + Duration::from_millis(self.config.sync_ms);
        loop {
            self.put(&burst)?;
            if !self.config.pace || Instant::now() >= deadline {
                break;
            }
        }
        self.put(&[SYNC_END])?;
        self.port.flush()?;
        self.pause(Duration::from_millis(self.config.sync_settle_ms));
        Ok(())
    }

    /// Send one frame and wait out the device's busy time.
    pub fn send_frame(&mut self, frame: &PlannedFrame) -> Result<usize, LoaderError> {
        let wire = frame.encode()?;
        self.put(&wire)?;
        self.port.flush()?;
        self.pause(frame.settle + Duration::from_millis(self.config.frame_gap_ms));
        Ok(wire.len())
    }

    /// Preamble followed by every frame of `plan`.
    #[instrument(skip_all, fields(erase = plan.erase.len(), writes = plan.writes.len()))]
    pub fn send_plan(&mut self, plan: &UpdatePlan) -> Result<LoadSummary, LoaderError> {
        self.wire_bytes = 0;
        self.send_preamble()?;
        info!("Preamble sent, streaming frames");

        let frames = plan.frames();
        let total = frames.len();
        for (index, frame) in frames.iter().enumerate() {
            match frame.command {
                CMD_ERASE => self.enter(LoadPhase::Erase),
                CMD_WRITE => self.enter(LoadPhase::Write),
                CMD_FINISH => self.enter(LoadPhase::Finish),
                _ => {}
            }
            let wire_len = self.send_frame(frame)?;
            self.observer.on_event(&LoadEvent::FrameSent {
                kind: frame.kind(),
                wire_len,
                index,
                total,
            });
        }

        self.enter(LoadPhase::Complete);
        let summary = LoadSummary {
            frames: total,
            wire_bytes: self.wire_bytes,
            erased_blocks: plan.blocks_erased(),
            written_bytes: plan.bytes_written(),
        };
        self.observer.on_event(&LoadEvent::Complete {
            frames: summary.frames,
            bytes: summary.wire_bytes,
        });
        Ok(summary)
    }
}
