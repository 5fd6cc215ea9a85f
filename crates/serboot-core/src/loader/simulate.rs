//! End-to-end dry run: loader output fed straight into an emulated device.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::events::NullObserver;
use super::plan::UpdatePlan;
use super::{LoadSummary, Loader, LoaderConfig};
use crate::channel::MockChannel;
use crate::config::DeviceLayout;
use crate::flash::SimulatedFlash;
use crate::notify::{Notification, RecordingSink};
use crate::session::Bootloader;
use crate::vector::FinishReport;

/// Result of a simulated update.
#[derive(Debug)]
pub struct SimulationReport {
    pub flash: SimulatedFlash,
    pub notifications: Vec<Notification>,
    pub finish: FinishReport,
    pub load: LoadSummary,
    /// Bytes the device never read after Finish.
    pub unread: usize,
}

/// Send `plan` to an emulated device whose flash starts as `initial`.
pub fn simulate(
    plan: &UpdatePlan,
    layout: &DeviceLayout,
    initial: SimulatedFlash,
) -> Result<SimulationReport> {
    let mut loader = Loader::with_observer(Vec::new(), LoaderConfig::unpaced(), Arc::new(NullObserver));
    let load = loader.send_plan(plan)?;
    let wire = loader.into_inner();

    let mut device = Bootloader::new(
        MockChannel::from_bytes(&wire),
        initial,
        RecordingSink::new(),
        layout.clone(),
    );
    let finish = device.run().context("Emulated device rejected the update")?;
    let (channel, flash, sink) = device.into_parts();

    Ok(SimulationReport {
        flash,
        notifications: sink.notifications(),
        finish,
        load,
        unread: channel.remaining(),
    })
}
