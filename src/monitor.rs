//! The periodic measurement cycle.

use crate::chain::Chain;
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::notify::LatestSnapshot;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Measures the chain once per cycle and publishes the result.
///
/// Measurement failures never stop the monitor. A measurement whose link fails twice in a
/// row marks the chain as lost, and the next cycle starts with a fresh discovery. Frames
/// that arrive but fail their PEC only leave the readings stale.
pub struct Monitor<T> {
    chain: Arc<Chain<T>>,
    latest: Arc<LatestSnapshot>,
    devices: usize,
    errors: u64,
}

impl<T: Transport> Monitor<T> {
    pub fn new(chain: Arc<Chain<T>>, latest: Arc<LatestSnapshot>) -> Self {
        Self {
            chain,
            latest,
            devices: 0,
            errors: 0,
        }
    }

    pub fn chain(&self) -> &Arc<Chain<T>> {
        &self.chain
    }

    /// Devices found by the last discovery, 0 when the chain has to be rediscovered.
    pub fn devices(&self) -> usize {
        self.devices
    }

    /// Measurements that failed even after their retry.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Resets and initialises the chain and takes a first measurement. Only an
    /// initialisation failure is returned; the chain is unusable without it.
    pub fn discover(&mut self) -> Result<usize> {
        self.chain.reset();
        self.chain.initialise()?;
        if let Err(err) = self.chain.measure_voltages() {
            log::warn!("MeasureVoltages - {err}");
        }
        if let Err(err) = self.chain.measure_temperatures() {
            log::warn!("MeasureTemperatures - {err}");
        }
        self.devices = self.chain.chain_length();
        log::info!("Found chain of {} devices", self.devices);
        Ok(self.devices)
    }

    /// One measurement cycle: voltages with sum of cells, then the next temperature pair.
    /// Publishes a snapshot afterwards whether or not the measurements succeeded.
    pub fn perform_measurements(&mut self) -> Result<()> {
        if self.devices == 0 {
            self.discover()?;
        }

        log::debug!("Measuring voltages");
        if let Err(err) = retry_once(|| self.chain.measure_voltages_sc()) {
            log::error!("Error measuring voltages - {err}");
            self.failed(&err);
        }

        log::debug!("Measuring temperatures");
        if let Err(err) = retry_once(|| self.chain.measure_temperatures()) {
            log::error!("Error measuring temperatures - {err}");
            self.failed(&err);
        }

        let generation = self.latest.publish(self.chain.snapshot());
        log::trace!("Published snapshot {generation}");
        Ok(())
    }

    fn failed(&mut self, err: &Error) {
        self.errors += 1;
        if err.is_transport() {
            self.devices = 0;
        }
    }

    /// Runs a measurement cycle every `config.interval` until `stop` is set. Returns early
    /// only when the chain cannot be initialised.
    pub fn run(&mut self, config: &MonitorConfig, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.perform_measurements()?;
            if let Some(remaining) = config.interval.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
        log::info!("Monitor stopped after {} errors", self.errors);
        Ok(())
    }
}

fn retry_once<R>(mut f: impl FnMut() -> Result<R>) -> Result<R> {
    f().or_else(|err| {
        log::warn!("Retrying after: {err}");
        f()
    })
}
