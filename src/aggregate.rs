//! Whole-battery views built from the per-device readings.
//!
//! The installation has two banks of series cells. Each bank is watched by three
//! consecutive devices: the first two are fully populated and reported through their sum
//! of cells, the third only carries two cells.

use crate::chain::Chain;
use crate::reading::{round_half_up, Reading};
use serde::Serialize;

pub const BANKS: usize = 2;
pub const DEVICES_PER_BANK: usize = 3;
/// Two full devices plus the two cells on the third.
pub const CHANNELS_PER_BANK: usize = 38;

fn sum_of_cells_volts(reading: Option<&Reading>) -> f64 {
    reading.map_or(0.0, |r| r.sum_of_cells as f64 / 10000.0 * 30.0)
}

fn cell_volts(reading: Option<&Reading>, cell: usize) -> f64 {
    reading.map_or(0.0, |r| r.cell_volts[cell] as f64 / 10000.0)
}

/// Terminal voltage of `bank` in volts, rounded to 10mV. Devices missing from the chain
/// count as 0V.
pub fn bank_total(readings: &[Reading], bank: usize) -> f32 {
    let first = bank * DEVICES_PER_BANK;
    let total = sum_of_cells_volts(readings.get(first))
        + sum_of_cells_volts(readings.get(first + 1))
        + cell_volts(readings.get(first + 2), 0)
        + cell_volts(readings.get(first + 2), 1);
    round_half_up(total, 2) as f32
}

pub fn bank_totals(readings: &[Reading]) -> [f32; BANKS] {
    [bank_total(readings, 0), bank_total(readings, 1)]
}

/// The bank with the higher voltage is the one feeding the bus.
pub fn active_battery_voltage(readings: &[Reading]) -> f32 {
    let [first, second] = bank_totals(readings);
    first.max(second)
}

fn bank_channels<V: Copy + Default>(
    readings: &[Reading],
    bank: usize,
    values: impl Fn(&Reading) -> &[V],
) -> Vec<V> {
    let first = bank * DEVICES_PER_BANK;
    (first..first + DEVICES_PER_BANK)
        .flat_map(|device| match readings.get(device) {
            Some(reading) => values(reading).to_vec(),
            None => vec![V::default(); values(&Reading::default()).len()],
        })
        .take(CHANNELS_PER_BANK)
        .collect()
}

/// Everything a dashboard needs after one measurement cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Raw cell codes per bank, 100uV units.
    pub voltages: [Vec<u16>; BANKS],
    pub totals: [f32; BANKS],
    pub temperatures: [Vec<f32>; BANKS],
    pub voltage_error: String,
    pub temperature_error: String,
}

impl Snapshot {
    pub fn from_readings(
        readings: &[Reading],
        voltage_error: impl Into<String>,
        temperature_error: impl Into<String>,
    ) -> Self {
        Self {
            voltages: [0, 1].map(|bank| bank_channels(readings, bank, |r| &r.cell_volts[..])),
            totals: bank_totals(readings),
            temperatures: [0, 1].map(|bank| bank_channels(readings, bank, |r| &r.temperatures[..])),
            voltage_error: voltage_error.into(),
            temperature_error: temperature_error.into(),
        }
    }

    /// Voltage of the bank currently feeding the bus.
    pub fn active_battery_voltage(&self) -> f32 {
        self.totals[0].max(self.totals[1])
    }
}

impl<T> Chain<T> {
    /// Takes one consistent snapshot of all readings and the last errors.
    pub fn snapshot(&self) -> Snapshot {
        self.with_data(|data| {
            Snapshot::from_readings(
                &data.readings,
                data.last_voltage_error.as_str(),
                data.last_temperature_error.as_str(),
            )
        })
    }

    pub fn bank_totals(&self) -> [f32; BANKS] {
        self.with_data(|data| bank_totals(&data.readings))
    }

    pub fn active_battery_voltage(&self) -> f32 {
        self.with_data(|data| active_battery_voltage(&data.readings))
    }
}
