use crate::error::{Error, Result};
use crate::protocol::{RegisterBank, BLOCK_SIZE};

pub const CELLS_PER_DEVICE: usize = 18;
pub const GPIO_PER_DEVICE: usize = 9;
/// Temperature channels per device: 16 multiplexed thermistors plus two direct ones.
pub const TEMPERATURES_PER_DEVICE: usize = 18;

/// B coefficient of the thermistors
pub const B_COEFFICIENT: f64 = 6000.0;
/// Divider supply in ADC counts (3V reference, 100uV per count)
const DIVIDER_FULL_SCALE: f64 = 30000.0;
const KELVIN_AT_25C: f64 = 298.15;
const MIN_THERMISTOR_CODE: u16 = 100;
const MAX_THERMISTOR_CODE: u16 = 28000;

/// Stored in place of a temperature when the thermistor reading is implausible.
pub const INVALID_TEMPERATURE: f32 = -273.15;

/// Register contents of one device in the chain.
///
/// Voltages are raw ADC codes in 100uV units. Temperatures are converted when they are
/// measured and filled in over several measurement cycles as the sensor selector rotates.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub cell_volts: [u16; CELLS_PER_DEVICE],
    pub gpio_volts: [u16; GPIO_PER_DEVICE],
    pub ref_volts: u16,
    pub sum_of_cells: u16,
    pub temperatures: [f32; TEMPERATURES_PER_DEVICE],
    pub config_register: [u8; BLOCK_SIZE],
    pub status_register: [u8; BLOCK_SIZE],
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            cell_volts: [0; CELLS_PER_DEVICE],
            gpio_volts: [0; GPIO_PER_DEVICE],
            ref_volts: 0,
            sum_of_cells: 0,
            temperatures: [0.0; TEMPERATURES_PER_DEVICE],
            config_register: [0; BLOCK_SIZE],
            status_register: [0; BLOCK_SIZE],
        }
    }
}

impl Reading {
    /// Demultiplexes one register group returned by this device.
    pub fn store_bank(&mut self, bank: RegisterBank, block: [u8; BLOCK_SIZE]) {
        let words = [
            u16::from_le_bytes([block[0], block[1]]),
            u16::from_le_bytes([block[2], block[3]]),
            u16::from_le_bytes([block[4], block[5]]),
        ];
        match bank {
            RegisterBank::CellVoltageA
            | RegisterBank::CellVoltageB
            | RegisterBank::CellVoltageC
            | RegisterBank::CellVoltageD
            | RegisterBank::CellVoltageE
            | RegisterBank::CellVoltageF => {
                let first = bank.index() * 3;
                self.cell_volts[first..first + 3].copy_from_slice(&words);
            }
            RegisterBank::AuxiliaryA => self.gpio_volts[0..3].copy_from_slice(&words),
            RegisterBank::AuxiliaryB => {
                self.gpio_volts[3] = words[0];
                self.gpio_volts[4] = words[1];
                self.ref_volts = words[2];
            }
            RegisterBank::AuxiliaryC => self.gpio_volts[5..8].copy_from_slice(&words),
            RegisterBank::AuxiliaryD => self.gpio_volts[8] = words[0],
            RegisterBank::StatusA => {
                self.sum_of_cells = words[0];
                self.status_register = block;
            }
        }
    }

    /// Converts `raw` and stores it in temperature `channel`. Implausible readings store
    /// [`INVALID_TEMPERATURE`] and are reported back to the caller.
    pub fn update_temperature(&mut self, channel: usize, raw: u16) -> Result<f32> {
        match calculate_temperature(raw) {
            Ok(t) => {
                self.temperatures[channel] = t;
                Ok(t)
            }
            Err(err) => {
                self.temperatures[channel] = INVALID_TEMPERATURE;
                Err(err)
            }
        }
    }
}

/// Rounds to `places` decimals, ties towards positive infinity.
pub fn round_half_up(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale + 0.5).floor() / scale
}

/// Converts the voltage across a thermistor divider to degrees Celsius.
///
/// The thermistor sits below a pull-up fed from the 3V reference, so `raw` counts of a
/// full scale of 30000 give the resistance ratio to the 25°C value.
pub fn calculate_temperature(raw: u16) -> Result<f32> {
    if !(MIN_THERMISTOR_CODE..=MAX_THERMISTOR_CODE).contains(&raw) {
        return Err(Error::SensorRange(raw));
    }
    let ratio = 1.0 / ((DIVIDER_FULL_SCALE / raw as f64) - 1.0);
    let kelvin = 1.0 / ((ratio.ln() / B_COEFFICIENT) + (1.0 / KELVIN_AT_25C));
    Ok(round_half_up(kelvin - 273.15, 1) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-4,
            "expected {expected} got {actual}"
        );
    }

    #[test]
    fn thermistor_reference_points() {
        assert_close(calculate_temperature(15000).unwrap(), 25.0);
        assert_close(calculate_temperature(10000).unwrap(), 35.6);
        assert_close(calculate_temperature(20000).unwrap(), 15.1);
        assert_close(calculate_temperature(28000).unwrap(), -9.6);
        assert_close(calculate_temperature(100).unwrap(), 142.8);
    }

    #[test]
    fn thermistor_codes_outside_range_are_rejected() {
        assert!(matches!(calculate_temperature(99), Err(Error::SensorRange(99))));
        assert!(matches!(
            calculate_temperature(28001),
            Err(Error::SensorRange(28001))
        ));
        assert!(calculate_temperature(0).is_err());
        assert!(calculate_temperature(u16::MAX).is_err());
    }

    #[test]
    fn ties_round_up() {
        assert_eq!(round_half_up(21.25, 1), 21.3);
        assert_eq!(round_half_up(21.24, 1), 21.2);
        assert_eq!(round_half_up(-2.25, 1), -2.2);
        assert_eq!(round_half_up(-2.21, 1), -2.2);
        assert_eq!(round_half_up(13.995, 2), 14.0);
        assert_eq!(round_half_up(0.125, 2), 0.13);
    }

    #[test]
    fn cell_banks_fill_three_cells_each() {
        let mut reading = Reading::default();
        reading.store_bank(RegisterBank::CellVoltageA, [0x10, 0x27, 0x20, 0x4E, 0x30, 0x75]);
        reading.store_bank(RegisterBank::CellVoltageF, [0x01, 0x00, 0x02, 0x00, 0x03, 0x00]);
        assert_eq!(&reading.cell_volts[0..3], &[10000, 20000, 30000]);
        assert_eq!(&reading.cell_volts[15..18], &[1, 2, 3]);
        assert!(reading.cell_volts[3..15].iter().all(|&v| v == 0));
    }

    #[test]
    fn auxiliary_banks_fill_gpio_and_reference() {
        let mut reading = Reading::default();
        reading.store_bank(RegisterBank::AuxiliaryA, [1, 0, 2, 0, 3, 0]);
        reading.store_bank(RegisterBank::AuxiliaryB, [4, 0, 5, 0, 0x30, 0x75]);
        reading.store_bank(RegisterBank::AuxiliaryC, [6, 0, 7, 0, 8, 0]);
        reading.store_bank(RegisterBank::AuxiliaryD, [9, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(reading.gpio_volts, [1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(reading.ref_volts, 30000);
    }

    #[test]
    fn status_bank_only_sets_sum_of_cells() {
        let mut reading = Reading::default();
        let block = [0xE8, 0x03, 0x11, 0x22, 0x33, 0x44];
        reading.store_bank(RegisterBank::StatusA, block);
        assert_eq!(reading.sum_of_cells, 1000);
        assert_eq!(reading.status_register, block);
        assert_eq!(reading.cell_volts, [0; 18]);
    }

    #[test]
    fn invalid_thermistor_stores_sentinel() {
        let mut reading = Reading::default();
        assert!(reading.update_temperature(3, 15000).is_ok());
        assert_close(reading.temperatures[3], 25.0);
        assert!(reading.update_temperature(3, 50).is_err());
        assert_eq!(reading.temperatures[3], INVALID_TEMPERATURE);
    }
}
