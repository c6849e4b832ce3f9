//! Driver for a daisy chain of LTC6813 battery stack monitors.
//!
//! All traffic goes through one shared [`Frame`], so every operation that touches the
//! chain holds the bus lock from the first command to the last read-back. Decoded
//! register values live behind a separate data lock that is only held while values are
//! copied in or out, so readers are never blocked for a whole conversion.

use crate::error::{Error, Result};
use crate::protocol::{
    cfga, cfgb, commands, AdcMode, Frame, RegisterBank, BLOCK_SIZE, DCP_PERMITTED,
};
use crate::reading::{Reading, CELLS_PER_DEVICE, GPIO_PER_DEVICE, TEMPERATURES_PER_DEVICE};
use crate::transport::{send_frame, Transport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const VOLTAGE_SETTLE: Duration = Duration::from_millis(300);
pub const VOLTAGE_SC_SETTLE: Duration = Duration::from_millis(350);
pub const VOLTAGE_AUX_SETTLE: Duration = Duration::from_millis(400);
pub const TEMPERATURE_SETTLE: Duration = Duration::from_millis(50);

/// Number of thermistor pairs behind the GPIO7..9 multiplexer.
pub const SENSOR_POSITIONS: usize = 8;

/// Raw cell codes are in 100uV steps.
const VOLTS_PER_COUNT: f32 = 1.0 / 10000.0;
/// The sum of cells register holds the stack voltage divided by 30.
const SUM_OF_CELLS_SCALE: f32 = 30.0;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The link to the chain together with its transmit buffer.
pub(crate) struct Bus<T> {
    pub(crate) transport: T,
    pub(crate) frame: Frame,
}

impl<T: Transport> Bus<T> {
    pub(crate) fn send(&mut self) -> Result<()> {
        send_frame(&mut self.transport, &mut self.frame)
    }

    /// Sends a bare command without payload.
    pub(crate) fn command(&mut self, command: u16) -> Result<()> {
        log::debug!("command {command:03X}");
        self.frame.clear();
        self.frame.set_command(command);
        self.send()
    }

    /// Writes the same register contents to every device.
    pub(crate) fn write_all(&mut self, command: u16, data: [u8; BLOCK_SIZE]) -> Result<()> {
        log::debug!("write {command:03X} {data:02X?}");
        self.frame.clear();
        self.frame.set_command(command);
        self.frame.fill_data(data);
        self.send()
    }

    /// Reads one register group from every device and stores it once the frame's block
    /// PECs check out.
    fn read_bank(&mut self, bank: RegisterBank, data: &Mutex<ChainData>) -> Result<()> {
        self.frame.clear();
        self.frame.set_command(bank.command());
        // A device that does not answer leaves the poison pattern behind
        self.frame.fill_data([0xFF; BLOCK_SIZE]);
        self.send()?;
        self.frame.check_pec(&format!("read bank {bank}"), false)?;

        let mut data = lock(data);
        for (device, reading) in data.readings.iter_mut().enumerate() {
            reading.store_bank(bank, self.frame.data(device));
        }
        Ok(())
    }

    fn read_banks(
        &mut self,
        banks: impl IntoIterator<Item = RegisterBank>,
        data: &Mutex<ChainData>,
    ) -> Result<()> {
        for bank in banks {
            self.read_bank(bank, data)?;
        }
        Ok(())
    }

    /// Addresses thermistor `sensor` and its +8 companion through GPIO7..9.
    fn set_temperature_sensor(&mut self, sensor: usize) -> Result<()> {
        self.write_all(
            commands::WRCFGB,
            [((sensor as u8) << 1) | cfgb::GPIO6_PULL_DOWN_OFF, 0, 0, 0, 0, 0],
        )
    }
}

pub(crate) struct ChainData {
    pub(crate) readings: Vec<Reading>,
    pub(crate) last_voltage_error: String,
    pub(crate) last_temperature_error: String,
}

/// A chain of LTC6813 devices behind one transport.
pub struct Chain<T> {
    length: usize,
    bus: Mutex<Bus<T>>,
    data: Mutex<ChainData>,
    temperature_sensor: AtomicUsize,
}

impl<T: Transport> Chain<T> {
    /// Creates a driver for `length` devices. Nothing is sent until [`Chain::initialise`].
    pub fn new(transport: T, length: usize) -> Self {
        Self {
            length,
            bus: Mutex::new(Bus {
                transport,
                frame: Frame::new(length),
            }),
            data: Mutex::new(ChainData {
                readings: vec![Reading::default(); length],
                last_voltage_error: String::new(),
                last_temperature_error: String::new(),
            }),
            temperature_sensor: AtomicUsize::new(0),
        }
    }

    pub(crate) fn lock_bus(&self) -> MutexGuard<'_, Bus<T>> {
        lock(&self.bus)
    }

    /// Writes configuration groups A and B to every device: reference on, discharge off,
    /// GPIO pull-downs off. Then parks the thermistor multiplexer on the selected sensor.
    pub fn initialise(&self) -> Result<()> {
        let mut bus = self.lock_bus();
        log::debug!("Initialising chain of {} devices", self.length);
        bus.write_all(
            commands::WRCFGA,
            [
                cfga::ADC_OPTION_0
                    | cfga::DISCHARGE_DISABLED
                    | cfga::REF_ON
                    | cfga::GPIO1_PULL_DOWN_OFF
                    | cfga::GPIO2_PULL_DOWN_OFF
                    | cfga::GPIO3_PULL_DOWN_OFF
                    | cfga::GPIO4_PULL_DOWN_OFF
                    | cfga::GPIO5_PULL_DOWN_OFF,
                0,
                0,
                0,
                0,
                0,
            ],
        )?;
        bus.write_all(
            commands::WRCFGB,
            [
                cfgb::GPIO6_PULL_DOWN_OFF
                    | cfgb::GPIO7_PULL_DOWN_OFF
                    | cfgb::GPIO8_PULL_DOWN_OFF
                    | cfgb::GPIO9_PULL_DOWN_OFF,
                0,
                0,
                0,
                0,
                0,
            ],
        )?;
        bus.set_temperature_sensor(self.temperature_sensor())
    }

    /// Forgets all readings and errors and rewinds the sensor selector, as for a chain
    /// that has just been plugged in.
    pub fn reset(&self) {
        let mut bus = self.lock_bus();
        bus.frame.clear();
        self.temperature_sensor.store(0, Ordering::Relaxed);
        let mut data = lock(&self.data);
        data.readings = vec![Reading::default(); self.length];
        data.last_voltage_error.clear();
        data.last_temperature_error.clear();
    }

    /// Converts all cell voltages and reads back cell groups A to F.
    pub fn measure_voltages(&self) -> Result<usize> {
        let mut bus = self.lock_bus();
        let result = bus
            .command(commands::ADCV + AdcMode::Filtered as u16 + DCP_PERMITTED)
            .and_then(|_| {
                std::thread::sleep(VOLTAGE_SETTLE);
                bus.read_banks(RegisterBank::CELL_VOLTAGES, &self.data)
            });
        self.record_voltage_result(result)
    }

    /// Converts all cell voltages plus the sum of cells and reads back cell groups A to F
    /// and status group A.
    pub fn measure_voltages_sc(&self) -> Result<usize> {
        let mut bus = self.lock_bus();
        let result = bus
            .command(commands::ADCVSC + AdcMode::Filtered as u16 + DCP_PERMITTED)
            .and_then(|_| {
                std::thread::sleep(VOLTAGE_SC_SETTLE);
                bus.read_banks(
                    RegisterBank::CELL_VOLTAGES
                        .into_iter()
                        .chain([RegisterBank::StatusA]),
                    &self.data,
                )
            });
        self.record_voltage_result(result)
    }

    /// Converts all cell voltages together with GPIO1 and GPIO2, which carry the currently
    /// multiplexed thermistor pair, then moves the multiplexer on.
    pub fn measure_voltages_and_aux(&self) -> Result<usize> {
        let mut bus = self.lock_bus();
        if let Err(err) = bus.command(commands::ADCVAX + AdcMode::Filtered as u16 + DCP_PERMITTED)
        {
            return self.record_voltage_result(Err(err));
        }
        std::thread::sleep(VOLTAGE_AUX_SETTLE);
        let result = bus.read_banks(
            RegisterBank::CELL_VOLTAGES
                .into_iter()
                .chain([RegisterBank::AuxiliaryA]),
            &self.data,
        );
        let sensor = self.temperature_sensor();
        if result.is_ok() {
            let mut data = lock(&self.data);
            for reading in data.readings.iter_mut() {
                let (first, second) = (reading.gpio_volts[0], reading.gpio_volts[1]);
                Self::log_sensor(reading.update_temperature(sensor, first), sensor);
                Self::log_sensor(reading.update_temperature(sensor + 8, second), sensor + 8);
            }
        }
        self.advance_temperature_sensor(&mut bus);
        self.record_voltage_result(result)
    }

    /// Converts the GPIO inputs and updates the thermistor pair the multiplexer is parked
    /// on (channels `n` and `n + 8`) plus the two directly wired thermistors (channels 16
    /// and 17). The multiplexer is then moved to the next pair, so a full set of
    /// temperatures takes eight calls.
    pub fn measure_temperatures(&self) -> Result<usize> {
        let mut bus = self.lock_bus();
        if let Err(err) = bus.command(commands::ADAX + AdcMode::Fast as u16) {
            return self.record_temperature_result(Err(err));
        }
        std::thread::sleep(TEMPERATURE_SETTLE);
        let result = bus.read_banks(RegisterBank::AUXILIARY, &self.data);
        let sensor = self.temperature_sensor();
        if result.is_ok() {
            let mut data = lock(&self.data);
            for reading in data.readings.iter_mut() {
                let gpio = reading.gpio_volts;
                Self::log_sensor(reading.update_temperature(sensor, gpio[0]), sensor);
                Self::log_sensor(reading.update_temperature(sensor + 8, gpio[1]), sensor + 8);
                Self::log_sensor(reading.update_temperature(16, gpio[2]), 16);
                Self::log_sensor(reading.update_temperature(17, gpio[5]), 17);
            }
        }
        self.advance_temperature_sensor(&mut bus);
        self.record_temperature_result(result)
    }

    /// Reads a single register group from every device.
    pub fn read_adc_input_bank(&self, bank: RegisterBank) -> Result<usize> {
        let mut bus = self.lock_bus();
        bus.read_bank(bank, &self.data)?;
        Ok(self.length)
    }

    /// Reads configuration register group A back from every device.
    pub fn read_config_register(&self) -> Result<Vec<[u8; BLOCK_SIZE]>> {
        let mut bus = self.lock_bus();
        bus.command(commands::RDCFGA)?;
        bus.frame.check_pec("Read configuration register A", false)?;
        let blocks: Vec<_> = (0..self.length).map(|d| bus.frame.data(d)).collect();
        let mut data = lock(&self.data);
        for (reading, block) in data.readings.iter_mut().zip(&blocks) {
            reading.config_register = *block;
        }
        Ok(blocks)
    }

    fn advance_temperature_sensor(&self, bus: &mut Bus<T>) {
        let next = (self.temperature_sensor() + 1) % SENSOR_POSITIONS;
        self.temperature_sensor.store(next, Ordering::Relaxed);
        if let Err(err) = bus.set_temperature_sensor(next) {
            log::error!("Cannot select temperature sensor {next}: {err}");
        }
    }

    fn log_sensor(result: Result<f32>, channel: usize) {
        if let Err(err) = result {
            log::trace!("Temperature channel {channel}: {err}");
        }
    }

    fn record_voltage_result(&self, result: Result<()>) -> Result<usize> {
        let mut data = lock(&self.data);
        match result {
            Ok(()) => {
                data.last_voltage_error.clear();
                Ok(self.length)
            }
            Err(err) => {
                data.last_voltage_error = format!("Voltage Error : {err}");
                Err(err)
            }
        }
    }

    fn record_temperature_result(&self, result: Result<()>) -> Result<usize> {
        let mut data = lock(&self.data);
        match result {
            Ok(()) => {
                data.last_temperature_error.clear();
                Ok(self.length)
            }
            Err(err) => {
                data.last_temperature_error = format!("Temperature Error : {err}");
                Err(err)
            }
        }
    }
}

impl<T> Chain<T> {
    /// Number of devices in the chain.
    pub fn chain_length(&self) -> usize {
        self.length
    }

    /// The thermistor pair the multiplexer is parked on for the next temperature scan.
    pub fn temperature_sensor(&self) -> usize {
        self.temperature_sensor.load(Ordering::Relaxed)
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&ChainData) -> R) -> R {
        f(&lock(&self.data))
    }

    fn with_reading<R>(&self, device: usize, default: R, f: impl FnOnce(&Reading) -> R) -> R {
        self.with_data(|data| data.readings.get(device).map(f).unwrap_or(default))
    }

    /// Copies the readings of every device.
    pub fn readings(&self) -> Vec<Reading> {
        self.with_data(|data| data.readings.clone())
    }

    /// Cell voltage in volts, 0 for devices or cells that do not exist.
    pub fn volts(&self, device: usize, cell: usize) -> f32 {
        self.raw_volts(device, cell) as f32 * VOLTS_PER_COUNT
    }

    /// Raw cell voltage code in 100uV units.
    pub fn raw_volts(&self, device: usize, cell: usize) -> u16 {
        self.with_reading(device, 0, |r| r.cell_volts.get(cell).copied().unwrap_or(0))
    }

    /// All 18 raw cell codes of a device.
    pub fn cell_volts(&self, device: usize) -> [u16; CELLS_PER_DEVICE] {
        self.with_reading(device, [0; CELLS_PER_DEVICE], |r| r.cell_volts)
    }

    /// Second reference voltage in volts.
    pub fn ref_volts(&self, device: usize) -> f32 {
        self.with_reading(device, 0, |r| r.ref_volts) as f32 * VOLTS_PER_COUNT
    }

    /// Raw GPIO input code.
    pub fn gpio_volts(&self, device: usize, channel: usize) -> u16 {
        if channel >= GPIO_PER_DEVICE {
            return 0;
        }
        self.with_reading(device, 0, |r| r.gpio_volts[channel])
    }

    /// Voltage across all cells of a device in volts.
    pub fn sum_of_cells_volts(&self, device: usize) -> f32 {
        self.with_reading(device, 0, |r| r.sum_of_cells) as f32 * VOLTS_PER_COUNT
            * SUM_OF_CELLS_SCALE
    }

    /// Sum of cells in 10mV units.
    pub fn raw_sum_of_cells(&self, device: usize) -> u16 {
        self.with_reading(device, 0, |r| (r.sum_of_cells / 10) * 3)
    }

    /// Cached temperature of a sensor channel in °C. Values outside -100..100°C are
    /// reported as errors alongside the stored value.
    pub fn temperature(&self, device: usize, sensor: usize) -> Result<f32> {
        let t = self
            .with_data(|data| {
                data.readings
                    .get(device)
                    .and_then(|r| r.temperatures.get(sensor).copied())
            })
            .ok_or(Error::DeviceIndex {
                index: device,
                length: self.length,
            })?;
        if !(-100.0..=100.0).contains(&t) {
            return Err(Error::TemperatureRange(t));
        }
        Ok(t)
    }

    /// Temperature in tenths of a degree, saturated outside -10°C..110°C.
    pub fn temp_tenths(&self, device: usize, sensor: usize) -> i16 {
        let t = self.with_reading(device, 0.0, |r| {
            r.temperatures.get(sensor).copied().unwrap_or(0.0)
        });
        let tenths = (t * 10.0) as i16;
        match tenths {
            t if t < -100 => i16::MIN,
            t if t > 1100 => i16::MAX,
            t => t,
        }
    }

    /// All 18 temperature channels of a device.
    pub fn bank_temperatures(&self, device: usize) -> [f32; TEMPERATURES_PER_DEVICE] {
        self.with_reading(device, [0.0; TEMPERATURES_PER_DEVICE], |r| r.temperatures)
    }

    /// Highest temperature anywhere in the chain, never below 0.
    pub fn max_temperature(&self) -> f32 {
        self.with_data(|data| {
            data.readings
                .iter()
                .flat_map(|r| r.temperatures.iter().copied())
                .fold(0.0, f32::max)
        })
    }

    /// Message of the last failed voltage measurement, empty after a good one.
    pub fn last_voltage_error(&self) -> String {
        self.with_data(|data| data.last_voltage_error.clone())
    }

    /// Message of the last failed temperature measurement, empty after a good one.
    pub fn last_temperature_error(&self) -> String {
        self.with_data(|data| data.last_temperature_error.clone())
    }
}
