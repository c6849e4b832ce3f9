//! I2C transactions tunnelled through the LTC6813 communication register.
//!
//! Every transaction is staged with WRCOMM and clocked out with STCOMM. Reads stage a
//! second envelope for the read phase and collect the result with RDCOMM. Transport
//! errors inside an envelope are logged and the sequence carries on. The block PECs of
//! the final RDCOMM frame decide whether a read succeeded. Writes have nothing to read
//! back, so they report the last transport error once every frame has been sent.

use crate::chain::{Bus, Chain};
use crate::error::{Error, Result};
use crate::protocol::{commands, fcom, icom, BLOCK_SIZE, I2C_READ, I2C_WRITE};
use crate::transport::Transport;
use std::fmt;

/// LTC2944 battery gas gauge wired to the I2C master of each device.
pub mod ltc2944 {
    /// 7 bit address 0x64 in the top bits
    pub const ADDRESS: u8 = 0xC8;

    pub const STATUS: u8 = 0x00;
    pub const CONTROL: u8 = 0x01;
    pub const ACCUMULATED_CHARGE_MSB: u8 = 0x02;
    pub const VOLTAGE_MSB: u8 = 0x08;
    pub const CURRENT_MSB: u8 = 0x0E;
    pub const TEMPERATURE_MSB: u8 = 0x14;

    /// Die temperature in °C. The register is read as a signed value.
    pub fn temperature(raw: u16) -> f64 {
        510.0 * (raw as i16 as f64 / 65535.0) - 273.15
    }

    /// Sense voltage in volts, zero at mid scale.
    pub fn current(raw: u16) -> f64 {
        0.064 * ((raw as f64 - 32767.0) / 32767.0)
    }

    /// SENSE- voltage in volts.
    pub fn voltage(raw: u16) -> f64 {
        70.8 * (raw as f64 / 65535.0)
    }
}

const I2C_PEC_CONTEXT: &str = "I2C Communication Error(PEC)";

/// A COMM block that leaves the device's I2C port idle.
const IDLE_BLOCK: [u8; BLOCK_SIZE] = [icom::NO_TRANSMIT, 0, icom::NO_TRANSMIT, 0, icom::NO_TRANSMIT, 0];

/// Data byte `data` preceded by `icom` and followed by `fcom`, as two COMM bytes.
fn comm_pair(icom: u8, data: u8, fcom: u8) -> [u8; 2] {
    [icom | (data >> 4), (data << 4) | fcom]
}

fn address_pair(address: u8, direction: u8) -> [u8; 2] {
    [icom::START | (address >> 4), ((address << 4) & 0xF0) | direction | fcom::ACK]
}

fn block(pairs: [[u8; 2]; 3]) -> [u8; BLOCK_SIZE] {
    [
        pairs[0][0],
        pairs[0][1],
        pairs[1][0],
        pairs[1][1],
        pairs[2][0],
        pairs[2][1],
    ]
}

/// START, address with write bit, register pointer. The data phase is left idle.
fn register_select_block(address: u8, register: u8) -> [u8; BLOCK_SIZE] {
    block([
        address_pair(address, I2C_WRITE),
        comm_pair(icom::BLANK, register, fcom::ACK),
        [icom::NO_TRANSMIT, 0],
    ])
}

/// Repeated START with read bit, then one byte answered with NACK and STOP.
fn read_byte_block(address: u8) -> [u8; BLOCK_SIZE] {
    block([
        address_pair(address, I2C_READ),
        comm_pair(icom::BLANK, 0xFF, fcom::NACK_STOP),
        [icom::NO_TRANSMIT, 0],
    ])
}

/// Repeated START with read bit, then two bytes: ACK after the first, NACK and STOP
/// after the second.
fn read_word_block(address: u8) -> [u8; BLOCK_SIZE] {
    block([
        address_pair(address, I2C_READ),
        comm_pair(icom::BLANK, 0xFF, fcom::ACK),
        comm_pair(icom::BLANK, 0xFF, fcom::NACK_STOP),
    ])
}

fn write_byte_block(address: u8, register: u8, data: u8) -> [u8; BLOCK_SIZE] {
    block([
        address_pair(address, I2C_WRITE),
        comm_pair(icom::BLANK, register, fcom::ACK),
        comm_pair(icom::BLANK, data, fcom::NACK_STOP),
    ])
}

/// A COMM group holds three bytes, so a word write needs a second envelope for the LSB.
fn write_word_blocks(address: u8, register: u8, data: u16) -> [[u8; BLOCK_SIZE]; 2] {
    let [msb, lsb] = data.to_be_bytes();
    [
        block([
            address_pair(address, I2C_WRITE),
            comm_pair(icom::BLANK, register, fcom::ACK),
            comm_pair(icom::BLANK, msb, fcom::ACK),
        ]),
        block([
            comm_pair(icom::BLANK, lsb, fcom::NACK_STOP),
            [icom::NO_TRANSMIT, 0],
            [icom::NO_TRANSMIT, 0],
        ]),
    ]
}

/// Bytes read from one device's I2C port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cResponse {
    pub device: usize,
    pub register: u8,
    /// The COMM block returned by the device.
    pub block: [u8; BLOCK_SIZE],
    pub data: Vec<u8>,
}

impl I2cResponse {
    /// The data bytes as a big endian value.
    pub fn value(&self) -> u16 {
        self.data
            .iter()
            .fold(0u16, |value, &b| (value << 8) | b as u16)
    }
}

impl fmt::Display for I2cResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Data from register {} of the LTC2944 sensor {} - {:02x?}",
            self.register, self.device, self.block
        )?;
        for b in &self.data {
            write!(f, " 0x{b:x}")?;
        }
        Ok(())
    }
}

impl<T: Transport> Bus<T> {
    fn send_best_effort(&mut self, what: &str) -> Result<()> {
        self.send()
            .inspect_err(|err| log::warn!("{what} failed: {err}"))
    }

    /// Stages one COMM block per device and clocks it out on every I2C port. Both frames
    /// are always sent; the last transport error, if any, is returned.
    fn comm_envelope(&mut self, blocks: impl Fn(usize) -> [u8; BLOCK_SIZE]) -> Result<()> {
        self.frame.clear();
        for device in 0..self.frame.devices() {
            self.frame.set_data(device, blocks(device));
        }
        self.frame.set_command(commands::WRCOMM);
        log::debug!("WRCOMM {:02X?}", self.frame);
        let staged = self.send_best_effort("WRCOMM");

        self.frame.clear();
        self.frame.set_command(commands::STCOMM);
        self.send_best_effort("STCOMM").and(staged)
    }

    /// Fetches the COMM group. A failed fetch leaves nothing to check, so it is returned.
    fn read_comm(&mut self) -> Result<()> {
        self.frame.clear();
        self.frame.set_command(commands::RDCOMM);
        self.send()?;
        self.frame.check_pec(I2C_PEC_CONTEXT, false)
    }

    /// Points every device's slave at `register`, re-addresses it for reading and
    /// fetches the COMM group. Only the fetched block PECs decide the outcome.
    fn read_register(&mut self, address: u8, register: u8, read_block: [u8; BLOCK_SIZE]) -> Result<()> {
        let _ = self.comm_envelope(|_| register_select_block(address, register));
        let _ = self.comm_envelope(|_| read_block);
        self.read_comm()
    }
}

impl<T: Transport> Chain<T> {
    fn check_device(&self, device: usize) -> Result<()> {
        if device >= self.chain_length() {
            return Err(Error::DeviceIndex {
                index: device,
                length: self.chain_length(),
            });
        }
        Ok(())
    }

    /// Writes one byte to `register` of the slave behind `device`. The other ports stay idle.
    pub fn write_i2c_byte(&self, device: usize, address: u8, register: u8, data: u8) -> Result<()> {
        self.check_device(device)?;
        let mut bus = self.lock_bus();
        bus.comm_envelope(|d| {
            if d == device {
                write_byte_block(address, register, data)
            } else {
                IDLE_BLOCK
            }
        })
    }

    /// Writes a big endian word to `register` and `register + 1` of the slave behind `device`.
    pub fn write_i2c_word(&self, device: usize, address: u8, register: u8, data: u16) -> Result<()> {
        self.check_device(device)?;
        let mut bus = self.lock_bus();
        let mut result = Ok(());
        for envelope in write_word_blocks(address, register, data) {
            if let Err(err) = bus.comm_envelope(|d| if d == device { envelope } else { IDLE_BLOCK }) {
                result = Err(err);
            }
        }
        result
    }

    /// Reads one byte from `register` of the slave behind `device`.
    pub fn read_i2c_byte(&self, device: usize, address: u8, register: u8) -> Result<I2cResponse> {
        self.check_device(device)?;
        let mut bus = self.lock_bus();
        bus.read_register(address, register, read_byte_block(address))?;
        Ok(I2cResponse {
            device,
            register,
            block: bus.frame.data(device),
            data: vec![bus.frame.comm_byte(device, 1)],
        })
    }

    /// Reads two consecutive registers, MSB first, from the slave behind `device`.
    pub fn read_i2c_word(&self, device: usize, address: u8, register: u8) -> Result<I2cResponse> {
        self.check_device(device)?;
        let mut bus = self.lock_bus();
        bus.read_register(address, register, read_word_block(address))?;
        Ok(I2cResponse {
            device,
            register,
            block: bus.frame.data(device),
            data: vec![bus.frame.comm_byte(device, 1), bus.frame.comm_byte(device, 2)],
        })
    }

    /// Reads two consecutive registers and returns them as one value.
    pub fn read_i2c_word_data(&self, device: usize, address: u8, register: u8) -> Result<u16> {
        let response = self.read_i2c_word(device, address, register)?;
        log::debug!("{response}");
        Ok(response.value())
    }

    /// Die temperature of the LTC2944 behind `device` in °C.
    pub fn i2c_temperature(&self, device: usize) -> Result<f64> {
        self.read_i2c_word_data(device, ltc2944::ADDRESS, ltc2944::TEMPERATURE_MSB)
            .map(ltc2944::temperature)
    }

    pub fn i2c_current(&self, device: usize) -> Result<f64> {
        self.read_i2c_word_data(device, ltc2944::ADDRESS, ltc2944::CURRENT_MSB)
            .map(ltc2944::current)
    }

    pub fn i2c_voltage(&self, device: usize) -> Result<f64> {
        self.read_i2c_word_data(device, ltc2944::ADDRESS, ltc2944::VOLTAGE_MSB)
            .map(ltc2944::voltage)
    }

    /// Raw accumulated charge register.
    pub fn i2c_accumulated_charge(&self, device: usize) -> Result<f64> {
        self.read_i2c_word_data(device, ltc2944::ADDRESS, ltc2944::ACCUMULATED_CHARGE_MSB)
            .map(f64::from)
    }
}
