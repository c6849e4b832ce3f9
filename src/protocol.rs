use crate::error::{Error, Result};
use std::fmt;

/// Command codes understood by the LTC6813.
pub mod commands {
    /// Write Configuration Register Group A
    pub const WRCFGA: u16 = 0x001;
    /// Write Configuration Register Group B
    pub const WRCFGB: u16 = 0x024;
    /// Read Configuration Register Group A
    pub const RDCFGA: u16 = 0x002;
    pub const RDCVA: u16 = 0x004;
    pub const RDCVB: u16 = 0x006;
    pub const RDCVC: u16 = 0x008;
    pub const RDCVD: u16 = 0x00A;
    pub const RDCVE: u16 = 0x009;
    pub const RDCVF: u16 = 0x00B;
    pub const RDAUXA: u16 = 0x00C;
    pub const RDAUXB: u16 = 0x00E;
    pub const RDAUXC: u16 = 0x00D;
    pub const RDAUXD: u16 = 0x00F;
    pub const RDSTATA: u16 = 0x010;
    /// Start Cell Voltage ADC Conversion and Poll Status
    pub const ADCV: u16 = 0x260;
    /// Start GPIOs ADC Conversion and Poll Status
    pub const ADAX: u16 = 0x460;
    /// Start Combined Cell Voltage and GPIO1, GPIO2 Conversion and Poll Status
    pub const ADCVAX: u16 = 0x46F;
    /// Start Combined Cell Voltage and Sum of Cells Conversion and Poll Status
    pub const ADCVSC: u16 = 0x467;
    /// Write Communications Register Group
    pub const WRCOMM: u16 = 0x721;
    /// Read Communications Register Group
    pub const RDCOMM: u16 = 0x722;
    /// Start I2C/SPI Communication
    pub const STCOMM: u16 = 0x723;
}

/// Configuration register group A, byte 0.
pub mod cfga {
    pub const ADC_OPTION_0: u8 = 0x00;
    pub const DISCHARGE_DISABLED: u8 = 0x00;
    pub const REF_ON: u8 = 0x04;
    pub const GPIO1_PULL_DOWN_OFF: u8 = 0x08;
    pub const GPIO2_PULL_DOWN_OFF: u8 = 0x10;
    pub const GPIO3_PULL_DOWN_OFF: u8 = 0x20;
    pub const GPIO4_PULL_DOWN_OFF: u8 = 0x40;
    pub const GPIO5_PULL_DOWN_OFF: u8 = 0x80;
}

/// Configuration register group B, byte 0.
pub mod cfgb {
    pub const GPIO6_PULL_DOWN_OFF: u8 = 0x01;
    pub const GPIO7_PULL_DOWN_OFF: u8 = 0x02;
    pub const GPIO8_PULL_DOWN_OFF: u8 = 0x04;
    pub const GPIO9_PULL_DOWN_OFF: u8 = 0x08;
}

/// ADC conversion speed, added to the conversion command code.
///
/// The frequencies are the ones obtained with `ADC_OPTION_0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AdcMode {
    /// 422Hz
    Base = 0x000,
    /// 27kHz
    Fast = 0x080,
    /// 7kHz
    Normal = 0x100,
    /// 26Hz
    Filtered = 0x180,
}

/// Discharge permitted while converting cell voltages.
pub const DCP_PERMITTED: u16 = 0x10;

/// Control actions before each byte on the sub-bus (upper nibble of an even COMM byte).
pub mod icom {
    /// Generate a START followed by the data byte
    pub const START: u8 = 0x60;
    /// Generate a STOP
    pub const STOP: u8 = 0x10;
    /// Proceed directly to the data byte
    pub const BLANK: u8 = 0x00;
    /// Release SDA and SCL and ignore the rest of the data
    pub const NO_TRANSMIT: u8 = 0x70;
}

/// Control actions after each byte on the sub-bus (lower nibble of an odd COMM byte).
pub mod fcom {
    pub const ACK: u8 = 0x00;
    pub const NACK: u8 = 0x08;
    pub const NACK_STOP: u8 = 0x09;
}

/// Read/write bit of the sub-bus address, placed in the low nibble of the address byte.
pub const I2C_READ: u8 = 0x10;
pub const I2C_WRITE: u8 = 0x00;

/// Payload bytes carried for each device in a frame.
pub const BLOCK_SIZE: usize = 6;
/// Command word plus its PEC.
const HEADER_LENGTH: usize = 4;
/// Payload plus its PEC.
const BLOCK_STRIDE: usize = BLOCK_SIZE + 2;

const PEC_SEED: u16 = 16;

#[rustfmt::skip]
const PEC_TABLE: [u16; 256] = [
    0x0000, 0xc599, 0xceab, 0x0b32, 0xd8cf, 0x1d56, 0x1664, 0xd3fd, 0xf407, 0x319e, 0x3aac, 0xff35, 0x2cc8, 0xe951, 0xe263, 0x27fa,
    0xad97, 0x680e, 0x633c, 0xa6a5, 0x7558, 0xb0c1, 0xbbf3, 0x7e6a, 0x5990, 0x9c09, 0x973b, 0x52a2, 0x815f, 0x44c6, 0x4ff4, 0x8a6d,
    0x5b2e, 0x9eb7, 0x9585, 0x501c, 0x83e1, 0x4678, 0x4d4a, 0x88d3, 0xaf29, 0x6ab0, 0x6182, 0xa41b, 0x77e6, 0xb27f, 0xb94d, 0x7cd4,
    0xf6b9, 0x3320, 0x3812, 0xfd8b, 0x2e76, 0xebef, 0xe0dd, 0x2544, 0x02be, 0xc727, 0xcc15, 0x098c, 0xda71, 0x1fe8, 0x14da, 0xd143,
    0xf3c5, 0x365c, 0x3d6e, 0xf8f7, 0x2b0a, 0xee93, 0xe5a1, 0x2038, 0x07c2, 0xc25b, 0xc969, 0x0cf0, 0xdf0d, 0x1a94, 0x11a6, 0xd43f,
    0x5e52, 0x9bcb, 0x90f9, 0x5560, 0x869d, 0x4304, 0x4836, 0x8daf, 0xaa55, 0x6fcc, 0x64fe, 0xa167, 0x729a, 0xb703, 0xbc31, 0x79a8,
    0xa8eb, 0x6d72, 0x6640, 0xa3d9, 0x7024, 0xb5bd, 0xbe8f, 0x7b16, 0x5cec, 0x9975, 0x9247, 0x57de, 0x8423, 0x41ba, 0x4a88, 0x8f11,
    0x057c, 0xc0e5, 0xcbd7, 0x0e4e, 0xddb3, 0x182a, 0x1318, 0xd681, 0xf17b, 0x34e2, 0x3fd0, 0xfa49, 0x29b4, 0xec2d, 0xe71f, 0x2286,
    0xa213, 0x678a, 0x6cb8, 0xa921, 0x7adc, 0xbf45, 0xb477, 0x71ee, 0x5614, 0x938d, 0x98bf, 0x5d26, 0x8edb, 0x4b42, 0x4070, 0x85e9,
    0x0f84, 0xca1d, 0xc12f, 0x04b6, 0xd74b, 0x12d2, 0x19e0, 0xdc79, 0xfb83, 0x3e1a, 0x3528, 0xf0b1, 0x234c, 0xe6d5, 0xede7, 0x287e,
    0xf93d, 0x3ca4, 0x3796, 0xf20f, 0x21f2, 0xe46b, 0xef59, 0x2ac0, 0x0d3a, 0xc8a3, 0xc391, 0x0608, 0xd5f5, 0x106c, 0x1b5e, 0xdec7,
    0x54aa, 0x9133, 0x9a01, 0x5f98, 0x8c65, 0x49fc, 0x42ce, 0x8757, 0xa0ad, 0x6534, 0x6e06, 0xab9f, 0x7862, 0xbdfb, 0xb6c9, 0x7350,
    0x51d6, 0x944f, 0x9f7d, 0x5ae4, 0x8919, 0x4c80, 0x47b2, 0x822b, 0xa5d1, 0x6048, 0x6b7a, 0xaee3, 0x7d1e, 0xb887, 0xb3b5, 0x762c,
    0xfc41, 0x39d8, 0x32ea, 0xf773, 0x248e, 0xe117, 0xea25, 0x2fbc, 0x0846, 0xcddf, 0xc6ed, 0x0374, 0xd089, 0x1510, 0x1e22, 0xdbbb,
    0x0af8, 0xcf61, 0xc453, 0x01ca, 0xd237, 0x17ae, 0x1c9c, 0xd905, 0xfeff, 0x3b66, 0x3054, 0xf5cd, 0x2630, 0xe3a9, 0xe89b, 0x2d02,
    0xa76f, 0x62f6, 0x69c4, 0xac5d, 0x7fa0, 0xba39, 0xb10b, 0x7492, 0x5368, 0x96f1, 0x9dc3, 0x585a, 0x8ba7, 0x4e3e, 0x450c, 0x8095,
];

/// Calculates the 15 bit packet error code (shifted left by one) the LTC6813 expects after
/// every command and every data block.
pub fn calculate_pec(data: &[u8]) -> u16 {
    let mut remainder = PEC_SEED;
    for b in data {
        let index = ((remainder >> 7) as u8) ^ b;
        remainder = (remainder << 8) ^ PEC_TABLE[index as usize];
    }
    remainder << 1
}

/// Register groups that can be read back from every device in the chain.
///
/// The discriminant is the bank index used by [`crate::chain::Chain::read_adc_input_bank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBank {
    CellVoltageA = 0,
    CellVoltageB = 1,
    CellVoltageC = 2,
    CellVoltageD = 3,
    CellVoltageE = 4,
    CellVoltageF = 5,
    AuxiliaryA = 6,
    AuxiliaryB = 7,
    AuxiliaryC = 8,
    AuxiliaryD = 9,
    StatusA = 10,
}

impl RegisterBank {
    pub const CELL_VOLTAGES: [RegisterBank; 6] = [
        RegisterBank::CellVoltageA,
        RegisterBank::CellVoltageB,
        RegisterBank::CellVoltageC,
        RegisterBank::CellVoltageD,
        RegisterBank::CellVoltageE,
        RegisterBank::CellVoltageF,
    ];

    pub const AUXILIARY: [RegisterBank; 4] = [
        RegisterBank::AuxiliaryA,
        RegisterBank::AuxiliaryB,
        RegisterBank::AuxiliaryC,
        RegisterBank::AuxiliaryD,
    ];

    /// Maps a bank index onto a register group. Anything above 9 selects status group A.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => RegisterBank::CellVoltageA,
            1 => RegisterBank::CellVoltageB,
            2 => RegisterBank::CellVoltageC,
            3 => RegisterBank::CellVoltageD,
            4 => RegisterBank::CellVoltageE,
            5 => RegisterBank::CellVoltageF,
            6 => RegisterBank::AuxiliaryA,
            7 => RegisterBank::AuxiliaryB,
            8 => RegisterBank::AuxiliaryC,
            9 => RegisterBank::AuxiliaryD,
            _ => RegisterBank::StatusA,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn command(self) -> u16 {
        match self {
            RegisterBank::CellVoltageA => commands::RDCVA,
            RegisterBank::CellVoltageB => commands::RDCVB,
            RegisterBank::CellVoltageC => commands::RDCVC,
            RegisterBank::CellVoltageD => commands::RDCVD,
            RegisterBank::CellVoltageE => commands::RDCVE,
            RegisterBank::CellVoltageF => commands::RDCVF,
            RegisterBank::AuxiliaryA => commands::RDAUXA,
            RegisterBank::AuxiliaryB => commands::RDAUXB,
            RegisterBank::AuxiliaryC => commands::RDAUXC,
            RegisterBank::AuxiliaryD => commands::RDAUXD,
            RegisterBank::StatusA => commands::RDSTATA,
        }
    }
}

impl fmt::Display for RegisterBank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RegisterBank::CellVoltageA => "Cell Volts A",
            RegisterBank::CellVoltageB => "Cell Volts B",
            RegisterBank::CellVoltageC => "Cell Volts C",
            RegisterBank::CellVoltageD => "Cell Volts D",
            RegisterBank::CellVoltageE => "Cell Volts E",
            RegisterBank::CellVoltageF => "Cell Volts F",
            RegisterBank::AuxiliaryA => "Auxiliary A",
            RegisterBank::AuxiliaryB => "Auxiliary B",
            RegisterBank::AuxiliaryC => "Auxiliary C",
            RegisterBank::AuxiliaryD => "Auxiliary D",
            RegisterBank::StatusA => "Status A",
        };
        write!(f, "{} - {}", self.index(), name)
    }
}

/// The transmit/receive buffer shared by every transaction with the chain.
///
/// Layout: 2 byte command, 2 byte command PEC, then for each device 6 data bytes
/// followed by their 2 byte PEC. The transport overwrites the buffer in place with
/// the chain's response.
pub struct Frame {
    buffer: Vec<u8>,
    devices: usize,
}

impl Frame {
    pub fn new(devices: usize) -> Self {
        let mut frame = Self {
            buffer: vec![0; HEADER_LENGTH + devices * BLOCK_STRIDE],
            devices,
        };
        frame.clear();
        frame
    }

    /// Number of device blocks in the frame.
    pub fn devices(&self) -> usize {
        self.devices
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Zeroes the buffer and gives every block the PEC of an all zero payload so nothing
    /// from an earlier transaction leaks into the next command.
    pub fn clear(&mut self) {
        self.buffer.fill(0);
        for device in 0..self.devices {
            self.set_data(device, [0; BLOCK_SIZE]);
        }
    }

    /// Writes the command word followed by its PEC.
    pub fn set_command(&mut self, command: u16) {
        self.buffer[0..2].copy_from_slice(&command.to_be_bytes());
        let pec = self.calculate_command_pec();
        self.buffer[2..4].copy_from_slice(&pec.to_be_bytes());
    }

    pub fn command(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    /// Writes the data block for one device followed by its PEC.
    pub fn set_data(&mut self, device: usize, data: [u8; BLOCK_SIZE]) {
        let start = Self::block_start(device);
        self.buffer[start..start + BLOCK_SIZE].copy_from_slice(&data);
        let pec = calculate_pec(&data);
        self.buffer[start + BLOCK_SIZE..start + BLOCK_STRIDE].copy_from_slice(&pec.to_be_bytes());
    }

    /// Writes the same data block for every device.
    pub fn fill_data(&mut self, data: [u8; BLOCK_SIZE]) {
        for device in 0..self.devices {
            self.set_data(device, data);
        }
    }

    pub fn data(&self, device: usize) -> [u8; BLOCK_SIZE] {
        let start = Self::block_start(device);
        let mut data = [0; BLOCK_SIZE];
        data.copy_from_slice(&self.buffer[start..start + BLOCK_SIZE]);
        data
    }

    /// Little endian register word `index` (0..3) of a device's block.
    pub fn word(&self, device: usize, index: usize) -> u16 {
        let start = Self::block_start(device) + index * 2;
        u16::from_le_bytes([self.buffer[start], self.buffer[start + 1]])
    }

    /// Byte `offset` (0..3) carried in a device's communication register block. Each byte
    /// is split across the low nibble of an even byte and the high nibble of the next one.
    pub fn comm_byte(&self, device: usize, offset: usize) -> u8 {
        let data = self.data(device);
        (data[offset * 2] << 4) | (data[offset * 2 + 1] >> 4)
    }

    pub fn command_pec(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn data_pec(&self, device: usize) -> u16 {
        let start = Self::block_start(device) + BLOCK_SIZE;
        u16::from_be_bytes([self.buffer[start], self.buffer[start + 1]])
    }

    fn calculate_command_pec(&self) -> u16 {
        calculate_pec(&self.buffer[0..2])
    }

    fn calculate_data_pec(&self, device: usize) -> u16 {
        let start = Self::block_start(device);
        calculate_pec(&self.buffer[start..start + BLOCK_SIZE])
    }

    /// Verifies the command PEC (optionally) and the PEC of every device block.
    pub fn check_pec(&self, context: &str, check_command: bool) -> Result<()> {
        if check_command {
            let calculated = self.calculate_command_pec();
            let received = self.command_pec();
            if received != calculated {
                log::warn!(
                    "Invalid command PEC - calculated={calculated:04X} received={received:04X}"
                );
                return Err(Error::CommandPec {
                    received,
                    calculated,
                });
            }
        }
        for device in 0..self.devices {
            let calculated = self.calculate_data_pec(device);
            let received = self.data_pec(device);
            if received != calculated {
                log::warn!(
                    "Invalid data PEC - device={device} calculated={calculated:04X} received={received:04X} block={:02X?}",
                    self.data(device)
                );
                return Err(Error::DataPec {
                    device,
                    block: self.data(device),
                    received,
                    calculated,
                    context: context.to_string(),
                });
            }
        }
        Ok(())
    }

    fn block_start(device: usize) -> usize {
        HEADER_LENGTH + device * BLOCK_STRIDE
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.buffer)
    }
}
