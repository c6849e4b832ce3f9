//! A simulated LTC6813 daisy chain with an LTC2944 behind every device.

#![allow(dead_code)]

use ltc6813_lib::protocol::{calculate_pec, commands, BLOCK_SIZE};
use ltc6813_lib::transport::Transport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

const HEADER: usize = 4;
const STRIDE: usize = BLOCK_SIZE + 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    /// The frame transfer itself fails
    Transport,
    /// The answer of a device arrives with one payload bit flipped
    CorruptPec(usize),
}

#[derive(Debug, Default, Clone, Copy)]
struct I2cSession {
    addressed: bool,
    read: bool,
    pointer_set: bool,
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    pub cells: [u16; 18],
    pub sum_of_cells: u16,
    /// Raw thermistor codes by temperature channel
    pub thermistors: [u16; 18],
    pub reference: u16,
    pub config_a: [u8; BLOCK_SIZE],
    pub config_b: [u8; BLOCK_SIZE],
    pub comm: [u8; BLOCK_SIZE],
    /// LTC2944 register file
    pub fuel_gauge: [u8; 0x18],
    pointer: u8,
    session: I2cSession,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self {
            cells: [0; 18],
            sum_of_cells: 0,
            thermistors: [15000; 18],
            reference: 30000,
            config_a: [0; BLOCK_SIZE],
            config_b: [0; BLOCK_SIZE],
            comm: [0; BLOCK_SIZE],
            fuel_gauge: [0; 0x18],
            pointer: 0,
            session: I2cSession::default(),
        }
    }
}

impl SimDevice {
    /// Multiplexer position selected through GPIO7..9.
    pub fn mux(&self) -> usize {
        ((self.config_b[0] >> 1) & 0x07) as usize
    }

    fn gpio(&self) -> [u16; 9] {
        let mux = self.mux();
        [
            self.thermistors[mux],
            self.thermistors[mux + 8],
            self.thermistors[16],
            0,
            0,
            self.thermistors[17],
            0,
            0,
            0,
        ]
    }

    fn words(words: [u16; 3]) -> [u8; BLOCK_SIZE] {
        let mut block = [0; BLOCK_SIZE];
        for (i, w) in words.iter().enumerate() {
            block[i * 2..i * 2 + 2].copy_from_slice(&w.to_le_bytes());
        }
        block
    }

    fn read(&self, command: u16) -> Option<[u8; BLOCK_SIZE]> {
        let cells = |first: usize| {
            Self::words([
                self.cells[first],
                self.cells[first + 1],
                self.cells[first + 2],
            ])
        };
        let gpio = self.gpio();
        Some(match command {
            commands::RDCVA => cells(0),
            commands::RDCVB => cells(3),
            commands::RDCVC => cells(6),
            commands::RDCVD => cells(9),
            commands::RDCVE => cells(12),
            commands::RDCVF => cells(15),
            commands::RDAUXA => Self::words([gpio[0], gpio[1], gpio[2]]),
            commands::RDAUXB => Self::words([gpio[3], gpio[4], self.reference]),
            commands::RDAUXC => Self::words([gpio[5], gpio[6], gpio[7]]),
            commands::RDAUXD => Self::words([gpio[8], 0, 0]),
            commands::RDSTATA => Self::words([self.sum_of_cells, 0, 0]),
            commands::RDCFGA => self.config_a,
            commands::RDCOMM => self.comm,
            _ => return None,
        })
    }

    /// Runs the staged COMM group on the I2C port, replacing read placeholders with the
    /// bytes the fuel gauge returns.
    fn run_comm(&mut self) {
        for pair in 0..3 {
            let high = self.comm[pair * 2];
            let low = self.comm[pair * 2 + 1];
            let icom = high & 0xF0;
            let data = (high << 4) | (low >> 4);
            let fcom = low & 0x0F;
            match icom {
                0x70 => break,
                0x10 => {
                    self.session = I2cSession::default();
                    break;
                }
                0x60 => {
                    self.session = I2cSession {
                        addressed: data & 0xFE == 0xC8,
                        read: data & 0x01 == 0x01,
                        pointer_set: self.session.pointer_set && data & 0x01 == 0x01,
                    };
                }
                _ if !self.session.addressed => {}
                _ if self.session.read => {
                    let value = self.fuel_gauge[self.pointer as usize % 0x18];
                    self.pointer = self.pointer.wrapping_add(1);
                    self.comm[pair * 2] = icom | (value >> 4);
                    self.comm[pair * 2 + 1] = (value << 4) | fcom;
                }
                _ if !self.session.pointer_set => {
                    self.pointer = data;
                    self.session.pointer_set = true;
                }
                _ => {
                    self.fuel_gauge[self.pointer as usize % 0x18] = data;
                    self.pointer = self.pointer.wrapping_add(1);
                }
            }
            if fcom == 0x09 {
                self.session = I2cSession::default();
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct ChainState {
    pub devices: Vec<SimDevice>,
    /// Every frame as it was sent, before the chain answered
    pub frames: Vec<Vec<u8>>,
    pub wake_bytes: usize,
    faults: VecDeque<(u16, Fault, usize)>,
}

impl ChainState {
    /// Makes the next `times` transfers of `command` misbehave.
    pub fn fail(&mut self, command: u16, fault: Fault, times: usize) {
        self.faults.push_back((command, fault, times));
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    pub fn commands(&self) -> Vec<u16> {
        self.frames
            .iter()
            .map(|f| u16::from_be_bytes([f[0], f[1]]))
            .collect()
    }

    fn take_fault(&mut self, command: u16) -> Option<Fault> {
        let index = self.faults.iter().position(|(c, _, _)| *c == command)?;
        let (_, fault, times) = &mut self.faults[index];
        let fault = *fault;
        *times -= 1;
        if *times == 0 {
            self.faults.remove(index);
        }
        Some(fault)
    }

    fn exchange(&mut self, buffer: &mut [u8]) -> std::io::Result<()> {
        self.frames.push(buffer.to_vec());
        let command = u16::from_be_bytes([buffer[0], buffer[1]]);
        assert_eq!(
            u16::from_be_bytes([buffer[2], buffer[3]]),
            calculate_pec(&buffer[0..2]),
            "command PEC of {command:03X}"
        );
        let fault = self.take_fault(command);
        if fault == Some(Fault::Transport) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated isoSPI failure",
            ));
        }

        let block = |buffer: &[u8], device: usize| {
            let start = HEADER + device * STRIDE;
            let mut data = [0; BLOCK_SIZE];
            data.copy_from_slice(&buffer[start..start + BLOCK_SIZE]);
            data
        };
        for (device, sim) in self.devices.iter_mut().enumerate() {
            match command {
                commands::WRCFGA => sim.config_a = block(buffer, device),
                commands::WRCFGB => sim.config_b = block(buffer, device),
                commands::WRCOMM => sim.comm = block(buffer, device),
                commands::STCOMM => sim.run_comm(),
                _ => {}
            }
            if let Some(answer) = sim.read(command) {
                let start = HEADER + device * STRIDE;
                buffer[start..start + BLOCK_SIZE].copy_from_slice(&answer);
                buffer[start + BLOCK_SIZE..start + STRIDE]
                    .copy_from_slice(&calculate_pec(&answer).to_be_bytes());
            }
        }
        if let Some(Fault::CorruptPec(device)) = fault {
            buffer[HEADER + device * STRIDE] ^= 0x01;
        }
        Ok(())
    }
}

/// Handle to the simulated chain. Clones share the same devices so a test can keep one
/// while the driver owns another.
#[derive(Clone)]
pub struct SimulatedChain {
    state: Arc<Mutex<ChainState>>,
}

impl SimulatedChain {
    pub fn new(length: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                devices: vec![SimDevice::default(); length],
                frames: Vec::new(),
                wake_bytes: 0,
                faults: VecDeque::new(),
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }
}

impl Transport for SimulatedChain {
    fn transfer(&mut self, buffer: &mut [u8]) -> ltc6813_lib::Result<()> {
        let mut state = self.state();
        if buffer.len() == 1 {
            state.wake_bytes += 1;
            return Ok(());
        }
        state.exchange(buffer)?;
        Ok(())
    }
}
