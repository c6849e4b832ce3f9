use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use ltc6813_lib::config::ChainConfig;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Measure cell voltages and sum of cells, and show them per device with the bank totals
    Voltages,
    /// Run a full rotation of the thermistor multiplexer and show all temperatures
    Temperatures,
    /// Measure voltages and all temperatures and print the snapshot as JSON
    Snapshot,
    /// Show configuration register group A of every device
    Config,
    /// Read a register from the I2C device behind a chain device
    I2cRead {
        /// Index of the device in the chain
        device: usize,
        /// Register to read (e.g. 8 or 0x08)
        #[arg(value_parser = maybe_hex::<u8>)]
        register: u8,
        /// 8 bit I2C address in the top 7 bits (e.g. 0xC8 for the LTC2944)
        #[arg(long, value_parser = maybe_hex::<u8>, default_value = "0xC8")]
        address: u8,
        /// Read two consecutive registers, MSB first
        #[clap(long, short, action)]
        word: bool,
    },
    /// Write a register of the I2C device behind a chain device
    I2cWrite {
        /// Index of the device in the chain
        device: usize,
        /// Register to write (e.g. 1 or 0x01)
        #[arg(value_parser = maybe_hex::<u8>)]
        register: u8,
        /// Value to write (e.g. 248 or 0xF8)
        #[arg(value_parser = maybe_hex::<u16>)]
        value: u16,
        /// 8 bit I2C address in the top 7 bits (e.g. 0xC8 for the LTC2944)
        #[arg(long, value_parser = maybe_hex::<u8>, default_value = "0xC8")]
        address: u8,
        /// Write the value as a 16 bit word to two consecutive registers
        #[clap(long, short, action)]
        word: bool,
    },
    /// Show temperature, current, voltage and accumulated charge of an LTC2944 fuel gauge
    FuelGauge {
        /// Index of the device in the chain
        device: usize,
    },
    /// Run in daemon mode, periodically measuring the chain and outputting snapshots
    Daemon {
        /// Output destination for snapshots
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between measurement cycles (e.g., "1s", "500ms")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "1s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously measure and print the snapshots to the standard output (console).
    Console,
    /// Continuously measure and publish the snapshots to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Json)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "LTC6813 battery monitor command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Number of LTC6813 devices in the daisy chain
    #[arg(long, default_value_t = ChainConfig::DEFAULT_CHAIN_LENGTH)]
    pub devices: usize,

    /// SPI bus the isoSPI bridge is connected to (/dev/spidev<bus>.<slave-select>)
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=6))]
    pub bus: u8,

    /// SPI slave select line of the isoSPI bridge
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(0..=2))]
    pub slave_select: u8,

    /// SPI clock speed in Hz
    #[arg(long, default_value = "1000000")]
    pub clock_speed: u32,
}

impl CliArgs {
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            chain_length: self.devices,
            spi_bus: self.bus,
            spi_slave_select: self.slave_select,
            spi_clock_speed: self.clock_speed,
        }
    }
}
