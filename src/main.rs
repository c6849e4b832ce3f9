use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use ltc6813_lib::chain::SENSOR_POSITIONS;
use ltc6813_lib::config::MonitorConfig;
use ltc6813_lib::rppal_spi::RppalSpi;
use ltc6813_lib::Chain;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_voltages(chain: &Chain<RppalSpi>) {
    for device in 0..chain.chain_length() {
        let cells: Vec<String> = chain
            .cell_volts(device)
            .iter()
            .map(|&raw| format!("{:.4}", raw as f32 / 10000.0))
            .collect();
        println!(
            "Device {device}: sum of cells {:.2}V, cells [{}]",
            chain.sum_of_cells_volts(device),
            cells.join(", ")
        );
    }
    let [first, second] = chain.bank_totals();
    println!("Bank totals: {first:.2}V {second:.2}V");
    println!("Active battery voltage: {:.2}V", chain.active_battery_voltage());
}

fn print_temperatures(chain: &Chain<RppalSpi>) {
    for device in 0..chain.chain_length() {
        println!(
            "Device {device}: {:?}",
            chain.bank_temperatures(device)
        );
    }
    println!("Max temperature: {:.1}°C", chain.max_temperature());
}

fn measure_all_temperatures(chain: &Chain<RppalSpi>) -> Result<()> {
    for _ in 0..SENSOR_POSITIONS {
        chain
            .measure_temperatures()
            .with_context(|| "Cannot measure temperatures")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = args.chain_config();
    let spi = RppalSpi::new(&config).with_context(|| {
        format!(
            "Cannot open SPI bus {} slave select {}",
            config.spi_bus, config.spi_slave_select
        )
    })?;
    let chain = Chain::new(spi, config.chain_length);

    match args.command {
        CliCommands::Voltages => {
            chain.initialise().with_context(|| "Cannot initialise chain")?;
            chain
                .measure_voltages_sc()
                .with_context(|| "Cannot measure voltages")?;
            print_voltages(&chain);
        }
        CliCommands::Temperatures => {
            chain.initialise().with_context(|| "Cannot initialise chain")?;
            measure_all_temperatures(&chain)?;
            print_temperatures(&chain);
        }
        CliCommands::Snapshot => {
            chain.initialise().with_context(|| "Cannot initialise chain")?;
            if let Err(e) = chain.measure_voltages_sc() {
                warn!("Cannot measure voltages: {e}");
            }
            if let Err(e) = measure_all_temperatures(&chain) {
                warn!("{e:#}");
            }
            println!("{}", serde_json::to_string_pretty(&chain.snapshot())?);
        }
        CliCommands::Config => {
            for (device, block) in chain
                .read_config_register()
                .with_context(|| "Cannot read configuration register")?
                .iter()
                .enumerate()
            {
                println!("Device {device}: {block:02X?}");
            }
        }
        CliCommands::I2cRead {
            device,
            register,
            address,
            word,
        } => {
            let response = if word {
                chain.read_i2c_word(device, address, register)
            } else {
                chain.read_i2c_byte(device, address, register)
            }
            .with_context(|| format!("Cannot read register {register:#04x} behind device {device}"))?;
            println!("{response}");
        }
        CliCommands::I2cWrite {
            device,
            register,
            value,
            address,
            word,
        } => {
            if word {
                chain.write_i2c_word(device, address, register, value)
            } else {
                let Ok(value) = u8::try_from(value) else {
                    bail!("Value {value:#x} does not fit into a byte, use --word");
                };
                chain.write_i2c_byte(device, address, register, value)
            }
            .with_context(|| format!("Cannot write register {register:#04x} behind device {device}"))?;
        }
        CliCommands::FuelGauge { device } => {
            println!(
                "Temperature: {:.2}°C",
                chain
                    .i2c_temperature(device)
                    .with_context(|| "Cannot read fuel gauge temperature")?
            );
            println!(
                "Current sense: {:.4}V",
                chain
                    .i2c_current(device)
                    .with_context(|| "Cannot read fuel gauge current")?
            );
            println!(
                "Voltage: {:.3}V",
                chain
                    .i2c_voltage(device)
                    .with_context(|| "Cannot read fuel gauge voltage")?
            );
            println!(
                "Accumulated charge: {}",
                chain
                    .i2c_accumulated_charge(device)
                    .with_context(|| "Cannot read fuel gauge accumulated charge")?
            );
        }
        CliCommands::Daemon { output, interval } => {
            daemon::run(chain, output, MonitorConfig { interval })?
        }
    }

    Ok(())
}
