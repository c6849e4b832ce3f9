#![cfg_attr(docsrs, feature(doc_cfg))]
//! # ltc6813_lib
//!
//! This crate provides a driver for a daisy chain of LTC6813 battery stack monitors.
//! It measures cell voltages and thermistor temperatures across the chain, talks to
//! LTC2944 fuel gauges wired to each device's I2C port and aggregates the readings into
//! whole-battery snapshots.
//!
//! ## Features
//!
//! The driver itself only needs a [`transport::Transport`]. Hardware transports are
//! feature gated to keep dependencies minimal.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `ltc6813bms` command-line tool.
//!
//! ### Transport Features
//! - `rppal`: Enables the SPI transport for the Raspberry Pi using the `rppal` crate.
//!
//! ### Utility Features
//! - `bin-dependencies`: Enables all features required by the `ltc6813bms` binary executable (currently `rppal`).

/// Contains error types for the library.
mod error;
/// Frame layout, command codes and PEC of the LTC6813 protocol.
pub mod protocol;
/// Byte level link to the chain.
pub mod transport;
/// Per-device register contents and thermistor conversion.
pub mod reading;
/// Chain location and measurement settings.
pub mod config;
/// The chain driver.
pub mod chain;
/// I2C tunnelled through the devices' communication registers.
pub mod i2c;
/// Bank totals and snapshots.
pub mod aggregate;
/// Latest snapshot hand-off between threads.
pub mod notify;
/// Periodic measurement cycle.
pub mod monitor;

pub use aggregate::Snapshot;
pub use chain::Chain;
pub use error::{Error, Result};
pub use monitor::Monitor;
pub use notify::LatestSnapshot;

/// SPI transport for the Raspberry Pi.
#[cfg_attr(docsrs, doc(cfg(feature = "rppal")))]
#[cfg(feature = "rppal")]
pub mod rppal_spi;
