//! SPI transport for a Raspberry Pi talking to the chain through an LTC6820 isoSPI bridge.

use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

pub struct RppalSpi {
    spi: Spi,
}

impl RppalSpi {
    /// Opens `/dev/spidev<bus>.<slave_select>` in SPI mode 0.
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let (bus, slave_select) = spi_device(config)?;
        log::debug!(
            "Opening SPI bus={bus:?} slave_select={slave_select:?} clock={}Hz",
            config.spi_clock_speed
        );
        let spi = Spi::new(bus, slave_select, config.spi_clock_speed, Mode::Mode0)?;
        Ok(Self { spi })
    }
}

fn spi_device(config: &ChainConfig) -> Result<(Bus, SlaveSelect)> {
    let bus = match config.spi_bus {
        0 => Some(Bus::Spi0),
        1 => Some(Bus::Spi1),
        2 => Some(Bus::Spi2),
        3 => Some(Bus::Spi3),
        4 => Some(Bus::Spi4),
        5 => Some(Bus::Spi5),
        6 => Some(Bus::Spi6),
        _ => None,
    };
    let slave_select = match config.spi_slave_select {
        0 => Some(SlaveSelect::Ss0),
        1 => Some(SlaveSelect::Ss1),
        2 => Some(SlaveSelect::Ss2),
        _ => None,
    };
    bus.zip(slave_select).ok_or(Error::UnsupportedSpi {
        bus: config.spi_bus,
        slave_select: config.spi_slave_select,
    })
}

impl Transport for RppalSpi {
    fn transfer(&mut self, buffer: &mut [u8]) -> Result<()> {
        let write_buffer = buffer.to_vec();
        self.spi.transfer(buffer, &write_buffer)?;
        Ok(())
    }
}
