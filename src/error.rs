/// Errors reported by the LTC6813 chain driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed to exchange the frame with the chain.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The SPI peripheral reported an error.
    #[cfg(feature = "rppal")]
    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),
    /// The PEC returned with the command did not match the command bytes.
    #[error("PEC error in command - received={received:04X} calculated={calculated:04X}")]
    CommandPec { received: u16, calculated: u16 },
    /// A device's data block failed its PEC check.
    #[error(
        "PEC error in data block {device} {block:02X?} received={received:04X} calculated={calculated:04X} {context}"
    )]
    DataPec {
        device: usize,
        block: [u8; 6],
        received: u16,
        calculated: u16,
        context: String,
    },
    /// A thermistor reading is outside the plausible range (sensor unplugged or shorted).
    #[error("sensor reading {0} out of range")]
    SensorRange(u16),
    /// A cached temperature is outside the plausible range.
    #[error("temperature {0} out of range")]
    TemperatureRange(f32),
    /// The configured SPI bus or slave select line does not exist on the host.
    #[error("SPI bus {bus} slave select {slave_select} is not supported")]
    UnsupportedSpi { bus: u8, slave_select: u8 },
    #[error("device {index} is not part of a chain of {length}")]
    DeviceIndex { index: usize, length: usize },
}

/// A specialized `Result` type for chain operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true when the error came from the physical link rather than from frame contents.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Io(_) => true,
            #[cfg(feature = "rppal")]
            Error::Spi(_) => true,
            _ => false,
        }
    }
}
