use serde::Deserialize;
use std::time::Duration;

/// Where the chain is attached and how many devices it has.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChainConfig {
    #[serde(default = "ChainConfig::default_chain_length")]
    pub chain_length: usize,
    #[serde(default)]
    pub spi_bus: u8,
    #[serde(default = "ChainConfig::default_slave_select")]
    pub spi_slave_select: u8,
    #[serde(default = "ChainConfig::default_clock_speed")]
    pub spi_clock_speed: u32,
}

impl ChainConfig {
    /// Two banks of three devices each.
    pub const DEFAULT_CHAIN_LENGTH: usize = 6;

    fn default_chain_length() -> usize {
        Self::DEFAULT_CHAIN_LENGTH
    }

    fn default_slave_select() -> u8 {
        1
    }

    fn default_clock_speed() -> u32 {
        1_000_000
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_length: Self::default_chain_length(),
            spi_bus: 0,
            spi_slave_select: Self::default_slave_select(),
            spi_clock_speed: Self::default_clock_speed(),
        }
    }
}

/// Settings of the periodic measurement worker.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Time from the start of one measurement cycle to the start of the next.
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_spidev0_1_with_six_devices() {
        let config: ChainConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ChainConfig::default());
        assert_eq!(config.chain_length, 6);
        assert_eq!(config.spi_bus, 0);
        assert_eq!(config.spi_slave_select, 1);
        assert_eq!(config.spi_clock_speed, 1_000_000);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let config: ChainConfig =
            serde_json::from_str(r#"{"chain_length": 3, "spi_slave_select": 0}"#).unwrap();
        assert_eq!(config.chain_length, 3);
        assert_eq!(config.spi_slave_select, 0);
        assert_eq!(config.spi_clock_speed, 1_000_000);
    }

    #[test]
    fn monitor_measures_once_a_second_by_default() {
        assert_eq!(MonitorConfig::default().interval, Duration::from_secs(1));
    }
}
