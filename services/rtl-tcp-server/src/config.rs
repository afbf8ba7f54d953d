//! Configuration loaded from environment variables

use std::str::FromStr;

use crate::host::{SdrError, SdrTcpArguments};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to rtl_sdr executable
    pub rtl_sdr_path: String,

    /// RTL-SDR device index
    pub device_index: u32,

    /// Raw rtl_tcp-style argument string, overrides the fields below
    pub rtl_tcp_args: Option<String>,

    /// Address to listen on
    pub bind_address: String,

    pub port: u16,

    /// Sample rate in Hz
    pub sample_rate: u64,

    /// Center frequency in Hz
    pub frequency: u64,

    /// Tuner gain in tenths of a dB (use 0 for auto)
    pub gain: i32,

    /// PPM frequency correction
    pub ppm: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtl_sdr_path: "rtl_sdr".to_string(),
            device_index: 0,
            rtl_tcp_args: None,
            bind_address: "127.0.0.1".to_string(),
            port: 1234,
            sample_rate: 2_048_000,
            frequency: 100_000_000,
            gain: 24,
            ppm: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            rtl_sdr_path: get("RTL_SDR_PATH").unwrap_or(defaults.rtl_sdr_path),

            device_index: parsed(&get, "DEVICE_INDEX").unwrap_or(defaults.device_index),

            rtl_tcp_args: get("RTL_TCP_ARGS").filter(|s| !s.trim().is_empty()),

            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),

            port: parsed(&get, "PORT").unwrap_or(defaults.port),

            sample_rate: parsed(&get, "SAMPLE_RATE").unwrap_or(defaults.sample_rate),

            frequency: parsed(&get, "FREQUENCY").unwrap_or(defaults.frequency),

            gain: parsed(&get, "GAIN").unwrap_or(defaults.gain),

            ppm: parsed(&get, "PPM").unwrap_or(defaults.ppm),
        }
    }

    /// Session arguments, from `RTL_TCP_ARGS` when set
    pub fn session_arguments(&self) -> Result<SdrTcpArguments, SdrError> {
        match &self.rtl_tcp_args {
            Some(raw) => SdrTcpArguments::parse(raw),
            None => Ok(SdrTcpArguments {
                gain: self.gain,
                sample_rate_hz: self.sample_rate,
                frequency_hz: self.frequency,
                address: self.bind_address.clone(),
                port: self.port,
                ppm: self.ppm,
            }),
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}
