//! rtl_tcp-style argument strings: `-a 127.0.0.1 -p 1234 -f 100000000 ...`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::SdrError;

const MAX_ADDRESS_LEN: usize = 256;

pub const DEFAULT_GAIN: i32 = 24;
pub const DEFAULT_PPM: i32 = 0;
pub const DEFAULT_FREQUENCY: u64 = 100_000_000;
pub const DEFAULT_SAMPLE_RATE: u64 = 2_048_000;

/// Session parameters handed over by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdrTcpArguments {
    /// Tenths of a dB, 0 = automatic
    pub gain: i32,
    pub sample_rate_hz: u64,
    pub frequency_hz: u64,
    pub address: String,
    pub port: u16,
    pub ppm: i32,
}

impl SdrTcpArguments {
    /// Parse `-flag value` pairs. `-a` and `-p` are required.
    pub fn parse(raw: &str) -> Result<Self, SdrError> {
        let args = ArgumentMap::parse(raw)?;

        let address = args.required("a")?.to_string();
        if address.chars().count() >= MAX_ADDRESS_LEN {
            return Err(SdrError::wrong_arguments(format!(
                "address must be shorter than {} characters",
                MAX_ADDRESS_LEN
            )));
        }

        Ok(Self {
            gain: args.number_or("g", DEFAULT_GAIN)?,
            sample_rate_hz: args.number_or("s", DEFAULT_SAMPLE_RATE)?,
            frequency_hz: args.number_or("f", DEFAULT_FREQUENCY)?,
            port: args.number(args.required("p")?, "p")?,
            ppm: args.number_or("P", DEFAULT_PPM)?,
            address,
        })
    }
}

impl fmt::Display for SdrTcpArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-a \"{}\" -p {} -f {} -s {} -g {} -P {}",
            self.address, self.port, self.frequency_hz, self.sample_rate_hz, self.gain, self.ppm
        )
    }
}

/// Flag name (without the dash) to raw value
struct ArgumentMap {
    values: HashMap<String, String>,
}

impl ArgumentMap {
    fn parse(raw: &str) -> Result<Self, SdrError> {
        let tokens = split_ignoring_quotes(raw);
        let mut values = HashMap::new();

        for pair in tokens.chunks(2) {
            let flag = pair[0].trim();
            let Some(value) = pair.get(1) else {
                return Err(SdrError::wrong_arguments(format!("no value for argument {}", flag)));
            };
            let Some(name) = flag.strip_prefix('-') else {
                return Err(SdrError::wrong_arguments(format!(
                    "argument {} must start with a dash",
                    flag
                )));
            };
            if name.is_empty() {
                return Err(SdrError::wrong_arguments("missing argument after dash"));
            }
            values.insert(name.to_string(), unquote(value.trim()).to_string());
        }

        Ok(Self { values })
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn required(&self, name: &str) -> Result<&str, SdrError> {
        self.get(name)
            .ok_or_else(|| SdrError::wrong_arguments(format!("expected argument '-{}'", name)))
    }

    fn number<T: FromStr>(&self, value: &str, name: &str) -> Result<T, SdrError> {
        value.parse().map_err(|_| {
            SdrError::wrong_arguments(format!("invalid number '{}' for argument '-{}'", value, name))
        })
    }

    fn number_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, SdrError> {
        match self.get(name) {
            Some(value) => self.number(value, name),
            None => Ok(default),
        }
    }
}

/// Split on spaces outside quotes; quote characters of the active kind are
/// dropped, the other kind is kept verbatim.
fn split_ignoring_quotes(raw: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut quote: Option<char> = None;
    let mut current = String::new();

    for c in raw.chars() {
        match (c, quote) {
            ('\'' | '"', None) => quote = Some(c),
            ('\'' | '"', Some(q)) if q == c => quote = None,
            (' ', None) => {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
