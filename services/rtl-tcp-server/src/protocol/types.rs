//! rtl-tcp wire records

/// Magic announced by RTL2832-based dongles
pub const RTL_MAGIC: [u8; 4] = *b"RTL0";

/// Serialized size of [`DongleInfo`]
pub const DONGLE_INFO_LEN: usize = 12;

/// Serialized size of [`CommandRecord`]
pub const COMMAND_LEN: usize = 5;

/// Tuner chips as numbered by librtlsdr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TunerType {
    Unknown = 0,
    E4000 = 1,
    Fc0012 = 2,
    Fc0013 = 3,
    Fc2580 = 4,
    R820t = 5,
    R828d = 6,
}

impl TunerType {
    /// Match the tuner name printed by the rtl-sdr tools
    /// (e.g. "Rafael Micro R820T")
    pub fn from_name(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        if upper.contains("E4000") {
            Self::E4000
        } else if upper.contains("FC0012") {
            Self::Fc0012
        } else if upper.contains("FC0013") {
            Self::Fc0013
        } else if upper.contains("FC2580") {
            Self::Fc2580
        } else if upper.contains("R820T") {
            Self::R820t
        } else if upper.contains("R828D") {
            Self::R828d
        } else {
            Self::Unknown
        }
    }
}

/// 12-byte preamble sent once to every client before any samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DongleInfo {
    pub magic: [u8; 4],
    pub tuner_type: u32,
    pub gain_count: u32,
}

impl DongleInfo {
    pub fn new(magic: [u8; 4], tuner_type: u32, gain_count: u32) -> Self {
        Self {
            magic,
            tuner_type,
            gain_count,
        }
    }

    /// Header for an RTL2832 dongle
    pub fn rtl(tuner_type: u32, gain_count: u32) -> Self {
        Self::new(RTL_MAGIC, tuner_type, gain_count)
    }

    /// Magic followed by big-endian tuner type and gain count
    pub fn to_bytes(&self) -> [u8; DONGLE_INFO_LEN] {
        let mut out = [0u8; DONGLE_INFO_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.tuner_type.to_be_bytes());
        out[8..12].copy_from_slice(&self.gain_count.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; DONGLE_INFO_LEN]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            tuner_type: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            gain_count: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

/// Packed 5-byte client command: opcode + big-endian parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub opcode: u8,
    pub parameter: u32,
}

impl CommandRecord {
    pub fn new(opcode: u8, parameter: u32) -> Self {
        Self { opcode, parameter }
    }

    /// Decode from wire bytes, parameter converted to host order
    pub fn from_bytes(bytes: [u8; COMMAND_LEN]) -> Self {
        Self {
            opcode: bytes[0],
            parameter: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; COMMAND_LEN] {
        let p = self.parameter.to_be_bytes();
        [self.opcode, p[0], p[1], p[2], p[3]]
    }

    /// Hex dump for logs
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}
