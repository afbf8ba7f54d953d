//! Tuner device abstraction
//!
//! [`SdrDevice`] is the driver surface the server needs; [`DeviceAdapter`]
//! bridges server callbacks onto it and [`RtlSdrProcess`] drives a real
//! dongle through the `rtl_sdr` tool.

mod adapter;
mod process;

pub use adapter::DeviceAdapter;
pub use process::{
    parse_probe_output, tuner_gain_table, CaptureStats, ProbeInfo, RtlSdrProcess, RtlSdrSettings,
};

#[cfg(test)]
pub(crate) use adapter::tests::MockDevice;

use std::io;
use thiserror::Error;

/// libusb error codes reported by the driver
pub mod usb {
    pub const ERROR_IO: i32 = -1;
    pub const ERROR_INVALID_PARAM: i32 = -2;
    pub const ERROR_ACCESS: i32 = -3;
    pub const ERROR_NO_DEVICE: i32 = -4;
    pub const ERROR_NOT_FOUND: i32 = -5;
    pub const ERROR_BUSY: i32 = -6;
    pub const ERROR_TIMEOUT: i32 = -7;
    pub const ERROR_OVERFLOW: i32 = -8;
    pub const ERROR_PIPE: i32 = -9;
    pub const ERROR_INTERRUPTED: i32 = -10;
    pub const ERROR_NO_MEM: i32 = -11;
    pub const ERROR_NOT_SUPPORTED: i32 = -12;
    pub const ERROR_OTHER: i32 = -99;
}

/// Device errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("usb error {0}")]
    Usb(i32),

    #[error("no supported devices found")]
    NoDevices,

    #[error("{0} is not supported by this device")]
    Unsupported(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("device process failed: {0}")]
    Process(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl DeviceError {
    /// libusb-style code, if the failure came from the USB layer
    pub fn usb_code(&self) -> Option<i32> {
        match self {
            Self::Usb(code) => Some(*code),
            Self::NoDevices => Some(usb::ERROR_NO_DEVICE),
            _ => None,
        }
    }
}

/// Operations the server drives on a tuner.
///
/// Gains are in tenths of a dB. All methods take `&self` since commands
/// arrive on the command thread while `read_async` blocks another thread.
pub trait SdrDevice: Send + Sync {
    fn set_sample_rate(&self, rate: u32) -> Result<(), DeviceError>;
    fn set_center_freq(&self, freq: u32) -> Result<(), DeviceError>;
    /// `manual == false` selects automatic gain
    fn set_tuner_gain_mode(&self, manual: bool) -> Result<(), DeviceError>;
    fn set_tuner_gain(&self, gain: i32) -> Result<(), DeviceError>;
    fn set_freq_correction(&self, ppm: i32) -> Result<(), DeviceError>;
    fn set_tuner_if_gain(&self, stage: u16, gain: i16) -> Result<(), DeviceError>;
    fn set_testmode(&self, on: bool) -> Result<(), DeviceError>;
    fn set_agc_mode(&self, on: bool) -> Result<(), DeviceError>;
    fn set_direct_sampling(&self, mode: u32) -> Result<(), DeviceError>;
    fn set_offset_tuning(&self, on: bool) -> Result<(), DeviceError>;
    /// A zero frequency leaves that crystal unchanged
    fn set_xtal_freq(&self, rtl_freq: u32, tuner_freq: u32) -> Result<(), DeviceError>;

    /// Discrete gain table, ascending
    fn tuner_gains(&self) -> Vec<i32>;
    fn tuner_type(&self) -> u32;

    fn reset_buffer(&self) -> Result<(), DeviceError>;

    /// Stream samples to `on_samples` until [`cancel_async`](Self::cancel_async)
    fn read_async(&self, on_samples: &mut dyn FnMut(&[u8])) -> Result<(), DeviceError>;
    fn cancel_async(&self) -> Result<(), DeviceError>;
    fn close(&self);
}
