//! Host integration - exit codes, argument strings and the session runner

mod args;
mod service;

pub use args::SdrTcpArguments;
pub use service::{RtlTcpService, ServiceEvent};

use std::fmt;
use thiserror::Error;

use crate::device::{usb, DeviceError};

/// Result codes reported to the host, one per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    WrongArguments = 1,
    InvalidFileDescriptor = 2,
    NoDevicesFound = 3,
    FailedToOpenDevice = 4,
    CannotRestart = 5,
    CannotClose = 6,
    Unknown = 7,
    SignalCaught = 8,
    NotEnoughPower = 9,
    PlatformNotSupported = 10,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            1 => Self::WrongArguments,
            2 => Self::InvalidFileDescriptor,
            3 => Self::NoDevicesFound,
            4 => Self::FailedToOpenDevice,
            5 => Self::CannotRestart,
            6 => Self::CannotClose,
            7 => Self::Unknown,
            8 => Self::SignalCaught,
            9 => Self::NotEnoughPower,
            10 => Self::PlatformNotSupported,
            _ => return None,
        })
    }

    /// Classify a driver return code.
    ///
    /// Non-negative values are already exit codes; negative ones are libusb
    /// errors grouped by what the user can do about them.
    pub fn from_usb_error(code: i32) -> Self {
        if let Some(exit) = Self::from_code(code) {
            return exit;
        }
        match code {
            usb::ERROR_IO
            | usb::ERROR_NO_DEVICE
            | usb::ERROR_NOT_FOUND
            | usb::ERROR_TIMEOUT
            | usb::ERROR_OVERFLOW
            | usb::ERROR_NOT_SUPPORTED => Self::NoDevicesFound,
            usb::ERROR_ACCESS => Self::InvalidFileDescriptor,
            usb::ERROR_BUSY => Self::FailedToOpenDevice,
            _ => Self::Unknown,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::WrongArguments => "wrong arguments",
            Self::InvalidFileDescriptor => "invalid file descriptor or permission denied",
            Self::NoDevicesFound => "no devices found",
            Self::FailedToOpenDevice => "failed to open device",
            Self::CannotRestart => "cannot restart",
            Self::CannotClose => "cannot close",
            Self::Unknown => "unknown error",
            Self::SignalCaught => "signal caught",
            Self::NotEnoughPower => "not enough power for the device",
            Self::PlatformNotSupported => "platform not supported",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Host-facing error
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct SdrError {
    pub code: ExitCode,
    pub message: String,
}

impl SdrError {
    pub fn new(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn wrong_arguments(message: impl Into<String>) -> Self {
        Self::new(ExitCode::WrongArguments, message)
    }
}

impl From<DeviceError> for SdrError {
    fn from(err: DeviceError) -> Self {
        let code = match &err {
            DeviceError::NoDevices => ExitCode::NoDevicesFound,
            DeviceError::Usb(code) => ExitCode::from_usb_error(*code),
            DeviceError::Unsupported(_) | DeviceError::InvalidArgument(_) => ExitCode::WrongArguments,
            DeviceError::Process(_) | DeviceError::Io(_) => ExitCode::FailedToOpenDevice,
        };
        Self::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        for raw in 0..=10 {
            assert_eq!(ExitCode::from_code(raw).unwrap().code(), raw);
        }
        assert_eq!(ExitCode::from_code(11), None);
        assert_eq!(ExitCode::NotEnoughPower.code(), 9);
    }

    #[test]
    fn test_from_usb_error() {
        assert_eq!(ExitCode::from_usb_error(usb::ERROR_ACCESS), ExitCode::InvalidFileDescriptor);
        assert_eq!(ExitCode::from_usb_error(usb::ERROR_BUSY), ExitCode::FailedToOpenDevice);
        assert_eq!(ExitCode::from_usb_error(usb::ERROR_NO_DEVICE), ExitCode::NoDevicesFound);
        assert_eq!(ExitCode::from_usb_error(usb::ERROR_TIMEOUT), ExitCode::NoDevicesFound);
        assert_eq!(ExitCode::from_usb_error(usb::ERROR_PIPE), ExitCode::Unknown);
        assert_eq!(ExitCode::from_usb_error(usb::ERROR_OTHER), ExitCode::Unknown);
        assert_eq!(ExitCode::from_usb_error(4), ExitCode::FailedToOpenDevice);
    }

    #[test]
    fn test_device_error_mapping() {
        assert_eq!(SdrError::from(DeviceError::NoDevices).code, ExitCode::NoDevicesFound);
        assert_eq!(
            SdrError::from(DeviceError::Process("gone".to_string())).code,
            ExitCode::FailedToOpenDevice
        );
        let err = SdrError::from(DeviceError::Usb(usb::ERROR_ACCESS));
        assert_eq!(err.code, ExitCode::InvalidFileDescriptor);
        assert_eq!(err.to_string(), "invalid file descriptor or permission denied (2): usb error -3");
    }
}
