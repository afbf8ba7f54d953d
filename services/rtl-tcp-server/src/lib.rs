//! rtl-tcp server for RTL-SDR dongles
//!
//! Streams raw IQ samples to one TCP client using the rtl_tcp protocol and
//! applies the client's tuning commands to the device.

pub mod config;
pub mod device;
pub mod host;
pub mod pool;
pub mod protocol;
pub mod server;

pub use config::Config;
pub use device::{DeviceAdapter, DeviceError, RtlSdrProcess, SdrDevice};
pub use host::{ExitCode, RtlTcpService, SdrError, SdrTcpArguments, ServiceEvent};
pub use server::{ClientCallbacks, FeedStatus, SdrTcpServer, ServerError, ServerState};
