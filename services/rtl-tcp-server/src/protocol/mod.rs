//! rtl-tcp wire protocol
//!
//! Server -> client: a 12-byte dongle-info header, then raw IQ bytes.
//! Client -> server: 5-byte command records. All integers are big-endian.

mod commands;
mod types;

pub use commands::{gain_index_for_percentage, Command, TcpCommand, SUPPORTED_COMMANDS};
pub use types::{
    CommandRecord, DongleInfo, TunerType, COMMAND_LEN, DONGLE_INFO_LEN, RTL_MAGIC,
};
