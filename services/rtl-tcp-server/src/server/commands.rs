//! Command channel - reads 5-byte records off the client socket

use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::sync::Arc;
use tracing::{debug, info};

use super::{is_retryable, ClientCallbacks, ServerState, Shared};
use crate::protocol::{CommandRecord, COMMAND_LEN};

/// Runs on its own thread for as long as the client is being served.
///
/// Partial reads are accumulated into one record; read timeouts only
/// re-check the state. EOF or a socket error stops the server.
pub(super) fn run_command_listener(
    shared: Arc<Shared>,
    mut stream: TcpStream,
    callbacks: Arc<dyn ClientCallbacks>,
) {
    let mut record = [0u8; COMMAND_LEN];

    while shared.state() == ServerState::ClientServing {
        let mut filled = 0usize;

        while filled < COMMAND_LEN && shared.state() == ServerState::ClientServing {
            match stream.read(&mut record[filled..]) {
                Ok(0) => {
                    info!("Client closed the connection");
                    shared.request_stop();
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if is_retryable(e.kind()) => continue,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    info!("Client reset the connection");
                    shared.request_stop();
                    break;
                }
                Err(e) => {
                    info!("Command listener failed to receive command: {}", e);
                    shared.request_stop();
                    break;
                }
            }
        }

        if filled == COMMAND_LEN && shared.state() == ServerState::ClientServing {
            let command = CommandRecord::from_bytes(record);
            shared.stats.record_command();
            debug!(
                "Command {:#04x} param {} [{}]",
                command.opcode,
                command.parameter,
                command.to_hex()
            );
            callbacks.on_command(command);
        }
    }

    info!("Command listener thread exiting");
}
