//! One rtl-tcp session: configure the tuner, serve one client, report back

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::device::{usb, DeviceAdapter, SdrDevice};
use crate::protocol::{DongleInfo, SUPPORTED_COMMANDS};
use crate::server::{FeedStatus, SdrTcpServer};

use super::{ExitCode, SdrError, SdrTcpArguments};

/// Notifications for the host, in order: at most one `Opened`, then exactly
/// one `Closed` per call to [`RtlTcpService::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    Opened,
    Closed(ExitCode),
}

/// Runs sessions for one already-opened device
pub struct RtlTcpService<D: SdrDevice + 'static> {
    device: Arc<D>,
    server: SdrTcpServer,
    close_requested: AtomicBool,
}

impl<D: SdrDevice + 'static> RtlTcpService<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            server: SdrTcpServer::new(),
            close_requested: AtomicBool::new(false),
        }
    }

    pub fn server(&self) -> &SdrTcpServer {
        &self.server
    }

    /// Opcodes a client may send
    pub fn supported_commands() -> &'static [u8] {
        SUPPORTED_COMMANDS
    }

    /// Ask a running session to wind down; returns immediately
    pub fn close(&self) {
        info!("Close requested");
        self.close_requested.store(true, Ordering::SeqCst);
        self.server.stop_serving();
    }

    /// Configure the device, serve until the client leaves or [`close`]
    /// is called, then release everything. Blocks for the whole session.
    ///
    /// [`close`]: Self::close
    pub fn open(&self, args: &SdrTcpArguments, events: &Sender<ServiceEvent>) -> Result<(), SdrError> {
        let result = self.run(args, events);
        self.close_requested.store(false, Ordering::SeqCst);

        let code = match &result {
            Ok(()) => ExitCode::Ok,
            Err(e) => {
                error!("Session failed: {}", e);
                e.code
            }
        };
        let _ = events.send(ServiceEvent::Closed(code));
        result
    }

    fn run(&self, args: &SdrTcpArguments, events: &Sender<ServiceEvent>) -> Result<(), SdrError> {
        if let Err(e) = self.configure(args) {
            self.device.close();
            return Err(e);
        }

        let gains = self.device.tuner_gains();
        let info = DongleInfo::rtl(self.device.tuner_type(), gains.len() as u32);
        if let Err(e) = self.server.open_socket(&args.address, args.port, info) {
            self.device.close();
            return Err(SdrError::wrong_arguments(e.to_string()));
        }

        let adapter = Arc::new(DeviceAdapter::new(self.device.clone(), self.server.clone()));
        if let Err(e) = self.server.serve_client_async(adapter.clone()) {
            adapter.deactivate();
            self.device.close();
            return Err(SdrError::new(ExitCode::Unknown, e.to_string()));
        }
        if self.close_requested.load(Ordering::SeqCst) {
            self.server.stop_serving();
        }

        let _ = events.send(ServiceEvent::Opened);

        let device = &self.device;
        let streamed = device.read_async(&mut |bytes: &[u8]| {
            if adapter.on_samples(bytes) == FeedStatus::Closed {
                let _ = device.cancel_async();
            }
        });
        info!("Device streaming finished");

        adapter.deactivate();
        self.device.close();
        self.server.stop_serving();
        self.server.join();

        streamed.map_err(|e| SdrError::new(ExitCode::Unknown, format!("streaming failed: {}", e)))
    }

    fn configure(&self, args: &SdrTcpArguments) -> Result<(), SdrError> {
        let dev = &self.device;

        if args.ppm != 0 {
            if let Err(e) = dev.set_freq_correction(args.ppm) {
                warn!("Failed to set ppm to {}: {}", args.ppm, e);
            }
        }

        let rate = u32::try_from(args.sample_rate_hz).map_err(|_| {
            SdrError::wrong_arguments(format!("sample rate {} out of range", args.sample_rate_hz))
        })?;
        if let Err(e) = dev.set_sample_rate(rate) {
            error!("Failed to set sample rate to {}: {}", rate, e);
            let code = match e.usb_code() {
                Some(usb::ERROR_IO) | Some(usb::ERROR_TIMEOUT) => ExitCode::NotEnoughPower,
                _ => ExitCode::WrongArguments,
            };
            return Err(SdrError::new(code, e.to_string()));
        }
        info!("Set sample rate to {}", rate);

        let freq = u32::try_from(args.frequency_hz).map_err(|_| {
            SdrError::wrong_arguments(format!("frequency {} out of range", args.frequency_hz))
        })?;
        dev.set_center_freq(freq).map_err(|e| {
            error!("Failed to set frequency to {}: {}", freq, e);
            SdrError::wrong_arguments(e.to_string())
        })?;

        if args.gain == 0 {
            if let Err(e) = dev.set_tuner_gain_mode(false) {
                warn!("Failed to enable automatic gain: {}", e);
            }
        } else {
            if let Err(e) = dev.set_tuner_gain_mode(true) {
                warn!("Failed to enable manual gain: {}", e);
            }
            match dev.set_tuner_gain(args.gain) {
                Ok(()) => info!("Tuner gain set to {:.1} dB", args.gain as f32 / 10.0),
                Err(e) => warn!("Failed to set tuner gain: {}", e),
            }
        }

        if let Err(e) = dev.reset_buffer() {
            warn!("Failed to reset buffers: {}", e);
        }
        Ok(())
    }
}
