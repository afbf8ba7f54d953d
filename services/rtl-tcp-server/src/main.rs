//! rtl-tcp server - RTL-SDR over TCP
//!
//! Opens the dongle through rtl_sdr, then serves rtl_tcp clients one after
//! another until interrupted.

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rtl_tcp_server::{Config, ExitCode, RtlSdrProcess, RtlTcpService, SdrError, ServiceEvent};

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   rtl-tcp server");
    info!("   RTL-SDR IQ streaming over TCP");
    info!("===========================================");

    let config = Config::from_env();

    info!("Configuration:");
    info!("  rtl_sdr path: {}", config.rtl_sdr_path);
    info!("  Device index: {}", config.device_index);

    let args = match config.session_arguments() {
        Ok(args) => args,
        Err(e) => exit_with(e),
    };
    info!("  Listen: {}:{}", args.address, args.port);
    info!("  Frequency: {} Hz", args.frequency_hz);
    info!("  Sample rate: {} S/s", args.sample_rate_hz);
    if args.gain == 0 {
        info!("  Gain: auto");
    } else {
        info!("  Gain: {:.1} dB", args.gain as f32 / 10.0);
    }
    info!("  PPM error: {}", args.ppm);

    let device = match RtlSdrProcess::open(&config.rtl_sdr_path, config.device_index) {
        Ok(device) => device,
        Err(e) => {
            error!("Make sure the RTL-SDR device is connected and rtl_sdr is installed.");
            exit_with(SdrError::from(e))
        }
    };

    let service = Arc::new(RtlTcpService::new(Arc::new(device)));
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let service = service.clone();
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            info!("Signal caught, exiting");
            interrupted.store(true, Ordering::SeqCst);
            service.close();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let (event_tx, event_rx) = unbounded::<ServiceEvent>();
    let watcher = thread::Builder::new()
        .name("service-events".to_string())
        .spawn(move || {
            for event in event_rx {
                match event {
                    ServiceEvent::Opened => info!("Ready, waiting for a client. Press Ctrl+C to stop."),
                    ServiceEvent::Closed(ExitCode::Ok) => info!("Session closed"),
                    ServiceEvent::Closed(code) => warn!("Session closed: {}", code),
                }
            }
        })
        .context("Failed to spawn event thread")?;

    let mut exit = ExitCode::Ok;
    while !interrupted.load(Ordering::SeqCst) {
        if let Err(e) = service.open(&args, &event_tx) {
            exit = e.code;
            break;
        }
    }
    if interrupted.load(Ordering::SeqCst) {
        exit = ExitCode::SignalCaught;
    }

    drop(event_tx);
    let _ = watcher.join();

    let stats = service.server().stats();
    info!(
        "Shutdown complete. Clients: {} | Sent: {} bytes | Dropped chunks: {}",
        stats.get_clients(),
        stats.get_sent(),
        stats.get_dropped()
    );

    if exit != ExitCode::Ok {
        std::process::exit(exit.code());
    }
    Ok(())
}

fn exit_with(err: SdrError) -> ! {
    error!("{}", err);
    std::process::exit(err.code.code())
}
