//! RTL-SDR access via the rtl_sdr process
//!
//! The dongle is driven by spawning `rtl_sdr ... -` and reading raw IQ bytes
//! from its stdout. Settings rtl_sdr takes on its command line (frequency,
//! sample rate, gain, ppm) are applied by restarting the process; anything
//! else is reported as unsupported.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::protocol::TunerType;

use super::{DeviceError, SdrDevice};

/// Read size for IQ bytes: 256K samples, I and Q interleaved
const READ_CHUNK: usize = 256 * 1024 * 2;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Tuner settings passed to rtl_sdr on every (re)start
#[derive(Debug, Clone, PartialEq)]
pub struct RtlSdrSettings {
    pub device_index: u32,
    pub center_freq: u32,
    pub sample_rate: u32,
    pub manual_gain: bool,
    /// Tenths of a dB
    pub gain: i32,
    pub ppm_error: i32,
}

impl Default for RtlSdrSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            center_freq: 100_000_000,
            sample_rate: 2_048_000,
            manual_gain: false,
            gain: 0,
            ppm_error: 0,
        }
    }
}

impl RtlSdrSettings {
    /// Arguments for a continuous capture to stdout
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-d".to_string(),
            self.device_index.to_string(),
            "-f".to_string(),
            self.center_freq.to_string(),
            "-s".to_string(),
            self.sample_rate.to_string(),
        ];
        // rtl_sdr treats a missing -g as automatic gain
        if self.manual_gain {
            args.push("-g".to_string());
            args.push((self.gain as f32 / 10.0).to_string());
        }
        if self.ppm_error != 0 {
            args.push("-p".to_string());
            args.push(self.ppm_error.to_string());
        }
        args.push("-".to_string());
        args
    }
}

/// What a short probe run of rtl_sdr told us about the dongle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeInfo {
    pub device_count: usize,
    pub device_name: Option<String>,
    pub tuner_name: Option<String>,
    pub tuner_type: u32,
    /// Tenths of a dB
    pub gains: Vec<i32>,
    pub no_devices: bool,
}

/// Parse the stderr banner printed by the rtl-sdr tools, e.g.
///
/// ```text
/// Found 1 device(s):
///   0:  Realtek, RTL2838UHIDIR, SN: 00000001
/// Using device 0: Generic RTL2832U OEM
/// Found Rafael Micro R820T tuner
/// Supported gain values (29): 0.0 0.9 1.4 ...
/// ```
pub fn parse_probe_output<I, S>(lines: I) -> ProbeInfo
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut info = ProbeInfo::default();

    for line in lines {
        let trimmed = line.as_ref().trim();

        if trimmed.starts_with("No supported devices") {
            info.no_devices = true;
        } else if let Some(rest) = trimmed.strip_prefix("Found ") {
            if let Some(count) = rest.strip_suffix(" device(s):") {
                info.device_count = count.trim().parse().unwrap_or(0);
            } else if let Some(name) = rest.strip_suffix(" tuner") {
                info.tuner_type = TunerType::from_name(name) as u32;
                info.tuner_name = Some(name.trim().to_string());
            }
        } else if trimmed.starts_with("Using device") {
            if let Some(idx) = trimmed.find(':') {
                let name = trimmed[idx + 1..].trim();
                if !name.is_empty() {
                    info.device_name = Some(name.to_string());
                }
            }
        } else if trimmed.starts_with("Supported gain values") {
            if let Some(idx) = trimmed.find(':') {
                info.gains = trimmed[idx + 1..]
                    .split_whitespace()
                    .filter_map(|v| v.parse::<f32>().ok())
                    .map(|db| (db * 10.0).round() as i32)
                    .collect();
            }
        }
    }

    if info.gains.is_empty() {
        info.gains = tuner_gain_table(info.tuner_type).to_vec();
    }
    info
}

/// librtlsdr's fixed gain tables, tenths of a dB
pub fn tuner_gain_table(tuner_type: u32) -> &'static [i32] {
    const E4000: &[i32] = &[-10, 15, 40, 65, 90, 115, 140, 165, 190, 215, 240, 290, 340, 420];
    const FC0012: &[i32] = &[-99, -40, 71, 179, 192];
    const FC0013: &[i32] = &[
        -99, -73, -65, -63, -60, -58, -54, 58, 61, 63, 65, 67, 68, 70, 71, 179, 181, 182, 184,
        186, 188, 191, 197,
    ];
    const FC2580: &[i32] = &[0];
    const R82XX: &[i32] = &[
        0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338,
        364, 372, 386, 402, 421, 434, 439, 445, 480, 496,
    ];

    match tuner_type {
        t if t == TunerType::E4000 as u32 => E4000,
        t if t == TunerType::Fc0012 as u32 => FC0012,
        t if t == TunerType::Fc0013 as u32 => FC0013,
        t if t == TunerType::Fc2580 as u32 => FC2580,
        t if t == TunerType::R820t as u32 || t == TunerType::R828d as u32 => R82XX,
        _ => &[],
    }
}

/// Statistics for capture (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub bytes_captured: AtomicU64,
    pub buffers_processed: AtomicU64,
    pub restarts: AtomicU64,
}

/// `SdrDevice` backed by an rtl_sdr child process
pub struct RtlSdrProcess {
    rtl_sdr_path: String,
    probe: ProbeInfo,
    settings: Mutex<RtlSdrSettings>,
    child: Mutex<Option<Child>>,
    /// Bumped on every settings change; the reader restarts when it moves
    generation: AtomicU64,
    cancelled: AtomicBool,
    stats: Arc<CaptureStats>,
}

impl RtlSdrProcess {
    /// Probe device `index` and prepare to stream from it.
    pub fn open(rtl_sdr_path: &str, index: u32) -> Result<Self, DeviceError> {
        info!("Probing RTL-SDR device {} via {}", index, rtl_sdr_path);
        let probe = probe_device(rtl_sdr_path, index)?;

        if probe.no_devices {
            return Err(DeviceError::NoDevices);
        }
        if let Some(name) = &probe.device_name {
            info!("  Device: {}", name);
        }
        info!(
            "  Tuner: {} (type {}), {} gain steps",
            probe.tuner_name.as_deref().unwrap_or("unknown"),
            probe.tuner_type,
            probe.gains.len()
        );

        Ok(Self::with_probe(rtl_sdr_path, index, probe))
    }

    /// Build without probing hardware
    pub fn with_probe(rtl_sdr_path: &str, index: u32, probe: ProbeInfo) -> Self {
        Self {
            rtl_sdr_path: rtl_sdr_path.to_string(),
            probe,
            settings: Mutex::new(RtlSdrSettings {
                device_index: index,
                ..Default::default()
            }),
            child: Mutex::new(None),
            generation: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn probe(&self) -> &ProbeInfo {
        &self.probe
    }

    pub fn settings(&self) -> RtlSdrSettings {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    fn update(&self, apply: impl FnOnce(&mut RtlSdrSettings)) -> Result<(), DeviceError> {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        let before = settings.clone();
        apply(&mut settings);
        if *settings != before {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn spawn(&self) -> Result<(Child, RtlSdrSettings), DeviceError> {
        let settings = self.settings();
        let mut cmd = Command::new(&self.rtl_sdr_path);
        cmd.args(settings.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!("Executing: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| {
            DeviceError::Process(format!("failed to spawn {}: {}", self.rtl_sdr_path, e))
        })?;

        if let Some(stderr) = child.stderr.take() {
            log_stderr(stderr);
        }
        Ok((child, settings))
    }

    fn kill_child(&self) {
        let child = self.child.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut child) = child {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl SdrDevice for RtlSdrProcess {
    fn set_sample_rate(&self, rate: u32) -> Result<(), DeviceError> {
        if rate == 0 {
            return Err(DeviceError::InvalidArgument("sample rate 0".to_string()));
        }
        self.update(|s| s.sample_rate = rate)
    }

    fn set_center_freq(&self, freq: u32) -> Result<(), DeviceError> {
        if freq == 0 {
            return Err(DeviceError::InvalidArgument("frequency 0".to_string()));
        }
        self.update(|s| s.center_freq = freq)
    }

    fn set_tuner_gain_mode(&self, manual: bool) -> Result<(), DeviceError> {
        self.update(|s| s.manual_gain = manual)
    }

    fn set_tuner_gain(&self, gain: i32) -> Result<(), DeviceError> {
        self.update(|s| s.gain = gain)
    }

    fn set_freq_correction(&self, ppm: i32) -> Result<(), DeviceError> {
        self.update(|s| s.ppm_error = ppm)
    }

    fn set_tuner_if_gain(&self, _stage: u16, _gain: i16) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("IF gain"))
    }

    fn set_testmode(&self, _on: bool) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("test mode"))
    }

    fn set_agc_mode(&self, _on: bool) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("RTL AGC"))
    }

    fn set_direct_sampling(&self, _mode: u32) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("direct sampling"))
    }

    fn set_offset_tuning(&self, _on: bool) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("offset tuning"))
    }

    fn set_xtal_freq(&self, _rtl_freq: u32, _tuner_freq: u32) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("crystal frequency"))
    }

    fn tuner_gains(&self) -> Vec<i32> {
        self.probe.gains.clone()
    }

    fn tuner_type(&self) -> u32 {
        self.probe.tuner_type
    }

    /// Each rtl_sdr start begins with fresh buffers, so this only re-arms
    /// streaming after an earlier cancel.
    fn reset_buffer(&self) -> Result<(), DeviceError> {
        self.cancelled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read_async(&self, on_samples: &mut dyn FnMut(&[u8])) -> Result<(), DeviceError> {
        let mut buffer = vec![0u8; READ_CHUNK];
        let mut last_stats_time = Instant::now();
        let mut last_bytes = 0u64;

        'restart: while !self.cancelled.load(Ordering::SeqCst) {
            let generation = self.generation.load(Ordering::SeqCst);
            let (mut child, settings) = self.spawn()?;
            let Some(mut stdout) = child.stdout.take() else {
                let _ = child.kill();
                return Err(DeviceError::Process("failed to capture rtl_sdr stdout".to_string()));
            };
            *self.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);

            info!(
                "IQ capture started: {} Hz @ {} S/s",
                settings.center_freq, settings.sample_rate
            );
            let mut first_data = true;

            loop {
                if self.cancelled.load(Ordering::SeqCst) {
                    break 'restart;
                }
                if self.generation.load(Ordering::SeqCst) != generation {
                    debug!("Settings changed, restarting rtl_sdr");
                    self.kill_child();
                    self.stats.restarts.fetch_add(1, Ordering::Relaxed);
                    continue 'restart;
                }

                match stdout.read(&mut buffer) {
                    Ok(0) => {
                        if self.cancelled.load(Ordering::SeqCst) {
                            break 'restart;
                        }
                        if self.generation.load(Ordering::SeqCst) != generation {
                            continue;
                        }
                        self.kill_child();
                        return Err(DeviceError::Process("rtl_sdr stdout closed".to_string()));
                    }
                    Ok(n_read) => {
                        if first_data {
                            info!("First IQ data received ({} bytes)", n_read);
                            first_data = false;
                        }
                        self.stats.bytes_captured.fetch_add(n_read as u64, Ordering::Relaxed);
                        self.stats.buffers_processed.fetch_add(1, Ordering::Relaxed);
                        on_samples(&buffer[..n_read]);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("Error reading from rtl_sdr: {}", e);
                        self.kill_child();
                        return Err(DeviceError::Io(e));
                    }
                }

                if last_stats_time.elapsed() >= STATS_INTERVAL {
                    let total = self.stats.bytes_captured.load(Ordering::Relaxed);
                    let rate = (total - last_bytes) as f32 / 2.0 / last_stats_time.elapsed().as_secs_f32();
                    debug!(
                        "[Capture] Rate: {:.3} MSPS | Buffers: {} | Restarts: {}",
                        rate / 1_000_000.0,
                        self.stats.buffers_processed.load(Ordering::Relaxed),
                        self.stats.restarts.load(Ordering::Relaxed)
                    );
                    last_stats_time = Instant::now();
                    last_bytes = total;
                }
            }
        }

        self.kill_child();
        info!(
            "IQ capture stopped. Bytes: {} | Buffers: {}",
            self.stats.bytes_captured.load(Ordering::Relaxed),
            self.stats.buffers_processed.load(Ordering::Relaxed)
        );
        Ok(())
    }

    fn cancel_async(&self) -> Result<(), DeviceError> {
        self.cancelled.store(true, Ordering::SeqCst);
        // unblocks the stdout read in read_async
        self.kill_child();
        Ok(())
    }

    fn close(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.kill_child();
    }
}

impl Drop for RtlSdrProcess {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run rtl_sdr for a single sample and collect its stderr banner
fn probe_device(rtl_sdr_path: &str, index: u32) -> Result<ProbeInfo, DeviceError> {
    let mut cmd = Command::new(rtl_sdr_path);
    cmd.arg("-d")
        .arg(index.to_string())
        .arg("-n")
        .arg("1")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| DeviceError::Process(format!("failed to spawn {}: {}", rtl_sdr_path, e)))?;

    let lines: Vec<String> = match child.stderr.take() {
        Some(stderr) => BufReader::new(stderr).lines().map_while(Result::ok).collect(),
        None => Vec::new(),
    };
    let _ = child.wait();

    for line in &lines {
        debug!("[rtl_sdr probe] {}", line);
    }
    Ok(parse_probe_output(&lines))
}

fn log_stderr(stderr: ChildStderr) {
    let spawned = thread::Builder::new()
        .name("rtl_sdr-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if !line.trim().is_empty() {
                    info!("[rtl_sdr] {}", line.trim());
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to spawn rtl_sdr stderr logger: {}", e);
    }
}
