//! Device adapter - routes server callbacks to the tuner

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::protocol::{gain_index_for_percentage, Command, CommandRecord};
use crate::server::{ClientCallbacks, FeedStatus, SdrTcpServer};

use super::{DeviceError, SdrDevice};

/// Connects one device to one server for the duration of a session
pub struct DeviceAdapter<D: SdrDevice> {
    device: Arc<D>,
    server: SdrTcpServer,
    active: AtomicBool,
}

impl<D: SdrDevice> DeviceAdapter<D> {
    pub fn new(device: Arc<D>, server: SdrTcpServer) -> Self {
        Self {
            device,
            server,
            active: AtomicBool::new(true),
        }
    }

    /// Sample callback for `read_async`
    pub fn on_samples(&self, bytes: &[u8]) -> FeedStatus {
        if !self.is_active() {
            return FeedStatus::Closed;
        }
        self.server.feed(bytes)
    }

    /// Stop touching the device; late commands and samples are ignored
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!("Device adapter deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn dispatch(&self, command: Command) -> Result<(), DeviceError> {
        let dev = &self.device;
        match command {
            Command::SetFrequency(freq) => {
                debug!("Set frequency {} Hz", freq);
                dev.set_center_freq(freq)
            }
            Command::SetSampleRate(rate) => {
                info!("Set sample rate {}", rate);
                dev.set_sample_rate(rate)
            }
            Command::SetGainMode(mode) => {
                info!("Set gain mode {}", mode);
                dev.set_tuner_gain_mode(mode != 0)
            }
            Command::SetGain(gain) => {
                info!("Set gain {}", gain);
                dev.set_tuner_gain(gain)
            }
            Command::SetFreqCorrection(ppm) => {
                info!("Set freq correction {}", ppm);
                dev.set_freq_correction(ppm)
            }
            Command::SetIfTunerGain { stage, gain } => dev.set_tuner_if_gain(stage, gain),
            Command::SetTestMode(on) => {
                info!("Set test mode {}", on);
                dev.set_testmode(on)
            }
            Command::SetAgcMode(on) => {
                info!("Set agc mode {}", on);
                dev.set_agc_mode(on)
            }
            Command::SetDirectSampling(mode) => {
                info!("Set direct sampling {}", mode);
                dev.set_direct_sampling(mode)
            }
            Command::SetOffsetTuning(on) => {
                info!("Set offset tuning {}", on);
                dev.set_offset_tuning(on)
            }
            Command::SetRtlXtal(freq) => {
                info!("Set rtl xtal {}", freq);
                dev.set_xtal_freq(freq, 0)
            }
            Command::SetTunerXtal(freq) => {
                info!("Set tuner xtal {}", freq);
                dev.set_xtal_freq(0, freq)
            }
            Command::SetGainByIndex(index) => {
                info!("Set tuner gain by index {}", index);
                let gains = dev.tuner_gains();
                match gains.get(index as usize) {
                    Some(&gain) => dev.set_tuner_gain(gain),
                    None => Ok(()),
                }
            }
            Command::Exit => {
                info!("Client requested to close the server");
                self.server.stop_serving();
                Ok(())
            }
            Command::GainByPercentage(percent) => {
                let gains = dev.tuner_gains();
                match gain_index_for_percentage(percent, gains.len()) {
                    Some(index) => {
                        debug!("Gain {}% -> index {} ({})", percent, index, gains[index]);
                        dev.set_tuner_gain(gains[index])
                    }
                    None => {
                        warn!("Gain by percentage requested but the tuner reports no gains");
                        Ok(())
                    }
                }
            }
        }
    }
}

impl<D: SdrDevice> ClientCallbacks for DeviceAdapter<D> {
    fn on_command(&self, record: CommandRecord) {
        if !self.is_active() {
            return;
        }
        let Some(command) = Command::decode(record) else {
            debug!("Ignoring unsupported command {:#04x}", record.opcode);
            return;
        };
        if let Err(e) = self.dispatch(command) {
            warn!("Command {:?} failed: {}", command, e);
        }
    }

    fn on_closed(&self) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.device.cancel_async() {
            warn!("Failed to cancel device streaming: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every driver call
    #[derive(Default)]
    pub(crate) struct MockDevice {
        pub calls: Mutex<Vec<String>>,
        pub gains: Vec<i32>,
        pub fail_gain: bool,
    }

    impl MockDevice {
        pub fn with_gains(gains: Vec<i32>) -> Self {
            Self {
                gains,
                ..Default::default()
            }
        }

        fn log(&self, call: String) -> Result<(), DeviceError> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SdrDevice for MockDevice {
        fn set_sample_rate(&self, rate: u32) -> Result<(), DeviceError> {
            self.log(format!("rate {}", rate))
        }
        fn set_center_freq(&self, freq: u32) -> Result<(), DeviceError> {
            self.log(format!("freq {}", freq))
        }
        fn set_tuner_gain_mode(&self, manual: bool) -> Result<(), DeviceError> {
            self.log(format!("gain_mode {}", manual))
        }
        fn set_tuner_gain(&self, gain: i32) -> Result<(), DeviceError> {
            if self.fail_gain {
                return Err(DeviceError::Usb(-9));
            }
            self.log(format!("gain {}", gain))
        }
        fn set_freq_correction(&self, ppm: i32) -> Result<(), DeviceError> {
            self.log(format!("ppm {}", ppm))
        }
        fn set_tuner_if_gain(&self, stage: u16, gain: i16) -> Result<(), DeviceError> {
            self.log(format!("if_gain {} {}", stage, gain))
        }
        fn set_testmode(&self, on: bool) -> Result<(), DeviceError> {
            self.log(format!("testmode {}", on))
        }
        fn set_agc_mode(&self, on: bool) -> Result<(), DeviceError> {
            self.log(format!("agc {}", on))
        }
        fn set_direct_sampling(&self, mode: u32) -> Result<(), DeviceError> {
            self.log(format!("direct {}", mode))
        }
        fn set_offset_tuning(&self, on: bool) -> Result<(), DeviceError> {
            self.log(format!("offset {}", on))
        }
        fn set_xtal_freq(&self, rtl_freq: u32, tuner_freq: u32) -> Result<(), DeviceError> {
            self.log(format!("xtal {} {}", rtl_freq, tuner_freq))
        }
        fn tuner_gains(&self) -> Vec<i32> {
            self.gains.clone()
        }
        fn tuner_type(&self) -> u32 {
            5
        }
        fn reset_buffer(&self) -> Result<(), DeviceError> {
            self.log("reset".to_string())
        }
        fn read_async(&self, _on_samples: &mut dyn FnMut(&[u8])) -> Result<(), DeviceError> {
            self.log("read_async".to_string())
        }
        fn cancel_async(&self) -> Result<(), DeviceError> {
            self.log("cancel".to_string())
        }
        fn close(&self) {
            let _ = self.log("close".to_string());
        }
    }

    fn adapter(gains: Vec<i32>) -> (Arc<MockDevice>, DeviceAdapter<MockDevice>) {
        let device = Arc::new(MockDevice::with_gains(gains));
        let adapter = DeviceAdapter::new(device.clone(), SdrTcpServer::new());
        (device, adapter)
    }

    fn ten_gains() -> Vec<i32> {
        (0..10).map(|i| i * 10).collect()
    }

    #[test]
    fn test_gain_by_percentage() {
        let (device, adapter) = adapter(ten_gains());
        adapter.on_command(CommandRecord::new(0x7f, 50));
        adapter.on_command(CommandRecord::new(0x7f, 100));
        adapter.on_command(CommandRecord::new(0x7f, 0));
        assert_eq!(device.calls(), vec!["gain 50", "gain 90", "gain 0"]);
    }

    #[test]
    fn test_gain_by_percentage_empty_table() {
        let (device, adapter) = adapter(Vec::new());
        adapter.on_command(CommandRecord::new(0x7f, 50));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_gain_by_index_out_of_range_ignored() {
        let (device, adapter) = adapter(ten_gains());
        adapter.on_command(CommandRecord::new(0x0d, 3));
        adapter.on_command(CommandRecord::new(0x0d, 10));
        assert_eq!(device.calls(), vec!["gain 30"]);
    }

    #[test]
    fn test_dispatch_table() {
        let (device, adapter) = adapter(ten_gains());
        let records = hex::decode(concat!(
            "0105f5e100",
            "02000000fa",
            "0300000001",
            "040000010e",
            "05fffffff4",
            "060001fff6"
        )).unwrap();
        for chunk in records.chunks_exact(5) {
            let mut raw = [0u8; 5];
            raw.copy_from_slice(chunk);
            adapter.on_command(CommandRecord::from_bytes(raw));
        }
        adapter.on_command(CommandRecord::new(0x0b, 28_800_000));
        adapter.on_command(CommandRecord::new(0x0c, 16_000_000));
        adapter.on_command(CommandRecord::new(0x08, 1));
        assert_eq!(
            device.calls(),
            vec![
                "freq 100000000",
                "rate 250",
                "gain_mode true",
                "gain 270",
                "ppm -12",
                "if_gain 1 -10",
                "xtal 28800000 0",
                "xtal 0 16000000",
                "agc true",
            ]
        );
    }

    #[test]
    fn test_unknown_and_16bit_ignored() {
        let (device, adapter) = adapter(ten_gains());
        adapter.on_command(CommandRecord::new(0x80, 1));
        adapter.on_command(CommandRecord::new(0x33, 1));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_device_error_does_not_stop_dispatch() {
        let device = Arc::new(MockDevice {
            gains: ten_gains(),
            fail_gain: true,
            ..Default::default()
        });
        let adapter = DeviceAdapter::new(device.clone(), SdrTcpServer::new());
        adapter.on_command(CommandRecord::new(0x04, 100));
        adapter.on_command(CommandRecord::new(0x01, 7));
        assert_eq!(device.calls(), vec!["freq 7"]);
    }

    #[test]
    fn test_deactivate() {
        let (device, adapter) = adapter(ten_gains());
        adapter.deactivate();
        adapter.on_command(CommandRecord::new(0x01, 1));
        adapter.on_closed();
        assert_eq!(adapter.on_samples(&[1, 2]), FeedStatus::Closed);
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_closed_cancels_streaming() {
        let (device, adapter) = adapter(ten_gains());
        adapter.on_closed();
        assert_eq!(device.calls(), vec!["cancel"]);
    }
}
