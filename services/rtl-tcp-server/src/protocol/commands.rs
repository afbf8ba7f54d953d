//! rtl-tcp command set
//!
//! Each command is a one-byte opcode plus a 32-bit parameter. Opcodes
//! 0x01..=0x0d are the standard rtl_tcp API; 0x7e and up are extensions
//! used by hosts that embed the server.

use super::types::CommandRecord;

/// Known opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TcpCommand {
    SetFrequency = 0x01,
    SetSampleRate = 0x02,
    SetGainMode = 0x03,
    SetGain = 0x04,
    SetFreqCorrection = 0x05,
    SetIfTunerGain = 0x06,
    SetTestMode = 0x07,
    SetAgcMode = 0x08,
    SetDirectSampling = 0x09,
    SetOffsetTuning = 0x0a,
    SetRtlXtal = 0x0b,
    SetTunerXtal = 0x0c,
    SetTunerGainByIndex = 0x0d,
    Exit = 0x7e,
    GainByPercentage = 0x7f,
    /// 16-bit samples; not available on RTL2832 hardware
    Enable16BitSigned = 0x80,
}

impl TryFrom<u8> for TcpCommand {
    type Error = u8;

    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        Ok(match opcode {
            0x01 => Self::SetFrequency,
            0x02 => Self::SetSampleRate,
            0x03 => Self::SetGainMode,
            0x04 => Self::SetGain,
            0x05 => Self::SetFreqCorrection,
            0x06 => Self::SetIfTunerGain,
            0x07 => Self::SetTestMode,
            0x08 => Self::SetAgcMode,
            0x09 => Self::SetDirectSampling,
            0x0a => Self::SetOffsetTuning,
            0x0b => Self::SetRtlXtal,
            0x0c => Self::SetTunerXtal,
            0x0d => Self::SetTunerGainByIndex,
            0x7e => Self::Exit,
            0x7f => Self::GainByPercentage,
            0x80 => Self::Enable16BitSigned,
            other => return Err(other),
        })
    }
}

/// Opcodes this server acts on. Keep in sync with [`Command::decode`].
pub const SUPPORTED_COMMANDS: &[u8] = &[
    TcpCommand::SetFrequency as u8,
    TcpCommand::SetSampleRate as u8,
    TcpCommand::SetGainMode as u8,
    TcpCommand::SetGain as u8,
    TcpCommand::SetFreqCorrection as u8,
    TcpCommand::SetIfTunerGain as u8,
    TcpCommand::SetTestMode as u8,
    TcpCommand::SetAgcMode as u8,
    TcpCommand::SetDirectSampling as u8,
    TcpCommand::SetOffsetTuning as u8,
    TcpCommand::SetRtlXtal as u8,
    TcpCommand::SetTunerXtal as u8,
    TcpCommand::SetTunerGainByIndex as u8,
    TcpCommand::Exit as u8,
    TcpCommand::GainByPercentage as u8,
];

/// A decoded, dispatchable command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetFrequency(u32),
    SetSampleRate(u32),
    /// 0 = automatic, 1 = manual
    SetGainMode(u32),
    /// Tenths of a dB
    SetGain(i32),
    SetFreqCorrection(i32),
    SetIfTunerGain { stage: u16, gain: i16 },
    SetTestMode(bool),
    SetAgcMode(bool),
    SetDirectSampling(u32),
    SetOffsetTuning(bool),
    SetRtlXtal(u32),
    SetTunerXtal(u32),
    SetGainByIndex(u32),
    Exit,
    GainByPercentage(u32),
}

impl Command {
    /// Decode a record; unknown or unsupported opcodes yield `None`
    pub fn decode(record: CommandRecord) -> Option<Self> {
        let p = record.parameter;
        let cmd = match TcpCommand::try_from(record.opcode).ok()? {
            TcpCommand::SetFrequency => Self::SetFrequency(p),
            TcpCommand::SetSampleRate => Self::SetSampleRate(p),
            TcpCommand::SetGainMode => Self::SetGainMode(p),
            TcpCommand::SetGain => Self::SetGain(p as i32),
            TcpCommand::SetFreqCorrection => Self::SetFreqCorrection(p as i32),
            TcpCommand::SetIfTunerGain => Self::SetIfTunerGain {
                stage: (p >> 16) as u16,
                gain: (p & 0xffff) as u16 as i16,
            },
            TcpCommand::SetTestMode => Self::SetTestMode(p != 0),
            TcpCommand::SetAgcMode => Self::SetAgcMode(p != 0),
            TcpCommand::SetDirectSampling => Self::SetDirectSampling(p),
            TcpCommand::SetOffsetTuning => Self::SetOffsetTuning(p != 0),
            TcpCommand::SetRtlXtal => Self::SetRtlXtal(p),
            TcpCommand::SetTunerXtal => Self::SetTunerXtal(p),
            TcpCommand::SetTunerGainByIndex => Self::SetGainByIndex(p),
            TcpCommand::Exit => Self::Exit,
            TcpCommand::GainByPercentage => Self::GainByPercentage(p),
            TcpCommand::Enable16BitSigned => return None,
        };
        Some(cmd)
    }
}

/// Map a 0-100 percentage onto a table of `gain_count` discrete gains.
///
/// `floor(percent * count / 100)` clamped to `[0, count - 1]`; `None` when
/// the table is empty.
pub fn gain_index_for_percentage(percent: u32, gain_count: usize) -> Option<usize> {
    if gain_count == 0 {
        return None;
    }
    let index = (percent as u64 * gain_count as u64) / 100;
    Some((index as usize).min(gain_count - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_percentage_mapping() {
        assert_eq!(gain_index_for_percentage(50, 10), Some(5));
        assert_eq!(gain_index_for_percentage(100, 10), Some(9));
        assert_eq!(gain_index_for_percentage(0, 10), Some(0));
        assert_eq!(gain_index_for_percentage(99, 10), Some(9));
        assert_eq!(gain_index_for_percentage(5000, 29), Some(28));
        assert_eq!(gain_index_for_percentage(u32::MAX, 29), Some(28));
        assert_eq!(gain_index_for_percentage(50, 0), None);
        assert_eq!(gain_index_for_percentage(100, 1), Some(0));
    }

    #[test]
    fn test_if_gain_unpacking() {
        // stage 2, gain -30 (0xffe2)
        let cmd = Command::decode(CommandRecord::new(0x06, 0x0002_ffe2)).unwrap();
        assert_eq!(cmd, Command::SetIfTunerGain { stage: 2, gain: -30 });
    }

    #[test]
    fn test_signed_parameters() {
        let cmd = Command::decode(CommandRecord::new(0x05, (-12i32) as u32)).unwrap();
        assert_eq!(cmd, Command::SetFreqCorrection(-12));
    }

    #[test]
    fn test_unknown_and_unsupported_ignored() {
        assert!(Command::decode(CommandRecord::new(0x00, 1)).is_none());
        assert!(Command::decode(CommandRecord::new(0x42, 1)).is_none());
        assert!(Command::decode(CommandRecord::new(0x80, 1)).is_none());
    }

    #[test]
    fn test_supported_list_matches_dispatch() {
        for opcode in 0..=u8::MAX {
            let decodes = Command::decode(CommandRecord::new(opcode, 0)).is_some();
            assert_eq!(
                decodes,
                SUPPORTED_COMMANDS.contains(&opcode),
                "opcode {:#04x} out of sync",
                opcode
            );
        }
    }
}
