//! Decoder for the CCM21-i per-unit status record.
//!
//! A record is at least 7 bytes, hex encoded. Field layout:
//!
//! | byte | bits | field             |
//! |------|------|-------------------|
//! | 2    | 2..8 | error code        |
//! | 3    | 0    | raw power (unused)|
//! | 3    | 2..5 | mode code         |
//! | 3    | 5..8 | fan code          |
//! | 4    | 1    | swing             |
//! | 4    | 3..8 | setpoint (°C)     |
//! | 6    | 0..8 | room temp, signed |

use crate::models::mcontrol::{LocalAddress, LocalDeviceState, LocalFan, LocalMode};
use log::warn;

/// Gateway placeholder for an address with nothing attached.
pub const NO_DATA: &str = "-";

const MIN_HEX_LEN: usize = 14;
const MIN_RECORD_LEN: usize = 7;

const ERROR_BYTE: usize = 2;
const ERROR_SHIFT: u8 = 2;
const ERROR_MASK: u8 = 0x3F;

const MODE_FAN_BYTE: usize = 3;
const MODE_SHIFT: u8 = 2;
const MODE_MASK: u8 = 0x07;
const FAN_SHIFT: u8 = 5;
const FAN_MASK: u8 = 0x07;

const SWING_SETPOINT_BYTE: usize = 4;
const SWING_SHIFT: u8 = 1;
const SWING_MASK: u8 = 0x01;
const SETPOINT_SHIFT: u8 = 3;
const SETPOINT_MASK: u8 = 0x1F;

const ROOM_TEMP_BYTE: usize = 6;

/// Decode one gateway status string. Absence (`None`) covers the no-data
/// marker, short input and malformed hex; this never fails.
pub fn decode_status(address: LocalAddress, raw_hex: &str) -> Option<LocalDeviceState> {
    if raw_hex == NO_DATA || raw_hex.len() < MIN_HEX_LEN {
        return None;
    }

    // The gateway may pad with separators; whitespace between byte pairs is tolerated.
    let cleaned: String = raw_hex
        .trim_matches(',')
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let raw = match hex::decode(&cleaned) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Invalid hex data for addr {}: {:?} ({})", address.0, raw_hex, e);
            return None;
        }
    };
    if raw.len() < MIN_RECORD_LEN {
        return None;
    }

    let mode_fan = raw[MODE_FAN_BYTE];
    let mode = LocalMode::from_code((mode_fan >> MODE_SHIFT) & MODE_MASK);
    let fan_speed = LocalFan::from_code((mode_fan >> FAN_SHIFT) & FAN_MASK);

    let swing_setpoint = raw[SWING_SETPOINT_BYTE];
    let swing_on = (swing_setpoint >> SWING_SHIFT) & SWING_MASK != 0;
    let setpoint_temperature = (swing_setpoint >> SETPOINT_SHIFT) & SETPOINT_MASK;

    let error_code = (raw[ERROR_BYTE] >> ERROR_SHIFT) & ERROR_MASK;
    let measured_temperature = raw[ROOM_TEMP_BYTE] as i8;

    Some(LocalDeviceState {
        address,
        mode,
        fan_speed,
        measured_temperature,
        setpoint_temperature,
        swing_on,
        error_code,
        // The mode code decides; the raw power bit in byte 3 is ignored.
        is_on: mode != LocalMode::Off,
    })
}

/// Inverse of [`decode_status`] for the fields it reads. Used by the fake gateway.
pub fn encode_status(state: &LocalDeviceState) -> String {
    let mut raw = [0u8; MIN_RECORD_LEN];
    raw[ERROR_BYTE] = (state.error_code & ERROR_MASK) << ERROR_SHIFT;
    raw[MODE_FAN_BYTE] = ((state.mode.code() & MODE_MASK) << MODE_SHIFT)
        | ((state.fan_speed.code() & FAN_MASK) << FAN_SHIFT)
        | u8::from(state.is_on);
    raw[SWING_SETPOINT_BYTE] =
        ((state.setpoint_temperature & SETPOINT_MASK) << SETPOINT_SHIFT) | (u8::from(state.swing_on) << SWING_SHIFT);
    raw[ROOM_TEMP_BYTE] = state.measured_temperature as u8;
    hex::encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_agrees_with_decoder() {
        let state = LocalDeviceState {
            address: LocalAddress(12),
            mode: LocalMode::Dry,
            fan_speed: LocalFan::High,
            measured_temperature: -7,
            setpoint_temperature: 19,
            swing_on: true,
            error_code: 41,
            is_on: true,
        };
        let hex = encode_status(&state);
        assert_eq!(hex.len(), MIN_HEX_LEN);
        assert_eq!(decode_status(LocalAddress(12), &hex), Some(state));
    }

    fn record(b2: u8, b3: u8, b4: u8, b6: u8) -> String {
        hex::encode([0x00, 0x00, b2, b3, b4, 0x00, b6])
    }

    fn decode(b2: u8, b3: u8, b4: u8, b6: u8) -> LocalDeviceState {
        decode_status(LocalAddress(1), &record(b2, b3, b4, b6)).expect("valid record")
    }

    #[test]
    fn off_mode_is_off_whatever_the_power_bit() {
        let off = LocalMode::Off.code() << MODE_SHIFT;
        assert!(!decode(0, off, 0, 0).is_on);
        assert!(!decode(0, off | 0x01, 0, 0).is_on);
    }

    #[test]
    fn power_bit_never_overrides_mode() {
        for code in [0u8, 1, 2, 3, 5, 6, 7] {
            let b3 = code << MODE_SHIFT;
            assert!(decode(0, b3, 0, 0).is_on, "mode {code} without power bit");
            assert!(decode(0, b3 | 0x01, 0, 0).is_on, "mode {code} with power bit");
        }
    }

    #[test]
    fn absent_for_sentinel_and_short_input() {
        let addr = LocalAddress(4);
        assert_eq!(decode_status(addr, NO_DATA), None);
        assert_eq!(decode_status(addr, ""), None);
        assert_eq!(decode_status(addr, "0011223344556"), None);
        assert_eq!(decode_status(addr, "ab"), None);
    }

    #[test]
    fn absent_for_malformed_hex() {
        let addr = LocalAddress(4);
        assert_eq!(decode_status(addr, "zz000000b00018"), None);
        // odd digit count once the separator is gone
        assert_eq!(decode_status(addr, "00000000b0001,,"), None);
    }

    #[test]
    fn absent_when_too_few_bytes_after_cleanup() {
        // 14 characters, but only 6 bytes survive stripping the separators
        assert_eq!(decode_status(LocalAddress(1), ",00000000b000,"), None);
    }

    #[test]
    fn trailing_separator_is_stripped() {
        let state = decode_status(LocalAddress(1), "00000000b00018,").expect("decodes");
        assert_eq!(state.setpoint_temperature, 22);
        assert_eq!(state.measured_temperature, 24);
    }

    #[test]
    fn spaced_byte_pairs_decode_like_compact() {
        let compact = decode_status(LocalAddress(5), "00000c64ca001a").expect("decodes");
        let spaced = decode_status(LocalAddress(5), "00 00 0c 64 ca 00 1a").expect("decodes");
        assert_eq!(spaced, compact);
        assert_eq!(decode_status(LocalAddress(5), " 00000c64ca001a\t"), Some(compact));
    }

    #[test]
    fn signed_room_temperature() {
        assert_eq!(decode(0, 0, 0, 0x00).measured_temperature, 0);
        assert_eq!(decode(0, 0, 0, 0x7F).measured_temperature, 127);
        assert_eq!(decode(0, 0, 0, 0x80).measured_temperature, -128);
        assert_eq!(decode(0, 0, 0, 0xFF).measured_temperature, -1);
    }

    #[test]
    fn extracts_every_field() {
        // heat, fan medium, setpoint 25 with swing, error 3, 26 °C
        let state = decode(0x0C, 0x64, 0xCA, 0x1A);
        assert_eq!(state.mode, LocalMode::Heat);
        assert_eq!(state.fan_speed, LocalFan::Medium);
        assert_eq!(state.setpoint_temperature, 25);
        assert!(state.swing_on);
        assert_eq!(state.error_code, 3);
        assert_eq!(state.measured_temperature, 26);
        assert!(state.is_on);
    }

    #[test]
    fn field_ranges_are_masked() {
        let state = decode(0xFF, 0xFF, 0xFF, 0x00);
        assert_eq!(state.error_code, 63);
        assert_eq!(state.setpoint_temperature, 31);
        assert_eq!(state.mode, LocalMode::Unknown(7));
        assert_eq!(state.fan_speed, LocalFan::Unknown(7));
        assert!(state.swing_on);
    }

    #[test]
    fn longer_records_decode_the_first_seven_bytes() {
        let state = decode_status(LocalAddress(9), "00000014b00016ffff").expect("decodes");
        assert_eq!(state.mode, LocalMode::Auto);
        assert_eq!(state.measured_temperature, 22);
        assert_eq!(state.address, LocalAddress(9));
    }
}
