// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reflex (motion) MCU command and telemetry payloads.

use crate::{build_packet, ProtocolError};

/// Commands sent to the reflex MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdType {
    SetTwist = 0x10,
    Stop = 0x11,
    Estop = 0x12,
    SetLimits = 0x13,
    ClearFaults = 0x14,
    SetConfig = 0x15,
}

/// Telemetry frames received from the reflex MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelType {
    State = 0x80,
}

impl TryFrom<u8> for TelType {
    type Error = ProtocolError;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x80 => Ok(TelType::State),
            other => Err(ProtocolError::PayloadTooShort {
                got: other as usize,
                want: 0x80,
            }),
        }
    }
}

/// Fault bitflags reported in [`StatePayload::fault_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Fault {
    CmdTimeout = 0x0001,
    Estop = 0x0002,
    Tilt = 0x0004,
    Stall = 0x0008,
    ImuFail = 0x0010,
    Brownout = 0x0020,
    Obstacle = 0x0040,
}

/// Human-readable names of every set fault bit, in ascending bit order.
pub fn fault_names(flags: u16) -> Vec<&'static str> {
    const NAMES: [(u16, &str); 7] = [
        (Fault::CmdTimeout as u16, "cmd_timeout"),
        (Fault::Estop as u16, "estop"),
        (Fault::Tilt as u16, "tilt"),
        (Fault::Stall as u16, "stall"),
        (Fault::ImuFail as u16, "imu_fail"),
        (Fault::Brownout as u16, "brownout"),
        (Fault::Obstacle as u16, "obstacle"),
    ];
    NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Ultrasonic/ToF range sensor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    Ok = 0,
    Timeout = 1,
    OutOfRange = 2,
    NotReady = 3,
}

impl RangeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RangeStatus::Timeout,
            2 => RangeStatus::OutOfRange,
            3 => RangeStatus::NotReady,
            _ => RangeStatus::Ok,
        }
    }
}

/// Decoded `STATE` telemetry payload.
///
/// Wire layout (little-endian, 15 bytes): `<hhhHHHB>` —
/// `speed_l_mm_s: i16, speed_r_mm_s: i16, gyro_z_mrad_s: i16,
/// battery_mv: u16, fault_flags: u16, range_mm: u16, range_status: u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePayload {
    pub speed_l_mm_s: i16,
    pub speed_r_mm_s: i16,
    pub gyro_z_mrad_s: i16,
    pub battery_mv: u16,
    pub fault_flags: u16,
    pub range_mm: u16,
    pub range_status: RangeStatus,
}

const STATE_PAYLOAD_LEN: usize = 15;

impl StatePayload {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < STATE_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooShort {
                got: buf.len(),
                want: STATE_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            speed_l_mm_s: i16::from_le_bytes([buf[0], buf[1]]),
            speed_r_mm_s: i16::from_le_bytes([buf[2], buf[3]]),
            gyro_z_mrad_s: i16::from_le_bytes([buf[4], buf[5]]),
            battery_mv: u16::from_le_bytes([buf[6], buf[7]]),
            fault_flags: u16::from_le_bytes([buf[8], buf[9]]),
            range_mm: u16::from_le_bytes([buf[10], buf[11]]),
            range_status: RangeStatus::from_u8(buf[12]),
        })
    }
}

pub fn build_set_twist(seq: u8, linear_mm_s: i16, angular_mrad_s: i16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&linear_mm_s.to_le_bytes());
    payload.extend_from_slice(&angular_mrad_s.to_le_bytes());
    build_packet(CmdType::SetTwist as u8, seq, &payload)
}

pub fn build_stop(seq: u8) -> Vec<u8> {
    build_packet(CmdType::Stop as u8, seq, &[])
}

pub fn build_estop(seq: u8) -> Vec<u8> {
    build_packet(CmdType::Estop as u8, seq, &[])
}

pub fn build_clear_faults(seq: u8) -> Vec<u8> {
    build_packet(CmdType::ClearFaults as u8, seq, &[])
}

/// Build a `SET_CONFIG` packet. `value` must be exactly 4 bytes (the MCU
/// treats every config parameter as a raw little-endian `u32` or `f32`
/// slot keyed by `param_id`).
pub fn build_set_config(seq: u8, param_id: u8, value: [u8; 4]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(param_id);
    payload.extend_from_slice(&value);
    build_packet(CmdType::SetConfig as u8, seq, &payload)
}

/// Named-to-byte-id table for `SET_CONFIG`, so a config layer can refer
/// to `"reflex.kV"` instead of a raw wire id.
pub const REFLEX_PARAM_IDS: &[(&str, u8)] = &[
    ("reflex.kV", 0x01),
    ("reflex.kS", 0x02),
    ("reflex.Kp", 0x03),
    ("reflex.Ki", 0x04),
    ("reflex.min_pwm", 0x05),
    ("reflex.max_pwm", 0x06),
    ("reflex.max_v_mm_s", 0x10),
    ("reflex.max_a_mm_s2", 0x11),
    ("reflex.max_w_mrad_s", 0x12),
    ("reflex.max_aw_mrad_s2", 0x13),
    ("reflex.K_yaw", 0x20),
    ("reflex.cmd_timeout_ms", 0x30),
    ("reflex.soft_stop_ramp_ms", 0x31),
    ("reflex.tilt_thresh_deg", 0x32),
    ("reflex.tilt_hold_ms", 0x33),
    ("reflex.stall_thresh_ms", 0x34),
    ("reflex.stall_speed_thresh", 0x35),
    ("reflex.range_stop_mm", 0x40),
    ("reflex.range_release_mm", 0x41),
    ("reflex.imu_odr_hz", 0x50),
];

/// Param ids whose wire value is an `f32`; every other id is an `i32`.
const FLOAT_PARAM_IDS: &[u8] = &[0x01, 0x02, 0x03, 0x04, 0x20, 0x32];

/// Build a `SET_CONFIG` packet for a named reflex parameter, encoding
/// `value` as `f32` or `i32` on the wire depending on the parameter.
/// Returns `None` for an unrecognized name.
pub fn build_set_config_named(seq: u8, param_name: &str, value: f64) -> Option<Vec<u8>> {
    let param_id = REFLEX_PARAM_IDS.iter().find(|(name, _)| *name == param_name)?.1;
    let bytes = if FLOAT_PARAM_IDS.contains(&param_id) {
        (value as f32).to_le_bytes()
    } else {
        (value as i32).to_le_bytes()
    };
    Some(build_set_config(seq, param_id, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_frame;

    #[test]
    fn state_payload_decodes_fields_in_order() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100i16.to_le_bytes());
        buf.extend_from_slice(&(-50i16).to_le_bytes());
        buf.extend_from_slice(&12i16.to_le_bytes());
        buf.extend_from_slice(&8400u16.to_le_bytes());
        buf.extend_from_slice(&(Fault::Stall as u16).to_le_bytes());
        buf.extend_from_slice(&620u16.to_le_bytes());
        buf.push(RangeStatus::Ok as u8);
        buf.push(0); // padding byte, ignored

        let state = StatePayload::from_bytes(&buf).unwrap();
        assert_eq!(state.speed_l_mm_s, 100);
        assert_eq!(state.speed_r_mm_s, -50);
        assert_eq!(state.gyro_z_mrad_s, 12);
        assert_eq!(state.battery_mv, 8400);
        assert_eq!(state.range_mm, 620);
        assert_eq!(fault_names(state.fault_flags), vec!["stall"]);
    }

    #[test]
    fn set_config_named_encodes_float_params_as_f32() {
        let pkt = build_set_config_named(1, "reflex.kV", 0.75).unwrap();
        let parsed = parse_frame(&pkt).unwrap();
        assert_eq!(parsed.payload[0], 0x01);
        let bits = [parsed.payload[1], parsed.payload[2], parsed.payload[3], parsed.payload[4]];
        assert_eq!(f32::from_le_bytes(bits), 0.75f32);
    }

    #[test]
    fn set_config_named_encodes_int_params_as_i32() {
        let pkt = build_set_config_named(1, "reflex.max_v_mm_s", 800.0).unwrap();
        let parsed = parse_frame(&pkt).unwrap();
        assert_eq!(parsed.payload[0], 0x10);
        let bits = [parsed.payload[1], parsed.payload[2], parsed.payload[3], parsed.payload[4]];
        assert_eq!(i32::from_le_bytes(bits), 800);
    }

    #[test]
    fn set_config_named_rejects_unknown_name() {
        assert!(build_set_config_named(1, "reflex.not_a_param", 1.0).is_none());
    }

    #[test]
    fn short_payload_rejected() {
        assert!(matches!(
            StatePayload::from_bytes(&[0; 5]),
            Err(ProtocolError::PayloadTooShort { got: 5, want: 15 })
        ));
    }

    #[test]
    fn build_set_twist_round_trips_through_parse_frame() {
        let frame = build_set_twist(7, 300, -120);
        let encoded = &frame[..frame.len() - 1];
        let parsed = crate::parse_frame(encoded).unwrap();
        assert_eq!(parsed.pkt_type, CmdType::SetTwist as u8);
        assert_eq!(parsed.seq, 7);
        assert_eq!(
            i16::from_le_bytes([parsed.payload[0], parsed.payload[1]]),
            300
        );
        assert_eq!(
            i16::from_le_bytes([parsed.payload[2], parsed.payload[3]]),
            -120
        );
    }
}
