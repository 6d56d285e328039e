//! Telemetry datagram parsing
//!
//! Wire format: newline-terminated ASCII, `CHANNEL,field1,field2,...`.
//! Field layouts are fixed per channel and must not change — they mirror
//! what the remote decoding pipeline emits.
//!
//! Known channels:
//! - CORR - tick correlation data (timing metrics, 15 positional fields)
//! - MARK - minute marker events
//! - SYNC - sync detector state changes
//! - CHAN - channel quality (carrier/SNR/noise dB)
//! - TICK - tick pulse events
//! - RESP - responses to control commands
//! - CARR, SUBC and anything else are stored unparsed.

use crate::types::{FieldValue, TelemetryMessage};
use std::collections::HashMap;

/// Nominal tick spacing used for the derived `interval_error_ms` field.
const NOMINAL_TICK_INTERVAL_MS: f64 = 1000.0;

/// Parse one datagram payload into a [`TelemetryMessage`].
///
/// Returns `None` for empty payloads. A malformed field list on a known
/// channel still produces a message — with an empty `parsed` map — so the
/// latest-per-channel view keeps advancing even through corrupt bursts.
pub fn parse_datagram(text: &str, received_at: f64) -> Option<TelemetryMessage> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (channel, rest) = match text.split_once(',') {
        Some((c, r)) => (c, r),
        None => (text, ""),
    };

    Some(TelemetryMessage {
        channel: channel.to_string(),
        received_at,
        raw: rest.to_string(),
        parsed: parse_channel_fields(channel, rest),
    })
}

/// Dispatch the payload to the per-channel field parser.
///
/// Unknown channels yield an empty map (opaque message). Known channels
/// yield an empty map on short or unparsable field lists.
pub fn parse_channel_fields(channel: &str, data: &str) -> HashMap<&'static str, FieldValue> {
    let fields: Vec<&str> = if data.is_empty() {
        Vec::new()
    } else {
        data.split(',').collect()
    };

    let parsed = match channel {
        "CORR" => parse_corr(&fields),
        "MARK" => parse_mark(&fields),
        "SYNC" => parse_sync(&fields),
        "CHAN" => parse_chan(&fields),
        "TICK" => parse_tick(&fields),
        "RESP" => Some(HashMap::from([(
            "response",
            FieldValue::Text(data.to_string()),
        )])),
        _ => None,
    };

    parsed.unwrap_or_default()
}

/// Parse a numeric field. Empty fields decode as 0.0 (the remote emits
/// empty slots for metrics it has not computed yet).
fn field_f64(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        Some(0.0)
    } else {
        t.parse().ok()
    }
}

fn field_i64(s: &str) -> Option<i64> {
    let t = s.trim();
    if t.is_empty() {
        Some(0)
    } else {
        t.parse().ok()
    }
}

/// CORR: time_str, timestamp_ms, tick_num, expected, energy_peak,
/// duration_ms, interval_ms, avg_interval_ms, noise_floor, corr_peak,
/// corr_ratio, chain_id, chain_length, chain_start_ms, cumulative_drift_ms.
///
/// Adds the derived `interval_error_ms = |interval_ms - 1000|`.
fn parse_corr(fields: &[&str]) -> Option<HashMap<&'static str, FieldValue>> {
    if fields.len() < 15 {
        return None;
    }

    let interval_ms = field_f64(fields[6])?;

    let mut m = HashMap::new();
    m.insert("time_str", FieldValue::Text(fields[0].to_string()));
    m.insert("timestamp_ms", FieldValue::Float(field_f64(fields[1])?));
    m.insert("tick_num", FieldValue::Int(field_i64(fields[2])?));
    m.insert("expected", FieldValue::Text(fields[3].to_string()));
    m.insert("energy_peak", FieldValue::Float(field_f64(fields[4])?));
    m.insert("duration_ms", FieldValue::Float(field_f64(fields[5])?));
    m.insert("interval_ms", FieldValue::Float(interval_ms));
    m.insert("avg_interval_ms", FieldValue::Float(field_f64(fields[7])?));
    m.insert("noise_floor", FieldValue::Float(field_f64(fields[8])?));
    m.insert("corr_peak", FieldValue::Float(field_f64(fields[9])?));
    m.insert("corr_ratio", FieldValue::Float(field_f64(fields[10])?));
    m.insert("chain_id", FieldValue::Int(field_i64(fields[11])?));
    m.insert("chain_length", FieldValue::Int(field_i64(fields[12])?));
    m.insert("chain_start_ms", FieldValue::Float(field_f64(fields[13])?));
    m.insert(
        "cumulative_drift_ms",
        FieldValue::Float(field_f64(fields[14])?),
    );
    m.insert(
        "interval_error_ms",
        FieldValue::Float((interval_ms - NOMINAL_TICK_INTERVAL_MS).abs()),
    );
    Some(m)
}

/// MARK: time_str, timestamp_ms, marker_num, peak_energy, duration_ms,
/// since_last_sec, confidence. The wire carries trailing detector-internal
/// fields (baseline, threshold) — at least 8 fields total — which are not
/// extracted here.
fn parse_mark(fields: &[&str]) -> Option<HashMap<&'static str, FieldValue>> {
    if fields.len() < 8 {
        return None;
    }

    let mut m = HashMap::new();
    m.insert("time_str", FieldValue::Text(fields[0].to_string()));
    m.insert("timestamp_ms", FieldValue::Float(field_f64(fields[1])?));
    m.insert("marker_num", FieldValue::Int(field_i64(fields[2])?));
    m.insert("peak_energy", FieldValue::Float(field_f64(fields[3])?));
    m.insert("duration_ms", FieldValue::Float(field_f64(fields[4])?));
    m.insert("since_last_sec", FieldValue::Float(field_f64(fields[5])?));
    m.insert("confidence", FieldValue::Text(fields[6].to_string()));
    Some(m)
}

/// SYNC: state label, confidence, optional reason.
fn parse_sync(fields: &[&str]) -> Option<HashMap<&'static str, FieldValue>> {
    if fields.len() < 2 {
        return None;
    }

    let mut m = HashMap::new();
    m.insert("state", FieldValue::Text(fields[0].to_string()));
    m.insert("confidence", FieldValue::Float(field_f64(fields[1])?));
    if fields.len() >= 3 {
        m.insert("reason", FieldValue::Text(fields[2].to_string()));
    }
    Some(m)
}

/// CHAN: carrier dB, SNR dB, noise dB — parsed progressively, fields past
/// the first may be absent on early startup messages.
fn parse_chan(fields: &[&str]) -> Option<HashMap<&'static str, FieldValue>> {
    let mut m = HashMap::new();
    if !fields.is_empty() {
        m.insert("carrier_db", FieldValue::Float(field_f64(fields[0])?));
    }
    if fields.len() >= 2 {
        m.insert("snr_db", FieldValue::Float(field_f64(fields[1])?));
    }
    if fields.len() >= 3 {
        m.insert("noise_db", FieldValue::Float(field_f64(fields[2])?));
    }
    Some(m)
}

/// TICK: tick type label, optional sample offset.
fn parse_tick(fields: &[&str]) -> Option<HashMap<&'static str, FieldValue>> {
    let mut m = HashMap::new();
    if !fields.is_empty() {
        m.insert("tick_type", FieldValue::Text(fields[0].to_string()));
    }
    if fields.len() >= 2 {
        m.insert("sample_offset", FieldValue::Int(field_i64(fields[1])?));
    }
    Some(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORR_LINE: &str =
        "12:00:01,1700000000123,42,Y,5.2,8.1,1003.5,1000.2,0.4,0.91,0.87,3,17,1699999983000,-4.2";

    #[test]
    fn corr_full_frame() {
        let msg = parse_datagram(&format!("CORR,{CORR_LINE}"), 100.0).unwrap();
        assert_eq!(msg.channel, "CORR");
        let p = &msg.parsed;
        assert_eq!(p["tick_num"].as_i64(), Some(42));
        assert_eq!(p["interval_ms"].as_f64(), Some(1003.5));
        assert_eq!(p["chain_length"].as_i64(), Some(17));
        assert_eq!(p["corr_ratio"].as_f64(), Some(0.87));
        assert_eq!(p["cumulative_drift_ms"].as_f64(), Some(-4.2));
        let err = p["interval_error_ms"].as_f64().unwrap();
        assert!((err - 3.5).abs() < 1e-9);
    }

    #[test]
    fn corr_short_frame_parses_empty() {
        let msg = parse_datagram("CORR,12:00:01,123,42", 100.0).unwrap();
        assert_eq!(msg.channel, "CORR");
        assert!(msg.parsed.is_empty());
        assert_eq!(msg.raw, "12:00:01,123,42");
    }

    #[test]
    fn corr_garbage_numeric_parses_empty() {
        let line = CORR_LINE.replace("1003.5", "not-a-number");
        let msg = parse_datagram(&format!("CORR,{line}"), 100.0).unwrap();
        assert!(msg.parsed.is_empty());
    }

    #[test]
    fn corr_empty_numeric_fields_default_to_zero() {
        let msg = parse_datagram("CORR,12:00:01,,0,Y,,,,,,,,0,0,,", 100.0).unwrap();
        assert_eq!(msg.parsed["interval_ms"].as_f64(), Some(0.0));
        assert_eq!(msg.parsed["interval_error_ms"].as_f64(), Some(1000.0));
    }

    #[test]
    fn mark_frame() {
        let msg = parse_datagram(
            "MARK,12:01:00,1700000060000,5,12.4,802.0,60.1,HIGH,0.2,1.5",
            100.0,
        )
        .unwrap();
        let p = &msg.parsed;
        assert_eq!(p["marker_num"].as_i64(), Some(5));
        assert_eq!(p["duration_ms"].as_f64(), Some(802.0));
        assert_eq!(p["since_last_sec"].as_f64(), Some(60.1));
        assert_eq!(p["confidence"].as_str(), Some("HIGH"));
    }

    #[test]
    fn mark_short_frame_parses_empty() {
        let msg = parse_datagram("MARK,12:01:00,1700000060000,5,12.4", 100.0).unwrap();
        assert!(msg.parsed.is_empty());
    }

    #[test]
    fn sync_frame_with_and_without_reason() {
        let msg = parse_datagram("SYNC,LOCKED,0.82,marker_match", 100.0).unwrap();
        assert_eq!(msg.parsed["state"].as_str(), Some("LOCKED"));
        assert_eq!(msg.parsed["confidence"].as_f64(), Some(0.82));
        assert_eq!(msg.parsed["reason"].as_str(), Some("marker_match"));

        let msg = parse_datagram("SYNC,SEARCHING,0.1", 100.0).unwrap();
        assert_eq!(msg.parsed["state"].as_str(), Some("SEARCHING"));
        assert!(!msg.parsed.contains_key("reason"));
    }

    #[test]
    fn chan_progressive_fields() {
        let msg = parse_datagram("CHAN,-42.1,18.3,-60.4", 100.0).unwrap();
        assert_eq!(msg.parsed["carrier_db"].as_f64(), Some(-42.1));
        assert_eq!(msg.parsed["noise_db"].as_f64(), Some(-60.4));

        let msg = parse_datagram("CHAN,-42.1", 100.0).unwrap();
        assert_eq!(msg.parsed["carrier_db"].as_f64(), Some(-42.1));
        assert!(!msg.parsed.contains_key("snr_db"));
    }

    #[test]
    fn unknown_channel_is_opaque() {
        let msg = parse_datagram("SUBC,1,2,3,4", 100.0).unwrap();
        assert_eq!(msg.channel, "SUBC");
        assert!(msg.parsed.is_empty());
        assert_eq!(msg.raw, "1,2,3,4");
    }

    #[test]
    fn empty_datagram_is_dropped() {
        assert!(parse_datagram("", 100.0).is_none());
        assert!(parse_datagram("   \n", 100.0).is_none());
    }

    #[test]
    fn bare_channel_tag() {
        let msg = parse_datagram("CARR", 100.0).unwrap();
        assert_eq!(msg.channel, "CARR");
        assert!(msg.raw.is_empty());
    }
}
