use crate::errors::Result;
use crate::model::{Sample, SampleBatch};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Parses a device message into its sample batch.
///
/// Extraction of `samples` is permissive: a missing field, a non-object
/// document or a non-array `samples` all yield an empty batch. Anything that
/// is not UTF-8 JSON, or an array entry that is not a well-formed sample, is
/// an error and the whole message is rejected.
pub fn parse_payload(payload: &[u8]) -> Result<SampleBatch> {
    let text = std::str::from_utf8(payload)?;
    let message: Value = serde_json::from_str(text)?;

    match message.get("samples") {
        Some(Value::Array(items)) => {
            let mut batch = Vec::with_capacity(items.len());
            for item in items {
                batch.push(Sample::deserialize(item)?);
            }
            Ok(batch)
        }
        Some(other) => {
            warn!("Ignoring non-array samples field ({})", kind(other));
            Ok(Vec::new())
        }
        None => Ok(Vec::new()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn test_single_sample() {
        let batch =
            parse_payload(br#"{"samples":[{"t":1000,"a":[1,2,3],"g":[4,5,6]}]}"#).unwrap();

        assert_eq!(
            batch,
            vec![Sample {
                timestamp: 1000,
                accel: [1.0, 2.0, 3.0],
                gyro: [4.0, 5.0, 6.0],
            }]
        );
    }

    #[test]
    fn test_order_is_preserved() {
        let batch = parse_payload(
            br#"{"samples":[
                {"t":30,"a":[0,0,9.8],"g":[0,0,0]},
                {"t":10,"a":[0,0,9.8],"g":[0,0,0]},
                {"t":10,"a":[0,0,9.8],"g":[0,0,0]}
            ]}"#,
        )
        .unwrap();

        let timestamps: Vec<i64> = batch.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![30, 10, 10]);
    }

    #[test]
    fn test_empty_and_missing_samples() {
        assert!(parse_payload(br#"{"samples": []}"#).unwrap().is_empty());
        assert!(parse_payload(b"{}").unwrap().is_empty());
        assert!(parse_payload(br#"{"device":"esp32"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_non_array_samples_is_empty() {
        assert!(parse_payload(br#"{"samples": 42}"#).unwrap().is_empty());
        assert!(parse_payload(br#"{"samples": {"t": 1}}"#).unwrap().is_empty());
        assert!(parse_payload(br#"[1, 2, 3]"#).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(parse_payload(b"invalid json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            parse_payload(&[0xff, 0xfe, 0x7b]),
            Err(Error::Utf8(_))
        ));
    }

    #[test]
    fn test_malformed_sample_rejects_message() {
        // accelerometer triple is short
        let result = parse_payload(br#"{"samples":[{"t":1,"a":[1,2],"g":[4,5,6]}]}"#);
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
