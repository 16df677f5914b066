use serde_json::Value;
use tracing::trace;

use crate::types::*;

/// Flatten a `[{code, value}, ...]` status list. Entries without a string
/// `code` or with a value that is not a bool/number/string are skipped; on
/// duplicate codes the last entry wins.
pub fn normalize_status(raw: &[Value]) -> StatusSnapshot {
    let mut out = StatusSnapshot::new();
    for item in raw {
        let Some(code) = item.get("code").and_then(|v| v.as_str()) else {
            continue;
        };
        match item.get("value").cloned().map(serde_json::from_value::<DpValue>) {
            Some(Ok(value)) => {
                out.insert(code.to_string(), value);
            }
            _ => trace!(code, "skipping status entry without a scalar value"),
        }
    }
    out
}

/// Build the capability map from a specification or functions result.
///
/// Accepts `{functions: [...], status: [...]}` or a bare function list.
/// Status-only codes are read-only; codes listed under `functions` are writable.
pub fn normalize_spec(result: &Value) -> CapabilityMap {
    let mut out = CapabilityMap::new();
    let (functions, status) = match result {
        Value::Array(items) => (Some(items), None),
        Value::Object(map) => (
            map.get("functions").and_then(|v| v.as_array()),
            map.get("status").and_then(|v| v.as_array()),
        ),
        _ => (None, None),
    };

    for (items, writable) in [(status, false), (functions, true)] {
        for item in items.into_iter().flatten() {
            if let Some((code, capability)) = parse_capability(item, writable) {
                out.insert(code, capability);
            }
        }
    }
    out
}

fn parse_capability(item: &Value, writable: bool) -> Option<(String, Capability)> {
    let code = item.get("code").and_then(|v| v.as_str())?;
    let dp_type = DpType::from_tuya_str(item.get("type").and_then(|v| v.as_str()).unwrap_or(""));

    // `values` is normally a JSON document embedded as a string.
    let values = match item.get("values") {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::Null),
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Null,
    };

    let constraints = match dp_type {
        DpType::Integer | DpType::Float if values.is_object() => Constraints::Numeric(NumericRange {
            min: int_field(&values, "min").unwrap_or(0),
            max: int_field(&values, "max").unwrap_or(0),
            step: int_field(&values, "step").filter(|s| *s > 0).unwrap_or(1),
            scale: Scale(int_field(&values, "scale").unwrap_or(0).clamp(0, 9) as u32),
            unit: values.get("unit").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        }),
        DpType::Enum => match values.get("range").and_then(|v| v.as_array()) {
            Some(range) => Constraints::Enum(
                range
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            None => Constraints::None,
        },
        _ => Constraints::None,
    };

    Some((
        code.to_string(),
        Capability {
            dp_type,
            constraints,
            writable,
        },
    ))
}

fn int_field(values: &Value, key: &str) -> Option<i64> {
    match values.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Physical value of a raw numeric data point.
pub fn decode_numeric(raw: &DpValue, scale: Scale) -> Option<f64> {
    raw.as_f64().map(|r| scale.decode(r))
}

/// Raw integer for a physical value, rounded to the nearest grid point.
pub fn encode_numeric(value: f64, scale: Scale) -> i64 {
    scale.encode(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_flattens_and_skips_malformed() {
        let raw = vec![
            json!({"code": "temp_set", "value": 215}),
            json!({"code": "Power", "value": true}),
            json!({"code": "Mode", "value": "Manual"}),
            json!({"value": 1}),
            json!({"code": "weird", "value": {"nested": 1}}),
            json!({"code": "missing"}),
            json!("not an object"),
        ];
        let snap = normalize_status(&raw);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap["temp_set"], DpValue::Integer(215));
        assert_eq!(snap["Power"], DpValue::Bool(true));
        assert_eq!(snap["Mode"], DpValue::Text("Manual".into()));
    }

    #[test]
    fn status_duplicate_last_wins() {
        let raw = vec![
            json!({"code": "temp_set", "value": 200}),
            json!({"code": "temp_set", "value": 210}),
        ];
        assert_eq!(normalize_status(&raw)["temp_set"], DpValue::Integer(210));
    }

    #[test]
    fn spec_parses_embedded_values() {
        let result = json!({
            "category": "wk",
            "functions": [
                {"code": "temp_set", "type": "Integer",
                 "values": "{\"unit\":\"℃\",\"min\":50,\"max\":350,\"scale\":1,\"step\":5}"},
                {"code": "Mode", "type": "Enum", "values": "{\"range\":[\"Manual\",\"Program\",\"Holiday\"]}"},
                {"code": "Power", "type": "Boolean", "values": "{}"}
            ],
            "status": [
                {"code": "temp_current", "type": "Integer", "values": "{\"min\":0,\"max\":500,\"scale\":1,\"step\":1}"},
                {"code": "temp_set", "type": "Integer", "values": "{\"min\":50,\"max\":350,\"scale\":1,\"step\":5}"}
            ]
        });
        let caps = normalize_spec(&result);
        assert_eq!(caps.len(), 4);

        let set = &caps["temp_set"];
        assert!(set.writable);
        match &set.constraints {
            Constraints::Numeric(r) => {
                assert_eq!((r.min, r.max, r.step), (50, 350, 5));
                assert_eq!(r.scale, Scale(1));
                assert_eq!(r.unit, "℃");
            }
            other => panic!("expected numeric, got {other:?}"),
        }

        assert!(!caps["temp_current"].writable);
        assert_eq!(caps["Mode"].dp_type, DpType::Enum);
        assert_eq!(caps["Mode"].enum_range(), ["Manual", "Program", "Holiday"]);
        assert_eq!(caps["Power"].dp_type, DpType::Boolean);
    }

    #[test]
    fn spec_tolerates_bad_values_and_missing_codes() {
        let result = json!([
            {"code": "temp_set", "type": "Integer", "values": "not json"},
            {"type": "Integer", "values": "{}"},
            {"code": "Mode", "type": "Enum"}
        ]);
        let caps = normalize_spec(&result);
        assert_eq!(caps.len(), 2);
        assert_eq!(caps["temp_set"].constraints, Constraints::None);
        assert_eq!(caps["Mode"].constraints, Constraints::None);
        assert!(caps["temp_set"].writable);
    }

    #[test]
    fn scale_factors() {
        assert_eq!(decode_numeric(&DpValue::Integer(215), Scale(0)), Some(215.0));
        assert_eq!(decode_numeric(&DpValue::Integer(215), Scale(1)), Some(21.5));
        assert_eq!(decode_numeric(&DpValue::Integer(2150), Scale(2)), Some(21.5));
        assert_eq!(decode_numeric(&DpValue::Bool(true), Scale(1)), None);
    }

    #[test]
    fn scale_round_trip() {
        for scale in [Scale(0), Scale(1), Scale(2)] {
            for raw in [-400i64, -1, 0, 1, 5, 99, 215, 350, 700, 12345] {
                let decoded = decode_numeric(&DpValue::Integer(raw), scale).unwrap();
                assert_eq!(encode_numeric(decoded, scale), raw, "scale {scale:?} raw {raw}");
            }
        }
    }
}
