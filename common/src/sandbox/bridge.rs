// Value conversion at the sandbox boundary
//
// Script values cross into native code through exactly this policy:
// booleans stay booleans, numbers become integers (truncated),
// everything else becomes a string. The policy is total; no field is
// ever dropped.

use serde_json::{Map, Value};

/// Coerce one script-native value to a database value.
pub fn coerce_value(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(*b),
        Value::Number(n) => {
            let truncated = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or_default();
            Value::from(truncated)
        }
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Coerce a flat script object field-by-field. `None` when the value is
/// not an object at all.
pub fn coerce_object(value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    let coerced: Map<String, Value> = map
        .iter()
        .map(|(field, value)| (field.clone(), coerce_value(value)))
        .collect();
    Some(Value::Object(coerced))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_booleans_survive() {
        assert_eq!(coerce_value(&json!(true)), json!(true));
    }

    #[test]
    fn test_numbers_truncate() {
        assert_eq!(coerce_value(&json!(3.9)), json!(3));
        assert_eq!(coerce_value(&json!(-2.5)), json!(-2));
        assert_eq!(coerce_value(&json!(42)), json!(42));
    }

    #[test]
    fn test_everything_else_becomes_string() {
        assert_eq!(coerce_value(&json!("plain")), json!("plain"));
        assert_eq!(coerce_value(&json!(null)), json!("null"));
        assert_eq!(coerce_value(&json!([1, 2])), json!("[1,2]"));
        assert_eq!(coerce_value(&json!({"a": 1})), json!("{\"a\":1}"));
    }

    #[test]
    fn test_object_coercion_keeps_every_field() {
        let object = json!({"flag": true, "count": 1.7, "name": "x", "nested": {"a": 1}});
        let coerced = coerce_object(&object).unwrap();
        let map = coerced.as_object().unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map["flag"], json!(true));
        assert_eq!(map["count"], json!(1));
        assert_eq!(map["name"], json!("x"));
        assert!(map["nested"].is_string());
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(coerce_object(&json!("nope")).is_none());
        assert!(coerce_object(&json!(7)).is_none());
    }
}
