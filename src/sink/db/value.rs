use serde_json::Value;

/// A column value coerced for binding.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(Value),
}

/// Coerces a decoded JSON value into a bindable sink value. `None` drops
/// the column: nulls are never written, so a partial update leaves the
/// stored cell untouched.
pub fn coerce(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(SqlValue::Bool(*b)),
        Value::Number(n) => {
            let raw = n.to_string();
            if raw.contains(['.', 'e', 'E']) {
                Some(SqlValue::Float(n.as_f64().unwrap_or_default()))
            } else if let Some(int) = n.as_i64() {
                Some(SqlValue::Int(int))
            } else {
                // wider than i64; pass the literal through
                Some(SqlValue::Text(raw))
            }
        }
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Some(SqlValue::Json(value.clone())),
    }
}

impl SqlValue {
    /// String form for drivers that bind text parameters: integers without
    /// scale, floats with at most ten fractional digits, booleans as 1/0,
    /// maps and arrays as JSON text.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Text(s) => s.clone(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => render_float(*f),
            SqlValue::Bool(true) => "1".to_owned(),
            SqlValue::Bool(false) => "0".to_owned(),
            SqlValue::Json(v) => v.to_string(),
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, SqlValue::Text(s) if s.is_empty())
    }
}

fn render_float(f: f64) -> String {
    let fixed = format!("{f:.10}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_keep_no_scale() {
        assert_eq!(coerce(&json!(42)), Some(SqlValue::Int(42)));
        assert_eq!(SqlValue::Int(42).render(), "42");
        assert_eq!(SqlValue::Int(-7).render(), "-7");
    }

    #[test]
    fn floats_render_with_up_to_ten_fraction_digits() {
        assert_eq!(SqlValue::Float(1.5).render(), "1.5");
        assert_eq!(SqlValue::Float(2.0).render(), "2");
        assert_eq!(SqlValue::Float(0.123456789012).render(), "0.123456789");
        assert_eq!(SqlValue::Float(0.1234567891234).render(), "0.1234567891");
    }

    #[test]
    fn numbers_wider_than_i64_stay_lossless() {
        let value: Value = serde_json::from_str("36893488147419103232").unwrap();
        assert_eq!(
            coerce(&value),
            Some(SqlValue::Text("36893488147419103232".to_owned()))
        );
    }

    #[test]
    fn booleans_render_as_bits() {
        assert_eq!(SqlValue::Bool(true).render(), "1");
        assert_eq!(SqlValue::Bool(false).render(), "0");
    }

    #[test]
    fn containers_become_json_text() {
        let value = json!({"a": [1, 2]});
        let coerced = coerce(&value).unwrap();
        assert_eq!(coerced.render(), "{\"a\":[1,2]}");
    }

    #[test]
    fn null_drops_the_column() {
        assert_eq!(coerce(&Value::Null), None);
    }

    #[test]
    fn empty_strings_are_detectable() {
        assert!(coerce(&json!("")).unwrap().is_empty_text());
        assert!(!coerce(&json!("x")).unwrap().is_empty_text());
    }
}
