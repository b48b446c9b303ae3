//! Value comparison and formatting.
//!
//! The query language defines a total order over all values:
//! null < bool < number < string < array < object. Within a type, bools
//! order false < true, numbers numerically, strings lexicographically,
//! arrays element-wise (shorter prefix first), objects attribute-wise over
//! their sorted attribute names. Grouping, sorting, DISTINCT and MIN/MAX all
//! use this one order.

use std::cmp::Ordering;

use serde_json::Value;

/// Rank of a value's type in the total order.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Numeric view of a JSON number. Non-finite parses collapse to 0.
pub fn as_f64(value: &Value) -> f64 {
    value.as_f64().unwrap_or(0.0)
}

/// Total order over values.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_), Value::Number(_)) => {
            as_f64(a).partial_cmp(&as_f64(b)).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (va, vb) in x.iter().zip(y.iter()) {
                let ord = cmp_values(va, vb);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut keys_a: Vec<&String> = x.keys().collect();
            let mut keys_b: Vec<&String> = y.keys().collect();
            keys_a.sort();
            keys_b.sort();
            for (ka, kb) in keys_a.iter().zip(keys_b.iter()) {
                let ord = ka.cmp(kb);
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = cmp_values(&x[*ka], &y[*kb]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            keys_a.len().cmp(&keys_b.len())
        }
        _ => unreachable!("ranks matched"),
    }
}

/// Value equality under the query order.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    cmp_values(a, b) == Ordering::Equal
}

/// Grouping key for hash-based collects: a stable string form under which
/// equal values (per `cmp_values`) collide.
pub fn group_key(value: &Value) -> String {
    match value {
        Value::Null => "n".to_string(),
        Value::Bool(b) => format!("b{}", b),
        Value::Number(_) => format!("d{}", format_number(as_f64(value))),
        Value::String(s) => format!("s{}", s),
        Value::Array(items) => {
            let mut out = String::from("a[");
            for item in items {
                out.push_str(&group_key(item));
                out.push(',');
            }
            out.push(']');
            out
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("o{");
            for key in keys {
                out.push_str(key);
                out.push(':');
                out.push_str(&group_key(&map[key]));
                out.push(',');
            }
            out.push('}');
            out
        }
    }
}

/// Formats a number the way the query language stringifies it: shortest
/// decimal form that round-trips, positional notation, no trailing `.0` for
/// integral values.
pub fn format_number(value: f64) -> String {
    if value.is_nan() || value.is_infinite() {
        return "null".to_string();
    }
    format!("{}", value)
}

/// Builds a number `Value` from an f64, collapsing integral values inside
/// the safe range to JSON integers so serialization stays exact.
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        return Value::from(value as i64);
    }
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Truthiness: null, false, 0, "" are false; everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => as_f64(value) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_order() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(0),
            json!(10.5),
            json!(""),
            json!("a"),
            json!([1]),
            json!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(cmp_values(&pair[0], &pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn test_array_prefix_orders_first() {
        assert_eq!(cmp_values(&json!([1, 2]), &json!([1, 2, 3])), Ordering::Less);
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert!(values_equal(&json!(2), &json!(2.0)));
        assert_eq!(group_key(&json!(2)), group_key(&json!(2.0)));
    }

    #[test]
    fn test_large_integer_literal_formatting() {
        // Nearest representable double for 123456789012345672, printed in
        // shortest round-trip form.
        let parsed: f64 = "123456789012345672".parse().unwrap();
        assert_eq!(format_number(parsed), "123456789012345660");
    }

    #[test]
    fn test_integral_formatting_has_no_fraction() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!("x")));
    }
}
