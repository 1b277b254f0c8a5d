// ABOUTME: `json` stdlib module — `encode`/`decode`/`pretty`, converting
// between HPL's `Value` and `serde_json::Value`. Grounded on the
// teacher's own `json:encode`/`json:decode`/`json:pretty` module, ported
// from the Lisp value set to HPL's (no Map/Keyword/List here, only
// Int/Float/Bool/String/Array/Null).

use crate::error::HplError;
use crate::modules::NativeModule;
use crate::value::Value;

fn value_to_json(value: &Value) -> Result<serde_json::Value, HplError> {
    match value {
        Value::Int(i) => Ok(serde_json::Value::Number((*i).into())),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| HplError::runtime(format!("cannot encode {} as JSON", f), 0, "JSON_ENCODE_ERROR")),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Null => Ok(serde_json::Value::Null),
        Value::Array(items) => {
            let encoded: Result<Vec<_>, _> = items.borrow().iter().map(value_to_json).collect();
            Ok(serde_json::Value::Array(encoded?))
        }
        other => Err(HplError::type_error(
            format!("cannot encode a '{}' value as JSON", other.type_name()),
            0,
            "JSON_ENCODE_ERROR",
        )),
    }
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => {
            // HPL has no map literal; objects decode to an array of
            // [key, value] pairs so the data survives the round trip.
            let pairs = obj
                .iter()
                .map(|(k, v)| Value::array(vec![Value::String(k.clone()), json_to_value(v)]))
                .collect();
            Value::array(pairs)
        }
    }
}

pub struct JsonModule;

impl NativeModule for JsonModule {
    fn name(&self) -> &str {
        "json"
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, HplError> {
        match name {
            "encode" => {
                let value = args.first().ok_or_else(|| {
                    HplError::type_error("'encode' requires a value argument", 0, "JSON_ARITY")
                })?;
                let json = value_to_json(value)?;
                serde_json::to_string(&json)
                    .map(Value::String)
                    .map_err(|e| HplError::runtime(e.to_string(), 0, "JSON_ENCODE_ERROR"))
            }
            "pretty" => {
                let value = args.first().ok_or_else(|| {
                    HplError::type_error("'pretty' requires a value argument", 0, "JSON_ARITY")
                })?;
                let json = value_to_json(value)?;
                serde_json::to_string_pretty(&json)
                    .map(Value::String)
                    .map_err(|e| HplError::runtime(e.to_string(), 0, "JSON_ENCODE_ERROR"))
            }
            "decode" => {
                let text = match args.first() {
                    Some(Value::String(s)) => s,
                    Some(other) => {
                        return Err(HplError::type_error(
                            format!("'decode' expects a string argument, got '{}'", other.type_name()),
                            0,
                            "JSON_ARGUMENT_TYPE",
                        ))
                    }
                    None => {
                        return Err(HplError::type_error(
                            "'decode' requires a JSON string argument",
                            0,
                            "JSON_ARITY",
                        ))
                    }
                };
                let json: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| HplError::runtime(format!("invalid JSON: {}", e), 0, "JSON_DECODE_ERROR"))?;
                Ok(json_to_value(&json))
            }
            other => Err(HplError::method_not_found(
                format!("module 'json' has no function '{}'", other),
                0,
            )),
        }
    }

    fn get_constant(&self, _name: &str) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_array_round_trips() {
        let m = JsonModule;
        let original = Value::array(vec![Value::Int(1), Value::Int(2), Value::Bool(true)]);
        let encoded = m.call_function("encode", &[original]).unwrap();
        let text = match &encoded {
            Value::String(s) => s.clone(),
            _ => panic!("expected a string"),
        };
        let decoded = m.call_function("decode", &[Value::String(text)]).unwrap();
        assert!(matches!(decoded, Value::Array(_)));
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let m = JsonModule;
        let err = m
            .call_function("decode", &[Value::String("not json".into())])
            .unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
    }

    #[test]
    fn object_decodes_to_key_value_pairs() {
        let m = JsonModule;
        let decoded = m
            .call_function("decode", &[Value::String(r#"{"a":1}"#.into())])
            .unwrap();
        match decoded {
            Value::Array(items) => {
                let items = items.borrow();
                assert_eq!(items.len(), 1);
                match &items[0] {
                    Value::Array(pair) => {
                        let pair = pair.borrow();
                        assert!(matches!(&pair[0], Value::String(k) if k == "a"));
                        assert!(matches!(&pair[1], Value::Int(1)));
                    }
                    _ => panic!("expected a [key, value] pair"),
                }
            }
            _ => panic!("expected an array"),
        }
    }
}
