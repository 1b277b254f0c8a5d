// ABOUTME: `time` stdlib module — wall-clock reads. No sleep function:
// the sandbox runner already owns wall-clock budget enforcement (§4.8)
// and a script-visible sleep would let code spend that budget idling.

use crate::error::HplError;
use crate::modules::NativeModule;
use crate::value::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct TimeModule;

fn unix_duration() -> Result<std::time::Duration, HplError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| HplError::runtime(format!("system clock error: {}", e), 0, "CLOCK_ERROR"))
}

impl NativeModule for TimeModule {
    fn name(&self) -> &str {
        "time"
    }

    fn call_function(&self, name: &str, _args: &[Value]) -> Result<Value, HplError> {
        match name {
            "now" => Ok(Value::Float(unix_duration()?.as_secs_f64())),
            "now_ms" => Ok(Value::Int(unix_duration()?.as_millis() as i64)),
            other => Err(HplError::method_not_found(
                format!("module 'time' has no function '{}'", other),
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
    fn now_returns_a_plausible_unix_timestamp() {
        let m = TimeModule;
        let result = m.call_function("now", &[]).unwrap();
        match result {
            Value::Float(seconds) => assert!(seconds > 1_700_000_000.0),
            _ => panic!("expected a float"),
        }
    }

    #[test]
    fn now_ms_is_roughly_now_times_a_thousand() {
        let m = TimeModule;
        let seconds = match m.call_function("now", &[]).unwrap() {
            Value::Float(f) => f,
            _ => panic!("expected a float"),
        };
        let millis = match m.call_function("now_ms", &[]).unwrap() {
            Value::Int(i) => i,
            _ => panic!("expected an int"),
        };
        assert!((millis as f64 - seconds * 1000.0).abs() < 5000.0);
    }
}
