// ABOUTME: `math` stdlib module — numeric functions and constants beyond
// the `abs`/`max`/`min` built-ins spec.md §4.4 resolves before user code,
// grounded on the original's `hpl_runtime/stdlib/math.py` module shape
// (not present in the retrieval pack's source files, so the function set
// below is the idiomatic minimum a "math" module implies).

use crate::error::HplError;
use crate::modules::NativeModule;
use crate::value::Value;

pub struct MathModule;

fn expect_f64(args: &[Value], index: usize, fn_name: &str) -> Result<f64, HplError> {
    match args.get(index) {
        Some(v) => v.as_f64().ok_or_else(|| {
            HplError::type_error(
                format!("'{}' expects a numeric argument, got '{}'", fn_name, v.type_name()),
                0,
                "MATH_ARGUMENT_TYPE",
            )
        }),
        None => Err(HplError::type_error(
            format!("'{}' requires an argument at position {}", fn_name, index),
            0,
            "MATH_ARITY",
        )),
    }
}

impl NativeModule for MathModule {
    fn name(&self) -> &str {
        "math"
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, HplError> {
        match name {
            "sqrt" => {
                let x = expect_f64(args, 0, "sqrt")?;
                if x < 0.0 {
                    return Err(HplError::arithmetic("sqrt of a negative number", 0));
                }
                Ok(Value::Float(x.sqrt()))
            }
            "pow" => {
                let base = expect_f64(args, 0, "pow")?;
                let exp = expect_f64(args, 1, "pow")?;
                Ok(Value::Float(base.powf(exp)))
            }
            "floor" => Ok(Value::Float(expect_f64(args, 0, "floor")?.floor())),
            "ceil" => Ok(Value::Float(expect_f64(args, 0, "ceil")?.ceil())),
            "round" => Ok(Value::Float(expect_f64(args, 0, "round")?.round())),
            "abs" => Ok(Value::Float(expect_f64(args, 0, "abs")?.abs())),
            "log" => {
                let x = expect_f64(args, 0, "log")?;
                if x <= 0.0 {
                    return Err(HplError::arithmetic("log of a non-positive number", 0));
                }
                Ok(Value::Float(x.ln()))
            }
            "log10" => {
                let x = expect_f64(args, 0, "log10")?;
                if x <= 0.0 {
                    return Err(HplError::arithmetic("log10 of a non-positive number", 0));
                }
                Ok(Value::Float(x.log10()))
            }
            "sin" => Ok(Value::Float(expect_f64(args, 0, "sin")?.sin())),
            "cos" => Ok(Value::Float(expect_f64(args, 0, "cos")?.cos())),
            "tan" => Ok(Value::Float(expect_f64(args, 0, "tan")?.tan())),
            "max" => {
                let a = expect_f64(args, 0, "max")?;
                let b = expect_f64(args, 1, "max")?;
                Ok(Value::Float(a.max(b)))
            }
            "min" => {
                let a = expect_f64(args, 0, "min")?;
                let b = expect_f64(args, 1, "min")?;
                Ok(Value::Float(a.min(b)))
            }
            other => Err(HplError::method_not_found(
                format!("module 'math' has no function '{}'", other),
                0,
            )),
        }
    }

    fn get_constant(&self, name: &str) -> Option<Value> {
        match name {
            "PI" => Some(Value::Float(std::f64::consts::PI)),
            "E" => Some(Value::Float(std::f64::consts::E)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqrt_of_sixteen_is_four() {
        let m = MathModule;
        let result = m.call_function("sqrt", &[Value::Int(16)]).unwrap();
        assert!(matches!(result, Value::Float(f) if f == 4.0));
    }

    #[test]
    fn sqrt_of_negative_is_arithmetic_error() {
        let m = MathModule;
        let err = m.call_function("sqrt", &[Value::Int(-1)]).unwrap_err();
        assert_eq!(err.kind(), "ArithmeticError");
    }

    #[test]
    fn pi_constant_is_available() {
        let m = MathModule;
        assert!(matches!(m.get_constant("PI"), Some(Value::Float(_))));
        assert!(m.get_constant("NOT_A_CONSTANT").is_none());
    }
}
