#[cfg(test)]
mod tests {
    use anyhow::{Result, anyhow};
    use callplan_core::{
        forms,
        val::{Thrown, Value, class},
        vm,
    };

    use crate::stdlib_callable;

    fn call(key: &str, args: &[Value]) -> Result<Value> {
        let callable = stdlib_callable(key).ok_or_else(|| anyhow!("no stdlib callable {}", key))?;
        vm::invoke(&forms::direct(callable)?, args)
    }

    fn arithmetic_failure(result: Result<Value>) -> String {
        let err = result.unwrap_err();
        let thrown = Thrown::of(&err).expect("catchable failure");
        assert_eq!(thrown.class(), class::arithmetic_exception());
        thrown.message().to_string()
    }

    #[test]
    fn test_exact_arithmetic() -> Result<()> {
        assert_eq!(call("Math.addExact", &[Value::Int(2), Value::Int(3)])?, Value::Int(5));
        assert_eq!(call("Math.subtractExact", &[Value::Int(2), Value::Int(3)])?, Value::Int(-1));
        assert_eq!(call("Math.multiplyExact", &[Value::Int(-4), Value::Int(3)])?, Value::Int(-12));
        Ok(())
    }

    #[test]
    fn test_exact_arithmetic_overflow_throws() {
        let msg = arithmetic_failure(call("Math.addExact", &[Value::Int(i32::MAX), Value::Int(1)]));
        assert!(msg.contains("overflow"));
        arithmetic_failure(call("Math.multiplyExact", &[Value::Int(i32::MIN), Value::Int(-1)]));
    }

    #[test]
    fn test_floor_division() -> Result<()> {
        assert_eq!(call("Math.floorDiv", &[Value::Int(-7), Value::Int(2)])?, Value::Int(-4));
        assert_eq!(call("Math.floorDiv", &[Value::Int(7), Value::Int(2)])?, Value::Int(3));
        assert_eq!(call("Math.floorDiv", &[Value::Int(i32::MIN), Value::Int(-1)])?, Value::Int(i32::MIN));
        assert_eq!(call("Math.floorMod", &[Value::Int(-7), Value::Int(2)])?, Value::Int(1));
        assert_eq!(call("Math.floorMod", &[Value::Int(7), Value::Int(-2)])?, Value::Int(-1));
        Ok(())
    }

    #[test]
    fn test_division_by_zero_throws() {
        let msg = arithmetic_failure(call("Math.floorDiv", &[Value::Int(1), Value::Int(0)]));
        assert_eq!(msg, "/ by zero");
        arithmetic_failure(call("Math.floorMod", &[Value::Int(1), Value::Int(0)]));
    }

    #[test]
    fn test_wide_types() -> Result<()> {
        assert_eq!(call("Math.abs", &[Value::Long(-9)])?, Value::Long(9));
        assert_eq!(call("Math.sqrt", &[Value::Double(9.0)])?, Value::Double(3.0));
        assert_eq!(call("Math.max", &[Value::Int(4), Value::Int(9)])?, Value::Int(9));
        Ok(())
    }
}
