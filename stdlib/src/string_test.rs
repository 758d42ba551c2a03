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
        let frame = forms::direct(callable)?;
        vm::invoke(&frame, args)
    }

    #[test]
    fn test_length_counts_utf16_units() -> Result<()> {
        assert_eq!(call("String.length", &[Value::str("hello")])?, Value::Int(5));
        assert_eq!(call("String.length", &[Value::str("héllo")])?, Value::Int(5));
        assert_eq!(call("String.length", &[Value::str("😀")])?, Value::Int(2));
        Ok(())
    }

    #[test]
    fn test_length_of_null_throws_npe() {
        let err = call("String.length", &[Value::null()]).unwrap_err();
        let thrown = Thrown::of(&err).expect("catchable failure");
        assert_eq!(thrown.class(), class::null_pointer_exception());
    }

    #[test]
    fn test_concat_and_upper() -> Result<()> {
        assert_eq!(
            call("String.concat", &[Value::str("call"), Value::str("plan")])?,
            Value::str("callplan")
        );
        assert_eq!(call("String.toUpperCase", &[Value::str("abc")])?, Value::str("ABC"));
        assert_eq!(call("String.trim", &[Value::str("  x ")])?, Value::str("x"));
        Ok(())
    }

    #[test]
    fn test_char_at_bounds() -> Result<()> {
        assert_eq!(call("String.charAt", &[Value::str("abc"), Value::Int(1)])?, Value::Int('b' as i32));
        let err = call("String.charAt", &[Value::str("abc"), Value::Int(3)]).unwrap_err();
        let thrown = Thrown::of(&err).expect("catchable failure");
        assert_eq!(thrown.class(), class::index_out_of_bounds_exception());
        Ok(())
    }

    #[test]
    fn test_is_empty_returns_int_boolean() -> Result<()> {
        assert_eq!(call("String.isEmpty", &[Value::str("")])?, Value::Int(1));
        assert_eq!(call("String.isEmpty", &[Value::str("a")])?, Value::Int(0));
        Ok(())
    }

    #[test]
    fn test_parse_int() -> Result<()> {
        assert_eq!(call("Integer.parseInt", &[Value::str("-42")])?, Value::Int(-42));
        let err = call("Integer.parseInt", &[Value::str("4x2")]).unwrap_err();
        let thrown = Thrown::of(&err).expect("catchable failure");
        assert_eq!(thrown.class(), class::number_format_exception());
        assert!(thrown.class().is_subclass_of(class::illegal_argument_exception()));
        assert!(thrown.message().contains("4x2"));
        Ok(())
    }

    #[test]
    fn test_int_to_string() -> Result<()> {
        assert_eq!(call("Integer.toString", &[Value::Int(17)])?, Value::str("17"));
        Ok(())
    }

    #[test]
    fn test_wrong_basic_type_is_rejected_before_the_call() {
        let err = call("String.length", &[Value::Int(3)]).unwrap_err();
        assert!(Thrown::of(&err).is_none());
    }
}
