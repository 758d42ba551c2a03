#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use crate::callable::{CallableRef, Intrinsic, Symbol, SymbolKind, SymbolTable, global_symbols, invoke_adapted};
    use crate::error::EngineError;
    use crate::val::{
        ArrayData, BasicType, ClassFlags, ClassRef, ErasedSig, MethodType, Thrown, TypeDesc, Value, class, throw,
    };

    fn int_binop() -> MethodType {
        MethodType::new(vec![TypeDesc::Int, TypeDesc::Int], TypeDesc::Int)
    }

    fn add(args: &[Value]) -> Result<Value> {
        match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            _ => Err(anyhow::anyhow!("add expects two ints")),
        }
    }

    fn owner() -> ClassRef {
        ClassRef::public("Ops")
    }

    fn is_illegal_state(err: &anyhow::Error) -> bool {
        matches!(EngineError::of(err), Some(EngineError::IllegalPlanState(_)))
    }

    #[test]
    fn static_invocability_predicate() {
        let public = Symbol::new(&owner(), "add", SymbolKind::Static, int_binop());
        assert!(public.is_statically_invocable());

        let ctor = Symbol::new(&owner(), "<init>", SymbolKind::Constructor, int_binop());
        assert!(!ctor.is_statically_invocable());

        let hidden = ClassRef::new("Hidden", Some(class::object()), ClassFlags::PRIVATE);
        let private_owner = Symbol::new(&hidden, "add", SymbolKind::Static, int_binop());
        assert!(!private_owner.is_statically_invocable());

        let anonymous = ClassRef::new(
            "Ops$1",
            Some(class::object()),
            ClassFlags {
                anonymous: true,
                ..ClassFlags::PUBLIC
            },
        );
        assert!(!Symbol::new(&anonymous, "add", SymbolKind::Static, int_binop()).is_statically_invocable());

        let leaks_hidden = MethodType::new(vec![TypeDesc::Class(hidden)], TypeDesc::Int);
        assert!(!Symbol::new(&owner(), "peek", SymbolKind::Static, leaks_hidden).is_statically_invocable());
    }

    #[test]
    fn boxed_invokers_are_shared_per_erased_signature() {
        let a = CallableRef::native(Symbol::new(&owner(), "add", SymbolKind::Static, int_binop()), add);
        let b = CallableRef::closure("sub", int_binop(), |args| match args {
            [Value::Int(x), Value::Int(y)] => Ok(Value::Int(x - y)),
            _ => Ok(Value::Int(0)),
        });
        assert!(Arc::ptr_eq(a.boxed_invoker(), b.boxed_invoker()));
        assert_eq!(a.boxed_invoker().sig().to_string(), "(II)I");
    }

    #[test]
    fn invoke_boxed_checks_shape() {
        let f = CallableRef::native(Symbol::new(&owner(), "add", SymbolKind::Static, int_binop()), add);
        assert_eq!(f.invoke_boxed(&[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
        assert!(is_illegal_state(&f.invoke_boxed(&[Value::Int(2)]).unwrap_err()));
        assert!(is_illegal_state(&f.invoke_boxed(&[Value::Int(2), Value::Long(3)]).unwrap_err()));
    }

    #[test]
    fn invoke_boxed_checks_return_type() {
        let liar = CallableRef::closure("liar", int_binop(), |_| Ok(Value::Long(1)));
        assert!(is_illegal_state(&liar.invoke_boxed(&[Value::Int(1), Value::Int(1)]).unwrap_err()));
    }

    #[test]
    fn class_typed_parameters_are_cast() {
        let ty = MethodType::new(vec![TypeDesc::Class(class::string().clone())], TypeDesc::Int);
        let len = CallableRef::closure("len", ty, |args| Ok(Value::Int(args[0].as_str().map_or(-1, |s| s.len() as i32))));
        assert_eq!(len.invoke_boxed(&[Value::str("four")]).unwrap(), Value::Int(4));
        assert_eq!(len.invoke_boxed(&[Value::null()]).unwrap(), Value::Int(-1));
        let err = len.invoke_boxed(&[Value::Int(1).boxed()]).unwrap_err();
        assert_eq!(Thrown::of(&err).unwrap().class(), class::class_cast_exception());
    }

    #[test]
    fn target_failures_pass_through_unchanged() {
        let failing = CallableRef::closure("fail", int_binop(), |_| Err(throw(class::arithmetic_exception(), "nope")));
        let err = failing.invoke_boxed(&[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert_eq!(Thrown::of(&err).unwrap().message(), "nope");
        assert!(EngineError::of(&err).is_none());
    }

    #[test]
    fn pending_reference_resolves_once_registered() {
        let key = "CallableTest.pendingAdd";
        let pending = CallableRef::pending(key, int_binop());
        let err = pending.invoke_boxed(&[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert!(matches!(EngineError::of(&err), Some(EngineError::UnresolvedSymbol(_))));

        let target = CallableRef::native(Symbol::new(&owner(), "add", SymbolKind::Static, int_binop()), add);
        global_symbols().register_as(key, target.clone()).unwrap();
        assert_eq!(pending.invoke_boxed(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
        assert_eq!(pending.resolve().unwrap(), target);
    }

    #[test]
    fn pending_reference_rejects_mismatched_type() {
        let key = "CallableTest.wrongType";
        let target = CallableRef::native(Symbol::new(&owner(), "add", SymbolKind::Static, int_binop()), add);
        global_symbols().register_as(key, target).unwrap();
        let pending = CallableRef::pending(key, MethodType::new(vec![TypeDesc::Long], TypeDesc::Long));
        assert!(is_illegal_state(&pending.resolve().unwrap_err()));
    }

    #[test]
    fn symbol_table_rejects_conflicts() {
        let table = SymbolTable::new();
        let add_ref = CallableRef::native(Symbol::new(&owner(), "add", SymbolKind::Static, int_binop()), add);
        table.register(add_ref.clone()).unwrap();
        table.register(add_ref.clone()).unwrap();
        assert_eq!(table.keys(), vec!["Ops.add".to_string()]);
        let other = CallableRef::closure("other", int_binop(), add);
        assert!(table.register_as("Ops.add", other.clone()).is_err());
        assert!(table.register(other).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn native_equality_follows_symbol() {
        let sym = || Symbol::new(class::string(), "x", SymbolKind::Static, int_binop());
        let a = CallableRef::native(sym(), add);
        let b = CallableRef::native(sym(), add);
        assert_eq!(a, b);
        let c1 = CallableRef::closure("c", int_binop(), add);
        let c2 = CallableRef::closure("c", int_binop(), add);
        assert_ne!(c1, c2);
        assert_eq!(c1, c1.clone());
    }

    #[test]
    fn select_alternative_and_collect() {
        let select = Intrinsic::SelectAlternative;
        let (a, b) = (Value::str("a"), Value::str("b"));
        assert_eq!(select.apply(&[Value::Int(1), a.clone(), b.clone()]).unwrap(), a);
        assert_eq!(select.apply(&[Value::Int(0), a, b.clone()]).unwrap(), b);

        let collect = Intrinsic::CollectArgs(vec![BasicType::Int, BasicType::Ref].into());
        let packed = collect.apply(&[Value::Int(4), Value::str("s")]).unwrap();
        let array = crate::val::array_operand(&packed, crate::val::ElemKind::Ref).unwrap();
        assert_eq!(array.load(0).unwrap(), Value::Int(4).boxed());
        assert_eq!(collect.erased_sig(), ErasedSig::new(vec![BasicType::Int, BasicType::Ref], BasicType::Ref));
    }

    #[test]
    fn guard_with_catch_recovers_matching_throws() {
        let body = CallableRef::closure("body", int_binop(), |_| Err(throw(class::arithmetic_exception(), "div")));
        let recovery_ty = MethodType::new(vec![TypeDesc::object(), TypeDesc::Int, TypeDesc::Int], TypeDesc::Int);
        let recovery = CallableRef::closure("recover", recovery_ty, |args| match args {
            [exc, Value::Int(a), Value::Int(b)] => {
                assert!(exc.as_throwable().is_some());
                Ok(Value::Int(a * 100 + b))
            }
            _ => Ok(Value::Int(-1)),
        });
        let collected = Value::array(ArrayData::Ref(vec![Value::Int(1).boxed(), Value::Int(2).boxed()]));
        let args = [
            Value::callable(body),
            Value::class(class::runtime_exception()),
            Value::callable(recovery),
            collected,
        ];
        let out = Intrinsic::GuardWithCatch.apply(&args).unwrap();
        assert_eq!(out, Value::Int(102).boxed());
    }

    #[test]
    fn guard_with_catch_rethrows_the_same_failure() {
        let body = CallableRef::closure("body", int_binop(), |_| Err(throw(class::null_pointer_exception(), "npe")));
        let recovery_ty = MethodType::new(vec![TypeDesc::object(), TypeDesc::Int, TypeDesc::Int], TypeDesc::Int);
        let recovery = CallableRef::closure("recover", recovery_ty, |_| Ok(Value::Int(0)));
        let direct = body.invoke_boxed(&[Value::Int(0), Value::Int(0)]).unwrap_err();
        let collected = Value::array(ArrayData::Ref(vec![Value::Int(1).boxed(), Value::Int(2).boxed()]));
        let args = [
            Value::callable(body),
            Value::class(class::arithmetic_exception()),
            Value::callable(recovery),
            collected,
        ];
        let err = Intrinsic::GuardWithCatch.apply(&args).unwrap_err();
        let thrown = Thrown::of(&err).unwrap();
        assert_eq!(thrown.class(), class::null_pointer_exception());
        assert_eq!(thrown.message(), Thrown::of(&direct).unwrap().message());
    }

    #[test]
    fn invoke_adapted_unboxes_to_callee_types() {
        let f = CallableRef::native(Symbol::new(&owner(), "add", SymbolKind::Static, int_binop()), add);
        let out = invoke_adapted(&Value::callable(f.clone()), vec![Value::Int(1).boxed(), Value::Int(2).boxed()]).unwrap();
        assert_eq!(out, Value::Int(3));
        let err = invoke_adapted(&Value::callable(f), vec![Value::Int(1).boxed()]).unwrap_err();
        assert!(is_illegal_state(&err));
        let err = invoke_adapted(&Value::null(), vec![]).unwrap_err();
        assert_eq!(Thrown::of(&err).unwrap().class(), class::null_pointer_exception());
    }
}
