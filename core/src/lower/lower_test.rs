#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use crate::callable::{CallableRef, Intrinsic, Symbol, SymbolKind};
    use crate::config::EngineOptions;
    use crate::forms;
    use crate::lower::{Insn, lower, lower_and_install};
    use crate::plan::{Arg, CallPlan, Constraint, Node, make_plan};
    use crate::species::get_shape;
    use crate::val::{
        ArrayData, BasicType, ClassFlags, ClassRef, ElemKind, MethodType, TypeDesc, Value, class, throw,
    };

    fn owner() -> ClassRef {
        ClassRef::public("Text")
    }

    fn str_len(args: &[Value]) -> Result<Value> {
        Ok(Value::Int(args[0].as_str().map_or(0, |s| s.chars().count() as i32)))
    }

    fn len_of(owner: &ClassRef) -> CallableRef {
        let ty = MethodType::new(vec![TypeDesc::Class(class::string().clone())], TypeDesc::Int);
        CallableRef::native(Symbol::new(owner, "len", SymbolKind::Static, ty), str_len)
    }

    fn add_ints() -> CallableRef {
        CallableRef::native(
            Symbol::new(
                &owner(),
                "add",
                SymbolKind::Static,
                MethodType::new(vec![TypeDesc::Int, TypeDesc::Int], TypeDesc::Int),
            ),
            |args| match args {
                [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a.wrapping_add(*b))),
                _ => Ok(Value::Int(0)),
            },
        )
    }

    fn is_cast(insn: &Insn) -> bool {
        matches!(insn, Insn::Cast { .. })
    }

    fn is_check_shape(insn: &Insn) -> bool {
        matches!(insn, Insn::CheckShape { .. })
    }

    /// `(L frame, L s) -> f(s) + f(s)`, with the string parameter optionally constrained.
    fn twice_plan(f: &CallableRef, constrained: bool) -> Arc<CallPlan> {
        let frame = Node::param(0, BasicType::Ref);
        let s = if constrained {
            Node::constrained_param(1, BasicType::Ref, Constraint::Class(class::string().clone()))
        } else {
            Node::param(1, BasicType::Ref)
        };
        let a = Node::call(f, vec![Arg::from(&s)]);
        let b = Node::call(f, vec![Arg::from(&s)]);
        let sum = Node::call(&add_ints(), vec![Arg::from(&a), Arg::from(&b)]);
        make_plan("twice", 2, vec![frame, s, a, b, sum], Some(4)).unwrap()
    }

    #[test]
    fn public_natives_are_called_directly() {
        let routine = lower(&twice_plan(&len_of(&owner()), false)).unwrap();
        assert_eq!(routine.count(|i| matches!(i, Insn::CallDirect { .. })), 3);
        assert!(!routine.contains(|i| matches!(i, Insn::CallBoxed { .. })));
        assert!(matches!(routine.code().last(), Some(Insn::Return(Some(_)))));
        assert_eq!(routine.arity(), 2);
    }

    #[test]
    fn repeated_reads_are_cast_once() {
        let routine = lower(&twice_plan(&len_of(&owner()), false)).unwrap();
        assert_eq!(routine.count(is_cast), 1);
    }

    #[test]
    fn constrained_parameters_are_not_cast() {
        let routine = lower(&twice_plan(&len_of(&owner()), true)).unwrap();
        assert_eq!(routine.count(is_cast), 0);
    }

    #[test]
    fn object_parameters_are_not_cast() {
        let ty = MethodType::new(vec![TypeDesc::object()], TypeDesc::Int);
        let hash = CallableRef::native(Symbol::new(&owner(), "hash", SymbolKind::Static, ty), |_| Ok(Value::Int(7)));
        let frame = Node::param(0, BasicType::Ref);
        let x = Node::param(1, BasicType::Ref);
        let h = Node::call(&hash, vec![Arg::from(&x)]);
        let plan = make_plan("hash", 2, vec![frame, x, h], Some(2)).unwrap();
        assert_eq!(lower(&plan).unwrap().count(is_cast), 0);
    }

    #[test]
    fn non_static_targets_go_through_the_invoker() {
        let hidden = ClassRef::new("Hidden", Some(class::object()), ClassFlags::PRIVATE);
        let routine = lower(&twice_plan(&len_of(&hidden), false)).unwrap();
        assert_eq!(routine.count(|i| matches!(i, Insn::CallBoxed { .. })), 2);
        assert_eq!(routine.count(is_cast), 0);

        let closure = CallableRef::closure(
            "len",
            MethodType::new(vec![TypeDesc::Class(class::string().clone())], TypeDesc::Int),
            str_len,
        );
        let routine = lower(&twice_plan(&closure, false)).unwrap();
        assert_eq!(routine.count(|i| matches!(i, Insn::CallBoxed { .. })), 2);
    }

    fn two_getter_plan(constrain: bool) -> Arc<CallPlan> {
        let shape = get_shape("II").unwrap();
        let frame = if constrain {
            Node::constrained_param(0, BasicType::Ref, Constraint::Shape(shape.clone()))
        } else {
            Node::param(0, BasicType::Ref)
        };
        let x = Node::call(shape.getter(0).unwrap(), vec![Arg::from(&frame)]);
        let y = Node::call(shape.getter(1).unwrap(), vec![Arg::from(&frame)]);
        let sum = Node::call(&add_ints(), vec![Arg::from(&x), Arg::from(&y)]);
        make_plan("fields", 1, vec![frame, x, y, sum], Some(3)).unwrap()
    }

    #[test]
    fn frame_shape_is_checked_once() {
        let routine = lower(&two_getter_plan(false)).unwrap();
        assert_eq!(routine.count(is_check_shape), 1);
        assert_eq!(routine.count(|i| matches!(i, Insn::GetField { .. })), 2);
    }

    #[test]
    fn known_frame_shape_skips_the_check() {
        let routine = lower(&two_getter_plan(true)).unwrap();
        assert_eq!(routine.count(is_check_shape), 0);
    }

    #[test]
    fn customized_plans_know_their_frame() {
        let shape = get_shape("II").unwrap();
        let ty = MethodType::new(Vec::<TypeDesc>::new(), TypeDesc::Int);
        let frame = shape
            .construct(two_getter_plan(false), ty, vec![Value::Int(2), Value::Int(3)])
            .unwrap();
        let custom = frame.customized().unwrap();
        let routine = lower(custom.plan()).unwrap();
        assert_eq!(routine.count(is_check_shape), 0);
        assert_eq!(routine.invoke(&custom, &[]).unwrap(), Value::Int(5));
    }

    #[test]
    fn constant_callee_with_matching_type_is_called_directly() {
        let add = add_ints();
        let frame = Node::param(0, BasicType::Ref);
        let x = Node::param(1, BasicType::Int);
        let invoke = Node::call(
            &CallableRef::intrinsic(Intrinsic::InvokeBasic(add.erased_sig().clone())),
            vec![Arg::Const(Value::callable(add)), Arg::from(&x), Arg::Const(Value::Int(1))],
        );
        let plan = make_plan("inc", 2, vec![frame, x, invoke], Some(2)).unwrap();
        let routine = lower(&plan).unwrap();
        assert!(routine.contains(|i| matches!(i, Insn::CallDirect { .. })));
        assert!(!routine.contains(|i| matches!(i, Insn::CallValue { .. })));
    }

    #[test]
    fn two_way_dispatch_becomes_a_branch() {
        let int1 = || MethodType::new(vec![TypeDesc::Int], TypeDesc::Int);
        let test = CallableRef::closure("positive", int1(), |args| Ok(Value::bool(args[0].as_int() > Some(0))));
        let target = CallableRef::closure("double", int1(), |args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2)));
        let fallback = CallableRef::closure("negate", int1(), |args| Ok(Value::Int(-args[0].as_int().unwrap_or(0))));
        let frame = forms::guard_with_test(&test, &target, &fallback).unwrap();
        let routine = lower(frame.plan()).unwrap();
        assert!(routine.contains(|i| matches!(i, Insn::JmpIfZero { .. })));
        assert!(!routine.contains(|i| matches!(i, Insn::CallBoxed { callable, .. } if callable.intrinsic_kind() == Some(&Intrinsic::SelectAlternative))));
        assert_eq!(routine.count(|i| matches!(i, Insn::CallValue { .. })), 3);

        assert_eq!(routine.invoke(&frame, &[Value::Int(4)]).unwrap(), Value::Int(8));
        assert_eq!(routine.invoke(&frame, &[Value::Int(-4)]).unwrap(), Value::Int(4));
    }

    #[test]
    fn shared_selection_is_not_an_idiom() {
        let select = CallableRef::intrinsic(Intrinsic::SelectAlternative);
        let frame = Node::param(0, BasicType::Ref);
        let test = Node::param(1, BasicType::Int);
        let pick = Node::call(&select, vec![Arg::from(&test), Arg::Const(Value::str("a")), Arg::Const(Value::str("b"))]);
        let plan = make_plan("pick", 2, vec![frame, test, pick], Some(2)).unwrap();
        let routine = lower(&plan).unwrap();
        assert!(!routine.contains(|i| matches!(i, Insn::JmpIfZero { .. })));
        assert!(routine.contains(|i| matches!(i, Insn::CallBoxed { .. })));
    }

    #[test]
    fn guarded_catch_becomes_a_handler() {
        let ty = MethodType::new(vec![TypeDesc::Int], TypeDesc::Int);
        let body = CallableRef::closure("body", ty, |_| Err(throw(class::arithmetic_exception(), "/ by zero")));
        let recovery = CallableRef::closure(
            "recover",
            MethodType::new(vec![TypeDesc::object(), TypeDesc::Int], TypeDesc::Int),
            |args| Ok(args[1].clone()),
        );
        let frame = forms::guard_with_catch(&body, class::arithmetic_exception(), &recovery).unwrap();
        let routine = lower(frame.plan()).unwrap();
        assert!(routine.contains(|i| matches!(i, Insn::TryBegin { .. })));
        assert!(routine.contains(|i| matches!(i, Insn::Rethrow { .. })));
        assert!(routine.contains(|i| matches!(i, Insn::InstanceOf { .. })));
        assert!(!routine.contains(|i| matches!(i, Insn::CallBoxed { .. })));
        assert_eq!(routine.invoke(&frame, &[Value::Int(11)]).unwrap(), Value::Int(11));
    }

    #[test]
    fn array_access_is_specialized() {
        let getter = forms::array_element_getter(ElemKind::Int).unwrap();
        let routine = lower(getter.plan()).unwrap();
        assert!(routine.contains(|i| matches!(i, Insn::ArrayLoad { kind: ElemKind::Int, .. })));
        let array = Value::array(ArrayData::Int(vec![5, 6]));
        assert_eq!(routine.invoke(&getter, &[array, Value::Int(1)]).unwrap(), Value::Int(6));

        let setter = forms::array_element_setter(ElemKind::Double).unwrap();
        let routine = lower(setter.plan()).unwrap();
        assert!(routine.contains(|i| matches!(i, Insn::ArrayStore { kind: ElemKind::Double, .. })));
        assert!(matches!(routine.code().last(), Some(Insn::Return(None))));
    }

    #[test]
    fn install_keeps_the_first_routine() {
        let plan = twice_plan(&len_of(&owner()), true);
        let options = EngineOptions::default();
        let first = lower_and_install(&plan, &options).unwrap();
        let second = lower_and_install(&plan, &options).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(plan.lowered().unwrap(), &first));
        let other = Arc::new(lower(&plan).unwrap());
        assert!(Arc::ptr_eq(&plan.install_lowered(other), &first));
    }

    #[test]
    fn routine_listing_names_instructions() {
        let routine = lower(&two_getter_plan(false)).unwrap();
        let listing = routine.to_string();
        assert!(listing.starts_with("routine fields (arity 1,"));
        assert!(listing.contains("CheckShape r0, \"II\""));
        assert!(listing.contains("CallDirect"));
    }
}
