#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use crate::callable::{CallableRef, Intrinsic, Symbol, SymbolKind};
    use crate::config::EngineOptions;
    use crate::error::EngineError;
    use crate::forms;
    use crate::lower::{Insn, lower_and_install};
    use crate::plan::{Arg, CallPlan, Constraint, Node, make_inline_plan, make_plan};
    use crate::species::{Frame, get_shape};
    use crate::val::{BasicType, ClassRef, MethodType, Throwable, Thrown, TypeDesc, Value, class, raise, throw};
    use crate::vm::{evaluate, interpret_with_options, invoke_with_options};

    fn with_threshold(compile_threshold: i32) -> EngineOptions {
        EngineOptions {
            compile_threshold,
            eager_force_inline: false,
            dump_lowered: false,
        }
    }

    fn int2() -> MethodType {
        MethodType::new(vec![TypeDesc::Int, TypeDesc::Int], TypeDesc::Int)
    }

    fn sub(args: &[Value]) -> Result<Value> {
        match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a.wrapping_sub(*b))),
            _ => Ok(Value::Int(0)),
        }
    }

    fn sub_callable() -> CallableRef {
        CallableRef::native(Symbol::new(&ClassRef::public("Arith"), "sub", SymbolKind::Static, int2()), sub)
    }

    /// A fresh, unshared `(I, I) -> a - b` frame whose plan nothing else runs.
    fn fresh_frame(inline: bool) -> Arc<Frame> {
        let shape = get_shape("").unwrap();
        let frame = Node::constrained_param(0, BasicType::Ref, Constraint::Shape(shape.clone()));
        let a = Node::param(1, BasicType::Int);
        let b = Node::param(2, BasicType::Int);
        let diff = Node::call(&sub_callable(), vec![Arg::from(&a), Arg::from(&b)]);
        let nodes = vec![frame, a, b, diff];
        let plan: Arc<CallPlan> = if inline {
            make_inline_plan("sub", 3, nodes, Some(3)).unwrap()
        } else {
            make_plan("sub", 3, nodes, Some(3)).unwrap()
        };
        shape.construct(plan, int2(), Vec::new()).unwrap()
    }

    fn is_illegal_state(err: &anyhow::Error) -> bool {
        matches!(EngineError::of(err), Some(EngineError::IllegalPlanState(_)))
    }

    #[test]
    fn lowering_trips_at_the_threshold() {
        let frame = fresh_frame(false);
        let options = with_threshold(3);
        for expected_count in 1..=2u32 {
            let out = invoke_with_options(&frame, &[Value::Int(9), Value::Int(4)], &options).unwrap();
            assert_eq!(out, Value::Int(5));
            assert_eq!(frame.plan().invocation_count(), expected_count);
            assert!(frame.plan().lowered().is_none());
        }
        let out = invoke_with_options(&frame, &[Value::Int(9), Value::Int(4)], &options).unwrap();
        assert_eq!(out, Value::Int(5));
        assert!(frame.plan().lowered().is_some());

        // Installed routines take over without further counting.
        invoke_with_options(&frame, &[Value::Int(1), Value::Int(1)], &options).unwrap();
        assert_eq!(frame.plan().invocation_count(), 3);
    }

    #[test]
    fn negative_threshold_stays_interpreted() {
        let frame = fresh_frame(false);
        let options = with_threshold(-1);
        for _ in 0..50 {
            invoke_with_options(&frame, &[Value::Int(0), Value::Int(0)], &options).unwrap();
        }
        assert!(frame.plan().lowered().is_none());
        assert_eq!(frame.plan().invocation_count(), 50);
    }

    #[test]
    fn force_inline_plans_lower_on_first_call() {
        let frame = fresh_frame(true);
        let options = EngineOptions {
            eager_force_inline: true,
            ..with_threshold(-1)
        };
        assert_eq!(
            interpret_with_options(&frame, &[Value::Int(2), Value::Int(7)], &options).unwrap(),
            Value::Int(-5)
        );
        assert!(frame.plan().lowered().is_some());

        let lazy = fresh_frame(true);
        invoke_with_options(&lazy, &[Value::Int(2), Value::Int(7)], &with_threshold(-1)).unwrap();
        assert!(lazy.plan().lowered().is_none());
    }

    #[test]
    fn evaluate_does_not_count() {
        let frame = fresh_frame(false);
        assert_eq!(evaluate(&frame, &[Value::Int(3), Value::Int(1)]).unwrap(), Value::Int(2));
        assert_eq!(frame.plan().invocation_count(), 0);
    }

    #[test]
    fn arguments_are_checked_against_the_frame_type() {
        let frame = fresh_frame(false);
        let options = with_threshold(-1);
        assert!(is_illegal_state(&invoke_with_options(&frame, &[Value::Int(1)], &options).unwrap_err()));
        let err = invoke_with_options(&frame, &[Value::Int(1), Value::Long(1)], &options).unwrap_err();
        assert!(is_illegal_state(&err));
        assert_eq!(frame.plan().invocation_count(), 0);
    }

    #[test]
    fn interpreter_and_routine_agree() {
        let frame = fresh_frame(false);
        let cases = [(0, 0), (7, 9), (i32::MIN, 1), (-3, i32::MAX)];
        let interpreted: Vec<Value> = cases
            .iter()
            .map(|(a, b)| evaluate(&frame, &[Value::Int(*a), Value::Int(*b)]).unwrap())
            .collect();
        let routine = lower_and_install(frame.plan(), &with_threshold(-1)).unwrap();
        for ((a, b), expected) in cases.iter().zip(interpreted) {
            assert_eq!(routine.invoke(&frame, &[Value::Int(*a), Value::Int(*b)]).unwrap(), expected);
        }
    }

    #[test]
    fn customized_frames_run_their_own_plan() {
        let frame = fresh_frame(false);
        let custom = frame.customized().unwrap();
        let options = with_threshold(1);
        assert_eq!(
            invoke_with_options(&custom, &[Value::Int(5), Value::Int(2)], &options).unwrap(),
            Value::Int(3)
        );
        assert!(custom.plan().lowered().is_some());
        assert!(frame.plan().lowered().is_none());

        let impostor = get_shape("")
            .unwrap()
            .construct(custom.plan().clone(), int2(), Vec::new())
            .unwrap();
        let err = invoke_with_options(&impostor, &[Value::Int(5), Value::Int(2)], &options).unwrap_err();
        assert!(is_illegal_state(&err));
    }

    #[test]
    fn target_failures_keep_their_identity_on_both_paths() {
        let original = Arc::new(Throwable::new(class::illegal_argument_exception(), "bad"));
        let thrown = original.clone();
        let failing = CallableRef::closure("fail", int2(), move |_| Err(raise(thrown.clone())));
        let frame = forms::reinvoker(&failing).unwrap();

        let err = evaluate(&frame, &[Value::Int(0), Value::Int(0)]).unwrap_err();
        assert!(Arc::ptr_eq(Thrown::of(&err).unwrap(), &original));

        let routine = crate::lower::lower(frame.plan()).unwrap();
        let err = routine.invoke(&frame, &[Value::Int(0), Value::Int(0)]).unwrap_err();
        assert!(Arc::ptr_eq(Thrown::of(&err).unwrap(), &original));
    }

    #[test]
    fn unmatched_catch_rethrows_the_same_object_on_both_paths() {
        let original = Arc::new(Throwable::new(class::null_pointer_exception(), "npe"));
        let thrown = original.clone();
        let body = CallableRef::closure("body", int2(), move |_| Err(raise(thrown.clone())));
        let recovery = CallableRef::closure(
            "recover",
            MethodType::new(vec![TypeDesc::object(), TypeDesc::Int, TypeDesc::Int], TypeDesc::Int),
            |_| Ok(Value::Int(0)),
        );
        let frame = forms::guard_with_catch(&body, class::arithmetic_exception(), &recovery).unwrap();

        let err = evaluate(&frame, &[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert!(Arc::ptr_eq(Thrown::of(&err).unwrap(), &original));

        let routine = crate::lower::lower(frame.plan()).unwrap();
        let err = routine.invoke(&frame, &[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert!(Arc::ptr_eq(Thrown::of(&err).unwrap(), &original));
    }

    #[test]
    fn matched_catch_recovers_on_both_paths() {
        let body = CallableRef::closure("body", int2(), |_| Err(throw(class::arithmetic_exception(), "/ by zero")));
        let recovery = CallableRef::closure(
            "recover",
            MethodType::new(vec![TypeDesc::object(), TypeDesc::Int, TypeDesc::Int], TypeDesc::Int),
            |args| match args {
                [exc, Value::Int(a), Value::Int(b)] if exc.as_throwable().is_some() => Ok(Value::Int(a + b)),
                _ => Ok(Value::Int(-1)),
            },
        );
        // A subclass of the guarded class is caught as well.
        let frame = forms::guard_with_catch(&body, class::runtime_exception(), &recovery).unwrap();
        assert_eq!(evaluate(&frame, &[Value::Int(4), Value::Int(5)]).unwrap(), Value::Int(9));
        let routine = crate::lower::lower(frame.plan()).unwrap();
        assert_eq!(routine.invoke(&frame, &[Value::Int(4), Value::Int(5)]).unwrap(), Value::Int(9));
    }

    #[test]
    fn bound_frames_nest() {
        let inner = fresh_frame(false);
        let outer = forms::reinvoker(&inner.to_callable()).unwrap();
        let options = with_threshold(-1);
        assert_eq!(
            invoke_with_options(&outer, &[Value::Int(10), Value::Int(4)], &options).unwrap(),
            Value::Int(6)
        );
    }

    #[test]
    fn unresolvable_symbol_on_an_untaken_branch_still_lowers() {
        let int1 = MethodType::new(vec![TypeDesc::Int], TypeDesc::Int);
        let same = CallableRef::closure("same", int1.clone(), |args| Ok(args[0].clone()));
        let missing = CallableRef::pending("Nowhere.missing", int1.clone());
        let shape = get_shape("").unwrap();
        let frame = Node::constrained_param(0, BasicType::Ref, Constraint::Shape(shape.clone()));
        let a = Node::param(1, BasicType::Int);
        let select = Node::call(
            &CallableRef::intrinsic(Intrinsic::SelectAlternative),
            vec![Arg::from(&a), Arg::Const(Value::callable(same)), Arg::Const(Value::callable(missing))],
        );
        let call = Node::call(
            &CallableRef::intrinsic(Intrinsic::InvokeBasic(int1.erase())),
            vec![Arg::from(&select), Arg::from(&a)],
        );
        let plan = make_plan("pick", 2, vec![frame, a, select, call], Some(3)).unwrap();
        let frame = shape.construct(plan, int1, Vec::new()).unwrap();

        let options = with_threshold(2);
        for _ in 0..4 {
            assert_eq!(invoke_with_options(&frame, &[Value::Int(7)], &options).unwrap(), Value::Int(7));
        }
        let routine = frame.plan().lowered().expect("plan lowers past the threshold");
        assert!(routine.contains(|i| matches!(i, Insn::CallValue { .. })));

        // The symbol is looked up only when its branch runs.
        let err = invoke_with_options(&frame, &[Value::Int(0)], &options).unwrap_err();
        assert!(matches!(EngineError::of(&err), Some(EngineError::UnresolvedSymbol(_))));
        let err = evaluate(&frame, &[Value::Int(0)]).unwrap_err();
        assert!(matches!(EngineError::of(&err), Some(EngineError::UnresolvedSymbol(_))));
    }

    fn takes(class: &ClassRef, name: &str) -> CallableRef {
        let ty = MethodType::new(vec![TypeDesc::Class(class.clone())], TypeDesc::Int);
        CallableRef::native(Symbol::new(&ClassRef::public("Fruit"), name, SymbolKind::Static, ty), |_| {
            Ok(Value::Int(1))
        })
    }

    #[test]
    fn unrelated_casts_on_one_parameter_still_lower() {
        let apples = ClassRef::public("Apples");
        let pears = ClassRef::public("Pears");
        let shape = get_shape("").unwrap();
        let frame = Node::constrained_param(0, BasicType::Ref, Constraint::Shape(shape.clone()));
        let x = Node::param(1, BasicType::Ref);
        let f = Node::call(&takes(&apples, "eat"), vec![Arg::from(&x)]);
        let g = Node::call(&takes(&pears, "peel"), vec![Arg::from(&x)]);
        let diff = Node::call(&sub_callable(), vec![Arg::from(&f), Arg::from(&g)]);
        let plan = make_plan("fruit", 2, vec![frame, x, f, g, diff], Some(4)).unwrap();
        let ty = MethodType::new(vec![TypeDesc::object()], TypeDesc::Int);
        let frame = shape.construct(plan, ty, Vec::new()).unwrap();

        let options = with_threshold(2);
        for _ in 0..4 {
            assert_eq!(invoke_with_options(&frame, &[Value::null()], &options).unwrap(), Value::Int(0));
        }
        let routine = frame.plan().lowered().expect("plan lowers past the threshold");
        assert_eq!(routine.count(|i| matches!(i, Insn::Cast { .. })), 2);

        let err = invoke_with_options(&frame, &[Value::str("plum")], &options).unwrap_err();
        assert_eq!(Thrown::of(&err).unwrap().class(), class::class_cast_exception());
        let err = evaluate(&frame, &[Value::str("plum")]).unwrap_err();
        assert_eq!(Thrown::of(&err).unwrap().class(), class::class_cast_exception());
    }

    #[test]
    fn failed_lowering_keeps_the_plan_interpreted() {
        // The frame is constrained to "I" but reads a getter of "J", which
        // the interpreter rejects at run time and lowering rejects up front.
        let shape = get_shape("I").unwrap();
        let other = get_shape("J").unwrap();
        let frame = Node::constrained_param(0, BasicType::Ref, Constraint::Shape(shape.clone()));
        let a = Node::param(1, BasicType::Int);
        let stray = Node::call(other.getter(0).unwrap(), vec![Arg::from(&frame)]);
        let same = Node::call(
            &CallableRef::intrinsic(Intrinsic::Identity(BasicType::Int)),
            vec![Arg::from(&a)],
        );
        let plan = make_plan("stray", 2, vec![frame, a, stray, same], Some(3)).unwrap();
        assert!(crate::lower::lower(&plan).is_err());
        let ty = MethodType::new(vec![TypeDesc::Int], TypeDesc::Int);
        let frame = shape.construct(plan, ty, vec![Value::Int(5)]).unwrap();

        let options = with_threshold(1);
        for count in 1..=3u32 {
            let err = invoke_with_options(&frame, &[Value::Int(1)], &options).unwrap_err();
            assert!(is_illegal_state(&err));
            assert!(format!("{:#}", err).contains("applied to frame of shape"));
            assert!(frame.plan().lowering_failed());
            assert!(frame.plan().lowered().is_none());
            assert_eq!(frame.plan().invocation_count(), count);
        }
    }
}
