use std::sync::Arc;

use anyhow::Result;

use super::{Arg, CallPlan, Constraint, Node, NodeKind};
use crate::callable::{CallableRef, Intrinsic};
use crate::error::EngineError;
use crate::species::Shape;
use crate::val::BasicType;

/// Memo key for a derived plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TransformKey {
    AddArguments {
        pos: usize,
        types: Arc<[BasicType]>,
    },
    PermuteArguments {
        skip: usize,
        reorder: Arc<[usize]>,
        types: Arc<[BasicType]>,
    },
    BindArgument {
        pos: usize,
        shape: Arc<str>,
    },
}

impl CallPlan {
    /// Returns the memoized plan for `key`, deriving it with `build` on a miss.
    /// Racing builders may both run; the first one to publish wins.
    fn transform<F>(self: &Arc<Self>, key: TransformKey, build: F) -> Result<Arc<CallPlan>>
    where
        F: FnOnce() -> Result<CallPlan>,
    {
        if let Some(hit) = self.transforms.get(&key) {
            return Ok(hit.value().clone());
        }
        let candidate = Arc::new(build()?);
        tracing::trace!(target: "callplan::plan", "derived {:?} from {}", key, self.debug_name);
        let winner = self.transforms.entry(key).or_insert(candidate);
        Ok(winner.value().clone())
    }

    /// Inserts fresh parameters of `types` at parameter position `pos`.
    pub fn add_arguments(self: &Arc<Self>, pos: usize, types: &[BasicType]) -> Result<Arc<CallPlan>> {
        if pos > self.arity {
            return Err(EngineError::malformed(format!(
                "{}: cannot insert parameters at {} of {}",
                self.debug_name, pos, self.arity
            )));
        }
        if let Some(bad) = types.iter().find(|t| !t.is_arg()) {
            return Err(EngineError::malformed(format!("{}: cannot add a {} parameter", self.debug_name, bad)));
        }
        if types.is_empty() {
            return Ok(self.clone());
        }
        let key = TransformKey::AddArguments {
            pos,
            types: types.into(),
        };
        self.transform(key, || {
            let added = types.len();
            let moved: Vec<Arc<Node>> = self.nodes[..self.arity]
                .iter()
                .enumerate()
                .map(|(i, node)| moved_param(node, if i < pos { i } else { i + added }))
                .collect();
            let mut nodes = Vec::with_capacity(self.nodes.len() + added);
            nodes.extend_from_slice(&moved[..pos]);
            nodes.extend(types.iter().enumerate().map(|(k, t)| Node::param(pos + k, *t)));
            nodes.extend_from_slice(&moved[pos..]);
            let map = moved.into_iter().map(Some).collect();
            self.rebuild(nodes, map, self.arity + added, &|_| None)
        })
    }

    /// Reorders the parameters after the first `skip`: old parameter `skip + i`
    /// takes its value from new parameter `skip + reorder[i]`. Sources may repeat
    /// (the incoming argument is duplicated) or be missing (it is dropped).
    pub fn permute_arguments(self: &Arc<Self>, skip: usize, reorder: &[usize], types: &[BasicType]) -> Result<Arc<CallPlan>> {
        let Some(old_count) = self.arity.checked_sub(skip) else {
            return Err(EngineError::malformed(format!(
                "{}: cannot skip {} of {} parameters",
                self.debug_name, skip, self.arity
            )));
        };
        if reorder.len() != old_count {
            return Err(EngineError::malformed(format!(
                "{}: reorder has {} entries for {} parameters",
                self.debug_name,
                reorder.len(),
                old_count
            )));
        }
        for (i, src) in reorder.iter().enumerate() {
            let expected = self.nodes[skip + i].ty;
            match types.get(*src) {
                Some(t) if *t == expected => {}
                Some(t) => {
                    return Err(EngineError::malformed(format!(
                        "{}: parameter {} is {}, new parameter {} is {}",
                        self.debug_name,
                        skip + i,
                        expected,
                        skip + src,
                        t
                    )));
                }
                None => {
                    return Err(EngineError::malformed(format!(
                        "{}: reorder source {} out of {} new parameters",
                        self.debug_name,
                        src,
                        types.len()
                    )));
                }
            }
        }
        if let Some(bad) = types.iter().find(|t| !t.is_arg()) {
            return Err(EngineError::malformed(format!("{}: cannot take a {} parameter", self.debug_name, bad)));
        }
        let identity = types.len() == old_count && reorder.iter().enumerate().all(|(i, src)| i == *src);
        if identity {
            return Ok(self.clone());
        }
        let key = TransformKey::PermuteArguments {
            skip,
            reorder: reorder.into(),
            types: types.into(),
        };
        self.transform(key, || {
            let mut nodes: Vec<Arc<Node>> = self.nodes[..skip].to_vec();
            for (j, ty) in types.iter().enumerate() {
                let param = match reorder.iter().position(|src| *src == j) {
                    Some(i) => moved_param(&self.nodes[skip + i], skip + j),
                    None => Node::param(skip + j, *ty),
                };
                nodes.push(param);
            }
            let mut map: Vec<Option<Arc<Node>>> = nodes[..skip].iter().cloned().map(Some).collect();
            map.extend(reorder.iter().map(|src| Some(nodes[skip + src].clone())));
            self.rebuild(nodes, map, skip + types.len(), &|_| None)
        })
    }

    /// Removes parameter `pos` and reads its value from the last field of
    /// `new_shape` instead. Getters of the previous frame shape are retargeted
    /// to `new_shape`, which must extend it by exactly that field.
    pub fn bind_argument(self: &Arc<Self>, pos: usize, new_shape: &Arc<Shape>) -> Result<Arc<CallPlan>> {
        if pos == 0 || pos >= self.arity {
            return Err(EngineError::malformed(format!(
                "{}: cannot bind parameter {} of {}",
                self.debug_name, pos, self.arity
            )));
        }
        let Some(field) = new_shape.field_count().checked_sub(1) else {
            return Err(EngineError::malformed(format!("{}: cannot bind into the empty shape", self.debug_name)));
        };
        let bound_ty = self.nodes[pos].ty;
        if new_shape.field_type(field) != Some(bound_ty) {
            return Err(EngineError::malformed(format!(
                "{}: parameter {} is {}, shape \"{}\" ends with {:?}",
                self.debug_name,
                pos,
                bound_ty,
                new_shape.signature(),
                new_shape.field_type(field)
            )));
        }
        let old_signature = new_shape.parent_signature().unwrap_or_default().to_string();
        let key = TransformKey::BindArgument {
            pos,
            shape: new_shape.signature_arc().clone(),
        };
        self.transform(key, || {
            let frame = match self.nodes[0].constraint() {
                Some(Constraint::Shape(shape)) if shape.signature() == old_signature => {
                    self.nodes[0].with_constraint(Some(Constraint::Shape(new_shape.clone())))
                }
                _ => self.nodes[0].clone(),
            };
            let mut nodes = vec![frame.clone()];
            let mut map = vec![Some(frame.clone())];
            for (i, node) in self.nodes[1..self.arity].iter().enumerate() {
                let old = i + 1;
                if old == pos {
                    map.push(None);
                    continue;
                }
                let param = moved_param(node, nodes.len());
                nodes.push(param.clone());
                map.push(Some(param));
            }
            let getter = new_shape
                .getter(field)
                .ok_or_else(|| EngineError::illegal_state(format!("shape \"{}\" lacks getter {}", new_shape.signature(), field)))?;
            let read = Node::call_at(nodes.len(), getter, vec![Arg::Node(frame)]);
            nodes.push(read.clone());
            map[pos] = Some(read);
            let retarget = |callable: &CallableRef| match callable.intrinsic_kind() {
                Some(Intrinsic::FieldGet { shape, index, .. }) if shape.as_ref() == old_signature => {
                    new_shape.getter(*index).cloned()
                }
                _ => None,
            };
            self.rebuild(nodes, map, self.arity - 1, &retarget)
        })
    }

    /// Appends this plan's computed nodes after `nodes`, rewriting arguments
    /// through `map` (old index → replacement) and callables through `retarget`.
    fn rebuild(
        &self,
        mut nodes: Vec<Arc<Node>>,
        mut map: Vec<Option<Arc<Node>>>,
        arity: usize,
        retarget: &dyn Fn(&CallableRef) -> Option<CallableRef>,
    ) -> Result<CallPlan> {
        for old in self.nodes[self.arity..].iter() {
            let NodeKind::Computed { callable, args } = old.kind() else {
                return Err(EngineError::illegal_state(format!(
                    "{}: parameter node in the computed region",
                    self.debug_name
                )));
            };
            let mut changed = false;
            let mut new_args = Vec::with_capacity(args.len());
            for arg in args.iter() {
                match arg {
                    Arg::Node(target) => {
                        let replacement = target
                            .slot()
                            .and_then(|at| map.get(at).cloned().flatten())
                            .ok_or_else(|| {
                                EngineError::illegal_state(format!(
                                    "{}: t{} reads a node with no replacement",
                                    self.debug_name,
                                    old.index()
                                ))
                            })?;
                        changed |= !Arc::ptr_eq(&replacement, target);
                        new_args.push(Arg::Node(replacement));
                    }
                    Arg::Const(_) => new_args.push(arg.clone()),
                }
            }
            let new_callable = retarget(callable);
            let at = nodes.len();
            let node = if !changed && new_callable.is_none() && old.slot() == Some(at) {
                old.clone()
            } else {
                let callable = new_callable.unwrap_or_else(|| callable.clone());
                Node::call_at(at, &callable, new_args)
            };
            nodes.push(node.clone());
            map.push(Some(node));
        }
        let result = match self.result {
            Some(r) => Some(
                map.get(r)
                    .cloned()
                    .flatten()
                    .and_then(|n| n.slot())
                    .ok_or_else(|| EngineError::illegal_state(format!("{}: result node was removed", self.debug_name)))?,
            ),
            None => None,
        };
        CallPlan::build(&self.debug_name, arity, &nodes, result, self.force_inline)
    }
}

/// The parameter `node` placed at `index`, keeping identity when it already sits there.
fn moved_param(node: &Arc<Node>, index: usize) -> Arc<Node> {
    if node.slot() == Some(index) {
        node.clone()
    } else {
        node.relocated(index, NodeKind::Parameter)
    }
}
