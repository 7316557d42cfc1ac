//! Tree-walking evaluator for binding expressions and handler statements.
//!
//! Evaluation is written once, as recursive boxed futures. The asynchronous
//! processor awaits it on the runtime; the synchronous processor polls it a
//! single time and treats `Pending` as an error (see [`poll_once`]).

mod globals;
mod methods;
mod operators;
mod statements;

use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use bindery_script::{
    ArrowBody, AssignOp, Expr, Literal, LogicalOp, MemberKey, PropertyKey, TemplatePart, UnaryOp,
    UpdateOp,
};

pub(crate) use globals::build_globals;
pub(crate) use statements::Completion;

use crate::context::{EvalContext, LocalScope};
use crate::error::ScriptError;
use crate::value::{Closure, Intrinsic, LocalFuture, NativeBody, NativeCall, ObjectMap, Value};

pub(crate) type EvalFuture<'a, T = Value> = LocalFuture<'a, Result<T, ScriptError>>;

/// Drives an evaluation that must not suspend.
pub(crate) fn poll_once<T>(future: impl Future<Output = Result<T, ScriptError>>) -> Result<T, ScriptError> {
    let mut future = pin!(future);
    let mut cx = Context::from_waker(futures_task::noop_waker_ref());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(ScriptError::SuspendedInSync),
    }
}

impl EvalContext {
    pub(crate) fn eval<'a>(&'a mut self, expr: &'a Expr) -> EvalFuture<'a> {
        Box::pin(async move {
            match expr {
                Expr::Literal(literal) => Ok(literal_value(literal)),
                Expr::Template(parts) => {
                    let mut text = String::new();
                    for part in parts {
                        match part {
                            TemplatePart::Text(chunk) => text.push_str(chunk),
                            TemplatePart::Expr(hole) => {
                                let value = self.eval(hole).await?;
                                text.push_str(&value.to_display());
                            }
                        }
                    }
                    Ok(Value::from(text))
                }
                Expr::Identifier(name) => Ok(self.lookup(name)),
                Expr::Member { .. } | Expr::Call { .. } => {
                    Ok(self.eval_chain(expr).await?.unwrap_or_default())
                }
                Expr::Unary { op, argument } => self.eval_unary(*op, argument).await,
                Expr::Binary { op, left, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    operators::binary(*op, &left, &right)
                }
                Expr::Logical { op, left, right } => {
                    let left_value = self.eval(left).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !left_value.truthy(),
                        LogicalOp::Or => left_value.truthy(),
                        LogicalOp::Nullish => !left_value.is_nullish(),
                    };
                    if short_circuit {
                        Ok(left_value)
                    } else {
                        self.eval(right).await
                    }
                }
                Expr::Conditional {
                    test,
                    consequent,
                    alternate,
                } => {
                    if self.eval(test).await?.truthy() {
                        self.eval(consequent).await
                    } else {
                        self.eval(alternate).await
                    }
                }
                Expr::Assign { op, target, value } => self.eval_assign(*op, target, value).await,
                Expr::Update { op, prefix, target } => {
                    self.eval_update(*op, *prefix, target).await
                }
                Expr::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item).await?);
                    }
                    Ok(Value::array(values))
                }
                Expr::Object(properties) => {
                    let mut map = ObjectMap::new();
                    for property in properties {
                        let key = match &property.key {
                            PropertyKey::Static(key) => key.clone(),
                            PropertyKey::Computed(key) => self.eval(key).await?.to_property_key(),
                        };
                        let value = self.eval(&property.value).await?;
                        map.insert(key, value);
                    }
                    Ok(Value::object(map))
                }
                Expr::Arrow(arrow) => Ok(Value::Function(Rc::new(Closure {
                    arrow: arrow.clone(),
                    captured: self.scopes.clone(),
                }))),
                // Host functions are awaited where they are called, so by the
                // time `await` sees a value it is already settled.
                Expr::Await(inner) => self.eval(inner).await,
            }
        })
    }

    /// Member and call chains. `None` means an optional link short-circuited
    /// the rest of the chain.
    fn eval_chain<'a>(&'a mut self, expr: &'a Expr) -> EvalFuture<'a, Option<Value>> {
        Box::pin(async move {
            match expr {
                Expr::Member {
                    object,
                    property,
                    optional,
                } => {
                    let Some(target) = self.eval_chain(object).await? else {
                        return Ok(None);
                    };
                    if *optional && target.is_nullish() {
                        return Ok(None);
                    }
                    let key = self.member_key(property).await?;
                    self.read_member(&target, &key, false).map(Some)
                }
                Expr::Call {
                    callee,
                    arguments,
                    optional,
                } => self.eval_call(callee, arguments, *optional).await,
                other => self.eval(other).await.map(Some),
            }
        })
    }

    async fn member_key(&mut self, property: &MemberKey) -> Result<String, ScriptError> {
        match property {
            MemberKey::Static(key) => Ok(key.clone()),
            MemberKey::Computed(key) => Ok(self.eval(key).await?.to_property_key()),
        }
    }

    async fn eval_args(&mut self, arguments: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.eval(argument).await?);
        }
        Ok(values)
    }

    async fn eval_call(
        &mut self,
        callee: &Expr,
        arguments: &[Expr],
        optional: bool,
    ) -> Result<Option<Value>, ScriptError> {
        let (function, this) = match callee {
            Expr::Member {
                object,
                property,
                optional: member_optional,
            } => {
                let Some(receiver) = self.eval_chain(object).await? else {
                    return Ok(None);
                };
                if *member_optional && receiver.is_nullish() {
                    return Ok(None);
                }
                let key = self.member_key(property).await?;
                let function = self.read_member(&receiver, &key, false)?;
                if function.is_undefined() && methods::has_intrinsic(&receiver, &key) {
                    let args = self.eval_args(arguments).await?;
                    return self
                        .call_intrinsic_method(receiver, &key, args)
                        .await
                        .map(Some);
                }
                (function, receiver)
            }
            other => {
                let Some(function) = self.eval_chain(other).await? else {
                    return Ok(None);
                };
                (function, Value::Undefined)
            }
        };
        if optional && function.is_nullish() {
            return Ok(None);
        }
        if !function.is_callable() {
            return Err(ScriptError::NotCallable {
                callee: callee_text(callee),
            });
        }
        let args = self.eval_args(arguments).await?;
        self.call_value(function, this, args).await.map(Some)
    }

    /// Calls a script closure or host function. Closures called from inside
    /// script run without statement boundaries: a nested call is part of the
    /// statement that made it.
    pub(crate) fn call_value<'a>(
        &'a mut self,
        function: Value,
        this: Value,
        args: Vec<Value>,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            match &function {
                Value::Function(closure) => self.call_closure(closure.clone(), args, false).await,
                Value::Native(native) => {
                    self.expose_children(&args);
                    match native.body() {
                        NativeBody::Intrinsic(intrinsic) => self.call_intrinsic(*intrinsic, args),
                        NativeBody::Host(_) => {
                            let call = NativeCall {
                                this,
                                args,
                                cx: self.call_context(),
                            };
                            native.call(call).await
                        }
                    }
                }
                other => Err(ScriptError::NotCallable {
                    callee: other.describe(),
                }),
            }
        })
    }

    pub(crate) fn call_closure<'a>(
        &'a mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
        keep_boundary: bool,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            let limit = self.engine.config().max_call_depth;
            if self.call_depth >= limit {
                return Err(ScriptError::CallDepthExceeded { limit });
            }
            self.call_depth += 1;
            let saved_scopes = std::mem::replace(&mut self.scopes, closure.captured.clone());
            let saved_boundary = if keep_boundary {
                None
            } else {
                self.boundary.take()
            };
            let scope = LocalScope::new_ref();
            {
                let mut scope = scope.borrow_mut();
                for (index, param) in closure.arrow.params.iter().enumerate() {
                    scope.declare(param, args.get(index).cloned().unwrap_or_default(), false);
                }
            }
            self.scopes.push(scope);
            let result = match &closure.arrow.body {
                ArrowBody::Expr(body) => self.eval(body).await,
                ArrowBody::Block(body) => match self.exec_list(body).await {
                    Ok(Completion::Return(value)) => Ok(value),
                    Ok(Completion::Normal) => Ok(Value::Undefined),
                    Ok(Completion::Break) => Err(ScriptError::IllegalJump { keyword: "break" }),
                    Ok(Completion::Continue) => {
                        Err(ScriptError::IllegalJump { keyword: "continue" })
                    }
                    Err(error) => Err(error),
                },
            };
            self.scopes = saved_scopes;
            if !keep_boundary {
                self.boundary = saved_boundary;
            }
            self.call_depth -= 1;
            result
        })
    }

    fn call_intrinsic(&mut self, intrinsic: Intrinsic, args: Vec<Value>) -> Result<Value, ScriptError> {
        match intrinsic {
            Intrinsic::Lookup => {
                let path = args.first().cloned().unwrap_or_default().to_display();
                self.lookup_path(&path)
            }
            Intrinsic::ObjectAssign => {
                let mut args = args.into_iter();
                let target = args.next().unwrap_or_default();
                if !matches!(target, Value::Object(_)) {
                    return Err(ScriptError::type_mismatch("object", &target));
                }
                for source in args {
                    let Value::Object(source) = source else {
                        continue;
                    };
                    let entries: Vec<(String, Value)> = source
                        .borrow()
                        .iter()
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect();
                    for (key, value) in entries {
                        self.write_member(&target, &key, value)?;
                    }
                }
                Ok(target)
            }
        }
    }

    async fn eval_unary(&mut self, op: UnaryOp, argument: &Expr) -> Result<Value, ScriptError> {
        if op == UnaryOp::Delete {
            let Expr::Member {
                object, property, ..
            } = argument
            else {
                return Err(ScriptError::InvalidAssignmentTarget);
            };
            let target = self.eval(object).await?;
            let key = self.member_key(property).await?;
            self.delete_member(&target, &key)?;
            return Ok(Value::Bool(true));
        }
        let value = self.eval(argument).await?;
        Ok(operators::unary(op, &value))
    }

    fn eval_assign<'a>(
        &'a mut self,
        op: AssignOp,
        target: &'a Expr,
        rhs: &'a Expr,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            match target {
                Expr::Identifier(name) => {
                    let current = if op == AssignOp::Assign {
                        Value::Undefined
                    } else {
                        self.lookup(name)
                    };
                    let Some(value) = self.assigned_value(op, current, rhs).await? else {
                        return Ok(self.lookup(name));
                    };
                    self.write_identifier(name, value.clone())?;
                    Ok(value)
                }
                Expr::Member {
                    object,
                    property,
                    optional,
                } => {
                    let receiver = self.eval(object).await?;
                    let key = self.member_key(property).await?;
                    let current = if op == AssignOp::Assign {
                        Value::Undefined
                    } else {
                        self.read_member(&receiver, &key, *optional)?
                    };
                    let Some(value) = self.assigned_value(op, current.clone(), rhs).await? else {
                        return Ok(current);
                    };
                    self.write_member(&receiver, &key, value.clone())?;
                    Ok(value)
                }
                _ => Err(ScriptError::InvalidAssignmentTarget),
            }
        })
    }

    /// The value an assignment stores, or `None` when `??=` keeps the
    /// current value.
    async fn assigned_value(
        &mut self,
        op: AssignOp,
        current: Value,
        rhs: &Expr,
    ) -> Result<Option<Value>, ScriptError> {
        if let Some(binary) = op.binary() {
            let right = self.eval(rhs).await?;
            return operators::binary(binary, &current, &right).map(Some);
        }
        if op == AssignOp::Nullish && !current.is_nullish() {
            return Ok(None);
        }
        self.eval(rhs).await.map(Some)
    }

    async fn eval_update(
        &mut self,
        op: UpdateOp,
        prefix: bool,
        target: &Expr,
    ) -> Result<Value, ScriptError> {
        let delta = match op {
            UpdateOp::Increment => 1.0,
            UpdateOp::Decrement => -1.0,
        };
        let (old, new) = match target {
            Expr::Identifier(name) => {
                let old = self.lookup(name).to_number();
                let new = old + delta;
                self.write_identifier(name, Value::Number(new))?;
                (old, new)
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let receiver = self.eval(object).await?;
                let key = self.member_key(property).await?;
                let old = self.read_member(&receiver, &key, *optional)?.to_number();
                let new = old + delta;
                self.write_member(&receiver, &key, Value::Number(new))?;
                (old, new)
            }
            _ => return Err(ScriptError::InvalidAssignmentTarget),
        };
        Ok(Value::Number(if prefix { new } else { old }))
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Undefined => Value::Undefined,
        Literal::Null => Value::Null,
        Literal::Bool(value) => Value::Bool(*value),
        Literal::Number(value) => Value::Number(*value),
        Literal::String(text) => Value::from(text.as_str()),
    }
}

/// Readable form of a callee for `NotCallable` messages.
fn callee_text(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(name) => name.clone(),
        Expr::Member {
            object,
            property: MemberKey::Static(key),
            ..
        } => format!("{}.{key}", callee_text(object)),
        Expr::Member { object, .. } => format!("{}[...]", callee_text(object)),
        Expr::Call { callee, .. } => format!("{}(...)", callee_text(callee)),
        _ => "expression".to_string(),
    }
}
