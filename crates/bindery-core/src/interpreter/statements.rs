use std::rc::Rc;

use bindery_script::{DeclKind, Expr, Stmt, TryStmt};

use super::EvalFuture;
use crate::context::EvalContext;
use crate::error::ScriptError;
use crate::value::{Closure, Value};

/// How a statement finished.
#[derive(Debug, Clone)]
pub(crate) enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

enum LoopStep {
    Next,
    Exit(Completion),
}

fn loop_step(completion: Completion) -> LoopStep {
    match completion {
        Completion::Normal | Completion::Continue => LoopStep::Next,
        Completion::Break => LoopStep::Exit(Completion::Normal),
        Completion::Return(value) => LoopStep::Exit(Completion::Return(value)),
    }
}

impl EvalContext {
    /// Runs a top-level statement list. A body that is a single arrow
    /// function is treated as a callback and invoked with the handler
    /// arguments.
    pub(crate) async fn run_body(&mut self, statements: &[Stmt]) -> Result<Value, ScriptError> {
        if let [Stmt::Expr(Expr::Arrow(arrow))] = statements {
            let closure = Rc::new(Closure {
                arrow: arrow.clone(),
                captured: self.scopes.clone(),
            });
            let args = self.args.clone();
            let value = self.call_closure(closure, args, true).await?;
            self.thread.return_value = Some(value.clone());
            return Ok(value);
        }
        for statement in statements {
            match self.exec(statement).await? {
                Completion::Normal => {}
                Completion::Return(value) => {
                    self.thread.return_value = Some(value);
                    break;
                }
                Completion::Break => return Err(ScriptError::IllegalJump { keyword: "break" }),
                Completion::Continue => {
                    return Err(ScriptError::IllegalJump {
                        keyword: "continue",
                    })
                }
            }
        }
        Ok(self.thread.result())
    }

    pub(crate) fn exec_list<'a>(&'a mut self, body: &'a [Stmt]) -> EvalFuture<'a, Completion> {
        Box::pin(async move {
            for statement in body {
                match self.exec(statement).await? {
                    Completion::Normal => {}
                    abrupt => return Ok(abrupt),
                }
            }
            Ok(Completion::Normal)
        })
    }

    async fn exec_block(&mut self, body: &[Stmt]) -> Result<Completion, ScriptError> {
        self.push_scope();
        let result = self.exec_list(body).await;
        self.pop_scope();
        result
    }

    pub(crate) fn exec<'a>(&'a mut self, statement: &'a Stmt) -> EvalFuture<'a, Completion> {
        Box::pin(async move {
            match statement {
                Stmt::Expr(expr) => {
                    let value = self.eval(expr).await?;
                    self.statement_done(Some(value)).await?;
                    Ok(Completion::Normal)
                }
                Stmt::Declare { kind, declarations } => {
                    for declarator in declarations {
                        let value = match &declarator.init {
                            Some(init) => self.eval(init).await?,
                            None => Value::Undefined,
                        };
                        self.declare(&declarator.name, value, *kind == DeclKind::Const);
                    }
                    self.statement_done(None).await?;
                    Ok(Completion::Normal)
                }
                Stmt::Block(body) => self.exec_block(body).await,
                Stmt::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    if self.eval(test).await?.truthy() {
                        self.exec(consequent).await
                    } else if let Some(alternate) = alternate {
                        self.exec(alternate).await
                    } else {
                        Ok(Completion::Normal)
                    }
                }
                Stmt::While { test, body } => {
                    while self.eval(test).await?.truthy() {
                        if let LoopStep::Exit(completion) = loop_step(self.exec(body).await?) {
                            return Ok(completion);
                        }
                        self.iteration_done().await?;
                    }
                    Ok(Completion::Normal)
                }
                Stmt::DoWhile { body, test } => loop {
                    if let LoopStep::Exit(completion) = loop_step(self.exec(body).await?) {
                        return Ok(completion);
                    }
                    self.iteration_done().await?;
                    if !self.eval(test).await?.truthy() {
                        return Ok(Completion::Normal);
                    }
                },
                Stmt::For {
                    init,
                    test,
                    update,
                    body,
                } => {
                    self.push_scope();
                    let result = self
                        .exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body)
                        .await;
                    self.pop_scope();
                    result
                }
                Stmt::ForOf {
                    kind,
                    binding,
                    iterable,
                    body,
                } => {
                    let subject = self.eval(iterable).await?;
                    let items: Vec<Value> = match &subject {
                        Value::Array(items) => items.borrow().clone(),
                        Value::String(text) => text
                            .chars()
                            .map(|ch| Value::from(ch.to_string()))
                            .collect(),
                        other => return Err(ScriptError::type_mismatch("iterable", other)),
                    };
                    for (index, item) in items.into_iter().enumerate() {
                        self.register_element(&subject, &index.to_string(), &item);
                        let completion = self.exec_iteration(binding, *kind, item, body).await?;
                        if let LoopStep::Exit(completion) = loop_step(completion) {
                            return Ok(completion);
                        }
                        self.iteration_done().await?;
                    }
                    Ok(Completion::Normal)
                }
                Stmt::ForIn {
                    kind,
                    binding,
                    object,
                    body,
                } => {
                    let subject = self.eval(object).await?;
                    let keys: Vec<String> = match &subject {
                        Value::Object(map) => map.borrow().keys().cloned().collect(),
                        Value::Array(items) => {
                            (0..items.borrow().len()).map(|i| i.to_string()).collect()
                        }
                        Value::String(text) => {
                            (0..text.chars().count()).map(|i| i.to_string()).collect()
                        }
                        _ => Vec::new(),
                    };
                    for key in keys {
                        let completion = self
                            .exec_iteration(binding, *kind, Value::from(key), body)
                            .await?;
                        if let LoopStep::Exit(completion) = loop_step(completion) {
                            return Ok(completion);
                        }
                        self.iteration_done().await?;
                    }
                    Ok(Completion::Normal)
                }
                Stmt::Return(argument) => {
                    let value = match argument {
                        Some(argument) => self.eval(argument).await?,
                        None => Value::Undefined,
                    };
                    self.statement_done(None).await?;
                    Ok(Completion::Return(value))
                }
                Stmt::Break => Ok(Completion::Break),
                Stmt::Continue => Ok(Completion::Continue),
                Stmt::Throw(argument) => {
                    let value = self.eval(argument).await?;
                    Err(ScriptError::Thrown(value))
                }
                Stmt::Try(try_stmt) => self.exec_try(try_stmt).await,
                Stmt::Empty => Ok(Completion::Normal),
            }
        })
    }

    async fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<Completion, ScriptError> {
        if let Some(init) = init {
            self.exec(init).await?;
        }
        loop {
            if let Some(test) = test {
                if !self.eval(test).await?.truthy() {
                    return Ok(Completion::Normal);
                }
            }
            if let LoopStep::Exit(completion) = loop_step(self.exec(body).await?) {
                return Ok(completion);
            }
            if let Some(update) = update {
                self.eval(update).await?;
            }
            self.iteration_done().await?;
        }
    }

    async fn exec_iteration(
        &mut self,
        binding: &str,
        kind: DeclKind,
        item: Value,
        body: &Stmt,
    ) -> Result<Completion, ScriptError> {
        self.push_scope();
        self.declare(binding, item, kind == DeclKind::Const);
        let result = self.exec(body).await;
        self.pop_scope();
        result
    }

    async fn exec_try(&mut self, try_stmt: &TryStmt) -> Result<Completion, ScriptError> {
        let mut outcome = self.exec_block(&try_stmt.block).await;
        let caught = outcome.as_ref().err().map(ScriptError::to_value);
        if let (Some(caught), Some(handler)) = (caught, &try_stmt.handler) {
            self.push_scope();
            if let Some(param) = &try_stmt.param {
                self.declare(param, caught, false);
            }
            outcome = self.exec_list(handler).await;
            self.pop_scope();
        }
        if let Some(finalizer) = &try_stmt.finalizer {
            match self.exec_block(finalizer).await? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        outcome
    }

    /// Leaf statement boundary.
    async fn statement_done(&mut self, value: Option<Value>) -> Result<(), ScriptError> {
        self.thread.completed += 1;
        if let Some(value) = value {
            self.thread.last_value = value;
        }
        self.engine.metrics().statement();
        if self.engine.config().trace_statements {
            log::trace!(
                "statement {} completed ({} pending changes)",
                self.thread.completed,
                self.pending_changes().len()
            );
        }
        self.run_boundary().await
    }

    async fn iteration_done(&mut self) -> Result<(), ScriptError> {
        self.run_boundary().await
    }

    async fn run_boundary(&mut self) -> Result<(), ScriptError> {
        match self.boundary.clone() {
            Some(boundary) => boundary.after_statement(self).await,
            None => Ok(()),
        }
    }
}
