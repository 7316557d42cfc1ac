//! Static dependency analysis for binding expressions.
//!
//! A dependency is the dotted path of a free variable read, extended by
//! every static member access after it (`user.profile.name`). Names bound by
//! arrow parameters or declared inside arrow bodies are not dependencies.

use std::rc::Rc;

use bindery_script::{ArrowBody, Expr, MemberKey, PropertyKey, Segment, Stmt, TemplatePart};
use indexmap::IndexSet;

use crate::collections::map::HashSet;
use crate::value::Value;

pub type DependencySet = Rc<[String]>;

pub fn collect_dependencies(segments: &[Segment]) -> DependencySet {
    let mut collector = Collector::default();
    for segment in segments {
        if let Segment::Expression(expr) = segment {
            collector.expr(expr);
        }
    }
    collector.found.into_iter().collect()
}

/// Current value of one dependency path: state first, then services.
pub fn resolve_dependency(path: &str, state: &Value, services: Option<&Value>) -> Value {
    let mut segments = path.split('.');
    let Some(head) = segments.next() else {
        return Value::Undefined;
    };
    let owns = |root: &Value| matches!(root, Value::Object(map) if map.borrow().contains_key(head));
    let mut current = if owns(state) {
        state.get_property(head)
    } else if let Some(services) = services.filter(|services| owns(*services)) {
        services.get_property(head)
    } else {
        return Value::Undefined;
    };
    for segment in segments {
        current = current.get_property(segment);
    }
    current
}

#[derive(Default)]
struct Collector {
    found: IndexSet<String>,
    bound: Vec<HashSet<String>>,
}

impl Collector {
    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|scope| scope.contains(name))
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Identifier(name) => {
                if !self.is_bound(name) {
                    self.found.insert(name.clone());
                }
            }
            Expr::Member {
                object, property, ..
            } => {
                if let Some(chain) = static_chain(expr) {
                    if !self.is_bound(chain[0]) {
                        self.found.insert(chain.join("."));
                    }
                    return;
                }
                self.expr(object);
                if let MemberKey::Computed(key) = property {
                    self.expr(key);
                }
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                // `items.filter(...)` depends on `items`, not on `items.filter`.
                match callee.as_ref() {
                    Expr::Member {
                        object,
                        property: MemberKey::Static(_),
                        ..
                    } => self.expr(object),
                    other => self.expr(other),
                }
                for argument in arguments {
                    self.expr(argument);
                }
            }
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(expr) = part {
                        self.expr(expr);
                    }
                }
            }
            Expr::Unary { argument, .. } | Expr::Await(argument) => self.expr(argument),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Expr::Update { target, .. } => self.expr(target),
            Expr::Array(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::Object(properties) => {
                for property in properties {
                    if let PropertyKey::Computed(key) = &property.key {
                        self.expr(key);
                    }
                    self.expr(&property.value);
                }
            }
            Expr::Arrow(arrow) => {
                let mut scope: HashSet<String> = arrow.params.iter().cloned().collect();
                if let ArrowBody::Block(body) = &arrow.body {
                    declared_names(body, &mut scope);
                }
                self.bound.push(scope);
                match &arrow.body {
                    ArrowBody::Expr(body) => self.expr(body),
                    ArrowBody::Block(body) => self.stmts(body),
                }
                self.bound.pop();
            }
        }
    }

    fn stmts(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) | Stmt::Throw(expr) | Stmt::Return(Some(expr)) => self.expr(expr),
            Stmt::Declare { declarations, .. } => {
                for declarator in declarations {
                    if let Some(init) = &declarator.init {
                        self.expr(init);
                    }
                }
            }
            Stmt::Block(body) => self.stmts(body),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.stmt(consequent);
                if let Some(alternate) = alternate {
                    self.stmt(alternate);
                }
            }
            Stmt::While { test, body } | Stmt::DoWhile { body, test } => {
                self.expr(test);
                self.stmt(body);
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.stmt(init);
                }
                if let Some(test) = test {
                    self.expr(test);
                }
                if let Some(update) = update {
                    self.expr(update);
                }
                self.stmt(body);
            }
            Stmt::ForOf {
                iterable: subject,
                body,
                ..
            }
            | Stmt::ForIn {
                object: subject,
                body,
                ..
            } => {
                self.expr(subject);
                self.stmt(body);
            }
            Stmt::Try(try_stmt) => {
                self.stmts(&try_stmt.block);
                if let Some(handler) = &try_stmt.handler {
                    self.stmts(handler);
                }
                if let Some(finalizer) = &try_stmt.finalizer {
                    self.stmts(finalizer);
                }
            }
            Stmt::Return(None) | Stmt::Break | Stmt::Continue | Stmt::Empty => {}
        }
    }
}

fn static_chain(expr: &Expr) -> Option<Vec<&str>> {
    match expr {
        Expr::Identifier(name) => Some(vec![name.as_str()]),
        Expr::Member {
            object,
            property: MemberKey::Static(key),
            ..
        } => {
            let mut chain = static_chain(object)?;
            chain.push(key.as_str());
            Some(chain)
        }
        _ => None,
    }
}

fn declared_names(body: &[Stmt], names: &mut HashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Declare { declarations, .. } => {
                names.extend(declarations.iter().map(|d| d.name.clone()));
            }
            Stmt::ForOf { binding, body, .. } | Stmt::ForIn { binding, body, .. } => {
                names.insert(binding.clone());
                declared_names(std::slice::from_ref(body.as_ref()), names);
            }
            Stmt::Block(inner) => declared_names(inner, names),
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                declared_names(std::slice::from_ref(consequent.as_ref()), names);
                if let Some(alternate) = alternate {
                    declared_names(std::slice::from_ref(alternate.as_ref()), names);
                }
            }
            Stmt::For { init, body, .. } => {
                if let Some(init) = init {
                    declared_names(std::slice::from_ref(init.as_ref()), names);
                }
                declared_names(std::slice::from_ref(body.as_ref()), names);
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
                declared_names(std::slice::from_ref(body.as_ref()), names);
            }
            Stmt::Try(try_stmt) => {
                declared_names(&try_stmt.block, names);
                if let Some(param) = &try_stmt.param {
                    names.insert(param.clone());
                }
                if let Some(handler) = &try_stmt.handler {
                    declared_names(handler, names);
                }
                if let Some(finalizer) = &try_stmt.finalizer {
                    declared_names(finalizer, names);
                }
            }
            _ => {}
        }
    }
}
