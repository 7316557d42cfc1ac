use std::cell::RefCell;
use std::rc::Rc;

use smallvec::smallvec;

use crate::collections::map::HashMap;
use crate::container::Container;
use crate::engine::{CallContext, Engine};
use crate::error::ScriptError;
use crate::tracker::{self, ChangeRecord, MutationTracker, StatePath};
use crate::value::{LocalFuture, NativeFunction, ObjectMap, Value};

pub(crate) type ScopeRef = Rc<RefCell<LocalScope>>;

struct Binding {
    value: Value,
    constant: bool,
}

/// One lexical block of script-declared names.
#[derive(Default)]
pub(crate) struct LocalScope {
    bindings: HashMap<String, Binding>,
}

impl LocalScope {
    pub(crate) fn new_ref() -> ScopeRef {
        Rc::new(RefCell::new(LocalScope::default()))
    }

    pub(crate) fn declare(&mut self, name: &str, value: Value, constant: bool) {
        self.bindings
            .insert(name.to_string(), Binding { value, constant });
    }
}

/// Hook run at statement boundaries of the asynchronous processor.
pub(crate) trait StatementBoundary {
    fn after_statement<'a>(
        &'a self,
        cx: &'a mut EvalContext,
    ) -> LocalFuture<'a, Result<(), ScriptError>>;
}

/// Identifiers supplied by the host rather than by state: `$this`, plus any
/// ad hoc entries (e.g. `$item` inside a list template).
#[derive(Clone, Default)]
pub struct ImplicitContext {
    pub this: Value,
    pub extra: ObjectMap,
}

/// Progress of one invocation: how many statements completed and the value
/// the last one produced.
#[derive(Debug, Default, Clone)]
pub struct ExecutionThread {
    pub completed: usize,
    pub last_value: Value,
    pub return_value: Option<Value>,
}

impl ExecutionThread {
    pub fn result(&self) -> Value {
        self.return_value
            .clone()
            .unwrap_or_else(|| self.last_value.clone())
    }
}

/// Everything one evaluation or handler invocation reads and writes.
pub struct EvalContext {
    pub(crate) engine: Engine,
    pub(crate) container: Option<Container>,
    pub(crate) state: Value,
    pub(crate) services: Option<Value>,
    pub(crate) args: Vec<Value>,
    pub(crate) implicit: ImplicitContext,
    pub(crate) tracker: Option<MutationTracker>,
    pub(crate) scopes: Vec<ScopeRef>,
    pub(crate) thread: ExecutionThread,
    pub(crate) boundary: Option<Rc<dyn StatementBoundary>>,
    pub(crate) read_only: bool,
    pub(crate) call_depth: usize,
}

impl EvalContext {
    pub(crate) fn new(engine: Engine, state: Value) -> Self {
        Self {
            engine,
            container: None,
            state,
            services: None,
            args: Vec::new(),
            implicit: ImplicitContext::default(),
            tracker: None,
            scopes: vec![LocalScope::new_ref()],
            thread: ExecutionThread::default(),
            boundary: None,
            read_only: false,
            call_depth: 0,
        }
    }

    pub(crate) fn with_container(mut self, container: Option<Container>) -> Self {
        self.container = container;
        self
    }

    pub(crate) fn with_services(mut self, services: Option<Value>) -> Self {
        self.services = services;
        self
    }

    pub(crate) fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub(crate) fn with_implicit(mut self, implicit: ImplicitContext) -> Self {
        self.implicit = implicit;
        self
    }

    pub(crate) fn with_tracker(mut self) -> Self {
        self.tracker = Some(MutationTracker::new(self.engine.config().reserved_sigil));
        self
    }

    pub(crate) fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub(crate) fn with_boundary(mut self, boundary: Rc<dyn StatementBoundary>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn thread(&self) -> &ExecutionThread {
        &self.thread
    }

    pub fn pending_changes(&self) -> &[ChangeRecord] {
        self.tracker
            .as_ref()
            .map(|tracker| tracker.changes())
            .unwrap_or_default()
    }

    pub(crate) fn take_changes(&mut self) -> Vec<ChangeRecord> {
        self.tracker
            .as_mut()
            .map(|tracker| tracker.take_changes())
            .unwrap_or_default()
    }

    /// Replaces the local state view after a commit so later statements see
    /// their own (now committed) writes.
    pub(crate) fn refresh_view(&mut self, view: Value) {
        self.state = view;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.forget_unreachable();
        }
    }

    pub(crate) fn call_context(&self) -> CallContext {
        CallContext {
            engine: self.engine.clone(),
            container: self.container.clone(),
            services: self.services.clone(),
        }
    }

    fn sigil(&self) -> char {
        self.engine.config().reserved_sigil
    }

    // ---------------------------------------------------------------------
    // Names
    // ---------------------------------------------------------------------

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(LocalScope::new_ref());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn declare(&mut self, name: &str, value: Value, constant: bool) {
        if self.scopes.is_empty() {
            self.push_scope();
        }
        if let Some(scope) = self.scopes.last() {
            scope.borrow_mut().declare(name, value, constant);
        }
    }

    fn find_local(&self, name: &str) -> Option<&ScopeRef> {
        self.scopes
            .iter()
            .rev()
            .find(|scope| scope.borrow().bindings.contains_key(name))
    }

    fn implicit_value(&self, name: &str) -> Option<Value> {
        let sigil = self.sigil();
        if let Some(value) = self.implicit.extra.get(name) {
            return Some(value.clone());
        }
        let rest = name.strip_prefix(sigil)?;
        match rest {
            "this" => Some(self.implicit.this.clone()),
            "param" => Some(self.args.first().cloned().unwrap_or_default()),
            "params" => Some(Value::array(self.args.clone())),
            "state" => Some(self.state.clone()),
            "lookup" => Some(Value::from(NativeFunction::intrinsic(
                "$lookup",
                crate::value::Intrinsic::Lookup,
            ))),
            _ => None,
        }
    }

    /// Resolution order: locals, implicit context, state, services, globals.
    /// Unknown names are `undefined`.
    pub(crate) fn lookup(&mut self, name: &str) -> Value {
        if let Some(scope) = self.find_local(name) {
            return scope
                .borrow()
                .bindings
                .get(name)
                .map(|binding| binding.value.clone())
                .unwrap_or_default();
        }
        if let Some(value) = self.implicit_value(name) {
            if name.starts_with(self.sigil()) {
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.register(&value, smallvec![name.to_string()]);
                }
            }
            return value;
        }
        if let Value::Object(map) = &self.state {
            let found = map.borrow().get(name).cloned();
            if let Some(value) = found {
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.register(&value, smallvec![name.to_string()]);
                }
                return value;
            }
        }
        if let Some(Value::Object(services)) = &self.services {
            let found = services.borrow().get(name).cloned();
            if let Some(value) = found {
                // Bindings must not reach through services to mutate anything.
                if self.read_only {
                    if let Some(tracker) = self.tracker.as_mut() {
                        tracker.register(&value, smallvec![name.to_string()]);
                    }
                }
                return value;
            }
        }
        self.engine.global(name).unwrap_or_default()
    }

    pub(crate) fn write_identifier(&mut self, name: &str, value: Value) -> Result<(), ScriptError> {
        if let Some(scope) = self.find_local(name) {
            let mut scope = scope.borrow_mut();
            if let Some(binding) = scope.bindings.get_mut(name) {
                if binding.constant {
                    return Err(ScriptError::ConstAssignment {
                        name: name.to_string(),
                    });
                }
                binding.value = value;
            }
            return Ok(());
        }
        if name.starts_with(self.sigil()) || self.implicit.extra.contains_key(name) {
            return Err(ScriptError::ReadOnlyPath {
                path: name.to_string(),
            });
        }
        if self.read_only {
            return Err(ScriptError::ReadOnlyEvaluation);
        }
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_set(smallvec![name.to_string()], &value, self.state.clone())?;
        }
        if let Value::Object(map) = &self.state {
            map.borrow_mut().insert(name.to_string(), value);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Members
    // ---------------------------------------------------------------------

    pub(crate) fn read_member(
        &mut self,
        object: &Value,
        key: &str,
        optional: bool,
    ) -> Result<Value, ScriptError> {
        if object.is_nullish() {
            if optional || self.engine.config().optional_member_access {
                return Ok(Value::Undefined);
            }
            return Err(ScriptError::UndefinedMember {
                property: key.to_string(),
                target: nullish_name(object),
            });
        }
        let value = object.get_property(key);
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.register_child(object, key, &value);
        }
        Ok(value)
    }

    /// Path of a state-reachable container, after checking that writing to
    /// it is allowed. `None` for containers that only live in locals.
    fn writable_path(&mut self, target: &Value) -> Result<Option<StatePath>, ScriptError> {
        match self.resolve_path(target) {
            Some(path) => self.check_path(&path).map(|()| Some(path)),
            None => Ok(None),
        }
    }

    /// Path of a container inside state or an implicit binding, if any.
    fn resolve_path(&mut self, target: &Value) -> Option<StatePath> {
        let known = self.tracker.as_ref()?.path_of(target).cloned();
        known.or_else(|| self.locate(target))
    }

    fn check_path(&self, path: &[String]) -> Result<(), ScriptError> {
        if let Some(tracker) = self.tracker.as_ref() {
            tracker.check_writable(path)?;
        }
        if self.read_only {
            return Err(ScriptError::ReadOnlyEvaluation);
        }
        Ok(())
    }

    /// Searches for a container the tracker has not seen yet, e.g. one a
    /// built-in handed out without a member read. Bindings also search
    /// services and globals: nothing they did not create may change.
    fn locate(&mut self, target: &Value) -> Option<StatePath> {
        if self.tracker.as_ref()?.known_unreachable(target) {
            return None;
        }
        let sigil = self.sigil();
        let implicit_name = |name: &str| {
            if name.starts_with(sigil) {
                name.to_string()
            } else {
                format!("{sigil}{name}")
            }
        };
        let mut roots: Vec<(Value, StatePath)> = vec![
            (self.state.clone(), StatePath::new()),
            (self.implicit.this.clone(), smallvec![implicit_name("this")]),
        ];
        for (name, value) in &self.implicit.extra {
            roots.push((value.clone(), smallvec![implicit_name(name)]));
        }
        if self.read_only {
            if let Some(services) = &self.services {
                roots.push((services.clone(), StatePath::new()));
            }
            for (name, value) in self.engine.globals() {
                roots.push((value.clone(), smallvec![name.clone()]));
            }
        }
        let found = tracker::find_path(roots, target);
        let tracker = self.tracker.as_mut()?;
        match &found {
            Some(path) => tracker.register(target, path.clone()),
            None => tracker.mark_unreachable(target),
        }
        found
    }

    pub(crate) fn write_member(
        &mut self,
        target: &Value,
        key: &str,
        value: Value,
    ) -> Result<(), ScriptError> {
        match target {
            Value::Object(_) | Value::Array(_) => {}
            other if other.is_nullish() => {
                return Err(ScriptError::UndefinedMember {
                    property: key.to_string(),
                    target: nullish_name(other),
                })
            }
            // Writes to primitives are dropped, as in the script language.
            _ => return Ok(()),
        }
        tracker::check_array_write(target, key, &value, self.engine.config().max_array_length)?;
        if let Some(mut path) = self.resolve_path(target) {
            path.push(key.to_string());
            self.check_path(&path)?;
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.record_set(path, &value, target.clone())?;
            }
        }
        tracker::write_member(target, key, value);
        Ok(())
    }

    pub(crate) fn delete_member(&mut self, target: &Value, key: &str) -> Result<(), ScriptError> {
        if target.is_nullish() {
            return Err(ScriptError::UndefinedMember {
                property: key.to_string(),
                target: nullish_name(target),
            });
        }
        if let Some(mut path) = self.resolve_path(target) {
            path.push(key.to_string());
            self.check_path(&path)?;
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.record_unset(path, target.clone())?;
            }
        }
        match target {
            Value::Object(map) => {
                map.borrow_mut().shift_remove(key);
            }
            Value::Array(items) => {
                if let Some(index) = crate::value::index_of_key(key) {
                    if let Some(slot) = items.borrow_mut().get_mut(index) {
                        *slot = Value::Undefined;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Call before an in-place array operation.
    pub(crate) fn check_array_writable(&mut self, array: &Value) -> Result<(), ScriptError> {
        self.writable_path(array).map(|_| ())
    }

    /// Call after an in-place array operation: records the whole array.
    pub(crate) fn array_mutated(&mut self, array: &Value) -> Result<(), ScriptError> {
        let Some(path) = self.writable_path(array)? else {
            return Ok(());
        };
        let parent = self.parent_of_path(&path);
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_set(path, array, parent)?;
        }
        Ok(())
    }

    fn parent_of_path(&self, path: &[String]) -> Value {
        let mut current = self.state.clone();
        if let Some((_, parents)) = path.split_last() {
            for segment in parents {
                current = current.get_property(segment);
            }
        }
        current
    }

    pub(crate) fn register_element(&mut self, container: &Value, key: &str, element: &Value) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.register_child(container, key, element);
        }
    }

    /// Elements of tracked containers keep their paths when a built-in
    /// returns them in a new array (`Object.values`, `slice`, ...).
    pub(crate) fn expose_children(&mut self, values: &[Value]) {
        if let Some(tracker) = self.tracker.as_mut() {
            for value in values {
                tracker.register_children(value);
            }
        }
    }

    /// `$lookup("a.b.c")`: dotted read through the normal resolution rules.
    pub(crate) fn lookup_path(&mut self, path: &str) -> Result<Value, ScriptError> {
        let mut segments = path.split('.');
        let Some(head) = segments.next() else {
            return Ok(Value::Undefined);
        };
        let mut current = self.lookup(head.trim());
        for segment in segments {
            current = self.read_member(&current, segment.trim(), true)?;
        }
        Ok(current)
    }
}

pub(crate) fn nullish_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        _ => "undefined",
    }
}
