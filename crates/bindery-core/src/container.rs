use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Waker;

use crate::collections::map::HashMap;
use crate::config::EngineConfig;
use crate::error::ScriptError;
use crate::tracker::{ChangeAction, ChangeRecord};
use crate::value::{index_of_key, ObjectMap, ObjectRef, Value};

/// Identity of a container; keys every per-scope cache.
pub type ScopeId = usize;

static NEXT_SCOPE_ID: AtomicUsize = AtomicUsize::new(1);

fn next_scope_id() -> ScopeId {
    NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where one handler (an owner's event) currently is.
#[derive(Debug, Clone)]
pub enum HandlerLifecycle {
    Running,
    Completed,
    Error(ScriptError),
}

impl HandlerLifecycle {
    pub fn is_running(&self) -> bool {
        matches!(self, HandlerLifecycle::Running)
    }
}

type LifecycleKey = (String, String);

struct ContainerInner {
    id: ScopeId,
    state: RefCell<ObjectRef>,
    parent: Option<Container>,
    lifecycles: RefCell<HashMap<LifecycleKey, HandlerLifecycle>>,
    mounted: Cell<bool>,
    unmount_wakers: RefCell<Vec<Waker>>,
    version: Cell<u64>,
}

/// A markup subtree with its own variable scope.
///
/// Committed state is only ever replaced, never edited in place: a change
/// produces a new root map and new copies of every container along the
/// changed path. Readers holding an older root keep a consistent snapshot,
/// and shallow comparison of any path reveals whether it changed.
#[derive(Clone)]
pub struct Container {
    inner: Rc<ContainerInner>,
}

impl Container {
    pub fn new(initial: ObjectMap) -> Self {
        Self::build(initial, None)
    }

    /// A child scope: reads fall through to `parent`, own names shadow it.
    pub fn with_parent(parent: &Container, initial: ObjectMap) -> Self {
        Self::build(initial, Some(parent.clone()))
    }

    fn build(initial: ObjectMap, parent: Option<Container>) -> Self {
        Self {
            inner: Rc::new(ContainerInner {
                id: next_scope_id(),
                state: RefCell::new(Rc::new(RefCell::new(initial))),
                parent,
                lifecycles: RefCell::new(HashMap::default()),
                mounted: Cell::new(true),
                unmount_wakers: RefCell::new(Vec::new()),
                version: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    /// Number of change records applied to this container's own state.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// The committed state owned by this container (without inherited names).
    pub fn own_state(&self) -> ObjectRef {
        self.inner.state.borrow().clone()
    }

    pub fn owns(&self, name: &str) -> bool {
        self.inner.state.borrow().borrow().contains_key(name)
    }

    fn sees(&self, name: &str) -> bool {
        self.owns(name) || self.parent().is_some_and(|parent| parent.sees(name))
    }

    /// Committed read view: inherited names overlaid with own names. For a
    /// root container this is the state object itself, so its identity only
    /// changes on commit.
    pub fn view(&self) -> Value {
        let own = self.own_state();
        let Some(parent) = self.parent() else {
            return Value::Object(own);
        };
        let mut merged = match parent.view() {
            Value::Object(map) => map.borrow().clone(),
            _ => ObjectMap::new(),
        };
        for (key, value) in own.borrow().iter() {
            merged.insert(key.clone(), value.clone());
        }
        Value::object(merged)
    }

    /// Reads one committed top-level name through the view.
    pub fn get(&self, name: &str) -> Value {
        if let Some(value) = self.inner.state.borrow().borrow().get(name) {
            return value.clone();
        }
        self.parent()
            .map(|parent| parent.get(name))
            .unwrap_or_default()
    }

    /// Reducer applying one committed change. Writes to a name only an
    /// ancestor owns go to that ancestor.
    ///
    /// Handlers running concurrently on one container are not isolated: the
    /// last committed write to a path wins.
    pub fn state_part_changed(&self, change: &ChangeRecord) {
        let Some(head) = change.path.first() else {
            return;
        };
        if !self.owns(head) {
            if let Some(parent) = self.parent().filter(|parent| parent.sees(head)) {
                parent.state_part_changed(change);
                return;
            }
        }
        let current = self.own_state();
        let mut root = current.borrow().clone();
        write_into_map(&mut root, &change.path, &change.action, &change.new_value);
        *self.inner.state.borrow_mut() = Rc::new(RefCell::new(root));
        self.inner.version.set(self.inner.version.get() + 1);
    }

    pub fn lifecycle(&self, owner: &str, event: &str) -> Option<HandlerLifecycle> {
        self.inner
            .lifecycles
            .borrow()
            .get(&(owner.to_string(), event.to_string()))
            .cloned()
    }

    pub(crate) fn set_lifecycle(&self, owner: &str, event: &str, lifecycle: HandlerLifecycle) {
        self.inner
            .lifecycles
            .borrow_mut()
            .insert((owner.to_string(), event.to_string()), lifecycle);
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    /// Marks the container as torn down and releases every handler waiting
    /// for a commit acknowledgement on it.
    pub fn unmount(&self) {
        if !self.inner.mounted.replace(false) {
            return;
        }
        log::debug!("container {} unmounted", self.inner.id);
        let wakers = std::mem::take(&mut *self.inner.unmount_wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn register_unmount_waker(&self, waker: &Waker) {
        let mut wakers = self.inner.unmount_wakers.borrow_mut();
        if !wakers.iter().any(|existing| existing.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }

    pub fn ptr_eq(&self, other: &Container) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("mounted", &self.inner.mounted.get())
            .field("state", &Value::Object(self.own_state()))
            .finish()
    }
}

fn write_into_map(map: &mut ObjectMap, path: &[String], action: &ChangeAction, value: &Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        match action {
            ChangeAction::Set => {
                map.insert(head.clone(), value.clone());
            }
            ChangeAction::Unset => {
                map.shift_remove(head);
            }
        }
        return;
    }
    let child = map.get(head).cloned().unwrap_or_default();
    map.insert(head.clone(), copy_along(&child, rest, action, value));
}

fn write_into_vec(items: &mut Vec<Value>, path: &[String], action: &ChangeAction, value: &Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if head == "length" && rest.is_empty() {
        if let ChangeAction::Set = action {
            let length = value.to_number();
            if length > EngineConfig::ARRAY_LENGTH_CEILING as f64 {
                log::warn!("ignoring array length {length}: over the limit");
            } else if length >= 0.0 && length.fract() == 0.0 {
                items.resize(length as usize, Value::Undefined);
            }
        }
        return;
    }
    let Some(index) = index_of_key(head) else {
        log::warn!("ignoring non-index array write at '{head}'");
        return;
    };
    if index >= items.len() {
        if let ChangeAction::Unset = action {
            return;
        }
        if index >= EngineConfig::ARRAY_LENGTH_CEILING {
            log::warn!("ignoring array write at index {index}: over the length limit");
            return;
        }
        items.resize(index + 1, Value::Undefined);
    }
    if rest.is_empty() {
        items[index] = match action {
            ChangeAction::Set => value.clone(),
            ChangeAction::Unset => Value::Undefined,
        };
    } else {
        let child = items[index].clone();
        items[index] = copy_along(&child, rest, action, value);
    }
}

/// Shallow copy of `current` with the write applied below it.
fn copy_along(current: &Value, path: &[String], action: &ChangeAction, value: &Value) -> Value {
    match current {
        Value::Object(map) => {
            let mut copy = map.borrow().clone();
            write_into_map(&mut copy, path, action, value);
            Value::object(copy)
        }
        Value::Array(items) => {
            let mut copy = items.borrow().clone();
            write_into_vec(&mut copy, path, action, value);
            Value::array(copy)
        }
        _ => {
            let mut fresh = ObjectMap::new();
            write_into_map(&mut fresh, path, action, value);
            Value::object(fresh)
        }
    }
}
