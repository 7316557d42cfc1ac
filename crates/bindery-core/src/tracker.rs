//! Mutation tracking for handler execution.
//!
//! Scripts run against a deep clone of container state. The tracker knows,
//! for every container value reachable from that clone, the state path it
//! was reached through; a write to such a value becomes a [`ChangeRecord`]
//! which the coordinator later commits into the real container.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::collections::{IdentityMap, IdentitySet};
use crate::config::EngineConfig;
use crate::error::ScriptError;
use crate::value::{index_of_key, Value};

pub type StatePath = SmallVec<[String; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Set,
    Unset,
}

/// One observed write.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub path: StatePath,
    pub new_value: Value,
    /// The container the write landed on, or the state root for top-level
    /// names.
    pub target: Value,
    pub action: ChangeAction,
}

impl ChangeRecord {
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

pub struct MutationTracker {
    sigil: char,
    // Keeps every registered value alive so addresses are never reused.
    paths: IdentityMap<(Value, StatePath)>,
    // Containers a search found outside the state graph. Only recorded
    // writes change that graph, so recording clears this.
    unreachable: IdentityMap<Value>,
    changes: Vec<ChangeRecord>,
}

impl MutationTracker {
    pub fn new(sigil: char) -> Self {
        Self {
            sigil,
            paths: IdentityMap::default(),
            unreachable: IdentityMap::default(),
            changes: Vec::new(),
        }
    }

    /// Remembers that `value` lives at `path`. Scalars are ignored; the
    /// first path a container was reached through wins.
    pub fn register(&mut self, value: &Value, path: StatePath) {
        if let Some(id) = value.ptr_id() {
            self.paths
                .entry(id)
                .or_insert_with(|| (value.clone(), path));
        }
    }

    pub fn register_child(&mut self, parent: &Value, key: &str, child: &Value) {
        if child.ptr_id().is_none() {
            return;
        }
        if let Some(mut path) = self.path_of(parent).cloned() {
            path.push(key.to_string());
            self.register(child, path);
        }
    }

    pub fn path_of(&self, value: &Value) -> Option<&StatePath> {
        let id = value.ptr_id()?;
        self.paths.get(&id).map(|(_, path)| path)
    }

    pub fn is_tracked(&self, value: &Value) -> bool {
        self.path_of(value).is_some()
    }

    /// Registers the direct children of a tracked container under its path.
    pub fn register_children(&mut self, parent: &Value) {
        if !self.is_tracked(parent) {
            return;
        }
        match parent {
            Value::Object(map) => {
                for (key, child) in map.borrow().iter() {
                    self.register_child(parent, key, child);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.borrow().iter().enumerate() {
                    self.register_child(parent, &index.to_string(), child);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn known_unreachable(&self, value: &Value) -> bool {
        value
            .ptr_id()
            .is_some_and(|id| self.unreachable.contains_key(&id))
    }

    pub(crate) fn mark_unreachable(&mut self, value: &Value) {
        if let Some(id) = value.ptr_id() {
            self.unreachable.insert(id, value.clone());
        }
    }

    pub(crate) fn forget_unreachable(&mut self) {
        self.unreachable.clear();
    }

    pub fn check_writable(&self, path: &[String]) -> Result<(), ScriptError> {
        match path.first() {
            Some(head) if head.starts_with(self.sigil) => Err(ScriptError::ReadOnlyPath {
                path: path.join("."),
            }),
            _ => Ok(()),
        }
    }

    pub fn record_set(
        &mut self,
        path: StatePath,
        new_value: &Value,
        target: Value,
    ) -> Result<(), ScriptError> {
        self.check_writable(&path)?;
        self.unreachable.clear();
        self.changes.push(ChangeRecord {
            path,
            new_value: new_value.deep_clone(),
            target,
            action: ChangeAction::Set,
        });
        Ok(())
    }

    pub fn record_unset(&mut self, path: StatePath, target: Value) -> Result<(), ScriptError> {
        self.check_writable(&path)?;
        self.unreachable.clear();
        self.changes.push(ChangeRecord {
            path,
            new_value: Value::Undefined,
            target,
            action: ChangeAction::Unset,
        });
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    pub fn take_changes(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.changes)
    }

    pub fn discard_changes(&mut self) {
        self.changes.clear();
    }
}

/// Path-addressed wrapper over a private deep clone of some state.
///
/// Hosts that edit state outside of scripts (and tests) use this to get the
/// same change records handlers produce, without going through the
/// interpreter.
pub struct TrackedState {
    root: Value,
    tracker: MutationTracker,
}

impl TrackedState {
    pub fn new(source: &Value, sigil: char) -> Self {
        Self {
            root: source.deep_clone(),
            tracker: MutationTracker::new(sigil),
        }
    }

    pub fn snapshot(&self) -> &Value {
        &self.root
    }

    pub fn get(&mut self, path: &[&str]) -> Value {
        let mut current = self.root.clone();
        let mut walked = StatePath::new();
        for segment in path {
            let next = current.get_property(segment);
            walked.push(segment.to_string());
            self.tracker.register(&next, walked.clone());
            current = next;
        }
        current
    }

    pub fn set(&mut self, path: &[&str], value: Value) -> Result<(), ScriptError> {
        let full: StatePath = path.iter().map(|segment| segment.to_string()).collect();
        self.tracker.check_writable(&full)?;
        let (target, key) = self.parent_of(path)?;
        check_array_write(&target, key, &value, EngineConfig::ARRAY_LENGTH_CEILING)?;
        self.tracker.record_set(full, &value, target.clone())?;
        write_member(&target, key, value);
        Ok(())
    }

    pub fn unset(&mut self, path: &[&str]) -> Result<(), ScriptError> {
        let full: StatePath = path.iter().map(|segment| segment.to_string()).collect();
        self.tracker.check_writable(&full)?;
        let (target, key) = self.parent_of(path)?;
        self.tracker.record_unset(full, target.clone())?;
        if let Value::Object(map) = &target {
            map.borrow_mut().shift_remove(key);
        }
        Ok(())
    }

    pub fn take_changes(&mut self) -> Vec<ChangeRecord> {
        self.tracker.take_changes()
    }

    fn parent_of<'p>(&mut self, path: &[&'p str]) -> Result<(Value, &'p str), ScriptError> {
        let Some((key, parents)) = path.split_last() else {
            return Err(ScriptError::InvalidAssignmentTarget);
        };
        let target = self.get(parents);
        match target {
            Value::Object(_) | Value::Array(_) => Ok((target, *key)),
            other => Err(ScriptError::UndefinedMember {
                property: key.to_string(),
                target: other.type_of(),
            }),
        }
    }
}

/// Breadth-first search from `roots` for the first path that reaches the
/// container `target`. Cycles and shared sub-graphs are visited once.
pub(crate) fn find_path(roots: Vec<(Value, StatePath)>, target: &Value) -> Option<StatePath> {
    let target_id = target.ptr_id()?;
    let mut visited = IdentitySet::default();
    let mut queue: VecDeque<(Value, StatePath)> = roots.into();
    while let Some((value, path)) = queue.pop_front() {
        let Some(id) = value.ptr_id() else {
            continue;
        };
        if id == target_id {
            return Some(path);
        }
        if !visited.insert(id) {
            continue;
        }
        let children: Vec<(String, Value)> = match &value {
            Value::Object(map) => map
                .borrow()
                .iter()
                .filter(|(_, child)| child.ptr_id().is_some())
                .map(|(key, child)| (key.clone(), child.clone()))
                .collect(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .enumerate()
                .filter(|(_, child)| child.ptr_id().is_some())
                .map(|(index, child)| (index.to_string(), child.clone()))
                .collect(),
            _ => Vec::new(),
        };
        for (key, child) in children {
            let mut child_path = path.clone();
            child_path.push(key);
            queue.push_back((child, child_path));
        }
    }
    None
}

/// Length an array would grow to if `key` were written with `value`.
fn grown_length(len: usize, key: &str, value: &Value) -> Option<f64> {
    if key == "length" {
        let length = value.to_number();
        return (length >= 0.0 && length.fract() == 0.0 && length > len as f64).then_some(length);
    }
    let index = index_of_key(key)?;
    (index >= len).then(|| index as f64 + 1.0)
}

/// Rejects index and `length` writes that would grow an array past `limit`.
pub(crate) fn check_array_write(
    target: &Value,
    key: &str,
    value: &Value,
    limit: usize,
) -> Result<(), ScriptError> {
    let Value::Array(items) = target else {
        return Ok(());
    };
    let len = items.borrow().len();
    match grown_length(len, key, value) {
        Some(requested) if requested > limit as f64 => {
            Err(ScriptError::LengthExceeded { requested, limit })
        }
        _ => Ok(()),
    }
}

/// Applies a member write. Callers check array growth first.
pub(crate) fn write_member(target: &Value, key: &str, value: Value) {
    match target {
        Value::Object(map) => {
            map.borrow_mut().insert(key.to_string(), value);
        }
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            if key == "length" {
                let length = value.to_number();
                if length >= 0.0 && length.fract() == 0.0 {
                    items.resize(length as usize, Value::Undefined);
                }
            } else if let Some(index) = index_of_key(key) {
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
            }
        }
        _ => {}
    }
}
