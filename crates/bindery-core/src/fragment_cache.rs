use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use bindery_script::{parse_property, parse_statements, ParseError, Segment, Stmt};

use crate::collections::map::HashMap;

/// Identity of one parse result. Every parse gets a fresh id, even for text
/// that was parsed before, so caches downstream key on this rather than on
/// source equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParseId(u64);

static NEXT_PARSE_ID: AtomicU64 = AtomicU64::new(1);

impl ParseId {
    fn next() -> Self {
        ParseId(NEXT_PARSE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// A property value split into literal and `{...}` segments.
#[derive(Debug)]
pub struct ParsedPropertyValue {
    pub id: ParseId,
    pub source: Rc<str>,
    pub segments: Vec<Segment>,
}

impl ParsedPropertyValue {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            segments: parse_property(source)?,
            id: ParseId::next(),
            source: Rc::from(source),
        })
    }
}

/// A handler body.
#[derive(Debug)]
pub struct ParsedEventValue {
    pub id: ParseId,
    pub source: Rc<str>,
    pub statements: Vec<Stmt>,
}

impl ParsedEventValue {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            statements: parse_statements(source)?,
            id: ParseId::next(),
            source: Rc::from(source),
        })
    }
}

/// Parse-once store for markup strings, owned by the host and dropped or
/// cleared when the document reloads. Failed parses are not stored.
#[derive(Default)]
pub struct FragmentCache {
    properties: RefCell<HashMap<Rc<str>, Rc<ParsedPropertyValue>>>,
    events: RefCell<HashMap<Rc<str>, Rc<ParsedEventValue>>>,
}

impl FragmentCache {
    pub fn property(&self, source: &str) -> Result<Rc<ParsedPropertyValue>, ParseError> {
        if let Some(parsed) = self.properties.borrow().get(source) {
            return Ok(parsed.clone());
        }
        let parsed = Rc::new(ParsedPropertyValue::parse(source)?);
        self.properties
            .borrow_mut()
            .insert(parsed.source.clone(), parsed.clone());
        Ok(parsed)
    }

    pub fn event(&self, source: &str) -> Result<Rc<ParsedEventValue>, ParseError> {
        if let Some(parsed) = self.events.borrow().get(source) {
            return Ok(parsed.clone());
        }
        let parsed = Rc::new(ParsedEventValue::parse(source)?);
        self.events
            .borrow_mut()
            .insert(parsed.source.clone(), parsed.clone());
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.properties.borrow().len() + self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.properties.borrow_mut().clear();
        self.events.borrow_mut().clear();
    }
}
