use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{fault, FaultKind, Result, SourceSpan},
    value::Value,
};

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// One scope of name bindings. Lookups walk outwards through parents;
/// plain assignment always binds in the innermost scope.
#[derive(Debug, Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: None,
            bindings: IndexMap::new(),
        }))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Rebinds `name` in the nearest scope that already holds it, falling
    /// back to defining it in `env` itself.
    pub fn assign(env: &EnvironmentRef, name: &str, value: Value) {
        let mut scope = env.clone();
        loop {
            if let Some(slot) = scope.borrow_mut().bindings.get_mut(name) {
                *slot = value;
                return;
            }
            let parent = scope.borrow().parent.clone();
            match parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        env.borrow_mut().define(name, value);
    }

    pub fn lookup(env: &EnvironmentRef, name: &str) -> Option<Value> {
        if let Some(value) = env.borrow().bindings.get(name) {
            return Some(value.clone());
        }
        let parent = env.borrow().parent.clone();
        parent.and_then(|parent| Environment::lookup(&parent, name))
    }

    pub fn get(env: &EnvironmentRef, name: &str, span: SourceSpan) -> Result<Value> {
        Environment::lookup(env, name).ok_or_else(|| {
            fault(
                FaultKind::Name,
                format!("name '{name}' is not defined"),
                span,
            )
        })
    }
}
