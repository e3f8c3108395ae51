use std::rc::Rc;

use crate::{
    ast::{ImportAlias, StmtKind},
    environment::{Environment, EnvironmentRef},
    parser,
    runtime::builtins,
};

/// The persistent bindings of one session. Builtins live in a parent scope,
/// so they never show up as session names.
pub struct Namespace {
    globals: EnvironmentRef,
    generation: u64,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            globals: Environment::with_parent(builtins()),
            generation: 0,
        }
    }

    pub fn globals(&self) -> EnvironmentRef {
        Rc::clone(&self.globals)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn contains(&self, name: &str) -> bool {
        self.globals.borrow().contains(name)
    }

    /// Swaps in a fresh, empty set of bindings.
    pub fn reset(&mut self) {
        self.globals = Environment::with_parent(builtins());
        self.generation += 1;
    }

    /// Drops every import in `preamble` whose bound name already exists,
    /// keeping other statements verbatim. Text that does not parse comes
    /// back unchanged so the fault surfaces when the combined code is
    /// classified.
    pub fn filter_preamble(&self, preamble: &str) -> String {
        let module = match parser::parse_module(preamble) {
            Ok(module) => module,
            Err(_) => return preamble.to_string(),
        };

        let mut lines = Vec::new();
        for stmt in &module.items {
            match &stmt.kind {
                StmtKind::Import(names) => lines.extend(
                    names
                        .iter()
                        .filter(|name| !self.contains(name.bound_name()))
                        .map(|name| name.render()),
                ),
                StmtKind::ImportFrom { module, names } => {
                    let unbound: Vec<&ImportAlias> = names
                        .iter()
                        .filter(|name| !self.contains(name.bound_name()))
                        .collect();
                    if !unbound.is_empty() {
                        let rendered: Vec<String> =
                            unbound.iter().map(|name| name.render()).collect();
                        lines.push(format!(
                            "from {} import {}",
                            module.join("."),
                            rendered.join(", ")
                        ));
                    }
                }
                _ => {
                    if let Some(text) = preamble.get(stmt.span.start..stmt.span.end) {
                        lines.push(text.to_string());
                    }
                }
            }
        }
        lines.join("\n")
    }
}
