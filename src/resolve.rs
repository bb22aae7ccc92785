//! Name resolution for calls and fields.
//!
//! The symbol table is built once per unit before code generation. It maps
//! `(name, arity)` to the method a call binds to, for module functions and
//! for each class. Lookups that fail can fall back to a
//! [`FallbackHandler`], which is how builtins such as `print` resolve.

use std::collections::HashMap;

use crate::ast::visit::{Visitor, walk_stmt};
use crate::ast::{ClassDef, CompilationUnit, FunctionDef, Stmt, StmtKind};

/// Descriptor of every field: one dynamically typed value.
pub const FIELD_DESCRIPTOR: &str = "A";

/// Class holding the builtin functions.
pub const BUILTINS_CLASS: &str = "kiln/Builtins";

/// `(` + `A` per parameter + `)` + `A` or `V`.
pub fn method_descriptor(arity: usize, returns_value: bool) -> String {
    format!("({}){}", "A".repeat(arity), if returns_value { 'A' } else { 'V' })
}

/// Inverse of [`method_descriptor`]: `(arity, returns_value)`.
pub fn parse_method_descriptor(descriptor: &str) -> Option<(usize, bool)> {
    let rest = descriptor.strip_prefix('(')?;
    let (params, ret) = rest.split_once(')')?;
    if !params.chars().all(|c| c == 'A') {
        return None;
    }
    let returns_value = match ret {
        "A" => true,
        "V" => false,
        _ => return None,
    };
    Some((params.len(), returns_value))
}

/// Session-scoped cache of method descriptors keyed by
/// `(owner, name, signature)`.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: HashMap<(String, String, usize, bool), String>,
    hits: usize,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(&mut self, owner: &str, name: &str, arity: usize, returns_value: bool) -> String {
        let key = (owner.to_string(), name.to_string(), arity, returns_value);
        if let Some(descriptor) = self.entries.get(&key) {
            self.hits += 1;
            return descriptor.clone();
        }
        let descriptor = method_descriptor(arity, returns_value);
        self.entries.insert(key, descriptor.clone());
        descriptor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Static,
    Virtual,
}

/// What a call site binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodTarget {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub kind: MethodKind,
    pub arity: usize,
    pub returns_value: bool,
}

/// Consulted only after regular lookup fails.
pub trait FallbackHandler {
    fn resolve(&self, name: &str, arity: usize) -> Option<MethodTarget>;
}

/// Resolves `print(x)` and `println(x)` to static void methods of
/// [`BUILTINS_CLASS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFallback;

impl FallbackHandler for BuiltinFallback {
    fn resolve(&self, name: &str, arity: usize) -> Option<MethodTarget> {
        match (name, arity) {
            ("print" | "println", 1) => Some(MethodTarget {
                owner: BUILTINS_CLASS.to_string(),
                name: name.to_string(),
                descriptor: method_descriptor(1, false),
                kind: MethodKind::Static,
                arity: 1,
                returns_value: false,
            }),
            _ => None,
        }
    }
}

/// Methods and fields of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub fields: Vec<String>,
    methods: HashMap<(String, usize), MethodTarget>,
}

impl ClassInfo {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field == name)
    }

    pub fn method(&self, name: &str, arity: usize) -> Option<&MethodTarget> {
        self.methods.get(&(name.to_string(), arity))
    }
}

pub struct SymbolTable {
    module: String,
    functions: HashMap<(String, usize), MethodTarget>,
    classes: Vec<ClassInfo>,
    fallback: Option<Box<dyn FallbackHandler>>,
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("module", &self.module)
            .field("functions", &self.functions.len())
            .field("classes", &self.classes.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl SymbolTable {
    pub fn build(unit: &CompilationUnit, module: &str, cache: &mut DescriptorCache) -> Self {
        let mut table = SymbolTable {
            module: module.to_string(),
            functions: HashMap::new(),
            classes: Vec::new(),
            fallback: None,
        };

        for function in unit.functions() {
            let target = describe(function, module, MethodKind::Static, cache);
            let key = (function.name.clone(), function.arity());
            if table.functions.insert(key, target).is_some() {
                tracing::warn!(
                    function = %function.name,
                    arity = function.arity(),
                    "function redefined; the later definition wins"
                );
            }
        }

        for class in unit.classes() {
            let info = class_info(class, cache);
            match table.classes.iter_mut().find(|c| c.name == info.name) {
                Some(existing) => {
                    tracing::warn!(class = %info.name, "class redefined; the later definition wins");
                    *existing = info;
                }
                None => table.classes.push(info),
            }
        }

        tracing::debug!(
            functions = table.functions.len(),
            classes = table.classes.len(),
            "symbol table built"
        );
        table
    }

    pub fn with_fallback(mut self, fallback: Box<dyn FallbackHandler>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self, name: &str, arity: usize) -> Option<&MethodTarget> {
        self.functions.get(&(name.to_string(), arity))
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|class| class.name == name)
    }

    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    /// Method named `name` taking `arity` arguments on any class, for calls
    /// with an explicit receiver. Classes are searched in source order.
    pub fn any_method(&self, name: &str, arity: usize) -> Option<&MethodTarget> {
        self.classes.iter().find_map(|class| class.method(name, arity))
    }

    pub fn fallback(&self, name: &str, arity: usize) -> Option<MethodTarget> {
        self.fallback.as_ref()?.resolve(name, arity)
    }
}

fn class_info(class: &ClassDef, cache: &mut DescriptorCache) -> ClassInfo {
    let mut methods = HashMap::new();
    for method in class.methods() {
        let target = describe(method, &class.name, MethodKind::Virtual, cache);
        if methods.insert((method.name.clone(), method.arity()), target).is_some() {
            tracing::warn!(
                class = %class.name,
                method = %method.name,
                "method redefined; the later definition wins"
            );
        }
    }

    let mut fields: Vec<String> = Vec::new();
    for field in class.fields() {
        if !fields.contains(&field.name) {
            fields.push(field.name.clone());
        }
    }

    ClassInfo {
        name: class.name.clone(),
        fields,
        methods,
    }
}

fn describe(function: &FunctionDef, owner: &str, kind: MethodKind, cache: &mut DescriptorCache) -> MethodTarget {
    let returns_value = returns_value(function);
    MethodTarget {
        owner: owner.to_string(),
        name: function.name.clone(),
        descriptor: cache.method(owner, &function.name, function.arity(), returns_value),
        kind,
        arity: function.arity(),
        returns_value,
    }
}

/// A function returns a value iff its body contains `return expr`.
pub fn returns_value(function: &FunctionDef) -> bool {
    let mut finder = ValueReturnFinder(false);
    for stmt in &function.body {
        finder.visit_stmt(stmt);
    }
    finder.0
}

struct ValueReturnFinder(bool);

impl Visitor for ValueReturnFinder {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let StmtKind::Return(Some(_)) = stmt.kind {
            self.0 = true;
        }
        walk_stmt(self, stmt);
    }

    // A nested definition's returns are its own.
    fn visit_function(&mut self, _function: &FunctionDef) {}

    fn visit_class(&mut self, _class: &ClassDef) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn table(source: &str) -> SymbolTable {
        let (unit, errors) = Parser::new(source).parse();
        assert!(errors.is_empty(), "{:?}", errors);
        SymbolTable::build(&unit, "Main", &mut DescriptorCache::new())
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(method_descriptor(0, false), "()V");
        assert_eq!(method_descriptor(2, true), "(AA)A");
        assert_eq!(parse_method_descriptor("(AAA)V"), Some((3, false)));
        assert_eq!(parse_method_descriptor("()A"), Some((0, true)));
        assert_eq!(parse_method_descriptor("(AB)V"), None);
        assert_eq!(parse_method_descriptor("AA"), None);
    }

    #[test]
    fn test_functions_by_name_and_arity() {
        let symbols = table("def f(a) { return a }\ndef f(a, b) { g() }");
        let one = symbols.function("f", 1).expect("f/1");
        assert_eq!(one.descriptor, "(A)A");
        assert_eq!(one.kind, MethodKind::Static);
        assert_eq!(one.owner, "Main");
        let two = symbols.function("f", 2).expect("f/2");
        assert!(!two.returns_value);
        assert!(symbols.function("f", 3).is_none());
    }

    #[test]
    fn test_later_definition_wins() {
        let symbols = table("def f() { }\ndef f() { return 1 }");
        assert!(symbols.function("f", 0).expect("f").returns_value);
    }

    #[test]
    fn test_class_members() {
        let symbols = table("class Counter {\n n = 0\n def inc() { n = n + 1 }\n def get() { return n }\n}");
        let class = symbols.class("Counter").expect("class");
        assert!(class.has_field("n"));
        let get = class.method("get", 0).expect("get");
        assert_eq!(get.kind, MethodKind::Virtual);
        assert_eq!(get.descriptor, "()A");
        assert_eq!(symbols.any_method("inc", 0).map(|m| m.owner.as_str()), Some("Counter"));
    }

    #[test]
    fn test_fallback_only_when_installed() {
        let symbols = table("x = 1");
        assert!(symbols.fallback("print", 1).is_none());

        let symbols = symbols.with_fallback(Box::new(BuiltinFallback));
        let print = symbols.fallback("print", 1).expect("builtin");
        assert_eq!(print.owner, BUILTINS_CLASS);
        assert_eq!(print.descriptor, "(A)V");
        assert!(symbols.fallback("print", 2).is_none());
    }

    #[test]
    fn test_descriptor_cache_hits() {
        let mut cache = DescriptorCache::new();
        assert_eq!(cache.method("Main", "f", 1, true), "(A)A");
        assert_eq!(cache.method("Main", "f", 1, true), "(A)A");
        assert_eq!(cache.method("Other", "f", 1, true), "(A)A");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 1);
    }
}
