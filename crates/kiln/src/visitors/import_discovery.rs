//! Import discovery visitor that finds all imports in a Python module,
//! including those nested within functions, classes, and other scopes.
//! Also picks up `importlib.import_module(...)` and `__import__(...)` calls.

use ruff_python_ast::{
    Expr, ExprCall, ModModule, Stmt, StmtIf, StmtImport, StmtImportFrom,
    visitor::{Visitor, walk_expr, walk_stmt},
};
use ruff_text_size::TextRange;
use rustc_hash::FxHashSet as HashSet;

/// How an import was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// `import a.b`
    Import,
    /// `from a import b, c`; `*` appears as a name
    FromImport { names: Vec<String> },
    /// `importlib.import_module("a.b")` or `__import__("a.b")`
    DynamicLiteral,
}

/// An import discovered during AST traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImport {
    /// The module being imported; `None` for `from . import x`
    pub module_name: Option<String>,
    pub kind: ImportKind,
    /// Import level for relative imports
    pub level: u32,
    /// Source range of the import
    pub range: TextRange,
    /// Inside a `try` block or a conditional; may legitimately be absent
    pub is_optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeElement {
    Function(String),
    Class(String),
    If,
    While,
    For,
    With,
    Try,
}

/// Everything the analyzer needs from one module's source
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModuleImports {
    pub imports: Vec<DiscoveredImport>,
    /// Dynamic import calls whose module name is computed at runtime
    pub opaque_dynamic_calls: usize,
}

/// Collect the imports of a parsed module
pub fn discover_imports(module: &ModModule) -> ModuleImports {
    let mut visitor = ImportDiscoveryVisitor::new();
    visitor.visit_body(&module.body);
    visitor.into_module_imports()
}

/// Visitor that discovers all imports in a Python module
#[derive(Debug, Default)]
pub struct ImportDiscoveryVisitor {
    /// All discovered imports
    imports: Vec<DiscoveredImport>,
    /// Current scope stack
    scope_stack: Vec<ScopeElement>,
    /// Local names bound to `importlib.import_module`
    import_module_aliases: HashSet<String>,
    /// Local names bound to the `importlib` module
    importlib_aliases: HashSet<String>,
    opaque_dynamic_calls: usize,
    /// Whether we're in a type checking block
    in_type_checking: bool,
}

impl ImportDiscoveryVisitor {
    /// Create a new import discovery visitor
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_module_imports(self) -> ModuleImports {
        ModuleImports {
            imports: self.imports,
            opaque_dynamic_calls: self.opaque_dynamic_calls,
        }
    }

    /// Whether an import at the current position may be missing at runtime
    fn is_optional_scope(&self) -> bool {
        self.scope_stack
            .iter()
            .any(|scope| matches!(scope, ScopeElement::Try | ScopeElement::If))
    }

    /// Check if a condition is a TYPE_CHECKING check
    fn is_type_checking_condition(expr: &Expr) -> bool {
        match expr {
            Expr::Name(name) => name.id.as_str() == "TYPE_CHECKING",
            Expr::Attribute(attr) => {
                if attr.attr.as_str() == "TYPE_CHECKING"
                    && let Expr::Name(name) = &*attr.value
                {
                    return matches!(name.id.as_str(), "typing" | "typing_extensions");
                }
                false
            }
            _ => false,
        }
    }

    /// Record an import statement
    fn record_import(&mut self, stmt: &StmtImport) {
        for alias in &stmt.names {
            let module_name = alias.name.to_string();
            if module_name == "importlib" {
                let bound = alias
                    .asname
                    .as_ref()
                    .map_or("importlib", |name| name.as_str());
                self.importlib_aliases.insert(bound.to_owned());
            }

            self.imports.push(DiscoveredImport {
                module_name: Some(module_name),
                kind: ImportKind::Import,
                level: 0,
                range: stmt.range,
                is_optional: self.is_optional_scope(),
            });
        }
    }

    /// Record a from import statement
    fn record_import_from(&mut self, stmt: &StmtImportFrom) {
        let module_name = stmt.module.as_ref().map(ToString::to_string);

        if stmt.level == 0 && module_name.as_deref() == Some("importlib") {
            for alias in &stmt.names {
                if alias.name.as_str() == "import_module" {
                    let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                    self.import_module_aliases.insert(bound.to_string());
                }
            }
        }

        let names = stmt
            .names
            .iter()
            .map(|alias| alias.name.to_string())
            .collect();

        self.imports.push(DiscoveredImport {
            module_name,
            kind: ImportKind::FromImport { names },
            level: stmt.level,
            range: stmt.range,
            is_optional: self.is_optional_scope(),
        });
    }

    /// Whether `func` names `importlib.import_module` or `__import__`
    fn is_dynamic_import_function(&self, func: &Expr) -> bool {
        match func {
            Expr::Name(name) => {
                let id = name.id.as_str();
                id == "__import__" || self.import_module_aliases.contains(id)
            }
            Expr::Attribute(attr) => {
                attr.attr.as_str() == "import_module"
                    && matches!(&*attr.value, Expr::Name(base) if self.importlib_aliases.contains(base.id.as_str()))
            }
            _ => false,
        }
    }

    fn record_dynamic_call(&mut self, call: &ExprCall) {
        let literal = call.arguments.args.first().and_then(|arg| match arg {
            Expr::StringLiteral(literal) => Some(literal.value.to_str().to_owned()),
            _ => None,
        });

        // Relative names need the runtime `package=` value
        match literal {
            Some(name) if !name.starts_with('.') && !name.is_empty() => {
                self.imports.push(DiscoveredImport {
                    module_name: Some(name),
                    kind: ImportKind::DynamicLiteral,
                    level: 0,
                    range: call.range,
                    is_optional: self.is_optional_scope(),
                });
            }
            _ => self.opaque_dynamic_calls += 1,
        }
    }

    fn visit_if(&mut self, if_stmt: &StmtIf) {
        self.visit_expr(&if_stmt.test);

        let was_type_checking = self.in_type_checking;
        if Self::is_type_checking_condition(&if_stmt.test) {
            self.in_type_checking = true;
        }
        self.scope_stack.push(ScopeElement::If);
        self.visit_body(&if_stmt.body);
        self.in_type_checking = was_type_checking;

        // `else` of a TYPE_CHECKING test runs at runtime
        for clause in &if_stmt.elif_else_clauses {
            if let Some(test) = &clause.test {
                self.visit_expr(test);
            }
            self.visit_body(&clause.body);
        }
        self.scope_stack.pop();
    }
}

impl<'a> Visitor<'a> for ImportDiscoveryVisitor {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Import(import_stmt) => {
                if !self.in_type_checking {
                    self.record_import(import_stmt);
                }
                return;
            }
            Stmt::ImportFrom(import_from) => {
                if !self.in_type_checking {
                    self.record_import_from(import_from);
                }
                return;
            }
            Stmt::If(if_stmt) => {
                self.visit_if(if_stmt);
                return;
            }
            Stmt::FunctionDef(func) => {
                self.scope_stack
                    .push(ScopeElement::Function(func.name.to_string()));
            }
            Stmt::ClassDef(class) => {
                self.scope_stack
                    .push(ScopeElement::Class(class.name.to_string()));
            }
            Stmt::While(_) => self.scope_stack.push(ScopeElement::While),
            Stmt::For(_) => self.scope_stack.push(ScopeElement::For),
            Stmt::With(_) => self.scope_stack.push(ScopeElement::With),
            Stmt::Try(_) => self.scope_stack.push(ScopeElement::Try),
            _ => {
                walk_stmt(self, stmt);
                return;
            }
        }

        walk_stmt(self, stmt);
        self.scope_stack.pop();
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        if let Expr::Call(call) = expr
            && !self.in_type_checking
            && self.is_dynamic_import_function(&call.func)
        {
            self.record_dynamic_call(call);
        }

        walk_expr(self, expr);
    }
}
