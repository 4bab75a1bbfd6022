//! AST visitor implementations for kiln
//!
//! Import discovery walks every scope of a module, since imports nested in
//! functions and classes still need to be bundled.

mod import_discovery;

pub use import_discovery::{
    DiscoveredImport, ImportDiscoveryVisitor, ImportKind, ModuleImports, ScopeElement,
    discover_imports,
};
