use std::collections::HashMap;

use crate::ast::{Expr, Param};
use crate::value::RuntimeError;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);
    };
}

id_type!(ScopeId);
id_type!(ModuleId);
id_type!(FnId);
id_type!(StructId);
id_type!(VarId);
id_type!(StdId);

/// Where a resolved call ultimately lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    User(FnId),
    Std(StdId),
    Program(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructTarget {
    User(StructId),
    Std(StdId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Root(ModuleId),
    Module(ModuleId),
    Function(FnId),
    Block,
    Closure(FnId),
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    variables: HashMap<String, VarId>,
}

/// One module's member tables. Declared members take precedence over
/// imported ones during resolution.
#[derive(Debug)]
pub struct ModuleData {
    pub name: String,
    pub scope: ScopeId,
    functions: HashMap<String, FnId>,
    structs: HashMap<String, StructId>,
    submodules: HashMap<String, ModuleId>,
    imported_functions: HashMap<String, FnId>,
    imported_structs: HashMap<String, StructId>,
    imported_modules: HashMap<String, ModuleId>,
    /// Guards against re-analysing cyclic imports.
    pub analysed: bool,
}

#[derive(Debug)]
pub struct FunctionData {
    pub name: String,
    pub module: ModuleId,
    pub params: Vec<Param>,
    /// Variable symbols of the parameters, in declaration order.
    pub param_symbols: Vec<VarId>,
    pub has_closure_param: bool,
    pub is_closure: bool,
    /// Outer variables referenced from a closure body, in first-capture
    /// order. Empty for ordinary functions.
    pub captured: Vec<VarId>,
    pub body: Vec<Expr>,
    pub analysed: bool,
}

impl FunctionData {
    pub fn min_args(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.default.is_none() && !p.variadic)
            .count()
    }

    pub fn max_args(&self) -> usize {
        if self.is_variadic() {
            usize::MAX
        } else {
            self.params.len()
        }
    }

    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|p| p.variadic)
    }
}

#[derive(Debug)]
pub struct StructData {
    pub name: String,
    pub module: ModuleId,
    pub params: Vec<Param>,
}

impl StructData {
    pub fn min_args(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.default.is_none() && !p.variadic)
            .count()
    }

    pub fn max_args(&self) -> usize {
        if self.params.last().is_some_and(|p| p.variadic) {
            usize::MAX
        } else {
            self.params.len()
        }
    }
}

#[derive(Debug)]
pub struct VariableData {
    pub name: String,
    pub scope: ScopeId,
}

/// The scope arena and all symbol side tables. Scopes persist for the
/// engine's lifetime so interactive sessions keep their bindings.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    modules: Vec<ModuleData>,
    functions: Vec<FunctionData>,
    structs: Vec<StructData>,
    variables: Vec<VariableData>,
    root: ModuleId,
    /// Persistent block scope holding top-level variables.
    top_scope: ScopeId,
}

impl SymbolTable {
    pub fn new() -> Self {
        let root = ModuleId(0);
        let root_scope = Scope {
            kind: ScopeKind::Root(root),
            parent: None,
            variables: HashMap::new(),
        };
        let top_scope = Scope {
            kind: ScopeKind::Block,
            parent: Some(ScopeId(0)),
            variables: HashMap::new(),
        };
        Self {
            scopes: vec![root_scope, top_scope],
            modules: vec![ModuleData {
                name: String::new(),
                scope: ScopeId(0),
                functions: HashMap::new(),
                structs: HashMap::new(),
                submodules: HashMap::new(),
                imported_functions: HashMap::new(),
                imported_structs: HashMap::new(),
                imported_modules: HashMap::new(),
                analysed: false,
            }],
            functions: Vec::new(),
            structs: Vec::new(),
            variables: Vec::new(),
            root,
            top_scope: ScopeId(1),
        }
    }

    pub fn root_module(&self) -> ModuleId {
        self.root
    }

    pub fn top_scope(&self) -> ScopeId {
        self.top_scope
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn push_scope(&mut self, kind: ScopeKind, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            variables: HashMap::new(),
        });
        id
    }

    pub fn module(&self, id: ModuleId) -> &ModuleData {
        &self.modules[id.0]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut ModuleData {
        &mut self.modules[id.0]
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Declare a submodule, creating its scope under the parent module's
    /// scope. Re-declaring an existing name returns the existing module so
    /// interactive sessions can extend a module incrementally.
    pub fn declare_module(&mut self, parent: ModuleId, name: &str) -> ModuleId {
        if let Some(&existing) = self.modules[parent.0].submodules.get(name) {
            return existing;
        }
        let parent_scope = self.modules[parent.0].scope;
        let id = ModuleId(self.modules.len());
        let scope = self.push_scope(ScopeKind::Module(id), parent_scope);
        self.modules.push(ModuleData {
            name: name.to_string(),
            scope,
            functions: HashMap::new(),
            structs: HashMap::new(),
            submodules: HashMap::new(),
            imported_functions: HashMap::new(),
            imported_structs: HashMap::new(),
            imported_modules: HashMap::new(),
            analysed: false,
        });
        self.modules[parent.0]
            .submodules
            .insert(name.to_string(), id);
        id
    }

    /// Register a function in its module. Function and struct names share
    /// one namespace within a module.
    pub fn declare_function(&mut self, data: FunctionData) -> Result<FnId, RuntimeError> {
        let module = data.module;
        let name = data.name.clone();
        if self.modules[module.0].functions.contains_key(&name)
            || self.modules[module.0].structs.contains_key(&name)
        {
            return Err(RuntimeError::general(format!(
                "{} is already declared in this module",
                name
            )));
        }
        let id = FnId(self.functions.len());
        self.functions.push(data);
        self.modules[module.0].functions.insert(name, id);
        Ok(id)
    }

    /// Register a closure body. Closures are anonymous and never enter a
    /// module's name table.
    pub fn add_closure(&mut self, data: FunctionData) -> FnId {
        let id = FnId(self.functions.len());
        self.functions.push(data);
        id
    }

    pub fn declare_struct(&mut self, data: StructData) -> Result<StructId, RuntimeError> {
        let module = data.module;
        let name = data.name.clone();
        if self.modules[module.0].functions.contains_key(&name)
            || self.modules[module.0].structs.contains_key(&name)
        {
            return Err(RuntimeError::general(format!(
                "{} is already declared in this module",
                name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for param in &data.params {
            if !seen.insert(param.name.as_str()) {
                return Err(RuntimeError::general(format!(
                    "duplicate field {} in struct {}",
                    param.name, name
                )));
            }
        }
        let id = StructId(self.structs.len());
        self.structs.push(data);
        self.modules[module.0].structs.insert(name, id);
        Ok(id)
    }

    pub fn import_function(&mut self, into: ModuleId, id: FnId) {
        let name = self.functions[id.0].name.clone();
        self.modules[into.0].imported_functions.insert(name, id);
    }

    pub fn import_struct(&mut self, into: ModuleId, id: StructId) {
        let name = self.structs[id.0].name.clone();
        self.modules[into.0].imported_structs.insert(name, id);
    }

    pub fn import_module(&mut self, into: ModuleId, id: ModuleId) {
        let name = self.modules[id.0].name.clone();
        self.modules[into.0].imported_modules.insert(name, id);
    }

    pub fn function(&self, id: FnId) -> &FunctionData {
        &self.functions[id.0]
    }

    pub fn function_mut(&mut self, id: FnId) -> &mut FunctionData {
        &mut self.functions[id.0]
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn struct_data(&self, id: StructId) -> &StructData {
        &self.structs[id.0]
    }

    pub fn struct_data_mut(&mut self, id: StructId) -> &mut StructData {
        &mut self.structs[id.0]
    }

    pub fn declared_structs(&self, module: ModuleId) -> Vec<StructId> {
        let mut ids: Vec<StructId> = self.modules[module.0].structs.values().copied().collect();
        ids.sort();
        ids
    }

    pub fn variable(&self, id: VarId) -> &VariableData {
        &self.variables[id.0]
    }

    /// Resolve a module path. Resolution starts at the tree root and
    /// follows declared submodules first, then imported ones, at each
    /// step.
    pub fn resolve_module_path(&self, from: ModuleId, path: &[String]) -> Option<ModuleId> {
        let _ = from;
        let mut current = self.root;
        for segment in path {
            let module = &self.modules[current.0];
            current = module
                .submodules
                .get(segment)
                .or_else(|| module.imported_modules.get(segment))
                .copied()?;
        }
        Some(current)
    }

    pub fn lookup_function(
        &self,
        module: ModuleId,
        name: &str,
        include_imports: bool,
    ) -> Option<FnId> {
        let data = &self.modules[module.0];
        data.functions
            .get(name)
            .or_else(|| {
                if include_imports {
                    data.imported_functions.get(name)
                } else {
                    None
                }
            })
            .copied()
    }

    pub fn lookup_struct(
        &self,
        module: ModuleId,
        name: &str,
        include_imports: bool,
    ) -> Option<StructId> {
        let data = &self.modules[module.0];
        data.structs
            .get(name)
            .or_else(|| {
                if include_imports {
                    data.imported_structs.get(name)
                } else {
                    None
                }
            })
            .copied()
    }

    pub fn declared_functions(&self, module: ModuleId) -> Vec<FnId> {
        let mut ids: Vec<FnId> = self.modules[module.0].functions.values().copied().collect();
        ids.sort();
        ids
    }

    pub fn imported_functions(&self, module: ModuleId) -> Vec<FnId> {
        let mut ids: Vec<FnId> = self.modules[module.0]
            .imported_functions
            .values()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn submodules(&self, module: ModuleId) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.modules[module.0].submodules.values().copied().collect();
        ids.extend(self.modules[module.0].imported_modules.values().copied());
        ids.sort();
        ids.dedup();
        ids
    }

    /// Add a variable to a (non-module) scope. A repeated `let` in the
    /// same scope shadows the previous binding with a fresh symbol.
    pub fn add_variable(&mut self, scope: ScopeId, name: &str) -> VarId {
        debug_assert!(!matches!(
            self.scopes[scope.0].kind,
            ScopeKind::Root(_) | ScopeKind::Module(_)
        ));
        let id = VarId(self.variables.len());
        self.variables.push(VariableData {
            name: name.to_string(),
            scope,
        });
        self.scopes[scope.0].variables.insert(name.to_string(), id);
        id
    }

    pub fn has_variable(&self, scope: ScopeId, name: &str) -> bool {
        self.lookup_variable(scope, name).is_some()
    }

    /// Look a variable up through the scope chain, stopping at the module
    /// boundary. Returns the symbol together with the closures crossed on
    /// the way out (innermost first), which is exactly the set that must
    /// capture the variable.
    pub fn lookup_variable(&self, scope: ScopeId, name: &str) -> Option<(VarId, Vec<FnId>)> {
        let mut crossed = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0];
            if matches!(s.kind, ScopeKind::Root(_) | ScopeKind::Module(_)) {
                return None;
            }
            if let Some(&var) = s.variables.get(name) {
                return Some((var, crossed));
            }
            if let ScopeKind::Closure(fid) = s.kind {
                crossed.push(fid);
            }
            current = s.parent;
        }
        None
    }

    /// The module whose scope encloses the given scope.
    pub fn module_of_scope(&self, scope: ScopeId) -> ModuleId {
        let mut current = Some(scope);
        while let Some(id) = current {
            match self.scopes[id.0].kind {
                ScopeKind::Root(m) | ScopeKind::Module(m) => return m,
                _ => current = self.scopes[id.0].parent,
            }
        }
        self.root
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_data(name: &str, module: ModuleId) -> FunctionData {
        FunctionData {
            name: name.to_string(),
            module,
            params: Vec::new(),
            param_symbols: Vec::new(),
            has_closure_param: false,
            is_closure: false,
            captured: Vec::new(),
            body: Vec::new(),
            analysed: false,
        }
    }

    #[test]
    fn module_paths_follow_declared_then_imported_submodules() {
        let mut symbols = SymbolTable::new();
        let root = symbols.root_module();
        let a = symbols.declare_module(root, "a");
        let b = symbols.declare_module(a, "b");
        assert_eq!(
            symbols.resolve_module_path(root, &["a".into(), "b".into()]),
            Some(b)
        );

        let other = symbols.declare_module(root, "other");
        symbols.import_module(root, b);
        assert_eq!(symbols.resolve_module_path(other, &["b".into()]), Some(b));
        assert_eq!(symbols.resolve_module_path(root, &["missing".into()]), None);
    }

    #[test]
    fn function_and_struct_names_share_a_namespace() {
        let mut symbols = SymbolTable::new();
        let root = symbols.root_module();
        let data = function_data("thing", root);
        symbols.declare_function(data).unwrap();
        let clash = StructData {
            name: "thing".to_string(),
            module: root,
            params: Vec::new(),
        };
        assert!(symbols.declare_struct(clash).is_err());
    }

    #[test]
    fn duplicate_struct_fields_are_rejected() {
        let mut symbols = SymbolTable::new();
        let root = symbols.root_module();
        let data = StructData {
            name: "Point".to_string(),
            module: root,
            params: vec![Param::required("x"), Param::required("x")],
        };
        assert!(symbols.declare_struct(data).is_err());
    }

    #[test]
    fn variable_lookup_reports_crossed_closures() {
        let mut symbols = SymbolTable::new();
        let top = symbols.top_scope();
        let var = symbols.add_variable(top, "x");

        let root = symbols.root_module();
        let closure = symbols.add_closure(function_data("<closure>", root));
        let closure_scope = symbols.push_scope(ScopeKind::Closure(closure), top);
        let block = symbols.push_scope(ScopeKind::Block, closure_scope);

        let (found, crossed) = symbols.lookup_variable(block, "x").unwrap();
        assert_eq!(found, var);
        assert_eq!(crossed, vec![closure]);

        let (found, crossed) = symbols.lookup_variable(top, "x").unwrap();
        assert_eq!(found, var);
        assert!(crossed.is_empty());
    }

    #[test]
    fn lookup_stops_at_the_module_boundary() {
        let mut symbols = SymbolTable::new();
        let top = symbols.top_scope();
        symbols.add_variable(top, "x");
        let root = symbols.root_module();
        let sub = symbols.declare_module(root, "m");
        let fn_scope = {
            let data = function_data("f", sub);
            let id = symbols.declare_function(data).unwrap();
            let parent = symbols.module(sub).scope;
            symbols.push_scope(ScopeKind::Function(id), parent)
        };
        assert!(symbols.lookup_variable(fn_scope, "x").is_none());
    }
}
