//! The IR module: the top-level container the front-end populates
//! across the AST→IR boundary (spec.md §3 "IR module", §6).
//!
//! Grounded on spec.md §3 directly for the map shapes, and
//! `original_source/source/core/hashtable.c` (via [`crate::util::hashtable`])
//! for the function-declaration/body maps DESIGN.md calls out.

use crate::error::{CoreError, ErrorKind, Result};
use crate::ir::debug::DebugInfoTree;
use crate::ir::entities::FuncDecl;
use crate::ir::function::Function;
use crate::types::{TypeBundle, TypeId};
use crate::util::hashtable::HashTable;
use crate::util::strpool::{StringId, StringPool};
use cranelift_entity::PrimaryMap;

/// The scope an identifier was declared at (spec.md §6: "identifier
/// kind: global/local/thread-local").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Global,
    Local,
    ThreadLocal,
}

/// A function declaration: name, parameter types, return type, vararg
/// flag, identifier kind (spec.md §6 item (b)).
#[derive(Debug, Clone)]
pub struct FuncDeclData {
    pub name: StringId,
    pub params: Vec<TypeId>,
    pub return_ty: TypeId,
    pub vararg: bool,
    pub kind: IdentifierKind,
}

/// TLS model independent of codegen's choice of emulated/GD/IE lowering
/// (spec.md §3: "a table of TLS/thread-local entries"); the codegen
/// layer picks the actual sequence per spec.md §4.3 item 4.
#[derive(Debug, Clone)]
pub struct TlsEntry {
    pub name: StringId,
    pub ty: TypeId,
    pub initialized: bool,
}

/// The top-level container a front-end fills across the AST→IR
/// boundary and the back-end consumes function-by-function.
#[derive(Default)]
pub struct Module {
    pub strings: StringPool,
    pub types: TypeBundle,
    named_types: HashTable<StringId, TypeId>,
    declarations: PrimaryMap<FuncDecl, FuncDeclData>,
    name_to_decl: HashTable<StringId, FuncDecl>,
    bodies: HashTable<FuncDecl, Function>,
    consumed_bodies: HashTable<FuncDecl, ()>,
    externals: HashTable<StringId, ()>,
    tls_entries: Vec<TlsEntry>,
    pub debug_info: DebugInfoTree,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a named type into the type bundle (spec.md §6 item (a)).
    pub fn insert_named_type(&mut self, name: StringId, ty: TypeId) -> Result<()> {
        self.named_types.insert(name, ty)
    }

    pub fn named_type(&self, name: StringId) -> Option<TypeId> {
        self.named_types.get(&name).copied()
    }

    /// Declares a function (spec.md §6 item (b)). Fails if a
    /// declaration with this name already exists.
    pub fn declare_function(&mut self, data: FuncDeclData) -> Result<FuncDecl> {
        if self.name_to_decl.has(&data.name) {
            return Err(CoreError::new(
                ErrorKind::AlreadyExists,
                "function already declared",
            ));
        }
        let name = data.name;
        let decl = self.declarations.push(data);
        self.name_to_decl.insert(name, decl)?;
        Ok(decl)
    }

    pub fn declaration(&self, decl: FuncDecl) -> Result<&FuncDeclData> {
        self.declarations
            .get(decl)
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, "no such function declaration"))
    }

    pub fn lookup_function(&self, name: StringId) -> Option<FuncDecl> {
        self.name_to_decl.get(&name).copied()
    }

    /// Binds a function body to its declaration (spec.md §6 item (c)).
    /// Each declaration id may be consumed at most once (spec.md §3
    /// lifecycle note).
    pub fn define_function_body(&mut self, decl: FuncDecl, body: Function) -> Result<()> {
        if self.bodies.has(&decl) {
            return Err(CoreError::new(
                ErrorKind::AlreadyExists,
                "function body already defined",
            ));
        }
        self.bodies.insert(decl, body)
    }

    pub fn function_body(&self, decl: FuncDecl) -> Option<&Function> {
        self.bodies.get(&decl)
    }

    pub fn function_body_mut(&mut self, decl: FuncDecl) -> Option<&mut Function> {
        self.bodies.get_mut(&decl)
    }

    /// Takes ownership of a function body for back-end consumption,
    /// enforcing "each IR function is consumed at most once per output"
    /// (spec.md §3 lifecycle). A second call for the same declaration
    /// returns `None`, as does a declaration with no defined body.
    pub fn take_function_body(&mut self, decl: FuncDecl) -> Option<Function> {
        if self.consumed_bodies.has(&decl) {
            return None;
        }
        let body = self.bodies.get_mut(&decl)?;
        let taken = core::mem::take(body);
        self.consumed_bodies
            .insert(decl, ())
            .expect("decl marked consumed exactly once");
        Some(taken)
    }

    pub fn add_external(&mut self, name: StringId) -> Result<()> {
        if self.externals.has(&name) {
            return Ok(());
        }
        self.externals.insert(name, ())
    }

    pub fn is_external(&self, name: StringId) -> bool {
        self.externals.has(&name)
    }

    pub fn add_tls_entry(&mut self, entry: TlsEntry) {
        self.tls_entries.push(entry);
    }

    pub fn tls_entries(&self) -> &[TlsEntry] {
        &self.tls_entries
    }

    pub fn function_declarations(&self) -> impl Iterator<Item = FuncDecl> + '_ {
        self.declarations.keys()
    }
}
