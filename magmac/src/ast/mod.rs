//! Abstract Syntax Tree definitions

mod expr;
mod span;
mod types;

pub use expr::*;
pub use span::*;
pub use types::*;

use serde::{Deserialize, Serialize};

/// A program is a sequence of top-level items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Spanned<Item>>,
}

/// Top-level item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    /// `import name;`
    Import(ImportDecl),
    /// `type Name = T;`
    TypeAlias(TypeAliasDecl),
    /// `struct enum Name { V1 { .. } V2 { .. } }`
    TaggedUnion(TaggedUnionDef),
    /// `enum Name { A, B }`
    Enum(EnumDef),
    /// `extern fn name(params): R;`
    ExternFn(FnDecl),
    /// `struct Name { fields }` (possibly generic)
    Struct(StructDef),
    /// `class fn Name(params) => { .. }` (possibly generic)
    ClassFn(FnDecl),
    /// `fn name(params): R => { .. }` (possibly generic)
    Fn(FnDecl),
    /// top-level `let`
    GlobalLet(LetStmt),
}

/// Import declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDecl {
    pub name: Spanned<String>,
}

/// Type alias declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeAliasDecl {
    pub name: Spanned<String>,
    pub target: Spanned<TypeExpr>,
}

/// Struct definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: Spanned<String>,
    /// Single generic type parameter, if any
    pub generic_param: Option<Spanned<String>>,
    pub fields: Vec<FieldDef>,
    pub span: Span,
}

/// Struct or variant field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
}

/// Plain enum definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: Spanned<String>,
    pub variants: Vec<Spanned<String>>,
    pub span: Span,
}

/// Tagged-union definition (`struct enum`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedUnionDef {
    pub name: Spanned<String>,
    pub variants: Vec<UnionVariant>,
    pub span: Span,
}

/// One variant of a tagged union
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionVariant {
    pub name: Spanned<String>,
    pub fields: Vec<FieldDef>,
}

/// Function declaration (plain, class, extern, or nested)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FnDecl {
    pub name: Spanned<String>,
    /// Single generic type parameter, if any
    pub generic_param: Option<Spanned<String>>,
    pub params: Vec<Param>,
    pub ret: Option<Spanned<TypeExpr>>,
    /// `None` for extern declarations
    pub body: Option<Vec<Spanned<Stmt>>>,
    pub span: Span,
}

/// Function parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
    pub bound: Option<Spanned<Bound>>,
}

/// Declared range bound: `I32 > 10`, `USize < arr.length`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub op: BoundOp,
    pub value: BoundValue,
}

/// Bound comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// Right-hand side of a declared bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundValue {
    Int(i128),
    /// `name.length` for a specific array binding
    Length(Spanned<String>),
}

/// Statement inside a function body (or a top-level `let`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// Nested block
    Block(Vec<Spanned<Stmt>>),
    If {
        cond: Spanned<Expr>,
        then_body: Vec<Spanned<Stmt>>,
        else_body: Option<Vec<Spanned<Stmt>>>,
    },
    While {
        cond: Spanned<Expr>,
        body: Vec<Spanned<Stmt>>,
    },
    Break,
    Continue,
    /// Nested function declaration
    Fn(FnDecl),
    Let(LetStmt),
    Assign {
        name: Spanned<String>,
        value: Spanned<Expr>,
    },
    /// Call statement; the expression is always `Expr::Call`
    Call(Spanned<Expr>),
    Return(Option<Spanned<Expr>>),
}

/// `let` statement (local or global)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetStmt {
    pub mutable: bool,
    pub name: Spanned<String>,
    pub ty: Option<Spanned<TypeExpr>>,
    pub bound: Option<Spanned<Bound>>,
    pub init: Option<Spanned<Expr>>,
    pub span: Span,
}
