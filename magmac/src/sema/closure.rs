//! Free-name analysis for nested functions
//!
//! A function whose body declares nested functions carries an environment
//! struct. Which outer bindings land in it is decided up front: every
//! nested body is scanned for names it does not bind itself, and the outer
//! body then assigns a field to each matching binding as it declares it,
//! so field order follows outer declaration order.

use std::collections::HashSet;

use crate::ast::{Expr, FnDecl, Spanned, Stmt};
use crate::bounds::BoundInfo;
use crate::types::Type;

/// One captured binding, as both a struct field and a lookup entry
#[derive(Debug, Clone)]
pub(super) struct EnvField {
    pub name: String,
    pub ty: Type,
    pub bound: Option<BoundInfo>,
    pub mutable: bool,
}

/// Snapshot of the enclosing environment visible to one nested body.
/// Taken at the nested function's statement position, so outer bindings
/// declared later are not visible inside it.
#[derive(Debug, Clone, Default)]
pub(super) struct CapturedEnv {
    pub fields: Vec<EnvField>,
}

impl CapturedEnv {
    pub fn get(&self, name: &str) -> Option<&EnvField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Environment under construction for the function currently analyzed
#[derive(Debug)]
pub(super) struct EnvBuild {
    pub struct_name: String,
    /// Slot of the placeholder pushed into the struct stream; `None` for
    /// classes, whose struct is complete as soon as it materializes
    pub placeholder: Option<usize>,
    pub fields: Vec<EnvField>,
    pub capture_names: HashSet<String>,
    pub is_class: bool,
}

/// Nested function declarations of one body, in source order. Does not
/// descend into deeper function bodies; those belong to their own outer.
pub(super) fn nested_decls(stmts: &[Spanned<Stmt>]) -> Vec<&FnDecl> {
    let mut decls = Vec::new();
    collect_decls(stmts, &mut decls);
    decls
}

fn collect_decls<'a>(stmts: &'a [Spanned<Stmt>], decls: &mut Vec<&'a FnDecl>) {
    for stmt in stmts {
        match &stmt.node {
            Stmt::Fn(decl) => decls.push(decl),
            Stmt::Block(body) => collect_decls(body, decls),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_decls(then_body, decls);
                if let Some(body) = else_body {
                    collect_decls(body, decls);
                }
            }
            Stmt::While { body, .. } => collect_decls(body, decls),
            _ => {}
        }
    }
}

/// Names the nested bodies reference but do not bind themselves. An outer
/// binding matching one of these becomes an environment field.
pub(super) fn capture_names(decls: &[&FnDecl]) -> HashSet<String> {
    let mut names = HashSet::new();
    for decl in decls {
        names.extend(free_names(decl));
    }
    names
}

fn free_names(decl: &FnDecl) -> HashSet<String> {
    let mut refs = HashSet::new();
    let mut bound = HashSet::new();
    for param in &decl.params {
        bound.insert(param.name.node.clone());
    }
    if let Some(body) = &decl.body {
        walk_stmts(body, &mut refs, &mut bound);
    }
    refs.retain(|name| !bound.contains(name));
    refs
}

fn walk_stmts(stmts: &[Spanned<Stmt>], refs: &mut HashSet<String>, bound: &mut HashSet<String>) {
    for stmt in stmts {
        match &stmt.node {
            Stmt::Block(body) => walk_stmts(body, refs, bound),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                walk_expr(cond, refs);
                walk_stmts(then_body, refs, bound);
                if let Some(body) = else_body {
                    walk_stmts(body, refs, bound);
                }
            }
            Stmt::While { cond, body } => {
                walk_expr(cond, refs);
                walk_stmts(body, refs, bound);
            }
            Stmt::Break | Stmt::Continue => {}
            // a deeper body captures from its own outer, not from ours
            Stmt::Fn(decl) => {
                bound.insert(decl.name.node.clone());
            }
            Stmt::Let(stmt) => {
                if let Some(init) = &stmt.init {
                    walk_expr(init, refs);
                }
                bound.insert(stmt.name.node.clone());
            }
            Stmt::Assign { name, value } => {
                refs.insert(name.node.clone());
                walk_expr(value, refs);
            }
            Stmt::Call(expr) => walk_expr(expr, refs),
            Stmt::Return(value) => {
                if let Some(expr) = value {
                    walk_expr(expr, refs);
                }
            }
        }
    }
}

fn walk_expr(expr: &Spanned<Expr>, refs: &mut HashSet<String>) {
    match &expr.node {
        Expr::IntLit(_) | Expr::BoolLit(_) => {}
        Expr::Var(name) => {
            refs.insert(name.clone());
        }
        Expr::Binary { left, right, .. } => {
            walk_expr(left, refs);
            walk_expr(right, refs);
        }
        Expr::Unary { expr, .. } => walk_expr(expr, refs),
        // the callee is a function name, not a variable reference
        Expr::Call { args, .. } => {
            for arg in args {
                walk_expr(arg, refs);
            }
        }
        Expr::Field { expr, .. } => walk_expr(expr, refs),
        Expr::Index { expr, index } => {
            walk_expr(expr, refs);
            walk_expr(index, refs);
        }
        Expr::StructLit { values, .. } => {
            for value in values {
                walk_expr(value, refs);
            }
        }
        Expr::ArrayLit(elems) => {
            for elem in elems {
                walk_expr(elem, refs);
            }
        }
    }
}
