//! Type AST nodes

use super::Spanned;
use serde::{Deserialize, Serialize};

/// A type as written in source, before resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    /// Named type, optionally with one generic argument: `I32`, `Point`, `Wrapper<I32>`
    Named {
        name: String,
        generic_arg: Option<Box<Spanned<TypeExpr>>>,
    },
    /// Pointer type: `*T`
    Pointer(Box<Spanned<TypeExpr>>),
    /// Fixed-size array type: `[T; n]`
    Array {
        elem: Box<Spanned<TypeExpr>>,
        len: u64,
    },
    /// Function type: `(T1, T2) => R`
    Function {
        params: Vec<Spanned<TypeExpr>>,
        ret: Box<Spanned<TypeExpr>>,
    },
}

impl std::fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeExpr::Named { name, generic_arg } => match generic_arg {
                Some(arg) => write!(f, "{}<{}>", name, arg.node),
                None => write!(f, "{name}"),
            },
            TypeExpr::Pointer(inner) => write!(f, "*{}", inner.node),
            TypeExpr::Array { elem, len } => write!(f, "[{}; {}]", elem.node, len),
            TypeExpr::Function { params, ret } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p.node)?;
                }
                write!(f, ") => {}", ret.node)
            }
        }
    }
}
