//! Expression analysis
//!
//! Every expression yields its resolved type, the C text that evaluates
//! it, and, when it folds, its compile-time constant. Variables never
//! fold: what is known about a variable flows through its declared bound
//! and branch narrowing instead (see `bounds`).

use std::collections::HashMap;

use crate::ast::{BinOp, Expr, Span, Spanned, TypeExpr, UnOp};
use crate::bounds::Interval;
use crate::error::{CompileError, Result};
use crate::types::{NumericKind, Type};

use super::{Analyzer, CapturedEnv, FnCtx, FnJob, STACK_GROW_SIZE, STACK_RED_ZONE};

/// What analysis learned about one expression
#[derive(Debug, Clone)]
pub(super) struct ExprInfo {
    pub ty: Type,
    /// Compile-time constant, when the expression folds to one
    pub value: Option<i128>,
    /// C text that evaluates the expression
    pub text: String,
}

/// Binding strength, for deciding which rendered operands need parens
fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 1,
        BinOp::Add | BinOp::Sub => 2,
        BinOp::Mul | BinOp::Div => 3,
    }
}

/// Constant folding. Anything that cannot produce a value at compile time
/// (division by zero, overflow) simply stops folding; division truncates
/// toward zero like the C it compiles to.
pub(super) fn fold(op: BinOp, lhs: Option<i128>, rhs: Option<i128>) -> Option<i128> {
    let (lhs, rhs) = (lhs?, rhs?);
    match op {
        BinOp::Add => lhs.checked_add(rhs),
        BinOp::Sub => lhs.checked_sub(rhs),
        BinOp::Mul => lhs.checked_mul(rhs),
        BinOp::Div => lhs.checked_div(rhs),
        _ => None,
    }
}

fn wrap_left(op: BinOp, operand: &Spanned<Expr>, text: String) -> String {
    match &operand.node {
        Expr::Binary { op: child, .. } if precedence(*child) < precedence(op) => {
            format!("({text})")
        }
        _ => text,
    }
}

fn wrap_right(op: BinOp, operand: &Spanned<Expr>, text: String) -> String {
    match &operand.node {
        Expr::Binary { op: child, .. } if precedence(*child) <= precedence(op) => {
            format!("({text})")
        }
        _ => text,
    }
}

impl Analyzer {
    pub(super) fn analyze_expr(
        &mut self,
        cx: &mut FnCtx,
        expr: &Spanned<Expr>,
    ) -> Result<ExprInfo> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.analyze_expr_inner(cx, expr)
        })
    }

    fn analyze_expr_inner(&mut self, cx: &mut FnCtx, expr: &Spanned<Expr>) -> Result<ExprInfo> {
        match &expr.node {
            Expr::IntLit(value) => Ok(ExprInfo {
                ty: Type::Numeric(NumericKind::I32),
                value: Some(*value),
                text: value.to_string(),
            }),
            Expr::BoolLit(value) => Ok(ExprInfo {
                ty: Type::Bool,
                value: None,
                text: if *value { "1" } else { "0" }.to_string(),
            }),
            Expr::Var(name) => {
                let binding = self.lookup(cx, name).ok_or_else(|| {
                    CompileError::name(format!("undefined variable: {name}"), expr.span)
                })?;
                let text = if binding.captured {
                    format!("this.{name}")
                } else {
                    name.clone()
                };
                Ok(ExprInfo {
                    ty: binding.ty,
                    value: None,
                    text,
                })
            }
            Expr::Unary { op, expr: operand } => self.analyze_unary(cx, *op, operand),
            Expr::Binary { left, op, right } => self.analyze_binary(cx, *op, left, right, expr.span),
            Expr::Call { callee, args } => self.analyze_call(cx, callee, args, expr.span),
            Expr::Field { expr: base, field } => self.analyze_field(cx, base, field, expr.span),
            Expr::Index { expr: base, index } => self.analyze_index(cx, base, index),
            Expr::StructLit { name, .. } => Err(CompileError::type_error(
                format!("struct literal '{}' is only allowed as an initializer", name.node),
                expr.span,
            )),
            Expr::ArrayLit(_) => Err(CompileError::type_error(
                "array literal is only allowed as an initializer",
                expr.span,
            )),
        }
    }

    fn analyze_unary(&mut self, cx: &mut FnCtx, op: UnOp, operand: &Spanned<Expr>) -> Result<ExprInfo> {
        let inner = self.analyze_expr(cx, operand)?;
        if !inner.ty.is_numeric() {
            return Err(CompileError::type_error(
                format!("unary '{op}' needs a numeric operand, found {}", inner.ty),
                operand.span,
            ));
        }
        let value = match (op, inner.value) {
            (UnOp::Neg, Some(value)) => value.checked_neg(),
            (UnOp::Plus, Some(value)) => Some(value),
            _ => None,
        };
        let operand_text = match &operand.node {
            Expr::Binary { .. } | Expr::Unary { .. } => format!("({})", inner.text),
            _ => inner.text,
        };
        let text = match op {
            UnOp::Neg => format!("-{operand_text}"),
            UnOp::Plus => operand_text,
        };
        Ok(ExprInfo {
            ty: inner.ty,
            value,
            text,
        })
    }

    fn analyze_binary(
        &mut self,
        cx: &mut FnCtx,
        op: BinOp,
        left: &Spanned<Expr>,
        right: &Spanned<Expr>,
        span: Span,
    ) -> Result<ExprInfo> {
        let lhs = self.analyze_expr(cx, left)?;
        let rhs = self.analyze_expr(cx, right)?;
        let ty = binary_type(op, &lhs, &rhs, span)?;
        let value = if op.is_comparison() {
            None
        } else {
            fold(op, lhs.value, rhs.value)
        };
        let left_text = wrap_left(op, left, lhs.text);
        let right_text = wrap_right(op, right, rhs.text);
        Ok(ExprInfo {
            ty,
            value,
            text: format!("{left_text} {op} {right_text}"),
        })
    }

    fn analyze_field(
        &mut self,
        cx: &mut FnCtx,
        base: &Spanned<Expr>,
        field: &Spanned<String>,
        span: Span,
    ) -> Result<ExprInfo> {
        if let Expr::StructLit { name, values } = &base.node {
            return self.analyze_literal_projection(cx, name, values, base.span, field);
        }
        let info = self.analyze_expr(cx, base)?;
        let Type::Struct(struct_name) = &info.ty else {
            return Err(CompileError::type_error(
                format!("{} has no fields", info.ty),
                span,
            ));
        };
        let struct_info = self.resolver.struct_info(struct_name, span, &mut self.out)?;
        let field_ty = struct_info
            .field(&field.node)
            .ok_or_else(|| {
                CompileError::type_error(
                    format!("struct '{struct_name}' has no field '{}'", field.node),
                    field.span,
                )
            })?
            .clone();
        Ok(ExprInfo {
            ty: field_ty,
            value: None,
            text: format!("{}.{}", info.text, field.node),
        })
    }

    /// `(Point {3, 4}).x` never reaches the output: the projection picks
    /// the value for the named field straight out of the literal.
    fn analyze_literal_projection(
        &mut self,
        cx: &mut FnCtx,
        name: &Spanned<String>,
        values: &[Spanned<Expr>],
        lit_span: Span,
        field: &Spanned<String>,
    ) -> Result<ExprInfo> {
        let struct_info = self.resolver.struct_info(&name.node, name.span, &mut self.out)?;
        if struct_info.fields.len() != values.len() {
            return Err(CompileError::type_error(
                format!(
                    "struct '{}' has {} fields, the literal provides {}",
                    name.node,
                    struct_info.fields.len(),
                    values.len()
                ),
                lit_span,
            ));
        }
        let mut picked = None;
        for ((field_name, field_ty), value) in struct_info.fields.iter().zip(values) {
            let info = self.analyze_expr(cx, value)?;
            if info.value.is_none() && !matches!(value.node, Expr::BoolLit(_)) {
                return Err(CompileError::type_error(
                    "struct literal fields must be literal values",
                    value.span,
                ));
            }
            self.check_assignable(field_ty, &info, value.span)?;
            if field_name == &field.node {
                picked = Some(ExprInfo {
                    ty: field_ty.clone(),
                    value: info.value,
                    text: info.text,
                });
            }
        }
        picked.ok_or_else(|| {
            CompileError::type_error(
                format!("struct '{}' has no field '{}'", name.node, field.node),
                field.span,
            )
        })
    }

    fn analyze_index(
        &mut self,
        cx: &mut FnCtx,
        base: &Spanned<Expr>,
        index: &Spanned<Expr>,
    ) -> Result<ExprInfo> {
        let Expr::Var(array_name) = &base.node else {
            return Err(CompileError::type_error(
                "only named arrays can be indexed",
                base.span,
            ));
        };
        let binding = self.lookup(cx, array_name).ok_or_else(|| {
            CompileError::name(format!("undefined variable: {array_name}"), base.span)
        })?;
        let Type::Array { elem, len } = &binding.ty else {
            return Err(CompileError::type_error(
                format!("'{array_name}' is not an array"),
                base.span,
            ));
        };
        let info = self.analyze_expr(cx, index)?;
        if !info.ty.is_numeric() {
            return Err(CompileError::type_error(
                format!("array index must be numeric, found {}", info.ty),
                index.span,
            ));
        }
        self.check_index(cx, array_name, *len, index, &info)?;
        Ok(ExprInfo {
            ty: (**elem).clone(),
            value: None,
            text: format!("{array_name}[{}]", info.text),
        })
    }

    /// Indexing is accepted only when it provably stays inside the array:
    /// a constant within `0..len`, or a variable whose declared bound is
    /// exactly `< name.length` for this very array.
    fn check_index(
        &self,
        cx: &FnCtx,
        array_name: &str,
        len: u64,
        index: &Spanned<Expr>,
        info: &ExprInfo,
    ) -> Result<()> {
        if let Some(value) = info.value {
            if value >= 0 && (value as u128) < u128::from(len) {
                return Ok(());
            }
            return Err(CompileError::bounds(
                format!("index {value} is out of bounds for '{array_name}' (length {len})"),
                index.span,
            ));
        }
        if let Expr::Var(index_name) = &index.node {
            if let Some(binding) = self.lookup(cx, index_name) {
                if let Some(bound) = &binding.bound {
                    if bound.length_of.as_deref() == Some(array_name) {
                        return Ok(());
                    }
                }
            }
            return Err(CompileError::bounds(
                format!("cannot prove '{index_name}' stays inside '{array_name}'"),
                index.span,
            ));
        }
        Err(CompileError::bounds(
            format!("cannot prove the index stays inside '{array_name}'"),
            index.span,
        ))
    }

    fn analyze_call(
        &mut self,
        cx: &mut FnCtx,
        callee: &Spanned<String>,
        args: &[Spanned<Expr>],
        span: Span,
    ) -> Result<ExprInfo> {
        let mut infos = Vec::with_capacity(args.len());
        for arg in args {
            infos.push(self.analyze_expr(cx, arg)?);
        }

        let name = callee.node.as_str();
        let (target, through_env) = if let Some(lifted) = cx.nested.get(name) {
            (lifted.clone(), true)
        } else if let Some(lifted) = cx.siblings.get(name) {
            (lifted.clone(), true)
        } else if self.fns.is_registered(name) {
            if self.fns.takes_env(name) {
                return Err(CompileError::name(
                    format!("unknown function: {name}"),
                    callee.span,
                ));
            }
            (name.to_string(), false)
        } else if self.fns.is_template(name) {
            (self.monomorphize_fn(name, args, &infos, span)?, false)
        } else if self.resolver.is_template(name) {
            (self.monomorphize_class(name, args, &infos, span)?, false)
        } else {
            return Err(CompileError::name(
                format!("unknown function: {name}"),
                callee.span,
            ));
        };

        let sig = self.resolve_signature(&target, callee.span)?;
        if sig.params.len() != args.len() {
            return Err(CompileError::type_error(
                format!(
                    "'{name}' takes {} arguments, {} given",
                    sig.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        for ((param, arg), info) in sig.params.iter().zip(args).zip(&infos) {
            self.check_assignable(&param.ty, info, arg.span)?;
            if let Some(bound) = &param.bound {
                self.prove_interval(cx, &bound.interval, arg, info)?;
            }
        }

        let text = if through_env {
            cx.used_this = true;
            let mut call = format!("{target}(this");
            for info in &infos {
                call.push_str(", ");
                call.push_str(&info.text);
            }
            call.push(')');
            call
        } else {
            let rendered: Vec<&str> = infos.iter().map(|info| info.text.as_str()).collect();
            format!("{target}({})", rendered.join(", "))
        };
        Ok(ExprInfo {
            ty: sig.ret,
            value: None,
            text,
        })
    }

    /// Instantiate a generic function for the argument matching its
    /// placeholder-typed parameter, memoized per tag. The instance is
    /// analyzed right here, which places it before its first caller.
    fn monomorphize_fn(
        &mut self,
        name: &str,
        args: &[Spanned<Expr>],
        infos: &[ExprInfo],
        span: Span,
    ) -> Result<String> {
        let template = match self.fns.template(name) {
            Some(decl) => decl.clone(),
            None => {
                return Err(CompileError::name(format!("unknown function: {name}"), span));
            }
        };
        let Some(placeholder) = template.generic_param.clone() else {
            return Err(CompileError::type_error(
                format!("'{name}' is not generic"),
                span,
            ));
        };
        if template.params.len() != args.len() {
            return Err(CompileError::type_error(
                format!(
                    "'{name}' takes {} arguments, {} given",
                    template.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        let position = placeholder_position(&template.params, &placeholder.node).ok_or_else(|| {
            CompileError::type_error(
                format!("cannot infer the type argument of '{name}'"),
                span,
            )
        })?;
        let arg_ty = infos[position].ty.clone();
        let tag = arg_ty.generic_tag().ok_or_else(|| {
            CompileError::type_error(
                format!("'{arg_ty}' cannot be used as a generic argument"),
                args[position].span,
            )
        })?;

        let key = (name.to_string(), tag.clone());
        if let Some(existing) = self.fns.memo.get(&key) {
            return Ok(existing.clone());
        }
        let concrete = format!("{name}_{tag}");
        let subst = Some((placeholder.node, arg_ty));
        self.fns.register_instance(&concrete, &template, subst.clone())?;
        self.fns.memo.insert(key, concrete.clone());
        let job = FnJob {
            decl: &template,
            generated: concrete.clone(),
            env_param: None,
            captured: CapturedEnv::default(),
            siblings: HashMap::new(),
            subst,
            ctor_of: None,
        };
        self.analyze_fn(job)?;
        Ok(concrete)
    }

    /// A constructor call on a class template instantiates the class for
    /// the inferred argument, then targets the concrete constructor.
    fn monomorphize_class(
        &mut self,
        name: &str,
        args: &[Spanned<Expr>],
        infos: &[ExprInfo],
        span: Span,
    ) -> Result<String> {
        let Some(template) = self.resolver.template(name) else {
            return Err(CompileError::name(format!("unknown function: {name}"), span));
        };
        let Some(decl) = template.class_decl.clone() else {
            return Err(CompileError::type_error(
                format!("'{name}' is a type, not a function"),
                span,
            ));
        };
        let Some(placeholder) = decl.generic_param.clone() else {
            return Err(CompileError::type_error(
                format!("'{name}' is not generic"),
                span,
            ));
        };
        if decl.params.len() != args.len() {
            return Err(CompileError::type_error(
                format!(
                    "'{name}' takes {} arguments, {} given",
                    decl.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        let position = placeholder_position(&decl.params, &placeholder.node).ok_or_else(|| {
            CompileError::type_error(
                format!("cannot infer the type argument of '{name}'"),
                span,
            )
        })?;
        let arg_ty = infos[position].ty.clone();
        let instance = self.resolver.instantiate(name, arg_ty, span, &mut self.out)?;
        self.drain_pending_classes()?;
        match instance {
            Type::Struct(concrete) => Ok(concrete),
            other => Err(CompileError::type_error(
                format!("'{other}' is not a class"),
                span,
            )),
        }
    }

    pub(super) fn check_assignable(
        &self,
        expected: &Type,
        info: &ExprInfo,
        span: Span,
    ) -> Result<()> {
        if *expected == info.ty {
            return Ok(());
        }
        // untyped constants adopt the expected numeric kind
        if expected.is_numeric() && info.ty.is_numeric() && info.value.is_some() {
            return Ok(());
        }
        Err(CompileError::type_error(
            format!("expected {expected}, found {}", info.ty),
            span,
        ))
    }

    /// A value satisfies a required interval when it is a constant inside
    /// it, or a variable whose declared bound and active narrowing
    /// together form a subset of it.
    pub(super) fn prove_interval(
        &self,
        cx: &FnCtx,
        required: &Interval,
        expr: &Spanned<Expr>,
        info: &ExprInfo,
    ) -> Result<()> {
        if let Some(value) = info.value {
            if required.contains(value) {
                return Ok(());
            }
            return Err(CompileError::bounds(
                format!("value {value} does not satisfy bound {required}"),
                expr.span,
            ));
        }
        if let Expr::Var(name) = &expr.node {
            if let Some(binding) = self.lookup(cx, name) {
                let mut known = match &binding.bound {
                    Some(bound) => bound.interval,
                    None => Interval::top(),
                };
                if let Some(narrowed) = cx.facts.numeric(name) {
                    known = known.intersect(narrowed);
                }
                if known.is_subset_of(required) {
                    return Ok(());
                }
                return Err(CompileError::bounds(
                    format!("cannot prove '{name}' satisfies bound {required}"),
                    expr.span,
                ));
            }
        }
        Err(CompileError::bounds(
            format!("cannot prove the value satisfies bound {required}"),
            expr.span,
        ))
    }
}

fn binary_type(op: BinOp, lhs: &ExprInfo, rhs: &ExprInfo, span: Span) -> Result<Type> {
    if lhs.ty == Type::Bool && rhs.ty == Type::Bool {
        return match op {
            BinOp::Eq | BinOp::Ne => Ok(Type::Bool),
            _ => Err(CompileError::type_error(
                format!("operator '{op}' does not apply to Bool"),
                span,
            )),
        };
    }
    let (Some(left_kind), Some(right_kind)) = (lhs.ty.numeric_kind(), rhs.ty.numeric_kind()) else {
        return Err(CompileError::type_error(
            format!(
                "operator '{op}' needs numeric operands, found {} and {}",
                lhs.ty, rhs.ty
            ),
            span,
        ));
    };
    let kind = if left_kind == right_kind {
        left_kind
    } else if lhs.value.is_some() {
        right_kind
    } else if rhs.value.is_some() {
        left_kind
    } else {
        return Err(CompileError::type_error(
            format!("mismatched operand types: {} and {}", lhs.ty, rhs.ty),
            span,
        ));
    };
    if op.is_comparison() {
        Ok(Type::Bool)
    } else {
        Ok(Type::Numeric(kind))
    }
}

fn placeholder_position(params: &[crate::ast::Param], placeholder: &str) -> Option<usize> {
    params.iter().position(|param| {
        matches!(
            &param.ty.node,
            TypeExpr::Named { name, generic_arg: None } if name == placeholder
        )
    })
}
