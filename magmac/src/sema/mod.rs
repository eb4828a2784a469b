//! Semantic analysis and lowering
//!
//! A registration pass makes every top-level name visible first, so items
//! may reference items declared later. One declaration-order pass then
//! checks and lowers each item in the same step: analysis appends straight
//! to the `cgen` streams, which is what fixes struct order at first
//! materialization and function order at post-order completion.

mod closure;
mod expr;

use std::collections::{HashMap, HashSet};

use crate::ast::{
    BinOp, Bound, BoundOp, BoundValue, Expr, FnDecl, Item, LetStmt, Program, Span, Spanned, Stmt,
    TypeExpr, UnOp,
};
use crate::bounds::{BoundInfo, Facts, Interval};
use crate::cgen::{CFunction, CProgram};
use crate::error::{CompileError, Result};
use crate::types::{Type, TypeResolver};

use closure::{CapturedEnv, EnvBuild, EnvField};
use expr::fold;

// 128KB remaining triggers growth
const STACK_RED_ZONE: usize = 128 * 1024;
// Grow by 4MB each time
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// A named value in scope
#[derive(Debug, Clone)]
struct Binding {
    ty: Type,
    mutable: bool,
    bound: Option<BoundInfo>,
    /// Captured bindings live in the environment and render as `this.<name>`
    captured: bool,
}

/// Resolved parameter of a callable signature
#[derive(Debug, Clone)]
struct ParamSig {
    name: String,
    ty: Type,
    bound: Option<BoundInfo>,
}

/// Resolved callable signature. The environment parameter of lifted
/// functions is implicit and not listed here.
#[derive(Debug, Clone)]
struct FnSig {
    params: Vec<ParamSig>,
    ret: Type,
    /// Explicitly annotated, or already back-filled from the first return
    ret_frozen: bool,
}

/// One registered callable plus its lazily resolved signature
#[derive(Debug, Clone)]
struct FnInfo {
    decl: FnDecl,
    /// Environment struct taken as an implicit first parameter
    env_param: Option<String>,
    /// Generic placeholder substitution active inside this callable
    subst: Option<(String, Type)>,
    /// Constructors return their class struct no matter what the
    /// declaration says
    ctor_of: Option<String>,
    sig: Option<FnSig>,
}

/// Callable registry: concrete functions plus generic templates with
/// their instantiation memo
#[derive(Debug, Default)]
struct FnTable {
    infos: HashMap<String, FnInfo>,
    templates: HashMap<String, FnDecl>,
    /// (template name, argument tag) -> concrete function name
    memo: HashMap<(String, String), String>,
}

impl FnTable {
    /// Function registrations are write-once, like type registrations
    fn check_free(&self, name: &str, span: Span) -> Result<()> {
        if self.infos.contains_key(name) || self.templates.contains_key(name) {
            return Err(CompileError::duplicate(
                format!("function '{name}' is already defined"),
                span,
            ));
        }
        Ok(())
    }

    fn register_plain(&mut self, decl: &FnDecl) -> Result<()> {
        self.check_free(&decl.name.node, decl.name.span)?;
        self.infos.insert(
            decl.name.node.clone(),
            FnInfo {
                decl: decl.clone(),
                env_param: None,
                subst: None,
                ctor_of: None,
                sig: None,
            },
        );
        Ok(())
    }

    fn register_template(&mut self, decl: &FnDecl) -> Result<()> {
        self.check_free(&decl.name.node, decl.name.span)?;
        self.templates.insert(decl.name.node.clone(), decl.clone());
        Ok(())
    }

    fn register_ctor(
        &mut self,
        name: &str,
        decl: &FnDecl,
        subst: Option<(String, Type)>,
    ) -> Result<()> {
        self.check_free(name, decl.name.span)?;
        self.infos.insert(
            name.to_string(),
            FnInfo {
                decl: decl.clone(),
                env_param: None,
                subst,
                ctor_of: Some(name.to_string()),
                sig: None,
            },
        );
        Ok(())
    }

    fn register_lifted(
        &mut self,
        lifted: &str,
        decl: &FnDecl,
        env: &str,
        subst: Option<(String, Type)>,
    ) -> Result<()> {
        self.check_free(lifted, decl.name.span)?;
        self.infos.insert(
            lifted.to_string(),
            FnInfo {
                decl: decl.clone(),
                env_param: Some(env.to_string()),
                subst,
                ctor_of: None,
                sig: None,
            },
        );
        Ok(())
    }

    fn register_instance(
        &mut self,
        name: &str,
        decl: &FnDecl,
        subst: Option<(String, Type)>,
    ) -> Result<()> {
        self.check_free(name, decl.name.span)?;
        self.infos.insert(
            name.to_string(),
            FnInfo {
                decl: decl.clone(),
                env_param: None,
                subst,
                ctor_of: None,
                sig: None,
            },
        );
        Ok(())
    }

    fn is_registered(&self, name: &str) -> bool {
        self.infos.contains_key(name)
    }

    /// Lifted bodies take the environment as a hidden first argument, so
    /// their mangled names are not callable as plain functions.
    fn takes_env(&self, name: &str) -> bool {
        self.infos
            .get(name)
            .is_some_and(|info| info.env_param.is_some())
    }

    fn is_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    fn template(&self, name: &str) -> Option<&FnDecl> {
        self.templates.get(name)
    }
}

/// Per-function analysis state
struct FnCtx {
    /// Name the function is emitted under (lifted names for nested ones)
    generated: String,
    scopes: Vec<HashMap<String, Binding>>,
    facts: Facts,
    ret: Type,
    ret_frozen: bool,
    subst: Option<(String, Type)>,
    /// Environment under construction, when the body declares nested
    /// functions (always present for constructors)
    env: Option<EnvBuild>,
    /// Environment of the enclosing function, when this is a lifted body
    captured: CapturedEnv,
    /// Own nested functions: short name -> lifted name
    nested: HashMap<String, String>,
    /// Registry this function was declared in, for self and sibling calls
    siblings: HashMap<String, String>,
    used_this: bool,
    lines: Vec<String>,
    indent: usize,
    ctor_of: Option<String>,
}

impl FnCtx {
    /// Context for global initializers; lines come out unindented
    fn top_level() -> Self {
        FnCtx {
            generated: String::new(),
            scopes: vec![HashMap::new()],
            facts: Facts::new(),
            ret: Type::Void,
            ret_frozen: true,
            subst: None,
            env: None,
            captured: CapturedEnv::default(),
            nested: HashMap::new(),
            siblings: HashMap::new(),
            used_this: false,
            lines: Vec::new(),
            indent: 0,
            ctor_of: None,
        }
    }

    fn push_line(&mut self, line: String) {
        self.lines.push(format!("{}{line}", "    ".repeat(self.indent)));
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }
}

/// Everything needed to analyze one function body
struct FnJob<'a> {
    decl: &'a FnDecl,
    generated: String,
    env_param: Option<String>,
    captured: CapturedEnv,
    siblings: HashMap<String, String>,
    subst: Option<(String, Type)>,
    ctor_of: Option<String>,
}

/// Route a freshly declared binding into the environment when the nested
/// bodies reference it. Only scalars may cross into an environment.
fn capture_binding(
    cx: &mut FnCtx,
    name: &str,
    ty: &Type,
    bound: &Option<BoundInfo>,
    mutable: bool,
    span: Span,
) -> Result<bool> {
    let Some(env) = &mut cx.env else {
        return Ok(false);
    };
    if env.is_class || !env.capture_names.contains(name) {
        return Ok(false);
    }
    if !ty.is_scalar() {
        return Err(CompileError::type_error(
            format!("'{name}' cannot be captured by a nested function"),
            span,
        ));
    }
    match env.fields.iter().find(|field| field.name == name) {
        Some(field) if field.ty == *ty => {}
        Some(_) => {
            return Err(CompileError::type_error(
                format!("'{name}' is captured with two different types"),
                span,
            ));
        }
        None => env.fields.push(EnvField {
            name: name.to_string(),
            ty: ty.clone(),
            bound: bound.clone(),
            mutable,
        }),
    }
    Ok(true)
}

fn bind_let(cx: &mut FnCtx, stmt: &LetStmt, ty: Type, bound: Option<BoundInfo>, captured: bool) {
    cx.facts.invalidate(&stmt.name.node);
    cx.bind(
        &stmt.name.node,
        Binding {
            ty,
            mutable: stmt.mutable,
            bound,
            captured,
        },
    );
}

/// Pure fold for narrowing shapes. Unlike full expression analysis this
/// has no side effects and quietly gives up on anything not constant.
fn fold_const(expr: &Spanned<Expr>) -> Option<i128> {
    match &expr.node {
        Expr::IntLit(value) => Some(*value),
        Expr::Unary { op, expr } => {
            let value = fold_const(expr)?;
            match op {
                UnOp::Neg => value.checked_neg(),
                UnOp::Plus => Some(value),
            }
        }
        Expr::Binary { left, op, right } => fold(*op, fold_const(left), fold_const(right)),
        _ => None,
    }
}

/// Drives the whole analysis for one program
pub struct Analyzer {
    resolver: TypeResolver,
    fns: FnTable,
    globals: HashMap<String, Binding>,
    out: CProgram,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            resolver: TypeResolver::new(),
            fns: FnTable::default(),
            globals: HashMap::new(),
            out: CProgram::new(),
        }
    }

    /// Check the whole program and produce its C text
    pub fn run(mut self, program: &Program) -> Result<String> {
        self.register_items(program)?;
        for item in &program.items {
            self.lower_item(item)?;
        }
        self.out
            .render()
            .map_err(|_| CompileError::type_error("failed to render output", Span::new(0, 0)))
    }

    fn register_items(&mut self, program: &Program) -> Result<()> {
        for item in &program.items {
            match &item.node {
                Item::Import(_) | Item::GlobalLet(_) => {}
                Item::TypeAlias(decl) => {
                    self.resolver.register_alias(&decl.name, decl.target.clone())?;
                }
                Item::TaggedUnion(def) => self.resolver.register_union(def)?,
                Item::Enum(def) => self.resolver.register_enum(
                    &def.name,
                    def.variants.iter().map(|v| v.node.clone()).collect(),
                )?,
                Item::Struct(def) => self.resolver.register_struct(def)?,
                Item::ExternFn(decl) => self.fns.register_plain(decl)?,
                Item::ClassFn(decl) => {
                    self.resolver.register_class(decl)?;
                    if decl.generic_param.is_none() {
                        self.fns.register_ctor(&decl.name.node, decl, None)?;
                    }
                }
                Item::Fn(decl) => {
                    if decl.generic_param.is_some() {
                        self.fns.register_template(decl)?;
                    } else {
                        self.fns.register_plain(decl)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn lower_item(&mut self, item: &Spanned<Item>) -> Result<()> {
        match &item.node {
            Item::TypeAlias(_) | Item::ExternFn(_) => {}
            Item::Import(decl) => self.out.push_include(&decl.name.node),
            Item::TaggedUnion(def) => {
                self.resolver
                    .materialize_union(&def.name.node, def.name.span, &mut self.out)?;
            }
            Item::Enum(def) => {
                self.out.push_enum(
                    &def.name.node,
                    def.variants.iter().map(|v| v.node.clone()).collect(),
                );
            }
            Item::Struct(def) => {
                // generic structs materialize per instance, on first use
                if def.generic_param.is_none() {
                    self.resolver
                        .materialize_struct(&def.name.node, def.name.span, &mut self.out)?;
                }
            }
            Item::ClassFn(decl) => {
                if decl.generic_param.is_none() {
                    self.analyze_class(decl, decl.name.node.clone(), None)?;
                }
            }
            Item::Fn(decl) => {
                if decl.generic_param.is_none() {
                    let job = FnJob {
                        decl,
                        generated: decl.name.node.clone(),
                        env_param: None,
                        captured: CapturedEnv::default(),
                        siblings: HashMap::new(),
                        subst: None,
                        ctor_of: None,
                    };
                    self.analyze_fn(job)?;
                }
            }
            Item::GlobalLet(stmt) => self.analyze_global_let(stmt)?,
        }
        Ok(())
    }

    /// A class function's struct, constructor and methods all come from
    /// one declaration: the struct holds the parameters, the constructor
    /// fills them, and the nested functions become methods taking it.
    fn analyze_class(
        &mut self,
        decl: &FnDecl,
        concrete: String,
        subst: Option<(String, Type)>,
    ) -> Result<()> {
        // template instances were already materialized by the resolver
        if subst.is_none() {
            self.resolver
                .materialize_struct(&concrete, decl.name.span, &mut self.out)?;
        }
        let job = FnJob {
            decl,
            generated: concrete.clone(),
            env_param: None,
            captured: CapturedEnv::default(),
            siblings: HashMap::new(),
            subst,
            ctor_of: Some(concrete),
        };
        self.analyze_fn(job)
    }

    /// Class-template instantiation only creates the struct; constructor
    /// and methods are queued, and emitted here right after the resolve
    /// that created the instance.
    fn drain_pending_classes(&mut self) -> Result<()> {
        loop {
            let pending = self.resolver.take_pending_classes();
            if pending.is_empty() {
                return Ok(());
            }
            for class in pending {
                let subst = Some((class.param.clone(), class.arg.clone()));
                self.fns
                    .register_ctor(&class.concrete_name, &class.decl, subst.clone())?;
                self.analyze_class(&class.decl, class.concrete_name, subst)?;
            }
        }
    }

    fn resolve_ty(&mut self, cx: &FnCtx, ty: &Spanned<TypeExpr>) -> Result<Type> {
        self.resolve_decl_ty(ty, cx.subst.as_ref())
    }

    /// Resolve a surface type and flush any class instantiation it caused
    fn resolve_decl_ty(
        &mut self,
        ty: &Spanned<TypeExpr>,
        subst: Option<&(String, Type)>,
    ) -> Result<Type> {
        let resolved = match subst {
            Some((param, concrete)) => {
                self.resolver
                    .resolve_with(ty, Some((param.as_str(), concrete)), &mut self.out)?
            }
            None => self.resolver.resolve(ty, &mut self.out)?,
        };
        self.drain_pending_classes()?;
        Ok(resolved)
    }

    /// Resolve and memoize a callable's signature on first use
    fn resolve_signature(&mut self, name: &str, span: Span) -> Result<FnSig> {
        let info = match self.fns.infos.get(name) {
            Some(info) => {
                if let Some(sig) = &info.sig {
                    return Ok(sig.clone());
                }
                info.clone()
            }
            None => {
                return Err(CompileError::name(format!("unknown function: {name}"), span));
            }
        };
        let mut seen = HashSet::new();
        let mut params = Vec::with_capacity(info.decl.params.len());
        for param in &info.decl.params {
            if !seen.insert(param.name.node.clone()) {
                return Err(CompileError::duplicate(
                    format!("parameter '{}' is already defined", param.name.node),
                    param.name.span,
                ));
            }
            let ty = self.resolve_decl_ty(&param.ty, info.subst.as_ref())?;
            if ty == Type::Void {
                return Err(CompileError::type_error(
                    format!("parameter '{}' cannot be Void", param.name.node),
                    param.name.span,
                ));
            }
            let bound = match &param.bound {
                Some(bound) => Some(self.resolve_param_bound(bound, &info, &ty, &param.name)?),
                None => None,
            };
            params.push(ParamSig {
                name: param.name.node.clone(),
                ty,
                bound,
            });
        }
        let (ret, ret_frozen) = match (&info.ctor_of, &info.decl.ret) {
            (Some(class), _) => (Type::Struct(class.clone()), true),
            (None, Some(ty)) => {
                let resolved = self.resolve_decl_ty(ty, info.subst.as_ref())?;
                if matches!(resolved, Type::Array { .. }) {
                    return Err(CompileError::type_error(
                        "functions cannot return arrays",
                        ty.span,
                    ));
                }
                (resolved, true)
            }
            (None, None) => (Type::Void, false),
        };
        let sig = FnSig {
            params,
            ret,
            ret_frozen,
        };
        if let Some(slot) = self.fns.infos.get_mut(name) {
            slot.sig = Some(sig.clone());
        }
        Ok(sig)
    }

    /// Bounds on parameters: a literal comparison, or `< arr.length`
    /// against a sibling array parameter or a global array
    fn resolve_param_bound(
        &mut self,
        bound: &Spanned<Bound>,
        info: &FnInfo,
        ty: &Type,
        param_name: &Spanned<String>,
    ) -> Result<BoundInfo> {
        if !ty.is_numeric() {
            return Err(CompileError::type_error(
                format!("bound on non-numeric parameter '{}'", param_name.node),
                param_name.span,
            ));
        }
        match &bound.node.value {
            BoundValue::Int(value) => Ok(BoundInfo::plain(Interval::from_bound_op(
                bound.node.op,
                *value,
            ))),
            BoundValue::Length(array) => {
                if bound.node.op != BoundOp::Lt {
                    return Err(CompileError::type_error(
                        "length bounds only support '<'",
                        bound.span,
                    ));
                }
                let len = self.sibling_array_len(info, array)?;
                Ok(BoundInfo::length(
                    Interval::below(len as i128),
                    array.node.clone(),
                ))
            }
        }
    }

    fn sibling_array_len(&mut self, info: &FnInfo, array: &Spanned<String>) -> Result<u64> {
        for sibling in &info.decl.params {
            if sibling.name.node == array.node {
                let ty = self.resolve_decl_ty(&sibling.ty, info.subst.as_ref())?;
                return match ty {
                    Type::Array { len, .. } => Ok(len),
                    _ => Err(CompileError::type_error(
                        format!("'{}' is not an array", array.node),
                        array.span,
                    )),
                };
            }
        }
        match self.globals.get(&array.node) {
            Some(binding) => match &binding.ty {
                Type::Array { len, .. } => Ok(*len),
                _ => Err(CompileError::type_error(
                    format!("'{}' is not an array", array.node),
                    array.span,
                )),
            },
            None => Err(CompileError::name(
                format!("undefined variable: {}", array.node),
                array.span,
            )),
        }
    }

    /// Analyze one function declaration and push its C form. Nested
    /// declarations recurse through here, which is what makes emission
    /// post-order: a body completes only after the bodies it declares.
    fn analyze_fn(&mut self, job: FnJob<'_>) -> Result<()> {
        let FnJob {
            decl,
            generated,
            env_param,
            captured,
            siblings,
            subst,
            ctor_of,
        } = job;
        let sig = self.resolve_signature(&generated, decl.name.span)?;

        let mut cx = FnCtx {
            generated,
            scopes: vec![HashMap::new()],
            facts: Facts::new(),
            ret: sig.ret.clone(),
            ret_frozen: sig.ret_frozen,
            subst,
            env: None,
            captured,
            nested: HashMap::new(),
            siblings,
            used_this: false,
            lines: Vec::new(),
            indent: 1,
            ctor_of,
        };

        let body = decl.body.as_deref().unwrap_or(&[]);
        let nested = closure::nested_decls(body);
        if cx.ctor_of.is_some() || !nested.is_empty() {
            self.build_env(&mut cx, decl, &nested)?;
        }

        if let Some(env) = &env_param {
            cx.bind(
                "this",
                Binding {
                    ty: Type::Struct(env.clone()),
                    mutable: false,
                    bound: None,
                    captured: false,
                },
            );
        }

        let is_ctor = cx.ctor_of.is_some();
        for (param, ast_param) in sig.params.iter().zip(&decl.params) {
            let captured_here = capture_binding(
                &mut cx,
                &param.name,
                &param.ty,
                &param.bound,
                false,
                ast_param.name.span,
            )?;
            if captured_here || is_ctor {
                cx.push_line(format!("this.{0} = {0};", param.name));
            }
            cx.bind(
                &param.name,
                Binding {
                    ty: param.ty.clone(),
                    mutable: false,
                    bound: param.bound.clone(),
                    captured: captured_here,
                },
            );
        }

        self.analyze_stmts(&mut cx, body)?;

        if is_ctor {
            cx.push_line("return this;".to_string());
        }

        let this_decl = match &cx.env {
            Some(env) if is_ctor || cx.used_this || !env.fields.is_empty() => {
                Some(format!("    struct {} this;", env.struct_name))
            }
            _ => None,
        };
        if let Some(line) = this_decl {
            cx.lines.insert(0, line);
        }

        if let Some(env) = &cx.env {
            if let Some(index) = env.placeholder {
                let fields = env
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.ty.clone()))
                    .collect();
                self.resolver
                    .update_synthetic_struct(&env.struct_name, fields, index, &mut self.out);
            }
        }

        let mut params = Vec::with_capacity(sig.params.len() + 1);
        if let Some(env) = &env_param {
            params.push(format!("struct {env} this"));
        }
        for param in &sig.params {
            params.push(param.ty.declaration(&param.name));
        }
        self.out.push_function(CFunction {
            ret: cx.ret.c_type(),
            name: cx.generated,
            params,
            body: cx.lines,
        });
        Ok(())
    }

    fn build_env(&mut self, cx: &mut FnCtx, decl: &FnDecl, nested: &[&FnDecl]) -> Result<()> {
        let (struct_name, placeholder, fields, capture, is_class) = match &cx.ctor_of {
            Some(class) => {
                let info = self
                    .resolver
                    .struct_info(class, decl.name.span, &mut self.out)?;
                let fields = info
                    .fields
                    .iter()
                    .map(|(name, ty)| EnvField {
                        name: name.clone(),
                        ty: ty.clone(),
                        bound: None,
                        mutable: true,
                    })
                    .collect();
                (class.clone(), None, fields, HashSet::new(), true)
            }
            None => {
                let name = format!("{}_t", cx.generated);
                let index = self.resolver.register_synthetic_struct(
                    &name,
                    Vec::new(),
                    decl.span,
                    &mut self.out,
                )?;
                let capture = closure::capture_names(nested);
                (name, Some(index), Vec::new(), capture, false)
            }
        };
        for nested_decl in nested {
            let lifted = format!("{}_{}", nested_decl.name.node, cx.generated);
            self.fns
                .register_lifted(&lifted, nested_decl, &struct_name, cx.subst.clone())?;
            cx.nested.insert(nested_decl.name.node.clone(), lifted);
        }
        cx.env = Some(EnvBuild {
            struct_name,
            placeholder,
            fields,
            capture_names: capture,
            is_class,
        });
        Ok(())
    }

    fn analyze_stmts(&mut self, cx: &mut FnCtx, stmts: &[Spanned<Stmt>]) -> Result<()> {
        for stmt in stmts {
            self.analyze_stmt(cx, stmt)?;
        }
        Ok(())
    }

    fn analyze_stmt(&mut self, cx: &mut FnCtx, stmt: &Spanned<Stmt>) -> Result<()> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.analyze_stmt_inner(cx, stmt)
        })
    }

    fn analyze_stmt_inner(&mut self, cx: &mut FnCtx, stmt: &Spanned<Stmt>) -> Result<()> {
        match &stmt.node {
            Stmt::Block(body) => {
                cx.push_line("{".to_string());
                cx.indent += 1;
                cx.scopes.push(HashMap::new());
                self.analyze_stmts(cx, body)?;
                cx.scopes.pop();
                cx.indent -= 1;
                cx.push_line("}".to_string());
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.analyze_if(cx, cond, then_body, else_body.as_deref())?,
            Stmt::While { cond, body } => {
                let info = self.analyze_expr(cx, cond)?;
                if info.ty != Type::Bool {
                    return Err(CompileError::type_error(
                        format!("while condition must be Bool, found {}", info.ty),
                        cond.span,
                    ));
                }
                cx.push_line(format!("while ({}) {{", info.text));
                cx.indent += 1;
                cx.scopes.push(HashMap::new());
                self.analyze_stmts(cx, body)?;
                cx.scopes.pop();
                cx.indent -= 1;
                cx.push_line("}".to_string());
            }
            Stmt::Break => cx.push_line("break;".to_string()),
            Stmt::Continue => cx.push_line("continue;".to_string()),
            Stmt::Fn(decl) => self.analyze_nested_fn(cx, decl)?,
            Stmt::Let(let_stmt) => self.analyze_let(cx, let_stmt)?,
            Stmt::Assign { name, value } => self.analyze_assign(cx, name, value)?,
            Stmt::Call(expr) => {
                let info = self.analyze_expr(cx, expr)?;
                cx.push_line(format!("{};", info.text));
            }
            Stmt::Return(value) => self.analyze_return(cx, value.as_ref(), stmt.span)?,
        }
        Ok(())
    }

    /// The then-branch runs with facts narrowed by the condition; the
    /// else-branch runs with the facts from before the `if`. Conditions
    /// the lattice cannot express narrow nothing.
    fn analyze_if(
        &mut self,
        cx: &mut FnCtx,
        cond: &Spanned<Expr>,
        then_body: &[Spanned<Stmt>],
        else_body: Option<&[Spanned<Stmt>]>,
    ) -> Result<()> {
        let info = self.analyze_expr(cx, cond)?;
        if info.ty != Type::Bool {
            return Err(CompileError::type_error(
                format!("if condition must be Bool, found {}", info.ty),
                cond.span,
            ));
        }
        let saved = cx.facts.clone();
        apply_narrowing(cx, cond)?;

        cx.push_line(format!("if ({}) {{", info.text));
        cx.indent += 1;
        cx.scopes.push(HashMap::new());
        self.analyze_stmts(cx, then_body)?;
        cx.scopes.pop();
        cx.indent -= 1;
        cx.push_line("}".to_string());

        cx.facts = saved;
        if let Some(body) = else_body {
            cx.push_line("else {".to_string());
            cx.indent += 1;
            cx.scopes.push(HashMap::new());
            self.analyze_stmts(cx, body)?;
            cx.scopes.pop();
            cx.indent -= 1;
            cx.push_line("}".to_string());
        }
        Ok(())
    }

    fn analyze_nested_fn(&mut self, cx: &mut FnCtx, decl: &FnDecl) -> Result<()> {
        if decl.generic_param.is_some() {
            return Err(CompileError::type_error(
                "nested functions cannot be generic",
                decl.name.span,
            ));
        }
        let Some(env) = &cx.env else {
            return Err(CompileError::name(
                format!("'{}' cannot be declared here", decl.name.node),
                decl.name.span,
            ));
        };
        let Some(lifted) = cx.nested.get(&decl.name.node).cloned() else {
            return Err(CompileError::name(
                format!("'{}' cannot be declared here", decl.name.node),
                decl.name.span,
            ));
        };
        let job = FnJob {
            decl,
            generated: lifted,
            env_param: Some(env.struct_name.clone()),
            captured: CapturedEnv {
                fields: env.fields.clone(),
            },
            siblings: cx.nested.clone(),
            subst: cx.subst.clone(),
            ctor_of: None,
        };
        self.analyze_fn(job)
    }

    fn analyze_return(
        &mut self,
        cx: &mut FnCtx,
        value: Option<&Spanned<Expr>>,
        span: Span,
    ) -> Result<()> {
        match value {
            Some(expr) => {
                let info = self.analyze_expr(cx, expr)?;
                if cx.ret_frozen {
                    self.check_assignable(&cx.ret, &info, expr.span)?;
                } else {
                    if matches!(info.ty, Type::Array { .. }) {
                        return Err(CompileError::type_error(
                            "functions cannot return arrays",
                            expr.span,
                        ));
                    }
                    // the first return fixes an unannotated return type
                    cx.ret = info.ty.clone();
                    cx.ret_frozen = true;
                    self.freeze_return(&cx.generated, &cx.ret);
                }
                cx.push_line(format!("return {};", info.text));
            }
            None => {
                if cx.ret_frozen {
                    if cx.ret != Type::Void {
                        return Err(CompileError::type_error(
                            format!("expected a {} return value", cx.ret),
                            span,
                        ));
                    }
                } else {
                    cx.ret = Type::Void;
                    cx.ret_frozen = true;
                    self.freeze_return(&cx.generated, &Type::Void);
                }
                cx.push_line("return;".to_string());
            }
        }
        Ok(())
    }

    /// Propagate a back-filled return type to callers
    fn freeze_return(&mut self, name: &str, ret: &Type) {
        if let Some(info) = self.fns.infos.get_mut(name) {
            if let Some(sig) = &mut info.sig {
                sig.ret = ret.clone();
                sig.ret_frozen = true;
            }
        }
    }

    fn analyze_assign(
        &mut self,
        cx: &mut FnCtx,
        name: &Spanned<String>,
        value: &Spanned<Expr>,
    ) -> Result<()> {
        let Some(binding) = self.lookup(cx, &name.node) else {
            return Err(CompileError::name(
                format!("undefined variable: {}", name.node),
                name.span,
            ));
        };
        if !binding.mutable {
            return Err(CompileError::name(
                format!("cannot assign to immutable '{}'", name.node),
                name.span,
            ));
        }
        let info = self.analyze_expr(cx, value)?;
        self.check_assignable(&binding.ty, &info, value.span)?;
        if let Some(bound) = &binding.bound {
            self.prove_interval(cx, &bound.interval, value, &info)?;
        }
        cx.facts.invalidate(&name.node);
        let target = if binding.captured {
            format!("this.{}", name.node)
        } else {
            name.node.clone()
        };
        cx.push_line(format!("{target} = {};", info.text));
        Ok(())
    }

    fn analyze_let(&mut self, cx: &mut FnCtx, stmt: &LetStmt) -> Result<()> {
        let declared = match &stmt.ty {
            Some(ty) => {
                let resolved = self.resolve_ty(cx, ty)?;
                if resolved == Type::Void {
                    return Err(CompileError::type_error(
                        format!("'{}' cannot be Void", stmt.name.node),
                        stmt.name.span,
                    ));
                }
                Some(resolved)
            }
            None => None,
        };
        let bound = match &stmt.bound {
            Some(bound) => Some(self.resolve_let_bound(cx, bound, declared.as_ref(), stmt)?),
            None => None,
        };
        match &stmt.init {
            Some(init) => match &init.node {
                Expr::ArrayLit(elems) => self.let_array(cx, stmt, declared, bound, elems, init.span),
                Expr::StructLit { name, values } => {
                    self.let_struct(cx, stmt, declared, bound, name, values, init.span)
                }
                _ => self.let_value(cx, stmt, declared, bound, init),
            },
            None => self.let_uninit(cx, stmt, declared, bound),
        }
    }

    fn resolve_let_bound(
        &mut self,
        cx: &FnCtx,
        bound: &Spanned<Bound>,
        declared: Option<&Type>,
        stmt: &LetStmt,
    ) -> Result<BoundInfo> {
        match declared {
            Some(ty) if ty.is_numeric() => {}
            _ => {
                return Err(CompileError::type_error(
                    format!("bound on non-numeric '{}'", stmt.name.node),
                    stmt.name.span,
                ));
            }
        }
        match &bound.node.value {
            BoundValue::Int(value) => Ok(BoundInfo::plain(Interval::from_bound_op(
                bound.node.op,
                *value,
            ))),
            BoundValue::Length(array) => {
                if bound.node.op != BoundOp::Lt {
                    return Err(CompileError::type_error(
                        "length bounds only support '<'",
                        bound.span,
                    ));
                }
                let Some(binding) = self.lookup(cx, &array.node) else {
                    return Err(CompileError::name(
                        format!("undefined variable: {}", array.node),
                        array.span,
                    ));
                };
                match binding.ty {
                    Type::Array { len, .. } => Ok(BoundInfo::length(
                        Interval::below(len as i128),
                        array.node.clone(),
                    )),
                    _ => Err(CompileError::type_error(
                        format!("'{}' is not an array", array.node),
                        array.span,
                    )),
                }
            }
        }
    }

    fn let_uninit(
        &mut self,
        cx: &mut FnCtx,
        stmt: &LetStmt,
        declared: Option<Type>,
        bound: Option<BoundInfo>,
    ) -> Result<()> {
        let name = &stmt.name.node;
        let Some(ty) = declared else {
            return Err(CompileError::type_error(
                format!("cannot infer the type of '{name}'"),
                stmt.name.span,
            ));
        };
        let captured = capture_binding(cx, name, &ty, &bound, stmt.mutable, stmt.name.span)?;
        if !captured {
            cx.push_line(format!("{};", ty.declaration(name)));
        }
        bind_let(cx, stmt, ty, bound, captured);
        Ok(())
    }

    fn let_value(
        &mut self,
        cx: &mut FnCtx,
        stmt: &LetStmt,
        declared: Option<Type>,
        bound: Option<BoundInfo>,
        init: &Spanned<Expr>,
    ) -> Result<()> {
        let name = &stmt.name.node;
        let info = self.analyze_expr(cx, init)?;
        let ty = match declared {
            Some(ty) => {
                self.check_assignable(&ty, &info, init.span)?;
                ty
            }
            None => {
                if info.ty == Type::Void {
                    return Err(CompileError::type_error(
                        format!("'{name}' cannot be Void"),
                        init.span,
                    ));
                }
                info.ty.clone()
            }
        };
        if let Some(bound) = &bound {
            self.prove_interval(cx, &bound.interval, init, &info)?;
        }
        let captured = capture_binding(cx, name, &ty, &bound, stmt.mutable, stmt.name.span)?;
        if captured {
            cx.push_line(format!("this.{name} = {};", info.text));
        } else {
            cx.push_line(format!("{} = {};", ty.declaration(name), info.text));
        }
        bind_let(cx, stmt, ty, bound, captured);
        Ok(())
    }

    /// `let a: [U64; 2] = [100, 200];` keeps C's element count inference:
    /// the declared length is checked, then dropped from the text.
    fn let_array(
        &mut self,
        cx: &mut FnCtx,
        stmt: &LetStmt,
        declared: Option<Type>,
        bound: Option<BoundInfo>,
        elems: &[Spanned<Expr>],
        span: Span,
    ) -> Result<()> {
        let name = &stmt.name.node;
        if let Some(declared) = &declared {
            match declared {
                Type::Array { len, .. } if *len == elems.len() as u64 => {}
                Type::Array { len, .. } => {
                    return Err(CompileError::type_error(
                        format!(
                            "array literal has {} elements, '{name}' declares {len}",
                            elems.len()
                        ),
                        span,
                    ));
                }
                other => {
                    return Err(CompileError::type_error(
                        format!("expected {other}, found an array literal"),
                        span,
                    ));
                }
            }
        }
        let (elem_ty, texts) = self.array_elements(cx, declared.as_ref(), elems, span)?;
        let ty = Type::Array {
            elem: Box::new(elem_ty.clone()),
            len: elems.len() as u64,
        };
        let captured = capture_binding(cx, name, &ty, &bound, stmt.mutable, stmt.name.span)?;
        cx.push_line(format!(
            "{} {name}[] = {{{}}};",
            elem_ty.c_type(),
            texts.join(", ")
        ));
        bind_let(cx, stmt, ty, bound, captured);
        Ok(())
    }

    fn array_elements(
        &mut self,
        cx: &mut FnCtx,
        declared: Option<&Type>,
        elems: &[Spanned<Expr>],
        span: Span,
    ) -> Result<(Type, Vec<String>)> {
        let declared_elem = match declared {
            Some(Type::Array { elem, .. }) => Some((**elem).clone()),
            _ => None,
        };
        if elems.is_empty() && declared_elem.is_none() {
            return Err(CompileError::type_error(
                "cannot infer the element type of an empty array literal",
                span,
            ));
        }
        let mut infos = Vec::with_capacity(elems.len());
        for elem in elems {
            let info = self.analyze_expr(cx, elem)?;
            infos.push(info);
        }
        // a non-constant element fixes the kind; all-literal arrays get I32
        let elem_ty = match declared_elem {
            Some(ty) => ty,
            None => infos
                .iter()
                .find(|info| info.value.is_none())
                .map(|info| info.ty.clone())
                .unwrap_or(Type::Numeric(crate::types::NumericKind::I32)),
        };
        let mut texts = Vec::with_capacity(elems.len());
        for (elem, info) in elems.iter().zip(&infos) {
            self.check_assignable(&elem_ty, info, elem.span)?;
            texts.push(info.text.clone());
        }
        Ok((elem_ty, texts))
    }

    /// Struct-literal initializers lower to a declaration plus one
    /// assignment per field; no compound literal reaches the output.
    #[allow(clippy::too_many_arguments)]
    fn let_struct(
        &mut self,
        cx: &mut FnCtx,
        stmt: &LetStmt,
        declared: Option<Type>,
        bound: Option<BoundInfo>,
        lit: &Spanned<String>,
        values: &[Spanned<Expr>],
        span: Span,
    ) -> Result<()> {
        let name = &stmt.name.node;
        let ty = Type::Struct(lit.node.clone());
        if let Some(declared) = &declared {
            if *declared != ty {
                return Err(CompileError::type_error(
                    format!("expected {declared}, found {}", lit.node),
                    span,
                ));
            }
        }
        let info = self.resolver.struct_info(&lit.node, lit.span, &mut self.out)?;
        if info.fields.len() != values.len() {
            return Err(CompileError::type_error(
                format!(
                    "struct '{}' has {} fields, the literal provides {}",
                    lit.node,
                    info.fields.len(),
                    values.len()
                ),
                span,
            ));
        }
        let mut assigns = Vec::with_capacity(values.len());
        for ((field_name, field_ty), value) in info.fields.iter().zip(values) {
            let value_info = self.analyze_expr(cx, value)?;
            self.check_assignable(field_ty, &value_info, value.span)?;
            assigns.push(format!("{name}.{field_name} = {};", value_info.text));
        }
        let captured = capture_binding(cx, name, &ty, &bound, stmt.mutable, stmt.name.span)?;
        cx.push_line(format!("{};", ty.declaration(name)));
        for assign in assigns {
            cx.push_line(assign);
        }
        bind_let(cx, stmt, ty, bound, captured);
        Ok(())
    }

    /// Global `let`s lower exactly like locals, but into the globals
    /// stream, and their bindings land in the global scope
    fn analyze_global_let(&mut self, stmt: &LetStmt) -> Result<()> {
        let mut cx = FnCtx::top_level();
        self.analyze_let(&mut cx, stmt)?;
        for line in cx.lines {
            self.out.push_global(line);
        }
        if let Some(scope) = cx.scopes.first() {
            if let Some(binding) = scope.get(&stmt.name.node) {
                self.globals.insert(stmt.name.node.clone(), binding.clone());
            }
        }
        Ok(())
    }

    fn lookup(&self, cx: &FnCtx, name: &str) -> Option<Binding> {
        for scope in cx.scopes.iter().rev() {
            if let Some(binding) = scope.get(name) {
                return Some(binding.clone());
            }
        }
        if let Some(field) = cx.captured.get(name) {
            return Some(Binding {
                ty: field.ty.clone(),
                mutable: field.mutable,
                bound: field.bound.clone(),
                captured: true,
            });
        }
        self.globals.get(name).cloned()
    }
}

/// Extract interval facts from the shapes the lattice understands:
/// `var OP constant`, `constant OP var`, `var == true`, `var == false`
fn apply_narrowing(cx: &mut FnCtx, cond: &Spanned<Expr>) -> Result<()> {
    let Expr::Binary { left, op, right } = &cond.node else {
        return Ok(());
    };
    if *op == BinOp::Eq {
        if let (Expr::Var(name), Expr::BoolLit(value)) = (&left.node, &right.node) {
            return cx.facts.narrow_bool(name, *value, cond.span);
        }
        if let (Expr::BoolLit(value), Expr::Var(name)) = (&left.node, &right.node) {
            return cx.facts.narrow_bool(name, *value, cond.span);
        }
    }
    if let Expr::Var(name) = &left.node {
        if let Some(value) = fold_const(right) {
            if let Some(interval) = Interval::from_comparison(*op, value) {
                return cx.facts.narrow_numeric(name, interval, cond.span);
            }
            return Ok(());
        }
    }
    if let Expr::Var(name) = &right.node {
        if let Some(value) = fold_const(left) {
            if let Some(interval) = Interval::from_comparison(op.mirrored(), value) {
                return cx.facts.narrow_numeric(name, interval, cond.span);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Analyzer;
    use crate::error::CompileError;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn lower(source: &str) -> String {
        let tokens = tokenize(source).expect("lexes");
        let program = parse(tokens).expect("parses");
        Analyzer::new().run(&program).expect("analyzes")
    }

    fn lower_err(source: &str) -> CompileError {
        let tokens = tokenize(source).expect("lexes");
        let program = parse(tokens).expect("parses");
        match Analyzer::new().run(&program) {
            Ok(output) => panic!("expected an error, got:\n{output}"),
            Err(err) => err,
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    #[test]
    fn test_global_let() {
        assert_eq!(lower("let x : I32 = 100;"), "int x = 100;\n");
    }

    #[test]
    fn test_empty_function() {
        assert_eq!(lower("fn main() => {}"), "void main() {\n}\n");
    }

    #[test]
    fn test_function_parameters_and_return() {
        assert_eq!(
            lower("fn add(a: I32, b: I32): I32 => { return a + b; }"),
            "int add(int a, int b) {\n    return a + b;\n}\n"
        );
    }

    #[test]
    fn test_return_type_backfilled_from_first_return() {
        assert_eq!(
            lower("fn two() => { return 2; }"),
            "int two() {\n    return 2;\n}\n"
        );
    }

    #[test]
    fn test_struct_materializes_at_declaration() {
        assert_eq!(
            lower("struct Point { x: I32; y: I32; }"),
            "struct Point {\n    int x;\n    int y;\n};\n"
        );
    }

    #[test]
    fn test_enum_lowered_to_single_line() {
        assert_eq!(
            lower("enum Color { Red, Green }"),
            "enum Color { Red, Green };\n"
        );
    }

    #[test]
    fn test_tagged_union_contiguous_run() {
        let output = lower(
            "struct enum Shape {\
                 Circle { radius: U32; }\
                 Square { side: U32; }\
             }",
        );
        assert_eq!(
            output,
            "struct Circle {\n    unsigned int radius;\n};\n\
             struct Square {\n    unsigned int side;\n};\n\
             enum ShapeTag { Circle, Square };\n\
             struct Shape {\n    enum ShapeTag tag;\n    union {\n        struct Circle Circle;\n        struct Square Square;\n    };\n};\n"
        );
    }

    #[test]
    fn test_import_becomes_include() {
        assert_eq!(lower("import stdio;"), "#include <stdio.h>\n");
    }

    #[test]
    fn test_extern_emits_nothing_but_is_callable() {
        assert_eq!(lower("extern fn putchar(c: I32): I32;"), "");
        assert_eq!(
            lower("extern fn putchar(c: I32): I32; fn main() => { putchar(65); }"),
            "void main() {\n    putchar(65);\n}\n"
        );
    }

    #[test]
    fn test_type_alias_resolves_through() {
        assert_eq!(lower("type MyInt = I32; let x: MyInt = 5;"), "int x = 5;\n");
    }

    #[test]
    fn test_forward_reference_between_functions() {
        let output = lower("fn first(): I32 => { return second(); } fn second(): I32 => { return 1; }");
        assert_eq!(
            output,
            "int first() {\n    return second();\n}\nint second() {\n    return 1;\n}\n"
        );
    }

    // ========================================================================
    // Let forms
    // ========================================================================

    #[test]
    fn test_global_array_drops_declared_size() {
        assert_eq!(
            lower("let data: [U64; 2] = [100, 200];"),
            "unsigned long long data[] = {100, 200};\n"
        );
    }

    #[test]
    fn test_uninitialized_array_keeps_size() {
        assert_eq!(
            lower("fn main() => { let buf: [I32; 4]; }"),
            "void main() {\n    int buf[4];\n}\n"
        );
    }

    #[test]
    fn test_uninitialized_scalar_and_pointer() {
        assert_eq!(
            lower("fn main() => { let value: I16; let p: *I32; }"),
            "void main() {\n    short value;\n    int* p;\n}\n"
        );
    }

    #[test]
    fn test_function_pointer_declaration() {
        assert_eq!(
            lower("fn main() => { let adder: (I32, I32) => I32; }"),
            "void main() {\n    int (*adder)(int, int);\n}\n"
        );
    }

    #[test]
    fn test_enum_local() {
        assert_eq!(
            lower("enum Color { Red, Green } fn main() => { let c: Color; }"),
            "enum Color { Red, Green };\nvoid main() {\n    enum Color c;\n}\n"
        );
    }

    #[test]
    fn test_struct_literal_lowering() {
        let output = lower(
            "struct Point { x: I32; y: I32; }\
             fn main() => { let p: Point = Point {3, 4}; }",
        );
        assert_eq!(
            output,
            "struct Point {\n    int x;\n    int y;\n};\n\
             void main() {\n    struct Point p;\n    p.x = 3;\n    p.y = 4;\n}\n"
        );
    }

    #[test]
    fn test_struct_literal_projection_folds_away() {
        let output = lower(
            "struct Point { x: I32; y: I32; }\
             fn main() => { let x: I32 = (Point {3, 4}).x; }",
        );
        assert!(output.ends_with("void main() {\n    int x = 3;\n}\n"));
    }

    #[test]
    fn test_inferred_local_type() {
        assert_eq!(
            lower("fn main() => { let x = 5; }"),
            "void main() {\n    int x = 5;\n}\n"
        );
    }

    // ========================================================================
    // Statements and expressions
    // ========================================================================

    #[test]
    fn test_while_loop_with_mutable_counter() {
        let output = lower(
            "fn main() => {\
                 let mut i: I32 = 0;\
                 while (i < 10) {\
                     i = i + 1;\
                 }\
             }",
        );
        assert_eq!(
            output,
            "void main() {\n    int i = 0;\n    while (i < 10) {\n        i = i + 1;\n    }\n}\n"
        );
    }

    #[test]
    fn test_if_else_layout() {
        let output = lower(
            "fn main() => {\
                 let mut y: I32 = 0;\
                 if (y < 5) {\
                     y = 1;\
                 } else {\
                     y = 2;\
                 }\
             }",
        );
        assert_eq!(
            output,
            "void main() {\n    int y = 0;\n    if (y < 5) {\n        y = 1;\n    }\n    else {\n        y = 2;\n    }\n}\n"
        );
    }

    #[test]
    fn test_redundant_parens_are_stripped() {
        assert_eq!(
            lower("fn main() => { let x: I32 = (5) + (3); }"),
            "void main() {\n    int x = 5 + 3;\n}\n"
        );
    }

    #[test]
    fn test_parens_kept_when_grouping_matters() {
        assert_eq!(
            lower("fn f(a: I32, b: I32, c: I32): I32 => { return (a + b) * c; }"),
            "int f(int a, int b, int c) {\n    return (a + b) * c;\n}\n"
        );
    }

    #[test]
    fn test_unary_negation() {
        assert_eq!(
            lower("fn main() => { let x: I32 = -5; let y: I32 = -(1 + 2); }"),
            "void main() {\n    int x = -5;\n    int y = -(1 + 2);\n}\n"
        );
    }

    #[test]
    fn test_folded_constant_proves_bound() {
        assert_eq!(
            lower("fn main() => { let v: I32 > 10 = 2 * 3 + 5; }"),
            "void main() {\n    int v = 2 * 3 + 5;\n}\n"
        );
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        // 3 / 2 stays at 1; rounding up would put it out of range
        let output = lower(
            "let data: [U64; 2] = [100, 200];\
             fn pick(): U64 => { return data[3 / 2]; }",
        );
        assert!(output.contains("return data[3 / 2];"));
    }

    #[test]
    fn test_break_and_continue_pass_through() {
        let output = lower(
            "fn main() => { let mut i: I32 = 0; while (i < 3) { break; continue; } }",
        );
        assert!(output.contains("        break;\n"));
        assert!(output.contains("        continue;\n"));
    }

    // ========================================================================
    // Closures
    // ========================================================================

    #[test]
    fn test_nested_function_minimal() {
        assert_eq!(
            lower("fn outer() => { fn inner() => {} }"),
            "struct outer_t {\n};\nvoid inner_outer(struct outer_t this) {\n}\nvoid outer() {\n}\n"
        );
    }

    #[test]
    fn test_captured_local_routes_through_environment() {
        let output = lower(
            "fn outer() => {\
                 let myValue: I32 = 100;\
                 fn getValue(): I32 => {\
                     return myValue;\
                 }\
             }",
        );
        assert_eq!(
            output,
            "struct outer_t {\n    int myValue;\n};\n\
             int getValue_outer(struct outer_t this) {\n    return this.myValue;\n}\n\
             void outer() {\n    struct outer_t this;\n    this.myValue = 100;\n}\n"
        );
    }

    #[test]
    fn test_captured_parameter_initializes_field() {
        let output = lower("fn outer(start: I32) => { fn get(): I32 => { return start; } }");
        assert_eq!(
            output,
            "struct outer_t {\n    int start;\n};\n\
             int get_outer(struct outer_t this) {\n    return this.start;\n}\n\
             void outer(int start) {\n    struct outer_t this;\n    this.start = start;\n}\n"
        );
    }

    #[test]
    fn test_sibling_calls_share_the_environment() {
        let output = lower(
            "fn outer() => {\
                 fn helper(): I32 => { return 1; }\
                 fn caller(): I32 => { return helper(); }\
                 let total: I32 = caller();\
             }",
        );
        assert_eq!(
            output,
            "struct outer_t {\n};\n\
             int helper_outer(struct outer_t this) {\n    return 1;\n}\n\
             int caller_outer(struct outer_t this) {\n    return helper_outer(this);\n}\n\
             void outer() {\n    struct outer_t this;\n    int total = caller_outer(this);\n}\n"
        );
    }

    #[test]
    fn test_three_levels_of_nesting() {
        assert_eq!(
            lower("fn a() => { fn b() => { fn c() => {} } }"),
            "struct a_t {\n};\nstruct b_a_t {\n};\n\
             void c_b_a(struct b_a_t this) {\n}\n\
             void b_a(struct a_t this) {\n}\n\
             void a() {\n}\n"
        );
    }

    #[test]
    fn test_captured_binding_must_be_scalar() {
        let err = lower_err(
            "fn outer() => {\
                 let arr: [I32; 2] = [1, 2];\
                 fn first(): I32 => { return arr[0]; }\
             }",
        );
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn test_capture_is_declare_before_use() {
        let err = lower_err(
            "fn outer() => {\
                 fn get(): I32 => { return lateValue; }\
                 let lateValue: I32 = 5;\
             }",
        );
        assert!(matches!(err, CompileError::Name { .. }));
    }

    #[test]
    fn test_lifted_name_is_not_callable_from_outside() {
        let err = lower_err(
            "fn outer() => { fn inner() => {} }\
             fn main() => { inner_outer(); }",
        );
        assert!(matches!(err, CompileError::Name { .. }));
        assert_eq!(err.message(), "unknown function: inner_outer");
    }

    // ========================================================================
    // Classes
    // ========================================================================

    #[test]
    fn test_class_struct_methods_then_constructor() {
        let output = lower(
            "class fn Point(x: I32, y: I32) => {\
                 fn manhattan(): I32 => {\
                     return x + y;\
                 }\
             }",
        );
        assert_eq!(
            output,
            "struct Point {\n    int x;\n    int y;\n};\n\
             int manhattan_Point(struct Point this) {\n    return this.x + this.y;\n}\n\
             struct Point Point(int x, int y) {\n    struct Point this;\n    this.x = x;\n    this.y = y;\n    return this;\n}\n"
        );
    }

    #[test]
    fn test_constructor_call() {
        let output = lower(
            "class fn Point(x: I32, y: I32) => {}\
             fn main() => { let p: Point = Point(3, 4); }",
        );
        assert!(output.ends_with("void main() {\n    struct Point p = Point(3, 4);\n}\n"));
    }

    #[test]
    fn test_zero_parameter_class() {
        assert_eq!(
            lower("class fn Unit() => {}"),
            "struct Unit {\n};\nstruct Unit Unit() {\n    struct Unit this;\n    return this;\n}\n"
        );
    }

    // ========================================================================
    // Generics
    // ========================================================================

    #[test]
    fn test_generic_struct_materializes_on_first_use() {
        let output = lower(
            "struct Wrapper<T> { value: T; }\
             fn main() => { let w: Wrapper<I32>; }",
        );
        assert_eq!(
            output,
            "struct Wrapper_I32 {\n    int value;\n};\nvoid main() {\n    struct Wrapper_I32 w;\n}\n"
        );
    }

    #[test]
    fn test_generic_struct_instantiated_once() {
        let output = lower(
            "struct Wrapper<T> { value: T; }\
             fn main() => { let a: Wrapper<I32>; let b: Wrapper<I32>; }",
        );
        assert_eq!(output.matches("struct Wrapper_I32 {").count(), 1);
    }

    #[test]
    fn test_generic_function_instantiated_before_caller() {
        let output = lower(
            "fn identity<T>(x: T): T => { return x; }\
             fn main() => { let y: I32 = identity(5); }",
        );
        assert_eq!(
            output,
            "int identity_I32(int x) {\n    return x;\n}\n\
             void main() {\n    int y = identity_I32(5);\n}\n"
        );
    }

    #[test]
    fn test_generic_class_constructor_inference() {
        let output = lower(
            "class fn Box<T>(value: T) => {}\
             fn main() => { let b: Box<I32> = Box(5); }",
        );
        assert_eq!(
            output,
            "struct Box_I32 {\n    int value;\n};\n\
             struct Box_I32 Box_I32(int value) {\n    struct Box_I32 this;\n    this.value = value;\n    return this;\n}\n\
             void main() {\n    struct Box_I32 b = Box_I32(5);\n}\n"
        );
    }

    #[test]
    fn test_generic_argument_must_be_taggable() {
        let err = lower_err(
            "struct Wrapper<T> { value: T; }\
             fn main() => { let w: Wrapper<Void>; }",
        );
        assert!(matches!(err, CompileError::Type { .. }));
    }

    // ========================================================================
    // Bounds and narrowing
    // ========================================================================

    #[test]
    fn test_declared_bound_accepts_literal_inside() {
        assert_eq!(
            lower("fn main() => { let v: I32 > 10 = 15; }"),
            "void main() {\n    int v = 15;\n}\n"
        );
    }

    #[test]
    fn test_declared_bound_rejects_literal_outside() {
        let err = lower_err("fn main() => { let v: I32 > 10 = 5; }");
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_call_requires_bound_proof() {
        let err = lower_err("fn take(x: I32 > 10) => {} fn main(v: I32) => { take(v); }");
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_narrowing_proves_call_argument() {
        let output = lower(
            "fn take(x: I32 > 10) => {}\
             fn main(v: I32) => { if (v > 10) { take(v); } }",
        );
        assert!(output.contains("    if (v > 10) {\n        take(v);\n    }\n"));
    }

    #[test]
    fn test_bounded_variable_flows_into_subset() {
        assert_eq!(
            lower("fn main(v: I32 > 20) => { let w: I32 > 10 = v; }"),
            "void main(int v) {\n    int w = v;\n}\n"
        );
    }

    #[test]
    fn test_else_branch_is_not_narrowed() {
        let err = lower_err(
            "fn take(x: I32 > 10) => {}\
             fn main(v: I32) => { if (v > 10) {} else { take(v); } }",
        );
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_conflicting_conditions_are_fatal() {
        let err = lower_err("fn main(v: I32) => { if (v > 10) { if (v < 5) {} } }");
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_assignment_invalidates_narrowing() {
        let err = lower_err(
            "fn take(x: I32 > 10) => {}\
             fn main() => { let mut v: I32 = 0; if (v > 10) { v = 0; take(v); } }",
        );
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_boolean_narrowing_conflict() {
        let err = lower_err(
            "fn main(flag: Bool) => { if (flag == true) { if (flag == false) {} } }",
        );
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    // ========================================================================
    // Arrays and indexing
    // ========================================================================

    #[test]
    fn test_length_bounded_parameter_licenses_indexing() {
        let output = lower(
            "let data: [U64; 2] = [100, 200];\
             fn get(i: USize < data.length): U64 => { return data[i]; }",
        );
        assert_eq!(
            output,
            "unsigned long long data[] = {100, 200};\n\
             unsigned long long get(unsigned long i) {\n    return data[i];\n}\n"
        );
    }

    #[test]
    fn test_constant_index_in_range() {
        let output = lower(
            "let data: [U64; 2] = [100, 200];\
             fn first(): U64 => { return data[0]; }",
        );
        assert!(output.contains("return data[0];"));
    }

    #[test]
    fn test_constant_index_out_of_range() {
        let err = lower_err(
            "let data: [U64; 2] = [100, 200];\
             fn bad(): U64 => { return data[5]; }",
        );
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_unbounded_index_variable_rejected() {
        let err = lower_err(
            "let data: [U64; 2] = [100, 200];\
             fn bad(i: USize): U64 => { return data[i]; }",
        );
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    #[test]
    fn test_length_bound_is_array_specific() {
        let err = lower_err(
            "let data: [U64; 2] = [100, 200];\
             let other: [U64; 8] = [1, 2, 3, 4, 5, 6, 7, 8];\
             fn bad(i: USize < other.length): U64 => { return data[i]; }",
        );
        assert!(matches!(err, CompileError::Bounds { .. }));
    }

    // ========================================================================
    // Rejections
    // ========================================================================

    #[test]
    fn test_assignment_to_immutable_rejected() {
        let err = lower_err("fn main() => { let x: I32 = 1; x = 2; }");
        assert!(matches!(err, CompileError::Name { .. }));
    }

    #[test]
    fn test_undefined_variable() {
        let err = lower_err("fn main() => { let x: I32 = missing; }");
        assert!(matches!(err, CompileError::Name { .. }));
    }

    #[test]
    fn test_unknown_function() {
        let err = lower_err("fn main() => { missing(); }");
        assert!(matches!(err, CompileError::Name { .. }));
    }

    #[test]
    fn test_unknown_type() {
        let err = lower_err("fn main() => { let x: Missing; }");
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn test_duplicate_struct_definition() {
        let err = lower_err("struct P { x: I32; } struct P { y: I32; }");
        assert!(matches!(err, CompileError::DuplicateDefinition { .. }));
    }

    #[test]
    fn test_duplicate_function_definition() {
        let err = lower_err("fn f() => {} fn f() => {}");
        assert!(matches!(err, CompileError::DuplicateDefinition { .. }));
    }

    #[test]
    fn test_kind_mismatch_between_variables() {
        let err = lower_err("fn f(a: U8, b: I32) => { let c: I32 = a + b; }");
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn test_constant_adopts_variable_kind() {
        assert_eq!(
            lower("fn f(a: U8): U8 => { return a + 200; }"),
            "unsigned char f(unsigned char a) {\n    return a + 200;\n}\n"
        );
    }

    #[test]
    fn test_condition_must_be_bool() {
        let err = lower_err("fn main() => { if (1 + 2) {} }");
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn test_bound_on_non_numeric_rejected() {
        let err = lower_err("struct P { x: I32; } fn f(p: P > 3) => {}");
        assert!(matches!(err, CompileError::Type { .. }));
    }
}
