//! Type model and resolution
//!
//! Surface `TypeExpr`s resolve to canonical `Type`s here. The resolver owns
//! every type-level registry (structs, enums, tagged unions, aliases,
//! generic templates) plus the monomorphization memo, and materializes
//! generic instances into the output as they first come into existence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ast::{FieldDef, FnDecl, Span, Spanned, StructDef, TaggedUnionDef, TypeExpr};
use crate::cgen::CProgram;
use crate::error::{CompileError, Result};

/// Alias indirection limit; exceeding it means the chain is cyclic
const MAX_ALIAS_DEPTH: usize = 64;

/// Built-in numeric kinds with their fixed C spellings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericKind {
    U8,
    U16,
    U32,
    U64,
    USize,
    I8,
    I16,
    I32,
    I64,
}

impl NumericKind {
    /// Primitive names are case-insensitive: `I32` and `i32` both resolve
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "u8" => Some(Self::U8),
            "u16" => Some(Self::U16),
            "u32" => Some(Self::U32),
            "u64" => Some(Self::U64),
            "usize" => Some(Self::USize),
            "i8" => Some(Self::I8),
            "i16" => Some(Self::I16),
            "i32" => Some(Self::I32),
            "i64" => Some(Self::I64),
            _ => None,
        }
    }

    pub fn c_type(self) -> &'static str {
        match self {
            Self::U8 => "unsigned char",
            Self::U16 => "unsigned short",
            Self::U32 => "unsigned int",
            Self::U64 => "unsigned long long",
            Self::USize => "unsigned long",
            Self::I8 => "signed char",
            Self::I16 => "short",
            Self::I32 => "int",
            Self::I64 => "long long",
        }
    }

    /// Canonical spelling, used in generated names for generic instances
    pub fn canonical(self) -> &'static str {
        match self {
            Self::U8 => "U8",
            Self::U16 => "U16",
            Self::U32 => "U32",
            Self::U64 => "U64",
            Self::USize => "USize",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
        }
    }
}

/// A fully resolved type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Numeric(NumericKind),
    Bool,
    /// Legal only as a return type
    Void,
    Struct(String),
    Enum(String),
    TaggedUnion(String),
    Pointer(Box<Type>),
    Function { params: Vec<Type>, ret: Box<Type> },
    Array { elem: Box<Type>, len: u64 },
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Numeric(_))
    }

    pub fn numeric_kind(&self) -> Option<NumericKind> {
        match self {
            Type::Numeric(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Capturable into a closure environment (scalar fields only)
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Numeric(_) | Type::Bool)
    }

    /// The C type for value positions; arrays and function pointers need
    /// the declarator form from [`Type::declaration`] instead.
    pub fn c_type(&self) -> String {
        match self {
            Type::Numeric(kind) => kind.c_type().to_string(),
            Type::Bool => "int".to_string(),
            Type::Void => "void".to_string(),
            Type::Struct(name) | Type::TaggedUnion(name) => format!("struct {name}"),
            Type::Enum(name) => format!("enum {name}"),
            Type::Pointer(inner) => format!("{}*", inner.c_type()),
            Type::Function { params, ret } => {
                let params: Vec<String> = params.iter().map(Type::c_type).collect();
                format!("{} (*)({})", ret.c_type(), params.join(", "))
            }
            Type::Array { elem, .. } => elem.c_type(),
        }
    }

    /// Render `<type> <name>` as a C declarator. Function types become
    /// function pointers, arrays keep their size suffix.
    pub fn declaration(&self, name: &str) -> String {
        match self {
            Type::Function { params, ret } => {
                let params: Vec<String> = params.iter().map(Type::c_type).collect();
                format!("{} (*{})({})", ret.c_type(), name, params.join(", "))
            }
            Type::Array { elem, len } => format!("{} {}[{}]", elem.c_type(), name, len),
            _ => format!("{} {}", self.c_type(), name),
        }
    }

    /// Canonical tag for a generic argument, or `None` when the type is
    /// not allowed as one (only numeric, bool, struct and pointer are).
    pub fn generic_tag(&self) -> Option<String> {
        match self {
            Type::Numeric(kind) => Some(kind.canonical().to_string()),
            Type::Bool => Some("Bool".to_string()),
            Type::Struct(name) | Type::TaggedUnion(name) => Some(name.clone()),
            Type::Pointer(inner) => inner.generic_tag().map(|tag| format!("{tag}Ptr")),
            _ => None,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Numeric(kind) => write!(f, "{}", kind.canonical()),
            Type::Bool => write!(f, "Bool"),
            Type::Void => write!(f, "Void"),
            Type::Struct(name) | Type::Enum(name) | Type::TaggedUnion(name) => {
                write!(f, "{name}")
            }
            Type::Pointer(inner) => write!(f, "*{inner}"),
            Type::Function { params, ret } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") => {ret}")
            }
            Type::Array { elem, len } => write!(f, "[{elem}; {len}]"),
        }
    }
}

/// Resolved struct shape
#[derive(Debug, Clone, PartialEq)]
pub struct StructInfo {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl StructInfo {
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }
}

/// A generic template: one type parameter over a struct-shaped field list
#[derive(Debug, Clone)]
pub struct Template {
    pub param: String,
    pub fields: Vec<FieldDef>,
    /// Present for class templates; instantiating one also queues its
    /// constructor and methods for emission (see [`PendingClass`])
    pub class_decl: Option<FnDecl>,
}

/// Deferred constructor/method emission for a class-template instance
#[derive(Debug, Clone)]
pub struct PendingClass {
    pub decl: FnDecl,
    pub concrete_name: String,
    pub param: String,
    pub arg: Type,
}

/// Field list storage: raw until first use, resolved afterwards
#[derive(Debug, Clone)]
enum StructSource {
    Ast(Vec<FieldDef>),
    Resolved(Vec<(String, Type)>),
}

/// All type-level registries for one compilation
#[derive(Debug, Default)]
pub struct TypeResolver {
    struct_sources: HashMap<String, StructSource>,
    struct_infos: HashMap<String, StructInfo>,
    enums: HashMap<String, Vec<String>>,
    unions: HashMap<String, TaggedUnionDef>,
    aliases: HashMap<String, Spanned<TypeExpr>>,
    templates: HashMap<String, Template>,
    /// (template name, argument tag) -> concrete struct name
    memo: HashMap<(String, String), String>,
    pending_classes: Vec<PendingClass>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations are write-once across every type namespace
    fn check_free(&self, name: &str, span: Span) -> Result<()> {
        let taken = self.struct_sources.contains_key(name)
            || self.enums.contains_key(name)
            || self.unions.contains_key(name)
            || self.aliases.contains_key(name)
            || self.templates.contains_key(name);
        if taken {
            return Err(CompileError::duplicate(
                format!("type '{name}' is already defined"),
                span,
            ));
        }
        Ok(())
    }

    pub fn register_struct(&mut self, def: &StructDef) -> Result<()> {
        self.check_free(&def.name.node, def.name.span)?;
        match &def.generic_param {
            Some(param) => {
                self.templates.insert(
                    def.name.node.clone(),
                    Template {
                        param: param.node.clone(),
                        fields: def.fields.clone(),
                        class_decl: None,
                    },
                );
            }
            None => {
                self.struct_sources
                    .insert(def.name.node.clone(), StructSource::Ast(def.fields.clone()));
            }
        }
        Ok(())
    }

    /// A class fn's struct has the class's parameters as fields, in order
    pub fn register_class(&mut self, decl: &FnDecl) -> Result<()> {
        self.check_free(&decl.name.node, decl.name.span)?;
        let fields: Vec<FieldDef> = decl
            .params
            .iter()
            .map(|p| FieldDef {
                name: p.name.clone(),
                ty: p.ty.clone(),
            })
            .collect();
        match &decl.generic_param {
            Some(param) => {
                self.templates.insert(
                    decl.name.node.clone(),
                    Template {
                        param: param.node.clone(),
                        fields,
                        class_decl: Some(decl.clone()),
                    },
                );
            }
            None => {
                self.struct_sources
                    .insert(decl.name.node.clone(), StructSource::Ast(fields));
            }
        }
        Ok(())
    }

    pub fn register_enum(&mut self, name: &Spanned<String>, variants: Vec<String>) -> Result<()> {
        self.check_free(&name.node, name.span)?;
        self.enums.insert(name.node.clone(), variants);
        Ok(())
    }

    /// Registers the wrapper name and each variant as a struct
    pub fn register_union(&mut self, def: &TaggedUnionDef) -> Result<()> {
        self.check_free(&def.name.node, def.name.span)?;
        self.unions.insert(def.name.node.clone(), def.clone());
        for variant in &def.variants {
            self.check_free(&variant.name.node, variant.name.span)?;
            self.struct_sources.insert(
                variant.name.node.clone(),
                StructSource::Ast(variant.fields.clone()),
            );
        }
        Ok(())
    }

    pub fn register_alias(
        &mut self,
        name: &Spanned<String>,
        target: Spanned<TypeExpr>,
    ) -> Result<()> {
        self.check_free(&name.node, name.span)?;
        self.aliases.insert(name.node.clone(), target);
        Ok(())
    }

    /// Register an already-resolved struct (closure environments) and
    /// materialize it immediately; returns its slot for later patching.
    pub fn register_synthetic_struct(
        &mut self,
        name: &str,
        fields: Vec<(String, Type)>,
        span: Span,
        out: &mut CProgram,
    ) -> Result<usize> {
        self.check_free(name, span)?;
        let rendered = fields.iter().map(|(n, t)| t.declaration(n)).collect();
        self.struct_sources
            .insert(name.to_string(), StructSource::Resolved(fields.clone()));
        self.struct_infos.insert(
            name.to_string(),
            StructInfo {
                name: name.to_string(),
                fields,
            },
        );
        Ok(out.push_struct(name, rendered))
    }

    /// Replace a synthetic struct's fields once they are known (closure
    /// environments are reserved before their function body is analyzed).
    pub fn update_synthetic_struct(
        &mut self,
        name: &str,
        fields: Vec<(String, Type)>,
        index: usize,
        out: &mut CProgram,
    ) {
        let rendered = fields.iter().map(|(n, t)| t.declaration(n)).collect();
        self.struct_sources
            .insert(name.to_string(), StructSource::Resolved(fields.clone()));
        self.struct_infos.insert(
            name.to_string(),
            StructInfo {
                name: name.to_string(),
                fields,
            },
        );
        out.set_struct_fields(index, rendered);
    }

    pub fn is_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    pub fn take_pending_classes(&mut self) -> Vec<PendingClass> {
        std::mem::take(&mut self.pending_classes)
    }

    /// Resolve a surface type with no generic substitution in scope
    pub fn resolve(&mut self, ty: &Spanned<TypeExpr>, out: &mut CProgram) -> Result<Type> {
        self.resolve_inner(ty, None, 0, out)
    }

    /// Resolve a surface type, substituting one generic placeholder
    pub fn resolve_with(
        &mut self,
        ty: &Spanned<TypeExpr>,
        subst: Option<(&str, &Type)>,
        out: &mut CProgram,
    ) -> Result<Type> {
        self.resolve_inner(ty, subst, 0, out)
    }

    fn resolve_inner(
        &mut self,
        ty: &Spanned<TypeExpr>,
        subst: Option<(&str, &Type)>,
        depth: usize,
        out: &mut CProgram,
    ) -> Result<Type> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(CompileError::type_error(
                "type alias cycle detected",
                ty.span,
            ));
        }
        match &ty.node {
            TypeExpr::Pointer(inner) => Ok(Type::Pointer(Box::new(
                self.resolve_inner(inner, subst, depth, out)?,
            ))),
            TypeExpr::Array { elem, len } => {
                let elem = self.resolve_inner(elem, subst, depth, out)?;
                if elem == Type::Void {
                    return Err(CompileError::type_error(
                        "array element type cannot be Void",
                        ty.span,
                    ));
                }
                Ok(Type::Array {
                    elem: Box::new(elem),
                    len: *len,
                })
            }
            TypeExpr::Function { params, ret } => {
                let mut resolved = Vec::with_capacity(params.len());
                for param in params {
                    let p = self.resolve_inner(param, subst, depth, out)?;
                    if p == Type::Void {
                        return Err(CompileError::type_error(
                            "function parameter type cannot be Void",
                            param.span,
                        ));
                    }
                    resolved.push(p);
                }
                let ret = self.resolve_inner(ret, subst, depth, out)?;
                Ok(Type::Function {
                    params: resolved,
                    ret: Box::new(ret),
                })
            }
            TypeExpr::Named {
                name,
                generic_arg: None,
            } => {
                if let Some((param, concrete)) = subst {
                    if name == param {
                        return Ok(concrete.clone());
                    }
                }
                if let Some(kind) = NumericKind::from_name(name) {
                    return Ok(Type::Numeric(kind));
                }
                if name.eq_ignore_ascii_case("bool") {
                    return Ok(Type::Bool);
                }
                if name.eq_ignore_ascii_case("void") {
                    return Ok(Type::Void);
                }
                if let Some(target) = self.aliases.get(name).cloned() {
                    return self.resolve_inner(&target, None, depth + 1, out);
                }
                if self.struct_sources.contains_key(name) {
                    return Ok(Type::Struct(name.clone()));
                }
                if self.unions.contains_key(name) {
                    return Ok(Type::TaggedUnion(name.clone()));
                }
                if self.enums.contains_key(name) {
                    return Ok(Type::Enum(name.clone()));
                }
                if self.templates.contains_key(name) {
                    return Err(CompileError::type_error(
                        format!("generic type '{name}' requires a type argument"),
                        ty.span,
                    ));
                }
                Err(CompileError::type_error(
                    format!("unknown type: {name}"),
                    ty.span,
                ))
            }
            TypeExpr::Named {
                name,
                generic_arg: Some(arg),
            } => {
                let arg = self.resolve_inner(arg, subst, depth, out)?;
                self.instantiate(name, arg, ty.span, out)
            }
        }
    }

    /// Monomorphize `Base<Arg>` from an already-resolved argument, reusing
    /// the memoized instance when the same pair was seen before. Also the
    /// entry point for constructor calls whose argument is inferred at the
    /// call site rather than spelled as a type.
    pub fn instantiate(
        &mut self,
        base: &str,
        arg: Type,
        span: Span,
        out: &mut CProgram,
    ) -> Result<Type> {
        let template = match self.templates.get(base) {
            Some(template) => template.clone(),
            None => {
                return Err(CompileError::type_error(
                    format!("type '{base}' is not generic"),
                    span,
                ));
            }
        };
        let tag = arg.generic_tag().ok_or_else(|| {
            CompileError::type_error(
                format!("'{arg}' cannot be used as a generic argument"),
                span,
            )
        })?;

        let key = (base.to_string(), tag.clone());
        if let Some(concrete) = self.memo.get(&key) {
            return Ok(Type::Struct(concrete.clone()));
        }

        let concrete = format!("{base}_{tag}");
        self.check_free(&concrete, span)?;

        let mut fields = Vec::with_capacity(template.fields.len());
        for field in &template.fields {
            let field_ty =
                self.resolve_inner(&field.ty, Some((&template.param, &arg)), 0, out)?;
            if field_ty == Type::Void {
                return Err(CompileError::type_error(
                    format!("field '{}' cannot be Void", field.name.node),
                    field.name.span,
                ));
            }
            fields.push((field.name.node.clone(), field_ty));
        }

        let rendered: Vec<String> = fields.iter().map(|(n, t)| t.declaration(n)).collect();
        self.struct_sources
            .insert(concrete.clone(), StructSource::Resolved(fields.clone()));
        self.struct_infos.insert(
            concrete.clone(),
            StructInfo {
                name: concrete.clone(),
                fields,
            },
        );
        self.memo.insert(key, concrete.clone());
        out.push_struct(&concrete, rendered);

        if let Some(decl) = template.class_decl {
            self.pending_classes.push(PendingClass {
                decl,
                concrete_name: concrete.clone(),
                param: template.param,
                arg,
            });
        }

        Ok(Type::Struct(concrete))
    }

    /// Resolved field list for a struct, computed once on first use
    pub fn struct_info(
        &mut self,
        name: &str,
        span: Span,
        out: &mut CProgram,
    ) -> Result<StructInfo> {
        if let Some(info) = self.struct_infos.get(name) {
            return Ok(info.clone());
        }
        let source = match self.struct_sources.get(name) {
            Some(StructSource::Ast(fields)) => fields.clone(),
            Some(StructSource::Resolved(fields)) => {
                let info = StructInfo {
                    name: name.to_string(),
                    fields: fields.clone(),
                };
                self.struct_infos.insert(name.to_string(), info.clone());
                return Ok(info);
            }
            None => {
                return Err(CompileError::type_error(
                    format!("'{name}' is not a struct"),
                    span,
                ));
            }
        };
        let mut fields = Vec::with_capacity(source.len());
        for field in &source {
            let field_ty = self.resolve_inner(&field.ty, None, 0, out)?;
            if field_ty == Type::Void {
                return Err(CompileError::type_error(
                    format!("field '{}' cannot be Void", field.name.node),
                    field.name.span,
                ));
            }
            fields.push((field.name.node.clone(), field_ty));
        }
        let info = StructInfo {
            name: name.to_string(),
            fields,
        };
        self.struct_infos.insert(name.to_string(), info.clone());
        Ok(info)
    }

    /// Emit a declared struct at its declaration position
    pub fn materialize_struct(&mut self, name: &str, span: Span, out: &mut CProgram) -> Result<()> {
        let info = self.struct_info(name, span, out)?;
        let rendered = info.fields.iter().map(|(n, t)| t.declaration(n)).collect();
        out.push_struct(name, rendered);
        Ok(())
    }

    /// Emit a tagged union: variant structs, then the tag enum and wrapper,
    /// as one contiguous run in the struct stream.
    pub fn materialize_union(&mut self, name: &str, span: Span, out: &mut CProgram) -> Result<()> {
        let def = match self.unions.get(name) {
            Some(def) => def.clone(),
            None => {
                return Err(CompileError::type_error(
                    format!("'{name}' is not a tagged union"),
                    span,
                ));
            }
        };
        let mut variant_names = Vec::with_capacity(def.variants.len());
        for variant in &def.variants {
            self.materialize_struct(&variant.name.node, variant.name.span, out)?;
            variant_names.push(variant.name.node.clone());
        }
        out.push_union(name, variant_names);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Spanned<TypeExpr> {
        Spanned::new(
            TypeExpr::Named {
                name: name.to_string(),
                generic_arg: None,
            },
            Span::new(0, 0),
        )
    }

    fn generic(base: &str, arg: Spanned<TypeExpr>) -> Spanned<TypeExpr> {
        Spanned::new(
            TypeExpr::Named {
                name: base.to_string(),
                generic_arg: Some(Box::new(arg)),
            },
            Span::new(0, 0),
        )
    }

    fn field(name: &str, ty: Spanned<TypeExpr>) -> FieldDef {
        FieldDef {
            name: Spanned::new(name.to_string(), Span::new(0, 0)),
            ty,
        }
    }

    fn wrapper_template() -> StructDef {
        StructDef {
            name: Spanned::new("Wrapper".to_string(), Span::new(0, 0)),
            generic_param: Some(Spanned::new("T".to_string(), Span::new(0, 0))),
            fields: vec![field("value", named("T"))],
            span: Span::new(0, 0),
        }
    }

    #[test]
    fn test_numeric_c_types() {
        let expected = [
            ("U8", "unsigned char"),
            ("U16", "unsigned short"),
            ("U32", "unsigned int"),
            ("U64", "unsigned long long"),
            ("USize", "unsigned long"),
            ("I8", "signed char"),
            ("I16", "short"),
            ("I32", "int"),
            ("I64", "long long"),
        ];
        for (name, c_type) in expected {
            let kind = NumericKind::from_name(name).unwrap();
            assert_eq!(kind.c_type(), c_type);
            assert_eq!(kind.canonical(), name);
        }
    }

    #[test]
    fn test_numeric_names_case_insensitive() {
        assert_eq!(NumericKind::from_name("i32"), Some(NumericKind::I32));
        assert_eq!(NumericKind::from_name("USIZE"), Some(NumericKind::USize));
        assert_eq!(NumericKind::from_name("float"), None);
    }

    #[test]
    fn test_declaration_forms() {
        let int = Type::Numeric(NumericKind::I32);
        assert_eq!(int.declaration("x"), "int x");

        let array = Type::Array {
            elem: Box::new(int.clone()),
            len: 4,
        };
        assert_eq!(array.declaration("buf"), "int buf[4]");

        let fn_ptr = Type::Function {
            params: vec![int.clone(), int.clone()],
            ret: Box::new(int.clone()),
        };
        assert_eq!(fn_ptr.declaration("adder"), "int (*adder)(int, int)");

        let no_args = Type::Function {
            params: vec![],
            ret: Box::new(Type::Void),
        };
        assert_eq!(no_args.declaration("doSomething"), "void (*doSomething)()");

        let ptr = Type::Pointer(Box::new(int));
        assert_eq!(ptr.declaration("p"), "int* p");
    }

    #[test]
    fn test_resolve_pointer_chain() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        let ty = Spanned::new(
            TypeExpr::Pointer(Box::new(Spanned::new(
                TypeExpr::Pointer(Box::new(named("I32"))),
                Span::new(0, 0),
            ))),
            Span::new(0, 0),
        );
        let resolved = resolver.resolve(&ty, &mut out).unwrap();
        assert_eq!(resolved.c_type(), "int**");
    }

    #[test]
    fn test_alias_chain_resolves() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        resolver
            .register_alias(&Spanned::new("A".to_string(), Span::new(0, 0)), named("B"))
            .unwrap();
        resolver
            .register_alias(&Spanned::new("B".to_string(), Span::new(0, 0)), named("I16"))
            .unwrap();
        let resolved = resolver.resolve(&named("A"), &mut out).unwrap();
        assert_eq!(resolved, Type::Numeric(NumericKind::I16));
    }

    #[test]
    fn test_alias_cycle_is_fatal() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        resolver
            .register_alias(&Spanned::new("A".to_string(), Span::new(0, 0)), named("B"))
            .unwrap();
        resolver
            .register_alias(&Spanned::new("B".to_string(), Span::new(0, 0)), named("A"))
            .unwrap();
        let err = resolver.resolve(&named("A"), &mut out).unwrap_err();
        assert!(err.message().contains("cycle"));
    }

    #[test]
    fn test_duplicate_type_name_rejected() {
        let mut resolver = TypeResolver::new();
        resolver
            .register_enum(
                &Spanned::new("Thing".to_string(), Span::new(0, 0)),
                vec!["A".to_string()],
            )
            .unwrap();
        let err = resolver
            .register_alias(
                &Spanned::new("Thing".to_string(), Span::new(0, 0)),
                named("I32"),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateDefinition { .. }));
    }

    #[test]
    fn test_monomorphization_memo_reuses_instance() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        resolver.register_struct(&wrapper_template()).unwrap();

        let first = resolver
            .resolve(&generic("Wrapper", named("I32")), &mut out)
            .unwrap();
        let second = resolver
            .resolve(&generic("Wrapper", named("I32")), &mut out)
            .unwrap();
        assert_eq!(first, Type::Struct("Wrapper_I32".to_string()));
        assert_eq!(first, second);
        assert_eq!(out.render().unwrap().matches("struct Wrapper_I32 {").count(), 1);
    }

    #[test]
    fn test_distinct_arguments_make_distinct_instances() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        resolver.register_struct(&wrapper_template()).unwrap();

        resolver
            .resolve(&generic("Wrapper", named("I32")), &mut out)
            .unwrap();
        resolver
            .resolve(&generic("Wrapper", named("Bool")), &mut out)
            .unwrap();
        let rendered = out.render().unwrap();
        assert!(rendered.contains("struct Wrapper_I32 {\n    int value;\n};"));
        assert!(rendered.contains("struct Wrapper_Bool {\n    int value;\n};"));
    }

    #[test]
    fn test_generic_argument_must_be_taggable() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        resolver.register_struct(&wrapper_template()).unwrap();

        let err = resolver
            .resolve(&generic("Wrapper", named("Void")), &mut out)
            .unwrap_err();
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn test_pointer_generic_argument_tag() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        resolver.register_struct(&wrapper_template()).unwrap();

        let arg = Spanned::new(TypeExpr::Pointer(Box::new(named("U8"))), Span::new(0, 0));
        let resolved = resolver
            .resolve(&generic("Wrapper", arg), &mut out)
            .unwrap();
        assert_eq!(resolved, Type::Struct("Wrapper_U8Ptr".to_string()));
    }

    #[test]
    fn test_nested_generic_instantiation() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        resolver.register_struct(&wrapper_template()).unwrap();

        let inner = generic("Wrapper", named("I32"));
        let resolved = resolver
            .resolve(&generic("Wrapper", inner), &mut out)
            .unwrap();
        assert_eq!(resolved, Type::Struct("Wrapper_Wrapper_I32".to_string()));
        // inner instance materializes before the outer one
        let rendered = out.render().unwrap();
        let inner_pos = rendered.find("struct Wrapper_I32 {").unwrap();
        let outer_pos = rendered.find("struct Wrapper_Wrapper_I32 {").unwrap();
        assert!(inner_pos < outer_pos);
    }

    #[test]
    fn test_unknown_type_errors() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        let err = resolver.resolve(&named("Mystery"), &mut out).unwrap_err();
        assert!(err.message().contains("unknown type"));
    }

    #[test]
    fn test_struct_info_lazy_resolution() {
        let mut resolver = TypeResolver::new();
        let mut out = CProgram::new();
        let def = StructDef {
            name: Spanned::new("Point".to_string(), Span::new(0, 0)),
            generic_param: None,
            fields: vec![field("x", named("I32")), field("y", named("I32"))],
            span: Span::new(0, 0),
        };
        resolver.register_struct(&def).unwrap();

        let info = resolver
            .struct_info("Point", Span::new(0, 0), &mut out)
            .unwrap();
        assert_eq!(info.field("x"), Some(&Type::Numeric(NumericKind::I32)));
        assert_eq!(info.field("missing"), None);
        // info computation alone does not materialize anything
        assert_eq!(out.render().unwrap(), "");
    }
}
