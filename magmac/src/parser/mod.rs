//! Recursive descent parser
//!
//! Consumes the token stream into an `ast::Program`. Top-level item shapes
//! are dispatched on their leading keyword in a fixed priority; inside
//! bodies, statement shapes likewise. There is no error recovery: the first
//! shape that fails to validate aborts the whole parse.

use crate::ast::{
    BinOp, Bound, BoundOp, BoundValue, EnumDef, Expr, FieldDef, FnDecl, ImportDecl, Item, LetStmt,
    Param, Program, Span, Spanned, Stmt, StructDef, TaggedUnionDef, TypeAliasDecl, TypeExpr, UnOp,
    UnionVariant,
};
use crate::error::{CompileError, Result};
use crate::lexer::Token;


const STACK_RED_ZONE: usize = 128 * 1024; // 128KB remaining triggers growth
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024; // Grow by 4MB each time

/// Parse tokens into AST
pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Program> {
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn peek_second(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(tok, _)| tok)
    }

    /// Span of the current token, or a caret past the end of input
    fn span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => *span,
            None => {
                let end = self.tokens.last().map(|(_, span)| span.end).unwrap_or(0);
                Span::new(end, end)
            }
        }
    }

    /// Span of the most recently consumed token
    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            return Span::new(0, 0);
        }
        self.tokens[self.pos - 1].1
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Span> {
        if self.at(token) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.unexpected(&format!("'{token}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                let span = self.span();
                self.pos += 1;
                Ok(Spanned::new(name, span))
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn expect_int(&mut self) -> Result<Spanned<i128>> {
        match self.peek() {
            Some(Token::IntLit(value)) => {
                let value = *value;
                let span = self.span();
                self.pos += 1;
                Ok(Spanned::new(value, span))
            }
            _ => Err(self.unexpected("an integer literal")),
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        let found = match self.peek() {
            Some(token) => format!("'{token}'"),
            None => "end of input".to_string(),
        };
        CompileError::syntax(format!("expected {expected}, found {found}"), self.span())
    }

    fn parse_program(&mut self) -> Result<Program> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            items.push(self.parse_item()?);
        }
        Ok(Program { items })
    }

    /// Top-level items, dispatched on their leading keyword(s)
    fn parse_item(&mut self) -> Result<Spanned<Item>> {
        match self.peek() {
            Some(Token::Import) => self.parse_import(),
            Some(Token::Type) => self.parse_type_alias(),
            Some(Token::Struct) if self.peek_second() == Some(&Token::Enum) => {
                self.parse_tagged_union()
            }
            Some(Token::Struct) => self.parse_struct(),
            Some(Token::Enum) => self.parse_enum(),
            Some(Token::Extern) => self.parse_extern_fn(),
            Some(Token::Class) => self.parse_class_fn(),
            Some(Token::Fn) => {
                let decl = self.parse_fn_decl()?;
                let span = decl.span;
                Ok(Spanned::new(Item::Fn(decl), span))
            }
            Some(Token::Let) => {
                let stmt = self.parse_let()?;
                let span = stmt.span;
                Ok(Spanned::new(Item::GlobalLet(stmt), span))
            }
            _ => Err(self.unexpected("an item")),
        }
    }

    fn parse_import(&mut self) -> Result<Spanned<Item>> {
        let start = self.expect(&Token::Import)?;
        let name = self.expect_ident()?;
        self.expect(&Token::Semi)?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(Item::Import(ImportDecl { name }), span))
    }

    fn parse_type_alias(&mut self) -> Result<Spanned<Item>> {
        let start = self.expect(&Token::Type)?;
        let name = self.expect_ident()?;
        self.expect(&Token::Eq)?;
        let target = self.parse_type()?;
        self.expect(&Token::Semi)?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(
            Item::TypeAlias(TypeAliasDecl { name, target }),
            span,
        ))
    }

    fn parse_struct(&mut self) -> Result<Spanned<Item>> {
        let start = self.expect(&Token::Struct)?;
        let name = self.expect_ident()?;
        let generic_param = self.parse_generic_param()?;
        self.expect(&Token::LBrace)?;
        let fields = self.parse_field_list()?;
        self.expect(&Token::RBrace)?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(
            Item::Struct(StructDef {
                name,
                generic_param,
                fields,
                span,
            }),
            span,
        ))
    }

    fn parse_enum(&mut self) -> Result<Spanned<Item>> {
        let start = self.expect(&Token::Enum)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LBrace)?;
        let mut variants = Vec::new();
        while !self.at(&Token::RBrace) {
            variants.push(self.expect_ident()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(
            Item::Enum(EnumDef {
                name,
                variants,
                span,
            }),
            span,
        ))
    }

    fn parse_tagged_union(&mut self) -> Result<Spanned<Item>> {
        let start = self.expect(&Token::Struct)?;
        self.expect(&Token::Enum)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LBrace)?;
        let mut variants = Vec::new();
        while !self.at(&Token::RBrace) {
            let variant_name = self.expect_ident()?;
            self.expect(&Token::LBrace)?;
            let fields = self.parse_field_list()?;
            self.expect(&Token::RBrace)?;
            variants.push(UnionVariant {
                name: variant_name,
                fields,
            });
        }
        self.expect(&Token::RBrace)?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(
            Item::TaggedUnion(TaggedUnionDef {
                name,
                variants,
                span,
            }),
            span,
        ))
    }

    fn parse_extern_fn(&mut self) -> Result<Spanned<Item>> {
        let start = self.expect(&Token::Extern)?;
        self.expect(&Token::Fn)?;
        let name = self.expect_ident()?;
        let generic_param = self.parse_generic_param()?;
        let params = self.parse_params()?;
        let ret = if self.eat(&Token::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&Token::Semi)?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(
            Item::ExternFn(FnDecl {
                name,
                generic_param,
                params,
                ret,
                body: None,
                span,
            }),
            span,
        ))
    }

    /// `class fn Name(params) => { .. }`; the return type is implied
    fn parse_class_fn(&mut self) -> Result<Spanned<Item>> {
        let start = self.expect(&Token::Class)?;
        self.expect(&Token::Fn)?;
        let name = self.expect_ident()?;
        let generic_param = self.parse_generic_param()?;
        let params = self.parse_params()?;
        self.expect(&Token::FatArrow)?;
        let body = self.parse_block()?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(
            Item::ClassFn(FnDecl {
                name,
                generic_param,
                params,
                ret: None,
                body: Some(body),
                span,
            }),
            span,
        ))
    }

    /// Shared by top-level and nested functions
    fn parse_fn_decl(&mut self) -> Result<FnDecl> {
        let start = self.expect(&Token::Fn)?;
        let name = self.expect_ident()?;
        let generic_param = self.parse_generic_param()?;
        let params = self.parse_params()?;
        let ret = if self.eat(&Token::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&Token::FatArrow)?;
        let body = self.parse_block()?;
        let span = start.merge(self.prev_span());
        Ok(FnDecl {
            name,
            generic_param,
            params,
            ret,
            body: Some(body),
            span,
        })
    }

    /// `<T>` after a name; exactly one parameter
    fn parse_generic_param(&mut self) -> Result<Option<Spanned<String>>> {
        if !self.eat(&Token::Lt) {
            return Ok(None);
        }
        let param = self.expect_ident()?;
        self.expect(&Token::Gt)?;
        Ok(Some(param))
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while !self.at(&Token::RParen) {
            let name = self.expect_ident()?;
            self.expect(&Token::Colon)?;
            let ty = self.parse_type()?;
            let bound = self.parse_bound()?;
            params.push(Param { name, ty, bound });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(params)
    }

    /// `name: Type` fields, `;`-separated with optional trailing `;`
    fn parse_field_list(&mut self) -> Result<Vec<FieldDef>> {
        let mut fields = Vec::new();
        while !self.at(&Token::RBrace) {
            let name = self.expect_ident()?;
            self.expect(&Token::Colon)?;
            let ty = self.parse_type()?;
            fields.push(FieldDef { name, ty });
            if !self.eat(&Token::Semi) {
                break;
            }
        }
        Ok(fields)
    }

    /// Optional declared bound after a type: `> 10`, `== 3`, `< arr.length`
    fn parse_bound(&mut self) -> Result<Option<Spanned<Bound>>> {
        let op = match self.peek() {
            Some(Token::Lt) => BoundOp::Lt,
            Some(Token::LtEq) => BoundOp::Le,
            Some(Token::Gt) => BoundOp::Gt,
            Some(Token::GtEq) => BoundOp::Ge,
            Some(Token::EqEq) => BoundOp::Eq,
            _ => return Ok(None),
        };
        let start = self.span();
        self.pos += 1;
        let value = match self.peek() {
            Some(Token::Ident(_)) => {
                let array = self.expect_ident()?;
                self.expect(&Token::Dot)?;
                let attr = self.expect_ident()?;
                if attr.node != "length" {
                    return Err(CompileError::syntax(
                        format!("expected 'length', found '{}'", attr.node),
                        attr.span,
                    ));
                }
                BoundValue::Length(array)
            }
            _ => {
                let negative = self.eat(&Token::Minus);
                let int = self.expect_int()?;
                BoundValue::Int(if negative { -int.node } else { int.node })
            }
        };
        let span = start.merge(self.prev_span());
        Ok(Some(Spanned::new(Bound { op, value }, span)))
    }

    fn parse_type(&mut self) -> Result<Spanned<TypeExpr>> {
        let start = self.span();
        match self.peek() {
            Some(Token::Star) => {
                self.pos += 1;
                let inner = self.parse_type()?;
                let span = start.merge(inner.span);
                Ok(Spanned::new(TypeExpr::Pointer(Box::new(inner)), span))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let mut params = Vec::new();
                while !self.at(&Token::RParen) {
                    params.push(self.parse_type()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen)?;
                self.expect(&Token::FatArrow)?;
                let ret = self.parse_type()?;
                let span = start.merge(self.prev_span());
                Ok(Spanned::new(
                    TypeExpr::Function {
                        params,
                        ret: Box::new(ret),
                    },
                    span,
                ))
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let elem = self.parse_type()?;
                self.expect(&Token::Semi)?;
                let len_lit = self.expect_int()?;
                let len = u64::try_from(len_lit.node).map_err(|_| {
                    CompileError::syntax("array length out of range", len_lit.span)
                })?;
                self.expect(&Token::RBracket)?;
                let span = start.merge(self.prev_span());
                Ok(Spanned::new(
                    TypeExpr::Array {
                        elem: Box::new(elem),
                        len,
                    },
                    span,
                ))
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident()?;
                let generic_arg = if self.at(&Token::Lt) && self.generic_arg_follows() {
                    self.pos += 1;
                    let arg = self.parse_type()?;
                    self.expect(&Token::Gt)?;
                    Some(Box::new(arg))
                } else {
                    None
                };
                let span = start.merge(self.prev_span());
                Ok(Spanned::new(
                    TypeExpr::Named {
                        name: name.node,
                        generic_arg,
                    },
                    span,
                ))
            }
            _ => Err(self.unexpected("a type")),
        }
    }

    /// After a type name, `<` opens a generic argument only when what
    /// follows reads as a type rather than as a declared bound
    /// (`< 10`, `< -10`, `< arr.length`).
    fn generic_arg_follows(&self) -> bool {
        match self.peek_second() {
            Some(Token::Ident(_)) => !matches!(
                self.tokens.get(self.pos + 2).map(|(tok, _)| tok),
                Some(Token::Dot)
            ),
            Some(Token::Star | Token::LParen | Token::LBracket) => true,
            _ => false,
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Spanned<Stmt>>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&Token::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    /// Parse a statement with automatic stack growth for deep nesting
    fn parse_stmt(&mut self) -> Result<Spanned<Stmt>> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.parse_stmt_inner())
    }

    fn parse_stmt_inner(&mut self) -> Result<Spanned<Stmt>> {
        let start = self.span();
        match self.peek() {
            Some(Token::LBrace) => {
                let body = self.parse_block()?;
                let span = start.merge(self.prev_span());
                Ok(Spanned::new(Stmt::Block(body), span))
            }
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Break) => {
                self.pos += 1;
                self.expect(&Token::Semi)?;
                Ok(Spanned::new(Stmt::Break, start.merge(self.prev_span())))
            }
            Some(Token::Continue) => {
                self.pos += 1;
                self.expect(&Token::Semi)?;
                Ok(Spanned::new(Stmt::Continue, start.merge(self.prev_span())))
            }
            Some(Token::Fn) => {
                let decl = self.parse_fn_decl()?;
                let span = decl.span;
                Ok(Spanned::new(Stmt::Fn(decl), span))
            }
            Some(Token::Let) => {
                let stmt = self.parse_let()?;
                let span = stmt.span;
                Ok(Spanned::new(Stmt::Let(stmt), span))
            }
            Some(Token::Return) => {
                self.pos += 1;
                let value = if self.at(&Token::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semi)?;
                Ok(Spanned::new(
                    Stmt::Return(value),
                    start.merge(self.prev_span()),
                ))
            }
            Some(Token::Ident(_)) => {
                if self.peek_second() == Some(&Token::Eq) {
                    let name = self.expect_ident()?;
                    self.pos += 1; // '='
                    let value = self.parse_expr()?;
                    self.expect(&Token::Semi)?;
                    Ok(Spanned::new(
                        Stmt::Assign { name, value },
                        start.merge(self.prev_span()),
                    ))
                } else {
                    // only calls may stand as expression statements
                    let expr = self.parse_expr()?;
                    if !matches!(expr.node, Expr::Call { .. }) {
                        return Err(CompileError::syntax("expected a statement", expr.span));
                    }
                    self.expect(&Token::Semi)?;
                    Ok(Spanned::new(
                        Stmt::Call(expr),
                        start.merge(self.prev_span()),
                    ))
                }
            }
            _ => Err(self.unexpected("a statement")),
        }
    }

    fn parse_if(&mut self) -> Result<Spanned<Stmt>> {
        let start = self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(
            Stmt::If {
                cond,
                then_body,
                else_body,
            },
            span,
        ))
    }

    fn parse_while(&mut self) -> Result<Spanned<Stmt>> {
        let start = self.expect(&Token::While)?;
        self.expect(&Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(Stmt::While { cond, body }, span))
    }

    fn parse_let(&mut self) -> Result<LetStmt> {
        let start = self.expect(&Token::Let)?;
        let mutable = self.eat(&Token::Mut);
        let name = self.expect_ident()?;
        let (ty, bound) = if self.eat(&Token::Colon) {
            let ty = self.parse_type()?;
            let bound = self.parse_bound()?;
            (Some(ty), bound)
        } else {
            (None, None)
        };
        let init = if self.eat(&Token::Eq) {
            Some(self.parse_init()?)
        } else {
            None
        };
        self.expect(&Token::Semi)?;
        let span = start.merge(self.prev_span());
        Ok(LetStmt {
            mutable,
            name,
            ty,
            bound,
            init,
            span,
        })
    }

    /// `let` initializers additionally allow array and struct literals
    fn parse_init(&mut self) -> Result<Spanned<Expr>> {
        let start = self.span();
        match self.peek() {
            Some(Token::LBracket) => {
                self.pos += 1;
                let mut values = Vec::new();
                while !self.at(&Token::RBracket) {
                    values.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Spanned::new(
                    Expr::ArrayLit(values),
                    start.merge(self.prev_span()),
                ))
            }
            Some(Token::Ident(_)) if self.peek_second() == Some(&Token::LBrace) => {
                self.parse_struct_lit()
            }
            _ => self.parse_expr(),
        }
    }

    fn parse_struct_lit(&mut self) -> Result<Spanned<Expr>> {
        let start = self.span();
        let name = self.expect_ident()?;
        self.expect(&Token::LBrace)?;
        let mut values = Vec::new();
        while !self.at(&Token::RBrace) {
            values.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Spanned::new(
            Expr::StructLit { name, values },
            start.merge(self.prev_span()),
        ))
    }

    /// Parse an expression with automatic stack growth for deep recursion
    fn parse_expr(&mut self) -> Result<Spanned<Expr>> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.parse_comparison())
    }

    /// Comparisons do not chain: at most one per expression level
    fn parse_comparison(&mut self) -> Result<Spanned<Expr>> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::LtEq) => Some(BinOp::Le),
            Some(Token::GtEq) => Some(BinOp::Ge),
            Some(Token::EqEq) => Some(BinOp::Eq),
            Some(Token::NotEq) => Some(BinOp::Ne),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let right = self.parse_additive()?;
                let span = left.span.merge(right.span);
                Ok(Spanned::new(
                    Expr::Binary {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    },
                    span,
                ))
            }
            None => Ok(left),
        }
    }

    fn parse_additive(&mut self) -> Result<Spanned<Expr>> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            let span = left.span.merge(right.span);
            left = Spanned::new(
                Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Spanned<Expr>> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            let span = left.span.merge(right.span);
            left = Spanned::new(
                Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Spanned<Expr>> {
        let start = self.span();
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnOp::Neg),
            Some(Token::Plus) => Some(UnOp::Plus),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let expr = self.parse_unary()?;
                let span = start.merge(expr.span);
                Ok(Spanned::new(
                    Expr::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                    span,
                ))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Spanned<Expr>> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    // calls apply to plain names only
                    let callee = match &expr.node {
                        Expr::Var(name) => Spanned::new(name.clone(), expr.span),
                        _ => {
                            return Err(CompileError::syntax(
                                "only named functions can be called",
                                expr.span,
                            ));
                        }
                    };
                    self.pos += 1;
                    let mut args = Vec::new();
                    while !self.at(&Token::RParen) {
                        args.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Spanned::new(Expr::Call { callee, args }, span);
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = self.expect_ident()?;
                    let span = expr.span.merge(field.span);
                    expr = Spanned::new(
                        Expr::Field {
                            expr: Box::new(expr),
                            field,
                        },
                        span,
                    );
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Spanned::new(
                        Expr::Index {
                            expr: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Spanned<Expr>> {
        let start = self.span();
        match self.peek() {
            Some(Token::IntLit(_)) => {
                let value = self.expect_int()?;
                Ok(value.map(Expr::IntLit))
            }
            Some(Token::True) => {
                self.pos += 1;
                Ok(Spanned::new(Expr::BoolLit(true), start))
            }
            Some(Token::False) => {
                self.pos += 1;
                Ok(Spanned::new(Expr::BoolLit(false), start))
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident()?;
                Ok(name.map(Expr::Var))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                if matches!(self.peek(), Some(Token::Ident(_)))
                    && self.peek_second() == Some(&Token::LBrace)
                {
                    // literal projection: (Name { .. }).field
                    let lit = self.parse_struct_lit()?;
                    self.expect(&Token::RParen)?;
                    self.expect(&Token::Dot)?;
                    let field = self.expect_ident()?;
                    let span = start.merge(field.span);
                    Ok(Spanned::new(
                        Expr::Field {
                            expr: Box::new(lit),
                            field,
                        },
                        span,
                    ))
                } else {
                    // grouping parens leave no AST node behind
                    let expr = self.parse_expr()?;
                    self.expect(&Token::RParen)?;
                    Ok(Spanned::new(expr.node, start.merge(self.prev_span())))
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}
