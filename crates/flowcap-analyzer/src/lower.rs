//! Source frontend: parses Rust text with `ra_ap_syntax` and lowers
//! functions, methods, and closures into the closed IR.
//!
//! Lowering is where surface syntax gets classified. Method calls named
//! `wrap`, `map`, `combine`, `declassify`, and `check_and_consume` become
//! the corresponding [`CallOp`] with their string-literal configuration
//! arguments resolved; everything else becomes [`CallOp::Opaque`]. A
//! construct with no lowering at all becomes [`CallOp::Unsupported`],
//! which the propagation pass refuses to vouch for.

use ra_ap_syntax::ast::{self, HasArgList, HasAttrs, HasLoopBody, HasModuleItem, HasName};
use ra_ap_syntax::{AstNode, Edition, SourceFile, SyntaxNode};

use crate::ir::{CallOp, Expr, FuncIr, ParamIr, Span, Stmt};
use crate::AnalyzerError;

/// Parse `source` and lower every function, associated function, and
/// closure into analyzable units. Any parse error fails the whole file:
/// code the frontend cannot read is code the analysis cannot vouch for.
pub fn lower_source(file: &str, source: &str) -> Result<Vec<FuncIr>, AnalyzerError> {
    let parse = SourceFile::parse(source, Edition::Edition2021);
    if let Some(error) = parse.errors().into_iter().next() {
        return Err(AnalyzerError::Parse {
            file: file.to_string(),
            message: error.to_string(),
        });
    }
    let tree = parse.tree();

    let mut lowerer = Lowerer {
        file: file.to_string(),
        line_starts: line_starts(source),
        current: String::new(),
        units: Vec::new(),
    };
    for item in tree.items() {
        lowerer.lower_item(item);
    }
    Ok(lowerer.units)
}

/// Byte offsets at which each line begins, for offset to line/column
/// conversion.
fn line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (offset, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            starts.push(offset + 1);
        }
    }
    starts
}

struct Lowerer {
    file: String,
    line_starts: Vec<usize>,
    /// Name of the unit currently being lowered, for closure naming.
    current: String,
    units: Vec<FuncIr>,
}

impl Lowerer {
    fn span_of(&self, node: &SyntaxNode) -> Span {
        let offset = u32::from(node.text_range().start()) as usize;
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insert) => insert - 1,
        };
        Span {
            line: line as u32 + 1,
            column: (offset - self.line_starts[line]) as u32 + 1,
        }
    }

    fn lower_item(&mut self, item: ast::Item) {
        match item {
            ast::Item::Fn(func) => self.lower_fn(None, func),
            ast::Item::Impl(imp) => {
                let self_ty = imp
                    .self_ty()
                    .map(|t| t.syntax().text().to_string())
                    .unwrap_or_default();
                if let Some(items) = imp.assoc_item_list() {
                    for assoc in items.assoc_items() {
                        if let ast::AssocItem::Fn(func) = assoc {
                            self.lower_fn(Some(&self_ty), func);
                        }
                    }
                }
            }
            ast::Item::Module(module) => {
                if let Some(list) = module.item_list() {
                    for inner in list.items() {
                        self.lower_item(inner);
                    }
                }
            }
            _ => {}
        }
    }

    fn lower_fn(&mut self, owner: Option<&str>, func: ast::Fn) {
        let bare = func
            .name()
            .map(|n| n.text().to_string())
            .unwrap_or_else(|| "<anonymous>".to_string());
        let name = match owner {
            Some(owner) => format!("{owner}::{bare}"),
            None => bare,
        };
        let params = func
            .param_list()
            .map(|list| list.params().filter_map(lower_param).collect())
            .unwrap_or_default();
        let span = self.span_of(func.syntax());

        let previous = std::mem::replace(&mut self.current, name.clone());
        let body = func
            .body()
            .map(|block| self.lower_block(&block))
            .unwrap_or_default();
        self.current = previous;

        self.units.push(FuncIr {
            file: self.file.clone(),
            name,
            span,
            params,
            body,
        });
    }

    fn lower_block(&mut self, block: &ast::BlockExpr) -> Vec<Stmt> {
        let mut out = Vec::new();
        for stmt in block.statements() {
            match stmt {
                ast::Stmt::LetStmt(let_stmt) => {
                    let span = self.span_of(let_stmt.syntax());
                    let value = let_stmt
                        .initializer()
                        .map(|init| self.lower_expr(init))
                        .unwrap_or(Expr::Literal { span });
                    let target = match let_stmt.pat() {
                        Some(ast::Pat::IdentPat(pat)) => {
                            pat.name().map(|n| n.text().to_string())
                        }
                        _ => None,
                    };
                    match target {
                        Some(target) => out.push(Stmt::Assign { target, value }),
                        None => out.push(Stmt::Expr { value }),
                    }
                }
                ast::Stmt::ExprStmt(expr_stmt) => {
                    if let Some(expr) = expr_stmt.expr() {
                        out.extend(self.lower_stmt_expr(expr));
                    }
                }
                ast::Stmt::Item(_) => {}
            }
        }
        if let Some(tail) = block.tail_expr() {
            let value = self.lower_expr(tail);
            out.push(Stmt::Return { value: Some(value) });
        }
        out
    }

    /// Lower an expression appearing in statement position, where
    /// control flow can be kept structural as [`Stmt::Branch`].
    fn lower_stmt_expr(&mut self, expr: ast::Expr) -> Vec<Stmt> {
        match expr {
            ast::Expr::IfExpr(if_expr) => {
                let mut out = Vec::new();
                if let Some(cond) = if_expr.condition() {
                    let value = self.lower_expr(cond);
                    out.push(Stmt::Expr { value });
                }
                let then_arm = if_expr
                    .then_branch()
                    .map(|block| self.lower_block(&block))
                    .unwrap_or_default();
                let else_arm = match if_expr.else_branch() {
                    Some(ast::ElseBranch::Block(block)) => self.lower_block(&block),
                    Some(ast::ElseBranch::IfExpr(nested)) => {
                        self.lower_stmt_expr(ast::Expr::IfExpr(nested))
                    }
                    None => Vec::new(),
                };
                out.push(Stmt::Branch {
                    arms: vec![then_arm, else_arm],
                });
                out
            }
            ast::Expr::MatchExpr(match_expr) => {
                let mut out = Vec::new();
                if let Some(scrutinee) = match_expr.expr() {
                    let value = self.lower_expr(scrutinee);
                    out.push(Stmt::Expr { value });
                }
                let mut arms = Vec::new();
                if let Some(list) = match_expr.match_arm_list() {
                    for arm in list.arms() {
                        match arm.expr() {
                            Some(ast::Expr::BlockExpr(block)) => {
                                arms.push(self.lower_block(&block));
                            }
                            Some(other) => arms.push(self.lower_stmt_expr(other)),
                            None => arms.push(Vec::new()),
                        }
                    }
                }
                // A match with no arms is unreachable code; keep the
                // scrutinee evaluation only.
                if !arms.is_empty() {
                    out.push(Stmt::Branch { arms });
                }
                out
            }
            ast::Expr::WhileExpr(while_expr) => {
                let mut out = Vec::new();
                if let Some(cond) = while_expr.condition() {
                    let value = self.lower_expr(cond);
                    out.push(Stmt::Expr { value });
                }
                let body = while_expr
                    .loop_body()
                    .map(|block| self.lower_block(&block))
                    .unwrap_or_default();
                out.push(Stmt::Branch {
                    arms: vec![body, Vec::new()],
                });
                out
            }
            ast::Expr::ForExpr(for_expr) => {
                let mut out = Vec::new();
                // The loop binding inherits the iterable's level; an
                // element of a raw collection is raw, an element of an
                // undetermined one is undetermined.
                let iterable = for_expr.iterable().map(|e| self.lower_expr(e));
                let target = match for_expr.pat() {
                    Some(ast::Pat::IdentPat(pat)) => pat.name().map(|n| n.text().to_string()),
                    _ => None,
                };
                match (target, iterable) {
                    (Some(target), Some(value)) => out.push(Stmt::Assign { target, value }),
                    (None, Some(value)) => out.push(Stmt::Expr { value }),
                    _ => {}
                }
                let body = for_expr
                    .loop_body()
                    .map(|block| self.lower_block(&block))
                    .unwrap_or_default();
                out.push(Stmt::Branch {
                    arms: vec![body, Vec::new()],
                });
                out
            }
            ast::Expr::LoopExpr(loop_expr) => {
                let body = loop_expr
                    .loop_body()
                    .map(|block| self.lower_block(&block))
                    .unwrap_or_default();
                vec![Stmt::Branch {
                    arms: vec![body, Vec::new()],
                }]
            }
            ast::Expr::ReturnExpr(ret) => {
                let value = ret.expr().map(|e| self.lower_expr(e));
                vec![Stmt::Return { value }]
            }
            ast::Expr::BlockExpr(block) => self.lower_block(&block),
            ast::Expr::BinExpr(bin)
                if matches!(bin.op_kind(), Some(ast::BinaryOp::Assignment { .. })) =>
            {
                self.lower_assignment(bin)
            }
            other => {
                let value = self.lower_expr(other);
                vec![Stmt::Expr { value }]
            }
        }
    }

    /// `x = rhs` and `x op= rhs` rebind `x`; a compound assignment keeps
    /// the old binding in the payload so its level is not lost.
    fn lower_assignment(&mut self, bin: ast::BinExpr) -> Vec<Stmt> {
        let span = self.span_of(bin.syntax());
        let compound = matches!(
            bin.op_kind(),
            Some(ast::BinaryOp::Assignment { op: Some(_) })
        );
        let target = bin.lhs().and_then(|lhs| match lhs {
            ast::Expr::PathExpr(p) => p.path().and_then(|path| {
                if path.qualifier().is_some() {
                    return None;
                }
                path.segment()
                    .and_then(|seg| seg.name_ref())
                    .map(|n| n.text().to_string())
            }),
            _ => None,
        });
        let rhs = bin
            .rhs()
            .map(|r| self.lower_expr(r))
            .unwrap_or(Expr::Literal { span });
        match target {
            Some(target) => {
                let value = if compound {
                    Expr::Call {
                        op: CallOp::Opaque {
                            name: "<assign-op>".to_string(),
                        },
                        args: vec![
                            Expr::Ident {
                                name: target.clone(),
                                span,
                            },
                            rhs,
                        ],
                        span,
                    }
                } else {
                    rhs
                };
                vec![Stmt::Assign { target, value }]
            }
            None => {
                // Assignment through a place the analysis does not
                // track; evaluate both sides for their effects.
                let mut out = Vec::new();
                if let Some(lhs) = bin.lhs() {
                    let value = self.lower_expr(lhs);
                    out.push(Stmt::Expr { value });
                }
                out.push(Stmt::Expr { value: rhs });
                out
            }
        }
    }

    fn lower_expr(&mut self, expr: ast::Expr) -> Expr {
        let span = self.span_of(expr.syntax());
        match expr {
            ast::Expr::Literal(_) => Expr::Literal { span },
            ast::Expr::PathExpr(path_expr) => {
                let name = path_expr
                    .path()
                    .map(|p| p.syntax().text().to_string())
                    .unwrap_or_default();
                Expr::Ident { name, span }
            }
            ast::Expr::MethodCallExpr(call) => self.lower_method_call(call, span),
            ast::Expr::CallExpr(call) => {
                let name = call
                    .expr()
                    .and_then(|callee| match callee {
                        ast::Expr::PathExpr(p) => p
                            .path()
                            .and_then(|path| path.segment())
                            .and_then(|seg| seg.name_ref())
                            .map(|n| n.text().to_string()),
                        _ => None,
                    })
                    .unwrap_or_else(|| "<call>".to_string());
                let args = self.lower_args(call.arg_list());
                Expr::Call {
                    op: CallOp::Opaque { name },
                    args,
                    span,
                }
            }
            ast::Expr::ClosureExpr(closure) => {
                self.lower_closure(closure, span);
                Expr::Literal { span }
            }
            ast::Expr::RefExpr(inner) => match inner.expr() {
                Some(e) => self.lower_expr(e),
                None => Expr::Literal { span },
            },
            ast::Expr::ParenExpr(inner) => match inner.expr() {
                Some(e) => self.lower_expr(e),
                None => Expr::Literal { span },
            },
            ast::Expr::TryExpr(inner) => match inner.expr() {
                Some(e) => self.lower_expr(e),
                None => Expr::Literal { span },
            },
            ast::Expr::AwaitExpr(inner) => match inner.expr() {
                Some(e) => self.lower_expr(e),
                None => Expr::Literal { span },
            },
            ast::Expr::BinExpr(bin) => {
                let mut args = Vec::new();
                if let Some(lhs) = bin.lhs() {
                    args.push(self.lower_expr(lhs));
                }
                if let Some(rhs) = bin.rhs() {
                    args.push(self.lower_expr(rhs));
                }
                Expr::Call {
                    op: CallOp::Opaque {
                        name: "<binop>".to_string(),
                    },
                    args,
                    span,
                }
            }
            ast::Expr::PrefixExpr(prefix) => {
                let args = prefix.expr().map(|e| vec![self.lower_expr(e)]).unwrap_or_default();
                Expr::Call {
                    op: CallOp::Opaque {
                        name: "<unop>".to_string(),
                    },
                    args,
                    span,
                }
            }
            ast::Expr::FieldExpr(field) => {
                let args = field.expr().map(|e| vec![self.lower_expr(e)]).unwrap_or_default();
                Expr::Call {
                    op: CallOp::Opaque {
                        name: "<field>".to_string(),
                    },
                    args,
                    span,
                }
            }
            ast::Expr::IndexExpr(index) => {
                let args = index.base().map(|e| vec![self.lower_expr(e)]).unwrap_or_default();
                Expr::Call {
                    op: CallOp::Opaque {
                        name: "<index>".to_string(),
                    },
                    args,
                    span,
                }
            }
            ast::Expr::IfExpr(if_expr) => {
                // Expression position: the value is the join of the arm
                // values. Sink calls inside the arms are still visited
                // because they appear among the payload arguments.
                let mut args = Vec::new();
                if let Some(block) = if_expr.then_branch() {
                    args.extend(self.lower_block_values(&block));
                }
                match if_expr.else_branch() {
                    Some(ast::ElseBranch::Block(block)) => {
                        args.extend(self.lower_block_values(&block));
                    }
                    Some(ast::ElseBranch::IfExpr(nested)) => {
                        args.push(self.lower_expr(ast::Expr::IfExpr(nested)));
                    }
                    None => {}
                }
                Expr::Call {
                    op: CallOp::Opaque {
                        name: "<if>".to_string(),
                    },
                    args,
                    span,
                }
            }
            ast::Expr::MatchExpr(match_expr) => {
                let mut args = Vec::new();
                if let Some(list) = match_expr.match_arm_list() {
                    for arm in list.arms() {
                        if let Some(body) = arm.expr() {
                            args.push(self.lower_expr(body));
                        }
                    }
                }
                Expr::Call {
                    op: CallOp::Opaque {
                        name: "<match>".to_string(),
                    },
                    args,
                    span,
                }
            }
            ast::Expr::BlockExpr(block) => {
                let args = self.lower_block_values(&block);
                Expr::Call {
                    op: CallOp::Opaque {
                        name: "<block>".to_string(),
                    },
                    args,
                    span,
                }
            }
            ast::Expr::MacroExpr(_) | ast::Expr::FormatArgsExpr(_) => Expr::Call {
                op: CallOp::Unsupported,
                args: Vec::new(),
                span,
            },
            _ => Expr::Call {
                op: CallOp::Unsupported,
                args: Vec::new(),
                span,
            },
        }
    }

    /// Lower every expression appearing in a block, statements and tail
    /// alike, as a flat list of values. Used for blocks in expression
    /// position, where bindings cannot be kept.
    fn lower_block_values(&mut self, block: &ast::BlockExpr) -> Vec<Expr> {
        let mut values = Vec::new();
        for stmt in block.statements() {
            match stmt {
                ast::Stmt::LetStmt(let_stmt) => {
                    if let Some(init) = let_stmt.initializer() {
                        values.push(self.lower_expr(init));
                    }
                }
                ast::Stmt::ExprStmt(expr_stmt) => {
                    if let Some(expr) = expr_stmt.expr() {
                        values.push(self.lower_expr(expr));
                    }
                }
                ast::Stmt::Item(_) => {}
            }
        }
        if let Some(tail) = block.tail_expr() {
            values.push(self.lower_expr(tail));
        }
        values
    }

    fn lower_method_call(&mut self, call: ast::MethodCallExpr, span: Span) -> Expr {
        let name = call
            .name_ref()
            .map(|n| n.text().to_string())
            .unwrap_or_default();
        let raw_args: Vec<ast::Expr> = call
            .arg_list()
            .map(|list| list.args().collect())
            .unwrap_or_default();

        match name.as_str() {
            "wrap" => {
                if let (Some(receiver), Some(value), Some(level)) = (
                    call.receiver(),
                    raw_args.first(),
                    raw_args.get(1).and_then(string_literal),
                ) {
                    let args = vec![
                        self.lower_expr(receiver),
                        self.lower_expr(value.clone()),
                    ];
                    self.discard_rest(&raw_args, 2);
                    return Expr::Call {
                        op: CallOp::Wrap { level },
                        args,
                        span,
                    };
                }
                self.unsupported_with_args(&raw_args, span)
            }
            "root_scope" => {
                self.discard_rest(&raw_args, 0);
                Expr::Call {
                    op: CallOp::RootScope,
                    args: Vec::new(),
                    span,
                }
            }
            "map" => {
                if let Some(value) = raw_args.first() {
                    let payload = vec![self.lower_expr(value.clone())];
                    self.discard_rest(&raw_args, 1);
                    return Expr::Call {
                        op: CallOp::Map,
                        args: payload,
                        span,
                    };
                }
                self.unsupported_with_args(&raw_args, span)
            }
            "combine" => {
                if let (Some(left), Some(right)) = (raw_args.first(), raw_args.get(1)) {
                    let payload = vec![
                        self.lower_expr(left.clone()),
                        self.lower_expr(right.clone()),
                    ];
                    self.discard_rest(&raw_args, 2);
                    return Expr::Call {
                        op: CallOp::Combine,
                        args: payload,
                        span,
                    };
                }
                self.unsupported_with_args(&raw_args, span)
            }
            "declassify" => {
                if let (Some(value), Some(target)) =
                    (raw_args.first(), raw_args.get(1).and_then(string_literal))
                {
                    let justified = match raw_args.get(2) {
                        Some(arg) => match string_literal(arg) {
                            Some(text) => !text.trim().is_empty(),
                            // A computed justification cannot be checked
                            // statically; the runtime validates it.
                            None => true,
                        },
                        None => false,
                    };
                    let payload = vec![self.lower_expr(value.clone())];
                    self.discard_rest(&raw_args, 3);
                    return Expr::Call {
                        op: CallOp::Declassify {
                            target,
                            justified,
                        },
                        args: payload,
                        span,
                    };
                }
                self.unsupported_with_args(&raw_args, span)
            }
            "check_and_consume" => {
                if let Some(value) = raw_args.get(1) {
                    let sink = raw_args
                        .first()
                        .and_then(string_literal)
                        .unwrap_or_else(|| "<dynamic>".to_string());
                    let payload = vec![self.lower_expr(value.clone())];
                    self.discard_rest(&raw_args, 2);
                    return Expr::Call {
                        op: CallOp::Sink { name: sink },
                        args: payload,
                        span,
                    };
                }
                self.unsupported_with_args(&raw_args, span)
            }
            _ => {
                let mut args = Vec::new();
                if let Some(receiver) = call.receiver() {
                    args.push(self.lower_expr(receiver));
                }
                for arg in raw_args {
                    args.push(self.lower_expr(arg));
                }
                Expr::Call {
                    op: CallOp::Opaque { name },
                    args,
                    span,
                }
            }
        }
    }

    /// Lower trailing arguments purely for their side effects (closure
    /// bodies become synthetic units) and drop the results.
    fn discard_rest(&mut self, args: &[ast::Expr], from: usize) {
        for arg in args.iter().skip(from) {
            let _ = self.lower_expr(arg.clone());
        }
    }

    fn unsupported_with_args(&mut self, raw_args: &[ast::Expr], span: Span) -> Expr {
        let args = raw_args.iter().map(|a| self.lower_expr(a.clone())).collect();
        Expr::Call {
            op: CallOp::Unsupported,
            args,
            span,
        }
    }

    fn lower_closure(&mut self, closure: ast::ClosureExpr, span: Span) {
        let name = format!("{}::closure@{}", self.current, span.line);
        let params = closure
            .param_list()
            .map(|list| list.params().filter_map(lower_param).collect())
            .unwrap_or_default();

        let previous = std::mem::replace(&mut self.current, name.clone());
        let body = match closure.body() {
            Some(ast::Expr::BlockExpr(block)) => self.lower_block(&block),
            Some(other) => {
                let value = self.lower_expr(other);
                vec![Stmt::Return { value: Some(value) }]
            }
            None => Vec::new(),
        };
        self.current = previous;

        self.units.push(FuncIr {
            file: self.file.clone(),
            name,
            span,
            params,
            body,
        });
    }

    fn lower_args(&mut self, list: Option<ast::ArgList>) -> Vec<Expr> {
        list.map(|list| list.args().map(|a| self.lower_expr(a)).collect())
            .unwrap_or_default()
    }
}

fn lower_param(param: ast::Param) -> Option<ParamIr> {
    let name = match param.pat() {
        Some(ast::Pat::IdentPat(pat)) => pat.name()?.text().to_string(),
        _ => return None,
    };
    let declared_level = param.attrs().find_map(|attr| {
        let text = attr.syntax().text().to_string();
        text.strip_prefix("#[level(")
            .and_then(|t| t.strip_suffix(")]"))
            .map(|inner| inner.trim().trim_matches('"').to_string())
    });
    let ty_text = param.ty().map(|ty| ty.syntax().text().to_string());
    let scope = ty_text
        .as_deref()
        .map(|ty| ty.contains("ScopeHandle"))
        .unwrap_or(false);
    // An untyped parameter is a closure binding; with no type to rule
    // ownership out it is treated as possibly owned.
    let owned = !scope
        && ty_text
            .as_deref()
            .map(|ty| ty.contains("Owned"))
            .unwrap_or(true);
    Some(ParamIr {
        name,
        declared_level,
        owned,
        scope,
    })
}

/// Extract the contents of a plain string literal, if the expression is
/// one. Raw strings are not recognized and yield `None`.
fn string_literal(expr: &ast::Expr) -> Option<String> {
    let ast::Expr::Literal(lit) = expr else {
        return None;
    };
    let text = lit.syntax().text().to_string();
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.to_string())
}
