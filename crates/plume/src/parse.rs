//! Statement parser: token tree to AST.
//!
//! High-level constructs are lowered here rather than in the executor:
//! `for` becomes an iterator acquisition plus a `while True` guarded by a
//! `StopIteration` handler, `with` becomes a try/finally around
//! `__enter__`/`__exit__`, and compound assignment is rewritten in the
//! expression parser. Closure capture sets are resolved per function
//! definition before compilation.

use ahash::AHashSet;

use crate::{
    expressions::{
        AssignTarget, Expr, ExprKind, FnDef, Literal, ParamKind, Parameter, TokenIter,
        parse_expression, parse_expression_list, referenced_variables, write_variables,
    },
    lex::{CodeError, LexTree, SourcePos, TokenKind},
};

#[derive(Debug, Clone)]
pub(crate) struct Stat {
    pub kind: StatKind,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub(crate) enum StatKind {
    Pass,
    Expr(Expr),
    Global(String),
    Nonlocal(String),
    Def(Box<FnDef>),
    Class(Box<ClassDef>),
    Return(Expr),
    If {
        condition: Expr,
        body: Vec<Stat>,
        else_clause: Option<Vec<Stat>>,
    },
    While {
        condition: Expr,
        body: Vec<Stat>,
        else_clause: Option<Vec<Stat>>,
    },
    Try {
        body: Vec<Stat>,
        excepts: Vec<ExceptClause>,
        finally: Vec<Stat>,
    },
    Raise(Expr),
    Break,
    Continue,
    Import {
        module: String,
        alias: Option<String>,
    },
    /// Empty `names` means `from m import *`.
    ImportFrom {
        module: String,
        names: Vec<String>,
        alias: Option<String>,
    },
    // Transient forms, removed during body assembly.
    Elif {
        condition: Expr,
        body: Vec<Stat>,
    },
    Else {
        body: Vec<Stat>,
    },
    Except(ExceptClause),
    Finally {
        body: Vec<Stat>,
    },
    Composite(Vec<Stat>),
}

#[derive(Debug, Clone)]
pub(crate) struct ExceptClause {
    pub exc_type: Option<Expr>,
    pub var: Option<String>,
    pub body: Vec<Stat>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub(crate) struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    /// Method definitions, in source order; each is a `StatKind::Def`.
    pub body: Vec<Stat>,
    pub method_names: Vec<String>,
}

/// Which construct a statement block belongs to, for break/continue and
/// global/nonlocal legality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Root,
    Def,
    Loop,
    Other,
}

/// Mutable parser scratch: the enclosing-construct stack and the counter
/// for hidden desugaring names. Threaded explicitly through all passes.
#[derive(Debug, Default)]
pub(crate) struct ParserState {
    hierarchy: Vec<Block>,
    fresh: usize,
}

impl ParserState {
    pub(crate) fn fresh_name(&mut self, prefix: &str) -> String {
        self.fresh += 1;
        format!("{prefix}{}", self.fresh)
    }

    fn breakable(&self) -> bool {
        for block in self.hierarchy.iter().rev() {
            match block {
                Block::Loop => return true,
                Block::Def | Block::Root => return false,
                Block::Other => {}
            }
        }
        false
    }
}

/// Parses a lex tree into the implicit module-level function definition.
pub(crate) fn parse(root: &LexTree) -> Result<FnDef, CodeError> {
    let mut st = ParserState::default();
    let body = parse_block(&root.children, Block::Root, &mut st)?;

    let mut def = FnDef {
        name: "<module>".to_string(),
        body,
        ..FnDef::default()
    };
    resolve_captures(&mut def, SourcePos::default())?;
    // At module level every name lives in the globals table; fold captures
    // back into plain variables so nothing tries to make cells for them.
    let captured: Vec<String> = def.local_captures.drain().collect();
    def.variables.extend(captured);
    Ok(def)
}

fn parse_block(
    nodes: &[LexTree],
    block: Block,
    st: &mut ParserState,
) -> Result<Vec<Stat>, CodeError> {
    st.hierarchy.push(block);
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let result = parse_statement(node, st);
        match result {
            Ok(stat) => out.push(stat),
            Err(e) => {
                st.hierarchy.pop();
                return Err(e);
            }
        }
    }
    st.hierarchy.pop();

    expand_composites(&mut out);
    validate_clause_order(&out)?;
    fold_else_clauses(&mut out);
    fold_try_clauses(out)
}

fn parse_body(node: &LexTree, block: Block, st: &mut ParserState) -> Result<Vec<Stat>, CodeError> {
    if node.children.is_empty() {
        let pos = node.tokens.last().map_or_else(SourcePos::default, |t| t.pos);
        return Err(CodeError::new("Expected a statement", pos));
    }
    parse_block(&node.children, block, st)
}

fn parse_statement(node: &LexTree, st: &mut ParserState) -> Result<Stat, CodeError> {
    let first = &node.tokens[0];
    let pos = first.pos;
    let mut p = TokenIter::new(&node.tokens);
    let kind = match first.text.as_str() {
        "if" => parse_conditional(node, &mut p, st, ConditionalKind::If)?,
        "elif" => parse_conditional(node, &mut p, st, ConditionalKind::Elif)?,
        "else" => {
            p.bump();
            expect_colon_ending(&mut p)?;
            StatKind::Else {
                body: parse_body(node, Block::Other, st)?,
            }
        }
        "while" => parse_conditional(node, &mut p, st, ConditionalKind::While)?,
        "for" => parse_for(node, &mut p, st)?,
        "break" => {
            if !st.breakable() {
                return Err(CodeError::new("'break' or 'continue' outside of loop", pos));
            }
            p.bump();
            check_trailing(&p)?;
            StatKind::Break
        }
        "continue" => {
            if !st.breakable() {
                return Err(CodeError::new("'break' or 'continue' outside of loop", pos));
            }
            p.bump();
            check_trailing(&p)?;
            StatKind::Continue
        }
        "def" => StatKind::Def(Box::new(parse_def(node, &mut p, st)?)),
        "class" => parse_class(node, &mut p, st)?,
        "return" => {
            p.bump();
            if p.end() {
                StatKind::Return(Expr::new(ExprKind::Literal(Literal::Null), pos))
            } else {
                let expr = parse_expression(&mut p, st)?;
                check_trailing(&p)?;
                StatKind::Return(expr)
            }
        }
        "pass" => {
            p.bump();
            check_trailing(&p)?;
            StatKind::Pass
        }
        "global" => StatKind::Global(parse_capture_name(&mut p, st)?),
        "nonlocal" => StatKind::Nonlocal(parse_capture_name(&mut p, st)?),
        "try" => {
            p.bump();
            expect_colon_ending(&mut p)?;
            StatKind::Try {
                body: parse_body(node, Block::Other, st)?,
                excepts: Vec::new(),
                finally: Vec::new(),
            }
        }
        "except" => StatKind::Except(parse_except(node, &mut p, st)?),
        "finally" => {
            p.bump();
            expect_colon_ending(&mut p)?;
            StatKind::Finally {
                body: parse_body(node, Block::Other, st)?,
            }
        }
        "raise" => {
            p.bump();
            let expr = parse_expression(&mut p, st)?;
            check_trailing(&p)?;
            StatKind::Raise(expr)
        }
        "with" => parse_with(node, &mut p, st)?,
        "from" => parse_import_from(&mut p)?,
        "import" => parse_import(&mut p)?,
        _ => {
            let expr = parse_expression(&mut p, st)?;
            check_trailing(&p)?;
            StatKind::Expr(expr)
        }
    };
    Ok(Stat { kind, pos })
}

fn check_trailing(p: &TokenIter) -> Result<(), CodeError> {
    if p.end() {
        Ok(())
    } else {
        Err(p.err_here("Unexpected trailing tokens"))
    }
}

fn expect_colon_ending(p: &mut TokenIter) -> Result<(), CodeError> {
    if p.peek().is_none_or(|t| t.text != ":") {
        return Err(p.err_here("Expected a ':'"));
    }
    p.bump();
    check_trailing(p)
}

enum ConditionalKind {
    If,
    Elif,
    While,
}

fn parse_conditional(
    node: &LexTree,
    p: &mut TokenIter,
    st: &mut ParserState,
    kind: ConditionalKind,
) -> Result<StatKind, CodeError> {
    p.bump();
    let condition = parse_expression(p, st)?;
    expect_colon_ending(p)?;
    let block = match kind {
        ConditionalKind::While => Block::Loop,
        ConditionalKind::If | ConditionalKind::Elif => Block::Other,
    };
    let body = parse_body(node, block, st)?;
    Ok(match kind {
        ConditionalKind::If => StatKind::If {
            condition,
            body,
            else_clause: None,
        },
        ConditionalKind::Elif => StatKind::Elif { condition, body },
        ConditionalKind::While => StatKind::While {
            condition,
            body,
            else_clause: None,
        },
    })
}

fn parse_capture_name(p: &mut TokenIter, st: &mut ParserState) -> Result<String, CodeError> {
    if st.hierarchy.last() == Some(&Block::Root) {
        return Err(p.err_here("Cannot capture at top level"));
    }
    p.bump();
    let Some(tok) = p.peek() else {
        return Err(p.err_here("Expected a variable name"));
    };
    if tok.kind != TokenKind::Word {
        return Err(p.err_here("Expected a variable name"));
    }
    let name = tok.text.clone();
    p.bump();
    check_trailing(p)?;
    Ok(name)
}

/// Parses the comma-separated variable list of `for <vars> in ...`, leaving
/// the cursor on the `in` token.
pub(crate) fn parse_for_loop_variable_list(p: &mut TokenIter) -> Result<AssignTarget, CodeError> {
    let mut vars = Vec::new();
    let mut is_tuple = false;
    let mut must_terminate = false;
    loop {
        let Some(tok) = p.peek() else {
            return Err(p.err_here("Expected 'in'"));
        };
        if tok.text == "in" {
            if vars.is_empty() {
                return Err(p.err_here("Expected a variable name"));
            }
            break;
        }
        if must_terminate {
            return Err(p.err_here("Expected 'in'"));
        }
        if tok.kind != TokenKind::Word {
            return Err(p.err_here("Expected a variable name"));
        }
        vars.push(tok.text.clone());
        p.bump();

        if p.peek().is_some_and(|t| t.text == ",") {
            is_tuple = true;
            p.bump();
        } else {
            must_terminate = true;
        }
    }
    if is_tuple {
        Ok(AssignTarget::Pack(
            vars.into_iter().map(AssignTarget::Direct).collect(),
        ))
    } else {
        Ok(AssignTarget::Direct(vars.remove(0)))
    }
}

fn parse_for(node: &LexTree, p: &mut TokenIter, st: &mut ParserState) -> Result<StatKind, CodeError> {
    p.bump();
    let target = parse_for_loop_variable_list(p)?;
    p.bump(); // consume `in`
    let iterable = parse_expression(p, st)?;
    expect_colon_ending(p)?;
    let body = parse_body(node, Block::Loop, st)?;
    let pos = node.tokens[0].pos;
    Ok(StatKind::Composite(transform_for_to_while(
        target, iterable, body, None, pos, st,
    )))
}

/// Lowers `for <target> in <iterable>: <body> [else: <e>]` into
///
/// ```text
/// __ForN = <iterable>.__iter__()
/// while True:
///     try:
///         <target> = __ForN.__next__()
///     except StopIteration:
///         break
///     <body>
/// [else: <e>]
/// ```
pub(crate) fn transform_for_to_while(
    target: AssignTarget,
    iterable: Expr,
    body: Vec<Stat>,
    else_clause: Option<Vec<Stat>>,
    pos: SourcePos,
    st: &mut ParserState,
) -> Vec<Stat> {
    let iter_var = st.fresh_name("__For");

    let call_method = |target: Expr, name: &str| {
        Expr::new(
            ExprKind::Call {
                callee: Box::new(Expr::new(
                    ExprKind::Dot {
                        target: Box::new(target),
                        name: name.to_string(),
                    },
                    pos,
                )),
                args: Vec::new(),
            },
            pos,
        )
    };

    let acquire_iter = Stat {
        kind: StatKind::Expr(Expr::new(
            ExprKind::Assign {
                target: AssignTarget::Direct(iter_var.clone()),
                value: Box::new(call_method(iterable, "__iter__")),
            },
            pos,
        )),
        pos,
    };

    let advance = Stat {
        kind: StatKind::Expr(Expr::new(
            ExprKind::Assign {
                target,
                value: Box::new(call_method(
                    Expr::new(ExprKind::Variable(iter_var), pos),
                    "__next__",
                )),
            },
            pos,
        )),
        pos,
    };

    let try_advance = Stat {
        kind: StatKind::Try {
            body: vec![advance],
            excepts: vec![ExceptClause {
                exc_type: Some(Expr::new(
                    ExprKind::Variable("StopIteration".to_string()),
                    pos,
                )),
                var: None,
                body: vec![Stat {
                    kind: StatKind::Break,
                    pos,
                }],
                pos,
            }],
            finally: Vec::new(),
        },
        pos,
    };

    let mut while_body = vec![try_advance];
    while_body.extend(body);

    let while_stat = Stat {
        kind: StatKind::While {
            condition: Expr::new(ExprKind::Literal(Literal::Bool(true)), pos),
            body: while_body,
            else_clause,
        },
        pos,
    };

    vec![acquire_iter, while_stat]
}

fn parse_def(node: &LexTree, p: &mut TokenIter, st: &mut ParserState) -> Result<FnDef, CodeError> {
    p.bump();
    let Some(name_tok) = p.peek() else {
        return Err(p.err_here("Expected a function name"));
    };
    if name_tok.kind != TokenKind::Word {
        return Err(p.err_here("Expected a function name"));
    }
    let name = name_tok.text.clone();
    let pos = name_tok.pos;
    p.bump();

    if p.peek().is_none_or(|t| t.text != "(") {
        return Err(p.err_here("Expected a '('"));
    }
    p.bump();
    let parameters = parse_parameter_list(p, st)?;
    if p.peek().is_none_or(|t| t.text != ")") {
        return Err(p.err_here("Expected a ')'"));
    }
    p.bump();
    expect_colon_ending(p)?;

    let body = parse_body(node, Block::Def, st)?;
    let mut def = FnDef {
        name,
        parameters,
        body,
        ..FnDef::default()
    };
    resolve_captures(&mut def, pos)?;
    Ok(def)
}

/// Parses a parameter list, stopping at the first token that cannot start a
/// parameter. Enforces: defaults trail, `*args` is unique, `**kwargs` last.
pub(crate) fn parse_parameter_list(
    p: &mut TokenIter,
    st: &mut ParserState,
) -> Result<Vec<Parameter>, CodeError> {
    let mut out: Vec<Parameter> = Vec::new();
    let mut kind = ParamKind::Named;
    loop {
        let Some(tok) = p.peek() else {
            return Ok(out);
        };
        match tok.text.as_str() {
            "*" => {
                if kind == ParamKind::ListArgs {
                    return Err(p.err_here("Only 1 variadic arguments parameter is allowed"));
                }
                if kind == ParamKind::Kwargs {
                    return Err(p.err_here("Keyword arguments parameter must appear last"));
                }
                kind = ParamKind::ListArgs;
                p.bump();
            }
            "**" => {
                if kind == ParamKind::Kwargs {
                    return Err(p.err_here("Only 1 keyword arguments parameter is allowed"));
                }
                kind = ParamKind::Kwargs;
                p.bump();
            }
            _ => {
                if tok.kind != TokenKind::Word {
                    return Ok(out);
                }
                if kind != ParamKind::Named {
                    return Err(p.err_here("Regular parameters must appear first"));
                }
            }
        }

        let Some(name_tok) = p.peek() else {
            return Err(p.err_here("Expected a parameter name"));
        };
        if name_tok.kind != TokenKind::Word {
            return Err(p.err_here("Expected a parameter name"));
        }
        let name = name_tok.text.clone();
        if out.iter().any(|param| param.name == name) {
            return Err(p.err_here("Duplicate parameter name"));
        }
        p.bump();

        let mut default = None;
        if p.peek().is_some_and(|t| t.text == "=") {
            if kind != ParamKind::Named {
                return Err(p.err_here("Only regular parameters can have a default argument"));
            }
            p.bump();
            default = Some(parse_expression(p, st)?);
        } else if kind == ParamKind::Named
            && out.iter().any(|param| param.default.is_some())
        {
            return Err(CodeError::new(
                "Parameters with default values must appear at the end of the parameter list",
                p.prev_pos(),
            ));
        }
        out.push(Parameter {
            name,
            default,
            kind,
        });

        if p.peek().is_some_and(|t| t.text == ",") {
            p.bump();
        } else {
            return Ok(out);
        }
    }
}

fn parse_class(node: &LexTree, p: &mut TokenIter, st: &mut ParserState) -> Result<StatKind, CodeError> {
    p.bump();
    let Some(name_tok) = p.peek() else {
        return Err(p.err_here("Expected a class name"));
    };
    if name_tok.kind != TokenKind::Word {
        return Err(p.err_here("Expected a class name"));
    }
    let name = name_tok.text.clone();
    p.bump();

    let mut bases = Vec::new();
    if p.peek().is_some_and(|t| t.text == "(") {
        p.bump();
        parse_expression_list(p, st, ")", &mut bases, false)?;
        p.bump();
    }

    if node.children.is_empty() {
        return Err(p.err_here("Expected class body"));
    }
    expect_colon_ending(p)?;

    let mut body = Vec::new();
    let mut method_names = Vec::new();
    st.hierarchy.push(Block::Other);
    for method in &node.children {
        let first = &method.tokens[0];
        if first.text == "pass" {
            continue;
        }
        if first.text != "def" {
            st.hierarchy.pop();
            return Err(CodeError::new("Expected a method definition", first.pos));
        }
        let mut mp = TokenIter::new(&method.tokens);
        let def = match parse_def(method, &mut mp, st) {
            Ok(def) => def,
            Err(e) => {
                st.hierarchy.pop();
                return Err(e);
            }
        };
        method_names.push(def.name.clone());
        body.push(Stat {
            kind: StatKind::Def(Box::new(def)),
            pos: first.pos,
        });
    }
    st.hierarchy.pop();

    Ok(StatKind::Class(Box::new(ClassDef {
        name,
        bases,
        body,
        method_names,
    })))
}

fn parse_except(
    node: &LexTree,
    p: &mut TokenIter,
    st: &mut ParserState,
) -> Result<ExceptClause, CodeError> {
    let pos = node.tokens[0].pos;
    p.bump();

    let mut exc_type = None;
    let mut var = None;
    if p.peek().is_some_and(|t| t.text != ":") {
        exc_type = Some(parse_expression(p, st)?);
        if p.peek().is_some_and(|t| t.text == "as") {
            p.bump();
            let Some(name_tok) = p.peek() else {
                return Err(p.err_here("Expected an identifier"));
            };
            if name_tok.kind != TokenKind::Word {
                return Err(p.err_here("Expected an identifier"));
            }
            var = Some(name_tok.text.clone());
            p.bump();
        }
    }
    expect_colon_ending(p)?;

    Ok(ExceptClause {
        exc_type,
        var,
        body: parse_body(node, Block::Other, st)?,
        pos,
    })
}

/// Lowers `with <manager> [as <var>]: <body>` into
///
/// ```text
/// __WithMgrN = <manager>
/// [<var> =] __WithMgrN.__enter__()
/// try:
///     <body>
/// finally:
///     __WithMgrN.__exit__(None, None, None)
/// ```
fn parse_with(node: &LexTree, p: &mut TokenIter, st: &mut ParserState) -> Result<StatKind, CodeError> {
    let pos = node.tokens[0].pos;
    p.bump();
    if p.end() {
        return Err(p.err_here("Expected a ':'"));
    }
    let manager = parse_expression(p, st)?;

    let mut var = None;
    if p.peek().is_some_and(|t| t.text == "as") {
        p.bump();
        let Some(name_tok) = p.peek() else {
            return Err(p.err_here("Expected an identifier"));
        };
        if name_tok.kind != TokenKind::Word {
            return Err(p.err_here("Expected an identifier"));
        }
        var = Some(name_tok.text.clone());
        p.bump();
    }
    expect_colon_ending(p)?;

    let body = parse_body(node, Block::Other, st)?;

    let mgr_name = st.fresh_name("__WithMgr");
    let load_mgr = || Expr::new(ExprKind::Variable(mgr_name.clone()), pos);
    let null = || Expr::new(ExprKind::Literal(Literal::Null), pos);

    let assign_mgr = Stat {
        kind: StatKind::Expr(Expr::new(
            ExprKind::Assign {
                target: AssignTarget::Direct(mgr_name.clone()),
                value: Box::new(manager),
            },
            pos,
        )),
        pos,
    };

    let enter_call = Expr::new(
        ExprKind::Call {
            callee: Box::new(Expr::new(
                ExprKind::Dot {
                    target: Box::new(load_mgr()),
                    name: "__enter__".to_string(),
                },
                pos,
            )),
            args: Vec::new(),
        },
        pos,
    );
    let enter_stat = Stat {
        kind: StatKind::Expr(match var {
            Some(var) => Expr::new(
                ExprKind::Assign {
                    target: AssignTarget::Direct(var),
                    value: Box::new(enter_call),
                },
                pos,
            ),
            None => enter_call,
        }),
        pos,
    };

    let exit_call = Expr::new(
        ExprKind::Call {
            callee: Box::new(Expr::new(
                ExprKind::Dot {
                    target: Box::new(load_mgr()),
                    name: "__exit__".to_string(),
                },
                pos,
            )),
            args: vec![null(), null(), null()],
        },
        pos,
    );
    let guarded = Stat {
        kind: StatKind::Try {
            body,
            excepts: Vec::new(),
            finally: vec![Stat {
                kind: StatKind::Expr(exit_call),
                pos,
            }],
        },
        pos,
    };

    Ok(StatKind::Composite(vec![assign_mgr, enter_stat, guarded]))
}

fn parse_import(p: &mut TokenIter) -> Result<StatKind, CodeError> {
    p.bump();
    let Some(tok) = p.peek() else {
        return Err(p.err_here("Expected a module name"));
    };
    if tok.kind != TokenKind::Word {
        return Err(p.err_here("Expected a module name"));
    }
    let module = tok.text.clone();
    p.bump();

    let mut alias = None;
    if p.peek().is_some_and(|t| t.text == "as") {
        p.bump();
        let Some(alias_tok) = p.peek() else {
            return Err(p.err_here("Expected an alias name"));
        };
        if alias_tok.kind != TokenKind::Word {
            return Err(p.err_here("Expected an alias name"));
        }
        alias = Some(alias_tok.text.clone());
        p.bump();
    }
    check_trailing(p)?;
    Ok(StatKind::Import { module, alias })
}

fn parse_import_from(p: &mut TokenIter) -> Result<StatKind, CodeError> {
    p.bump();
    let Some(tok) = p.peek() else {
        return Err(p.err_here("Expected a module name"));
    };
    if tok.kind != TokenKind::Word {
        return Err(p.err_here("Expected a module name"));
    }
    let module = tok.text.clone();
    p.bump();

    if p.peek().is_none_or(|t| t.text != "import") {
        return Err(p.err_here("Expected 'import'"));
    }
    p.bump();

    if p.end() {
        return Err(p.err_here("Expected a name"));
    }

    let mut names = Vec::new();
    let mut alias = None;
    if p.peek().is_some_and(|t| t.text == "*") {
        p.bump();
    } else {
        loop {
            let Some(name_tok) = p.peek() else {
                return Err(p.err_here("Expected a name"));
            };
            if name_tok.kind != TokenKind::Word {
                return Err(p.err_here("Expected a name"));
            }
            names.push(name_tok.text.clone());
            p.bump();

            if p.end() {
                break;
            }
            if p.peek().is_some_and(|t| t.text == "as") {
                p.bump();
                let Some(alias_tok) = p.peek() else {
                    return Err(p.err_here("Expected a name"));
                };
                if alias_tok.kind != TokenKind::Word {
                    return Err(p.err_here("Expected a name"));
                }
                alias = Some(alias_tok.text.clone());
                p.bump();
                break;
            }
            if p.peek().is_some_and(|t| t.text == ",") {
                p.bump();
            } else {
                return Err(p.err_here("Expected ','"));
            }
        }
    }
    check_trailing(p)?;
    Ok(StatKind::ImportFrom {
        module,
        names,
        alias,
    })
}

/// Splices the bodies of composite statements into their parent list.
fn expand_composites(out: &mut Vec<Stat>) {
    let mut i = 0;
    while i < out.len() {
        if matches!(out[i].kind, StatKind::Composite(_)) {
            let StatKind::Composite(body) = std::mem::replace(&mut out[i].kind, StatKind::Pass)
            else {
                unreachable!()
            };
            out.splice(i..=i, body);
        } else {
            i += 1;
        }
    }
}

fn validate_clause_order(out: &[Stat]) -> Result<(), CodeError> {
    for (i, stat) in out.iter().enumerate() {
        let prev = i.checked_sub(1).map(|j| &out[j].kind);
        match &stat.kind {
            StatKind::Elif { .. } => {
                if !matches!(prev, Some(StatKind::If { .. } | StatKind::Elif { .. })) {
                    return Err(CodeError::new(
                        "An 'elif' clause may only appear after an 'if' or 'elif' clause",
                        stat.pos,
                    ));
                }
            }
            StatKind::Else { .. } => {
                if !matches!(
                    prev,
                    Some(
                        StatKind::If { .. }
                            | StatKind::Elif { .. }
                            | StatKind::While { .. }
                    )
                ) {
                    return Err(CodeError::new(
                        "An 'else' clause may only appear after an 'if', 'elif', 'while', or 'for' clause",
                        stat.pos,
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Rewrites `elif` into nested `else: if` and attaches `else` bodies to the
/// innermost else-less conditional of the preceding chain.
fn fold_else_clauses(out: &mut Vec<Stat>) {
    let mut i = 0;
    while i < out.len() {
        let else_body = match &mut out[i].kind {
            StatKind::Elif { .. } => {
                let pos = out[i].pos;
                let StatKind::Elif { condition, body } =
                    std::mem::replace(&mut out[i].kind, StatKind::Pass)
                else {
                    unreachable!()
                };
                Some(vec![Stat {
                    kind: StatKind::If {
                        condition,
                        body,
                        else_clause: None,
                    },
                    pos,
                }])
            }
            StatKind::Else { .. } => {
                let StatKind::Else { body } = std::mem::replace(&mut out[i].kind, StatKind::Pass)
                else {
                    unreachable!()
                };
                Some(body)
            }
            _ => None,
        };

        let Some(else_body) = else_body else {
            i += 1;
            continue;
        };
        out.remove(i);
        let mut target = &mut out[i - 1];
        loop {
            let slot = match &mut target.kind {
                StatKind::If { else_clause, .. } | StatKind::While { else_clause, .. } => {
                    else_clause
                }
                _ => break,
            };
            match slot {
                None => {
                    *slot = Some(else_body);
                    break;
                }
                Some(chain) => {
                    target = chain.last_mut().expect("else chain is never empty");
                }
            }
        }
    }
}

/// Attaches `except`/`finally` clauses to the preceding `try`.
fn fold_try_clauses(mut out: Vec<Stat>) -> Result<Vec<Stat>, CodeError> {
    let mut result = Vec::with_capacity(out.len());
    let mut iter = out.drain(..).peekable();
    while let Some(mut stat) = iter.next() {
        match &mut stat.kind {
            StatKind::Except(_) => {
                return Err(CodeError::new(
                    "An 'except' clause may only appear after a 'try' or 'except' clause",
                    stat.pos,
                ));
            }
            StatKind::Finally { .. } => {
                return Err(CodeError::new(
                    "A 'finally' clause may only appear after a 'try' or 'except' clause",
                    stat.pos,
                ));
            }
            StatKind::Try {
                excepts, finally, ..
            } => {
                let mut end_pos = stat.pos;
                while let Some(next) = iter.peek() {
                    match &next.kind {
                        StatKind::Except(_) => {
                            let Some(Stat {
                                kind: StatKind::Except(clause),
                                pos,
                            }) = iter.next()
                            else {
                                unreachable!()
                            };
                            if excepts.last().is_some_and(|last| last.exc_type.is_none()) {
                                return Err(CodeError::new(
                                    "Default 'except' clause must be last",
                                    pos,
                                ));
                            }
                            end_pos = pos;
                            excepts.push(clause);
                        }
                        StatKind::Finally { .. } => {
                            let Some(Stat {
                                kind: StatKind::Finally { body },
                                ..
                            }) = iter.next()
                            else {
                                unreachable!()
                            };
                            *finally = body;
                            break;
                        }
                        _ => break,
                    }
                }
                if excepts.is_empty() && finally.is_empty() {
                    return Err(CodeError::new(
                        "Expected an 'except' or 'finally' clause",
                        end_pos,
                    ));
                }
            }
            _ => {}
        }
        result.push(stat);
    }
    Ok(result)
}

/// Computes a function's locals and capture sets by walking its body without
/// descending into nested function bodies (their free variables count as
/// references here so captures chain through intermediate scopes).
fn resolve_captures(def: &mut FnDef, pos: SourcePos) -> Result<(), CodeError> {
    let mut write_vars = AHashSet::new();
    let mut all_vars = AHashSet::new();

    scan_body(
        &def.body,
        &mut write_vars,
        &mut all_vars,
        &mut def.global_captures,
        &mut def.local_captures,
    );

    if let Some(name) = def
        .global_captures
        .intersection(&def.local_captures)
        .next()
    {
        return Err(CodeError::new(
            format!("The name '{name}' is declared both global and nonlocal"),
            pos,
        ));
    }

    let param_names: AHashSet<String> =
        def.parameters.iter().map(|p| p.name.clone()).collect();

    for name in &all_vars {
        if !write_vars.contains(name)
            && !def.global_captures.contains(name)
            && !param_names.contains(name)
        {
            def.local_captures.insert(name.clone());
        }
    }
    def.variables = write_vars
        .iter()
        .filter(|name| {
            !def.global_captures.contains(*name)
                && !def.local_captures.contains(*name)
                && !param_names.contains(*name)
        })
        .cloned()
        .collect();
    Ok(())
}

/// Walks one statement's body for referenced and written names.
///
/// Nested function bodies are not entered; a nested definition contributes
/// its name, its default-value expressions, and its free variables. The
/// except-clause type expression is deliberately not walked: exception class
/// names resolve through globals at runtime, and turning them into capture
/// cells would freeze them at definition time.
fn scan_body(
    body: &[Stat],
    write_vars: &mut AHashSet<String>,
    all_vars: &mut AHashSet<String>,
    global_captures: &mut AHashSet<String>,
    local_captures: &mut AHashSet<String>,
) {
    for stat in body {
        match &stat.kind {
            StatKind::Expr(e) | StatKind::Return(e) | StatKind::Raise(e) => {
                write_vars.extend(write_variables(e));
                all_vars.extend(referenced_variables(e));
            }
            StatKind::If {
                condition,
                body,
                else_clause,
            }
            | StatKind::While {
                condition,
                body,
                else_clause,
            } => {
                write_vars.extend(write_variables(condition));
                all_vars.extend(referenced_variables(condition));
                scan_body(body, write_vars, all_vars, global_captures, local_captures);
                if let Some(else_body) = else_clause {
                    scan_body(
                        else_body,
                        write_vars,
                        all_vars,
                        global_captures,
                        local_captures,
                    );
                }
            }
            StatKind::Try {
                body,
                excepts,
                finally,
            } => {
                scan_body(body, write_vars, all_vars, global_captures, local_captures);
                for clause in excepts {
                    scan_body(
                        &clause.body,
                        write_vars,
                        all_vars,
                        global_captures,
                        local_captures,
                    );
                }
                scan_body(finally, write_vars, all_vars, global_captures, local_captures);
            }
            StatKind::Def(nested) => {
                write_vars.insert(nested.name.clone());
                all_vars.insert(nested.name.clone());
                for param in &nested.parameters {
                    if let Some(default) = &param.default {
                        write_vars.extend(write_variables(default));
                        all_vars.extend(referenced_variables(default));
                    }
                }
                all_vars.extend(nested.local_captures.iter().cloned());
            }
            StatKind::Class(class) => {
                write_vars.insert(class.name.clone());
                all_vars.insert(class.name.clone());
                for base in &class.bases {
                    all_vars.extend(referenced_variables(base));
                }
                scan_body(
                    &class.body,
                    write_vars,
                    all_vars,
                    global_captures,
                    local_captures,
                );
            }
            StatKind::Global(name) => {
                global_captures.insert(name.clone());
            }
            StatKind::Nonlocal(name) => {
                local_captures.insert(name.clone());
            }
            StatKind::Pass
            | StatKind::Break
            | StatKind::Continue
            | StatKind::Import { .. }
            | StatKind::ImportFrom { .. } => {}
            StatKind::Elif { .. }
            | StatKind::Else { .. }
            | StatKind::Except(_)
            | StatKind::Finally { .. }
            | StatKind::Composite(_) => {}
        }
    }
}

pub(crate) fn collect_stat_referenced(stat: &Stat, out: &mut AHashSet<String>) {
    let mut write = AHashSet::new();
    let mut globals = AHashSet::new();
    let mut locals = AHashSet::new();
    scan_body(std::slice::from_ref(stat), &mut write, out, &mut globals, &mut locals);
    out.extend(locals);
}

pub(crate) fn collect_stat_writes(stat: &Stat, out: &mut AHashSet<String>) {
    let mut all = AHashSet::new();
    let mut globals = AHashSet::new();
    let mut locals = AHashSet::new();
    scan_body(std::slice::from_ref(stat), out, &mut all, &mut globals, &mut locals);
}
