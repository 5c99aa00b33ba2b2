//! Compiler: AST to a flat instruction vector with resolved jump targets.
//!
//! Calls are compiled as an argument frame: `PushArgFrame`, the callable,
//! positional arguments, keyword name/value pairs, then `Call`. Every
//! method-dispatched operator lowers to `PushArgFrame / lhs / Dot(dunder) /
//! rhs / Call`, so the executor has a single call path.

use std::rc::Rc;

use crate::{
    expressions::{
        AssignTarget, BinaryOp, Expr, ExprKind, FnDef, Literal, ParamKind, UnaryOp,
    },
    lex::SourcePos,
    parse::{ClassDef, Stat, StatKind},
};

#[derive(Debug, Clone)]
pub(crate) struct Instr {
    pub kind: InstrKind,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub(crate) enum InstrKind {
    LoadLiteral(Literal),
    LoadVariable(Rc<str>),
    DirectAssign(Rc<AssignTarget>),
    MemberAssign(Rc<str>),
    Pop,
    PushArgFrame,
    Call,
    Dot(Rc<str>),
    Not,
    Is,
    BuildTuple,
    BuildList,
    BuildMap,
    BuildSet,
    BuildSlice,
    PushKwarg,
    Unpack,
    UnpackMapForMap,
    UnpackMapForCall,
    Def(Rc<DefInstr>),
    Class(Rc<ClassInstr>),
    Jump { target: usize },
    /// `break`/`continue`: jump to `target`, first draining the finally
    /// bodies of every try frame opened above `keep_tries`.
    UnwindJump { target: usize, keep_tries: usize },
    JumpIfFalsePop { target: usize },
    JumpIfFalseKeep { target: usize },
    JumpIfTrueKeep { target: usize },
    Return,
    Raise,
    PushTry { except_target: usize, finally_target: usize },
    PopTry,
    ClearException,
    PushCurrentException,
    PushIsInstance,
    Import { module: Rc<str>, alias: Option<Rc<str>> },
    ImportFrom {
        module: Rc<str>,
        names: Vec<Rc<str>>,
        alias: Option<Rc<str>>,
    },
}

/// A compiled nested function, embedded in its parent's instruction stream.
#[derive(Debug)]
pub(crate) struct DefInstr {
    pub pretty_name: Rc<str>,
    pub is_method: bool,
    /// Named parameters in declaration order, excluding `*args`/`**kwargs`.
    pub parameters: Vec<Rc<str>>,
    /// How many trailing named parameters carry compiled default values.
    pub default_count: usize,
    pub list_args: Option<Rc<str>>,
    pub kw_args: Option<Rc<str>>,
    pub global_captures: Vec<Rc<str>>,
    pub local_captures: Vec<Rc<str>>,
    pub variables: Vec<Rc<str>>,
    pub instructions: Rc<Vec<Instr>>,
}

#[derive(Debug)]
pub(crate) struct ClassInstr {
    pub name: Rc<str>,
    pub method_names: Vec<Rc<str>>,
}

/// Compiles a function body (the module root included) to instructions.
pub(crate) fn compile(def: &FnDef) -> Rc<Vec<Instr>> {
    let mut compiler = Compiler::default();
    compiler.compile_body(&def.body);
    Rc::new(compiler.instructions)
}

#[derive(Default)]
struct Compiler {
    instructions: Vec<Instr>,
    break_jumps: Vec<Vec<usize>>,
    continue_jumps: Vec<Vec<usize>>,
    /// Try frames opened at loop entry, parallel to the jump lists.
    loop_try_depth: Vec<usize>,
    /// Try frames currently open in this function body.
    try_depth: usize,
}

impl Compiler {
    fn emit(&mut self, kind: InstrKind, pos: SourcePos) {
        self.instructions.push(Instr { kind, pos });
    }

    /// Emits a forward jump with a placeholder target; returns its index.
    fn emit_jump(&mut self, kind: InstrKind, pos: SourcePos) -> usize {
        let index = self.instructions.len();
        self.emit(kind, pos);
        index
    }

    fn patch_jump(&mut self, index: usize) {
        self.patch_jump_to(index, self.instructions.len());
    }

    fn patch_jump_to(&mut self, index: usize, target: usize) {
        match &mut self.instructions[index].kind {
            InstrKind::Jump { target: t }
            | InstrKind::UnwindJump { target: t, .. }
            | InstrKind::JumpIfFalsePop { target: t }
            | InstrKind::JumpIfFalseKeep { target: t }
            | InstrKind::JumpIfTrueKeep { target: t } => *t = target,
            _ => unreachable!("patched instruction is not a jump"),
        }
    }

    fn compile_body(&mut self, body: &[Stat]) {
        for stat in body {
            self.compile_stat(stat);
        }
    }

    fn compile_stat(&mut self, stat: &Stat) {
        let pos = stat.pos;
        match &stat.kind {
            StatKind::Expr(expr) => {
                self.compile_expr(expr);
                self.emit(InstrKind::Pop, pos);
            }
            StatKind::If {
                condition,
                body,
                else_clause,
            } => self.compile_if(condition, body, else_clause.as_deref(), pos),
            StatKind::While {
                condition,
                body,
                else_clause,
            } => self.compile_while(condition, body, else_clause.as_deref(), pos),
            StatKind::Break => {
                let keep_tries = self.loop_try_depth.last().copied().unwrap_or(0);
                let jump = self.emit_jump(
                    InstrKind::UnwindJump {
                        target: 0,
                        keep_tries,
                    },
                    pos,
                );
                if let Some(frame) = self.break_jumps.last_mut() {
                    frame.push(jump);
                }
            }
            StatKind::Continue => {
                let keep_tries = self.loop_try_depth.last().copied().unwrap_or(0);
                let jump = self.emit_jump(
                    InstrKind::UnwindJump {
                        target: 0,
                        keep_tries,
                    },
                    pos,
                );
                if let Some(frame) = self.continue_jumps.last_mut() {
                    frame.push(jump);
                }
            }
            StatKind::Return(expr) => {
                self.compile_expr(expr);
                self.emit(InstrKind::Return, pos);
            }
            StatKind::Def(def) => {
                self.compile_function(def, false, pos);
                self.emit(
                    InstrKind::DirectAssign(Rc::new(AssignTarget::Direct(def.name.clone()))),
                    pos,
                );
                self.emit(InstrKind::Pop, pos);
            }
            StatKind::Class(class) => self.compile_class(class, pos),
            StatKind::Try {
                body,
                excepts,
                finally,
            } => self.compile_try(body, excepts, finally, pos),
            StatKind::Raise(expr) => {
                self.compile_expr(expr);
                self.emit(InstrKind::Raise, pos);
            }
            StatKind::Import { module, alias } => {
                self.emit(
                    InstrKind::Import {
                        module: Rc::from(module.as_str()),
                        alias: alias.as_deref().map(Rc::from),
                    },
                    pos,
                );
            }
            StatKind::ImportFrom {
                module,
                names,
                alias,
            } => {
                self.emit(
                    InstrKind::ImportFrom {
                        module: Rc::from(module.as_str()),
                        names: names.iter().map(|n| Rc::from(n.as_str())).collect(),
                        alias: alias.as_deref().map(Rc::from),
                    },
                    pos,
                );
            }
            StatKind::Pass | StatKind::Global(_) | StatKind::Nonlocal(_) => {}
            StatKind::Elif { .. }
            | StatKind::Else { .. }
            | StatKind::Except(_)
            | StatKind::Finally { .. }
            | StatKind::Composite(_) => {
                unreachable!("transient statement survived parsing")
            }
        }
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        body: &[Stat],
        else_clause: Option<&[Stat]>,
        pos: SourcePos,
    ) {
        self.compile_expr(condition);
        let false_jump = self.emit_jump(InstrKind::JumpIfFalsePop { target: 0 }, pos);
        self.compile_body(body);
        if let Some(else_body) = else_clause {
            let true_jump = self.emit_jump(InstrKind::Jump { target: 0 }, pos);
            self.patch_jump(false_jump);
            self.compile_body(else_body);
            self.patch_jump(true_jump);
        } else {
            self.patch_jump(false_jump);
        }
    }

    fn compile_while(
        &mut self,
        condition: &Expr,
        body: &[Stat],
        else_clause: Option<&[Stat]>,
        pos: SourcePos,
    ) {
        let condition_start = self.instructions.len();
        self.compile_expr(condition);
        let exit_jump = self.emit_jump(InstrKind::JumpIfFalsePop { target: 0 }, pos);

        self.break_jumps.push(Vec::new());
        self.continue_jumps.push(Vec::new());
        self.loop_try_depth.push(self.try_depth);

        self.compile_body(body);
        self.emit(
            InstrKind::Jump {
                target: condition_start,
            },
            pos,
        );
        self.patch_jump(exit_jump);

        // The else body runs when the condition falls false; breaks skip it.
        if let Some(else_body) = else_clause {
            self.compile_body(else_body);
        }

        self.loop_try_depth.pop();
        let breaks = self.break_jumps.pop().unwrap_or_default();
        let continues = self.continue_jumps.pop().unwrap_or_default();
        for index in breaks {
            self.patch_jump(index);
        }
        for index in continues {
            self.patch_jump_to(index, condition_start);
        }
    }

    fn compile_try(
        &mut self,
        body: &[Stat],
        excepts: &[crate::parse::ExceptClause],
        finally: &[Stat],
        pos: SourcePos,
    ) {
        let push_try = self.instructions.len();
        self.emit(
            InstrKind::PushTry {
                except_target: 0,
                finally_target: 0,
            },
            pos,
        );
        self.try_depth += 1;

        let mut finally_jumps = Vec::new();

        self.compile_body(body);
        finally_jumps.push(self.emit_jump(InstrKind::Jump { target: 0 }, pos));

        let except_target = self.instructions.len();
        for clause in excepts {
            let clause_pos = clause.pos;
            let mut next_clause_jump = None;
            if let Some(exc_type) = &clause.exc_type {
                // isinstance(<current exception>, <type>) gates the handler.
                self.emit(InstrKind::PushArgFrame, clause_pos);
                self.emit(InstrKind::PushIsInstance, clause_pos);
                self.emit(InstrKind::PushCurrentException, clause_pos);
                self.compile_expr(exc_type);
                self.emit(InstrKind::Call, clause_pos);
                next_clause_jump =
                    Some(self.emit_jump(InstrKind::JumpIfFalsePop { target: 0 }, clause_pos));

                if let Some(var) = &clause.var {
                    self.emit(InstrKind::PushCurrentException, clause_pos);
                    self.emit(
                        InstrKind::DirectAssign(Rc::new(AssignTarget::Direct(var.clone()))),
                        clause_pos,
                    );
                    self.emit(InstrKind::Pop, clause_pos);
                }
            }

            self.emit(InstrKind::ClearException, clause_pos);
            self.compile_body(&clause.body);
            finally_jumps.push(self.emit_jump(InstrKind::Jump { target: 0 }, clause_pos));

            if let Some(index) = next_clause_jump {
                self.patch_jump(index);
            }
        }

        let finally_target = self.instructions.len();
        for index in finally_jumps {
            self.patch_jump_to(index, finally_target);
        }
        if let InstrKind::PushTry {
            except_target: e,
            finally_target: f,
        } = &mut self.instructions[push_try].kind
        {
            *e = except_target;
            *f = finally_target;
        }

        self.compile_body(finally);
        self.emit(InstrKind::PopTry, pos);
        self.try_depth -= 1;
    }

    fn compile_class(&mut self, class: &ClassDef, pos: SourcePos) {
        for method in &class.body {
            let StatKind::Def(def) = &method.kind else {
                unreachable!("class bodies contain only method definitions")
            };
            self.compile_function(def, true, method.pos);
        }

        self.emit(InstrKind::PushArgFrame, pos);
        for base in &class.bases {
            self.compile_expr(base);
        }
        self.emit(
            InstrKind::Class(Rc::new(ClassInstr {
                name: Rc::from(class.name.as_str()),
                method_names: class
                    .method_names
                    .iter()
                    .map(|n| Rc::from(n.as_str()))
                    .collect(),
            })),
            pos,
        );
        self.emit(
            InstrKind::DirectAssign(Rc::new(AssignTarget::Direct(class.name.clone()))),
            pos,
        );
        self.emit(InstrKind::Pop, pos);
    }

    /// Compiles a function definition: default values are evaluated in the
    /// enclosing scope right-to-left (so the executor pops them leftmost
    /// first), then a `Def` instruction carrying the compiled body.
    fn compile_function(&mut self, def: &FnDef, is_method: bool, pos: SourcePos) {
        let named: Vec<&crate::expressions::Parameter> = def
            .parameters
            .iter()
            .filter(|p| p.kind == ParamKind::Named)
            .collect();
        let mut default_count = 0;
        for param in named.iter().rev() {
            if let Some(default) = &param.default {
                self.compile_expr(default);
                default_count += 1;
            } else {
                break;
            }
        }

        let list_args = def
            .parameters
            .iter()
            .find(|p| p.kind == ParamKind::ListArgs)
            .map(|p| Rc::from(p.name.as_str()));
        let kw_args = def
            .parameters
            .iter()
            .find(|p| p.kind == ParamKind::Kwargs)
            .map(|p| Rc::from(p.name.as_str()));

        let mut body_compiler = Compiler::default();
        body_compiler.compile_body(&def.body);

        self.emit(
            InstrKind::Def(Rc::new(DefInstr {
                pretty_name: Rc::from(def.name.as_str()),
                is_method,
                parameters: named.iter().map(|p| Rc::from(p.name.as_str())).collect(),
                default_count,
                list_args,
                kw_args,
                global_captures: def
                    .global_captures
                    .iter()
                    .map(|n| Rc::from(n.as_str()))
                    .collect(),
                local_captures: def
                    .local_captures
                    .iter()
                    .map(|n| Rc::from(n.as_str()))
                    .collect(),
                variables: def.variables.iter().map(|n| Rc::from(n.as_str())).collect(),
                instructions: Rc::new(body_compiler.instructions),
            })),
            pos,
        );
    }

    fn compile_expr(&mut self, expr: &Expr) {
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::Literal(lit) => self.emit(InstrKind::LoadLiteral(lit.clone()), pos),
            ExprKind::Variable(name) => {
                self.emit(InstrKind::LoadVariable(Rc::from(name.as_str())), pos);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::Set(items) => {
                self.emit(InstrKind::PushArgFrame, pos);
                for item in items {
                    self.compile_expr(item);
                }
                let build = match &expr.kind {
                    ExprKind::Tuple(_) => InstrKind::BuildTuple,
                    ExprKind::List(_) => InstrKind::BuildList,
                    _ => InstrKind::BuildSet,
                };
                self.emit(build, pos);
            }
            ExprKind::Map(entries) => {
                self.emit(InstrKind::PushArgFrame, pos);
                for entry in entries {
                    self.compile_expr(entry);
                }
                self.emit(InstrKind::BuildMap, pos);
            }
            ExprKind::ListComp(comp) => {
                self.emit(InstrKind::PushArgFrame, pos);
                self.emit(InstrKind::BuildList, pos);
                self.emit(
                    InstrKind::DirectAssign(Rc::new(AssignTarget::Direct(
                        comp.list_name.clone(),
                    ))),
                    pos,
                );
                // The assigned list stays on the stack as the expression's
                // value while the filling loop runs.
                self.compile_body(&comp.body);
            }
            ExprKind::Index { target, index } => {
                self.emit(InstrKind::PushArgFrame, pos);
                self.compile_expr(target);
                self.emit(InstrKind::Dot(Rc::from("__getitem__")), pos);
                self.compile_expr(index);
                self.emit(InstrKind::Call, pos);
            }
            ExprKind::SliceSpec(bounds) => {
                for bound in bounds.iter() {
                    self.compile_expr(bound);
                }
                self.emit(InstrKind::BuildSlice, pos);
            }
            ExprKind::Call { callee, args } => {
                self.emit(InstrKind::PushArgFrame, pos);
                self.compile_expr(callee);
                for arg in args {
                    self.compile_expr(arg);
                }
                self.emit(InstrKind::Call, pos);
            }
            ExprKind::Dot { target, name } => {
                self.compile_expr(target);
                self.emit(InstrKind::Dot(Rc::from(name.as_str())), pos);
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    self.compile_expr(operand);
                    self.emit(InstrKind::Not, pos);
                }
                UnaryOp::Pos | UnaryOp::Neg | UnaryOp::BitNot => {
                    let dunder = match op {
                        UnaryOp::Pos => "__pos__",
                        UnaryOp::Neg => "__neg__",
                        _ => "__invert__",
                    };
                    self.emit(InstrKind::PushArgFrame, pos);
                    self.compile_expr(operand);
                    self.emit(InstrKind::Dot(Rc::from(dunder)), pos);
                    self.emit(InstrKind::Call, pos);
                }
            },
            ExprKind::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs, pos),
            ExprKind::IfElse {
                condition,
                if_true,
                if_false,
            } => {
                self.compile_expr(condition);
                let false_jump = self.emit_jump(InstrKind::JumpIfFalsePop { target: 0 }, pos);
                self.compile_expr(if_true);
                let end_jump = self.emit_jump(InstrKind::Jump { target: 0 }, pos);
                self.patch_jump(false_jump);
                self.compile_expr(if_false);
                self.patch_jump(end_jump);
            }
            ExprKind::Assign { target, value } => {
                self.compile_expr(value);
                self.emit(InstrKind::DirectAssign(Rc::new(target.clone())), pos);
            }
            ExprKind::AssignIndex {
                container,
                index,
                value,
            } => {
                self.emit(InstrKind::PushArgFrame, pos);
                self.compile_expr(container);
                self.emit(InstrKind::Dot(Rc::from("__setitem__")), pos);
                self.compile_expr(index);
                self.compile_expr(value);
                self.emit(InstrKind::Call, pos);
            }
            ExprKind::AssignAttr {
                target,
                name,
                value,
            } => {
                self.compile_expr(target);
                self.compile_expr(value);
                self.emit(InstrKind::MemberAssign(Rc::from(name.as_str())), pos);
            }
            ExprKind::Function(def) => self.compile_function(def, false, pos),
            ExprKind::Kwarg { name, value } => {
                self.emit(InstrKind::LoadLiteral(Literal::Str(name.clone())), pos);
                self.emit(InstrKind::PushKwarg, pos);
                self.compile_expr(value);
            }
            ExprKind::Unpack(inner) => {
                self.compile_expr(inner);
                self.emit(InstrKind::Unpack, pos);
            }
            ExprKind::UnpackMapForMap(inner) => {
                self.compile_expr(inner);
                self.emit(InstrKind::UnpackMapForMap, pos);
            }
            ExprKind::UnpackMapForCall(inner) => {
                self.compile_expr(inner);
                self.emit(InstrKind::UnpackMapForCall, pos);
            }
        }
    }

    fn compile_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, pos: SourcePos) {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                self.compile_expr(lhs);
                let kind = if op == BinaryOp::And {
                    InstrKind::JumpIfFalseKeep { target: 0 }
                } else {
                    InstrKind::JumpIfTrueKeep { target: 0 }
                };
                let jump = self.emit_jump(kind, pos);
                self.compile_expr(rhs);
                self.patch_jump(jump);
            }
            BinaryOp::Is | BinaryOp::IsNot => {
                self.compile_expr(lhs);
                self.compile_expr(rhs);
                self.emit(InstrKind::Is, pos);
                if op == BinaryOp::IsNot {
                    self.emit(InstrKind::Not, pos);
                }
            }
            BinaryOp::In | BinaryOp::NotIn => {
                // `a in b` dispatches as `b.__contains__(a)`.
                self.emit(InstrKind::PushArgFrame, pos);
                self.compile_expr(rhs);
                self.emit(InstrKind::Dot(Rc::from("__contains__")), pos);
                self.compile_expr(lhs);
                self.emit(InstrKind::Call, pos);
                if op == BinaryOp::NotIn {
                    self.emit(InstrKind::Not, pos);
                }
            }
            _ => {
                let dunder = op.dunder().unwrap_or("__add__");
                self.emit(InstrKind::PushArgFrame, pos);
                self.compile_expr(lhs);
                self.emit(InstrKind::Dot(Rc::from(dunder)), pos);
                self.compile_expr(rhs);
                self.emit(InstrKind::Call, pos);
            }
        }
    }
}
