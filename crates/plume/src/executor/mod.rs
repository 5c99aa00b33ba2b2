//! The instruction executor: one frame per active call, unwinding through
//! explicit try-frames so exceptions keep their line-number context.

mod attr;
mod call;
mod ops;

pub use ops::{BinOp, UnOp};

use std::{cell::Cell, rc::Rc};

use ahash::AHashMap;

use crate::{
    compile::{Instr, InstrKind},
    context::Context,
    exceptions::{ExcKind, Raised, RunResult},
    expressions::{AssignTarget, Literal},
    heap::ObjId,
    object::{ObjPayload, ScriptFn},
};

/// A record on the try stack: where to jump on exception vs. where the
/// `finally` body begins, and how much value stack to keep.
#[derive(Debug, Clone)]
pub(crate) struct TryFrame {
    pub except_target: usize,
    pub finally_target: usize,
    pub handling: bool,
    /// Set while a pending return/break/continue drains this frame's
    /// finally body, so the drain visits each frame once.
    pub unwinding: bool,
    pub stack_size: usize,
}

/// One active call's executor state.
pub(crate) struct Frame {
    pub script: Rc<ScriptFn>,
    pub pc: usize,
    pub stack: Vec<ObjId>,
    /// Stack indices where each in-flight call's arguments begin.
    pub arg_frames: Vec<usize>,
    /// Keyword-argument name objects, parallel to `arg_frames`.
    pub kwarg_names: Vec<Vec<ObjId>>,
    pub variables: AHashMap<Rc<str>, Rc<Cell<ObjId>>>,
    pub try_frames: Vec<TryFrame>,
    /// Return value held while finally bodies drain on the way out.
    pub pending_return: Option<ObjId>,
    /// Break/continue target (plus the try depth to keep) held while
    /// finally bodies drain.
    pub pending_jump: Option<(usize, usize)>,
}

impl Frame {
    pub fn new(script: Rc<ScriptFn>) -> Self {
        Self {
            script,
            pc: 0,
            stack: Vec::new(),
            arg_frames: Vec::new(),
            kwarg_names: Vec::new(),
            variables: AHashMap::new(),
            try_frames: Vec::new(),
            pending_return: None,
            pending_jump: None,
        }
    }

    /// Everything the collector must treat as live in this frame.
    pub fn trace_roots(&self, out: &mut Vec<ObjId>) {
        out.extend(self.stack.iter().copied());
        for names in &self.kwarg_names {
            out.extend(names.iter().copied());
        }
        for cell in self.variables.values() {
            out.push(cell.get());
        }
        if let Some(value) = self.pending_return {
            out.push(value);
        }
        out.extend(self.script.defaults.iter().copied());
        for (_, cell) in &self.script.captures {
            out.push(cell.get());
        }
    }

    fn push(&mut self, value: ObjId) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> ObjId {
        self.stack.pop().expect("value stack underflow")
    }

    /// Retires the innermost argument frame, returning how many values sit
    /// above its marker.
    fn pop_arg_frame(&mut self) -> usize {
        self.kwarg_names.pop();
        let marker = self.arg_frames.pop().unwrap_or(0);
        self.stack.len() - marker
    }
}

pub(crate) enum Flow {
    Normal,
    Return(ObjId),
}

impl Context {
    /// Runs the topmost frame to completion.
    ///
    /// Falls off the end with `None` as the implicit return value. A raised
    /// exception unwinds through the frame's try stack; if no handler
    /// remains, the error propagates to the caller.
    pub(crate) fn run_top_frame(&mut self) -> RunResult<ObjId> {
        let frame_index = self.frames.len() - 1;
        let instructions = self.frames[frame_index].script.instructions.clone();

        loop {
            let pc = self.frames[frame_index].pc;
            let Some(instr) = instructions.get(pc) else {
                break;
            };
            self.frames[frame_index].pc = pc + 1;

            if let Some(trace) = self.current_trace.last_mut() {
                trace.pos = instr.pos;
            }
            self.config.tracer.on_instruction(instr_name(instr), instr.pos);

            match self.do_instruction(frame_index, instr) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(Raised) => {
                    let frame = &mut self.frames[frame_index];
                    // An exception supersedes any pending return or jump.
                    frame.pending_return = None;
                    frame.pending_jump = None;
                    loop {
                        let Some(try_frame) = frame.try_frames.last_mut() else {
                            return Err(Raised);
                        };
                        if try_frame.unwinding {
                            // This frame's finally already ran (or is
                            // running); the exception passes it by.
                            frame.try_frames.pop();
                            continue;
                        }
                        let stack_size = try_frame.stack_size;
                        if try_frame.handling {
                            // Raised inside a handler; divert to finally,
                            // once.
                            try_frame.unwinding = true;
                            frame.pc = try_frame.finally_target;
                        } else {
                            try_frame.handling = true;
                            frame.pc = try_frame.except_target;
                        }
                        frame.stack.truncate(stack_size);
                        break;
                    }
                }
            }
        }

        Ok(self.none())
    }

    fn do_instruction(&mut self, frame_index: usize, instr: &Instr) -> RunResult<Flow> {
        match &instr.kind {
            InstrKind::Jump { target } => {
                self.frames[frame_index].pc = *target;
            }
            InstrKind::JumpIfFalsePop { target } => {
                let value = self.frames[frame_index].pop();
                if !self.unary_bool(value)? {
                    self.frames[frame_index].pc = *target;
                }
            }
            InstrKind::JumpIfFalseKeep { target } | InstrKind::JumpIfTrueKeep { target } => {
                let value = *self
                    .frames[frame_index]
                    .stack
                    .last()
                    .expect("short-circuit operand missing");
                let truthy = self.unary_bool(value)?;
                let jump_if = matches!(instr.kind, InstrKind::JumpIfTrueKeep { .. });
                if truthy == jump_if {
                    // Short-circuit: the operand is the expression's value.
                    self.frames[frame_index].pc = *target;
                } else {
                    self.frames[frame_index].pop();
                }
            }
            InstrKind::Pop => {
                self.frames[frame_index].pop();
            }
            InstrKind::Return => {
                let value = self.frames[frame_index].pop();
                // A return inside try drains every finally on the way out.
                let frame = &mut self.frames[frame_index];
                if let Some(finally_target) = divert_to_finally(frame, 0) {
                    frame.pending_return = Some(value);
                    frame.pc = finally_target;
                } else {
                    return Ok(Flow::Return(value));
                }
            }
            InstrKind::UnwindJump { target, keep_tries } => {
                let frame = &mut self.frames[frame_index];
                if let Some(finally_target) = divert_to_finally(frame, *keep_tries) {
                    frame.pending_jump = Some((*target, *keep_tries));
                    frame.pc = finally_target;
                } else {
                    frame.pending_jump = None;
                    frame.pc = *target;
                }
            }
            InstrKind::LoadLiteral(literal) => {
                let value = match literal {
                    Literal::Null => self.none(),
                    Literal::Bool(b) => self.new_bool(*b),
                    Literal::Int(i) => self.new_int(*i)?,
                    Literal::Float(f) => self.new_float(*f)?,
                    Literal::Str(s) => {
                        let s = s.clone();
                        self.new_str(&s)?
                    }
                };
                self.frames[frame_index].push(value);
            }
            InstrKind::LoadVariable(name) => {
                let value = self.get_variable(frame_index, name);
                match value {
                    Some(value) => self.frames[frame_index].push(value),
                    None => {
                        return Err(self.raise_kind(
                            ExcKind::NameError,
                            &format!("The name '{name}' is not defined"),
                        ));
                    }
                }
            }
            InstrKind::DirectAssign(target) => {
                let value = self.frames[frame_index].pop();
                let result = self.direct_assign(frame_index, target, value)?;
                self.frames[frame_index].push(result);
            }
            InstrKind::MemberAssign(name) => {
                let value = self.frames[frame_index].pop();
                let obj = self.frames[frame_index].pop();
                self.set_attribute(obj, name, value);
                self.frames[frame_index].push(value);
            }
            InstrKind::PushArgFrame => {
                let frame = &mut self.frames[frame_index];
                frame.arg_frames.push(frame.stack.len());
                frame.kwarg_names.push(Vec::new());
            }
            InstrKind::Call => return self.do_call(frame_index),
            InstrKind::Dot(name) => {
                let obj = self.frames[frame_index].pop();
                let attr = self.get_attribute(obj, name)?;
                self.frames[frame_index].push(attr);
            }
            InstrKind::Not => {
                let value = self.frames[frame_index].pop();
                let truthy = self.unary_bool(value)?;
                let negated = self.new_bool(!truthy);
                self.frames[frame_index].push(negated);
            }
            InstrKind::Is => {
                let rhs = self.frames[frame_index].pop();
                let lhs = self.frames[frame_index].pop();
                let result = self.new_bool(lhs == rhs);
                self.frames[frame_index].push(result);
            }
            InstrKind::BuildTuple | InstrKind::BuildList => {
                let argc = self.frames[frame_index].pop_arg_frame();
                let frame = &mut self.frames[frame_index];
                let items: Vec<ObjId> = frame.stack.split_off(frame.stack.len() - argc);
                self.protected.extend(items.iter().copied());
                let result = if matches!(instr.kind, InstrKind::BuildTuple) {
                    self.new_tuple(&items)
                } else {
                    self.new_list(&items)
                };
                self.protected.truncate(self.protected.len() - items.len());
                self.frames[frame_index].push(result?);
            }
            InstrKind::BuildSet => {
                let argc = self.frames[frame_index].pop_arg_frame();
                let frame = &mut self.frames[frame_index];
                let items: Vec<ObjId> = frame.stack.split_off(frame.stack.len() - argc);
                self.protected.extend(items.iter().copied());
                let result = (|| {
                    let set = self.new_set()?;
                    self.protected.push(set);
                    for &item in &items {
                        if let Err(raised) = self.set_add(set, item) {
                            self.protected.pop();
                            return Err(raised);
                        }
                    }
                    self.protected.pop();
                    Ok(set)
                })();
                self.protected.truncate(self.protected.len() - items.len());
                self.frames[frame_index].push(result?);
            }
            InstrKind::BuildMap => {
                let argc = self.frames[frame_index].pop_arg_frame();
                let frame = &mut self.frames[frame_index];
                let items: Vec<ObjId> = frame.stack.split_off(frame.stack.len() - argc);
                self.protected.extend(items.iter().copied());
                let result = (|| {
                    let dict = self.new_dict()?;
                    self.protected.push(dict);
                    for pair in items.chunks(2) {
                        if let [key, value] = pair {
                            if let Err(raised) = self.dict_set(dict, *key, *value) {
                                self.protected.pop();
                                return Err(raised);
                            }
                        }
                    }
                    self.protected.pop();
                    Ok(dict)
                })();
                self.protected.truncate(self.protected.len() - items.len());
                self.frames[frame_index].push(result?);
            }
            InstrKind::BuildSlice => {
                let step = self.frames[frame_index].pop();
                let stop = self.frames[frame_index].pop();
                let start = self.frames[frame_index].pop();
                // Construct an empty slice, then write the bounds directly:
                // slice.__init__'s arity rules would misread explicit Nones.
                let slice_class = self.builtins.slice_class;
                let none = self.none();
                let slice = self.call(slice_class, &[none], None)?;
                self.set_attribute(slice, "step", step);
                self.set_attribute(slice, "stop", stop);
                self.set_attribute(slice, "start", start);
                self.frames[frame_index].push(slice);
            }
            InstrKind::PushKwarg => {
                let name = self.frames[frame_index].pop();
                self.frames[frame_index]
                    .kwarg_names
                    .last_mut()
                    .expect("kwarg outside argument frame")
                    .push(name);
            }
            InstrKind::Unpack => {
                let iterable = self.frames[frame_index].pop();
                self.iterate(iterable, &mut |ctx, value| {
                    ctx.frames[frame_index].push(value);
                    Ok(true)
                })?;
            }
            InstrKind::UnpackMapForMap => {
                let map = self.frames[frame_index].pop();
                let entries = self.dict_entries_checked(map)?;
                for (key, value) in entries {
                    self.frames[frame_index].push(key);
                    self.frames[frame_index].push(value);
                }
            }
            InstrKind::UnpackMapForCall => {
                let map = self.frames[frame_index].pop();
                let entries = self.dict_entries_checked(map)?;
                for (key, value) in entries {
                    if !self.heap.get(key).is_str() {
                        return Err(
                            self.raise_kind(ExcKind::TypeError, "Keywords must be strings")
                        );
                    }
                    self.frames[frame_index]
                        .kwarg_names
                        .last_mut()
                        .expect("kwarg unpack outside argument frame")
                        .push(key);
                    self.frames[frame_index].push(value);
                }
            }
            InstrKind::Def(def) => {
                let function = self.make_function(frame_index, def)?;
                self.frames[frame_index].push(function);
            }
            InstrKind::Class(class) => {
                let method_count = class.method_names.len();
                let base_count = self.frames[frame_index].pop_arg_frame();
                let frame = &self.frames[frame_index];
                let stack_len = frame.stack.len();
                let bases: Vec<ObjId> = frame.stack[stack_len - base_count..].to_vec();
                let methods: Vec<ObjId> = frame.stack
                    [stack_len - base_count - method_count..stack_len - base_count]
                    .to_vec();

                let klass = self.new_class(&class.name, &bases)?;
                for (name, &method) in class.method_names.iter().zip(&methods) {
                    if let Some(class_data) = self.heap.get_mut(klass).as_class_mut() {
                        class_data.instance_attrs.set(name.clone(), method);
                    }
                }

                let frame = &mut self.frames[frame_index];
                frame
                    .stack
                    .truncate(stack_len - base_count - method_count);
                frame.push(klass);
            }
            InstrKind::Raise => {
                let value = self.frames[frame_index].pop();
                return if self.heap.get(value).is_class() {
                    Err(self.raise_class(value, ""))
                } else {
                    Err(self.raise_object(value))
                };
            }
            InstrKind::PushTry {
                except_target,
                finally_target,
            } => {
                let frame = &mut self.frames[frame_index];
                let stack_size = frame.stack.len();
                frame.try_frames.push(TryFrame {
                    except_target: *except_target,
                    finally_target: *finally_target,
                    handling: false,
                    unwinding: false,
                    stack_size,
                });
            }
            InstrKind::PopTry => {
                self.frames[frame_index].try_frames.pop();
                if self.current_exception_obj.is_some() {
                    // The range completed with the exception still active
                    // (no handler matched, or finally left it in place).
                    return Err(Raised);
                }
                // Resume a return or break/continue that was parked while
                // this frame's finally ran.
                let frame = &mut self.frames[frame_index];
                if let Some(value) = frame.pending_return.take() {
                    if let Some(finally_target) = divert_to_finally(frame, 0) {
                        frame.pending_return = Some(value);
                        frame.pc = finally_target;
                    } else {
                        return Ok(Flow::Return(value));
                    }
                } else if let Some((target, keep_tries)) = frame.pending_jump {
                    if let Some(finally_target) = divert_to_finally(frame, keep_tries) {
                        frame.pc = finally_target;
                    } else {
                        frame.pending_jump = None;
                        frame.pc = target;
                    }
                }
            }
            InstrKind::ClearException => self.clear_exception(),
            InstrKind::PushCurrentException => {
                let exception = self.current_exception_obj.unwrap_or(self.none());
                self.frames[frame_index].push(exception);
            }
            InstrKind::PushIsInstance => {
                let isinstance = self.builtins.isinstance;
                self.frames[frame_index].push(isinstance);
            }
            InstrKind::Import { module, alias } => {
                self.import_module(module, alias.as_deref())?;
            }
            InstrKind::ImportFrom {
                module,
                names,
                alias,
            } => {
                if names.is_empty() {
                    self.import_all_from_module(module)?;
                } else if let Some(alias) = alias {
                    self.import_from_module(module, &names[0], Some(alias))?;
                } else {
                    for name in names {
                        self.import_from_module(module, name, None)?;
                    }
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn get_variable(&self, frame_index: usize, name: &str) -> Option<ObjId> {
        if let Some(cell) = self.frames[frame_index].variables.get(name) {
            return Some(cell.get());
        }
        self.get_global(name)
    }

    fn set_variable(&mut self, frame_index: usize, name: &str, value: ObjId) {
        if let Some(cell) = self.frames[frame_index].variables.get(name) {
            cell.set(value);
            return;
        }
        self.set_global(name, value);
    }

    /// Assigns into a direct or packing target; returns the expression's
    /// value (the assigned value, or a tuple of unpacked values).
    fn direct_assign(
        &mut self,
        frame_index: usize,
        target: &AssignTarget,
        value: ObjId,
    ) -> RunResult<ObjId> {
        match target {
            AssignTarget::Direct(name) => {
                self.set_variable(frame_index, name, value);
                Ok(value)
            }
            AssignTarget::Pack(targets) => {
                let protect_base = self.protected.len();
                let mut values = Vec::new();
                let result = self.iterate(value, &mut |ctx, item| {
                    ctx.protected.push(item);
                    values.push(item);
                    Ok(true)
                });
                if let Err(raised) = result {
                    self.protected.truncate(protect_base);
                    return Err(raised);
                }

                if values.len() != targets.len() {
                    self.protected.truncate(protect_base);
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "Packed assignment argument count mismatch",
                    ));
                }
                for (target, &item) in targets.iter().zip(&values) {
                    if let Err(raised) = self.direct_assign(frame_index, target, item) {
                        self.protected.truncate(protect_base);
                        return Err(raised);
                    }
                }
                let tuple = self.new_tuple(&values);
                self.protected.truncate(protect_base);
                tuple
            }
        }
    }

    /// Builds a function object from a `Def` instruction: pops default
    /// values, wires capture cells, and closes over the defining source.
    fn make_function(
        &mut self,
        frame_index: usize,
        def: &Rc<crate::compile::DefInstr>,
    ) -> RunResult<ObjId> {
        let mut defaults = Vec::with_capacity(def.default_count);
        for _ in 0..def.default_count {
            let value = self.frames[frame_index].pop();
            defaults.push(value);
        }
        self.protected.extend(defaults.iter().copied());

        let module = self.frames[frame_index].script.module.clone();
        let source = self.frames[frame_index].script.source.clone();

        let mut captures = Vec::with_capacity(def.local_captures.len() + def.global_captures.len());
        for name in &def.local_captures {
            let existing = self.frames[frame_index].variables.get(name).cloned();
            let cell = match existing {
                Some(cell) => cell,
                None => self.global_cell(&module, name),
            };
            captures.push((name.clone(), cell));
        }
        for name in &def.global_captures {
            let cell = self.global_cell(&module, name);
            captures.push((name.clone(), cell));
        }

        let script = Rc::new(ScriptFn {
            instructions: def.instructions.clone(),
            module,
            local_vars: def.variables.clone(),
            param_names: def.parameters.clone(),
            defaults,
            list_args: def.list_args.clone(),
            kw_args: def.kw_args.clone(),
            captures,
            source,
        });
        let result = self.new_scripted_function(script, &def.pretty_name, def.is_method);
        self.protected
            .truncate(self.protected.len() - def.default_count);
        result
    }

    /// Dictionary entries of `map`, or a `TypeError` if it is not a dict.
    fn dict_entries_checked(&mut self, map: ObjId) -> RunResult<Vec<(ObjId, ObjId)>> {
        match &self.heap.get(map).payload {
            ObjPayload::Dict(dict) => {
                Ok(dict.iter().map(|entry| (entry.key, entry.value)).collect())
            }
            _ => Err(self.raise_kind(
                ExcKind::TypeError,
                "Unary '**' must be applied to a dictionary",
            )),
        }
    }
}

/// Marks the innermost try frame above `keep_tries` that is not already
/// draining, truncates the value stack to it, and returns its finally
/// target. `None` means nothing is left to drain.
fn divert_to_finally(frame: &mut Frame, keep_tries: usize) -> Option<usize> {
    let index = frame
        .try_frames
        .iter()
        .enumerate()
        .skip(keep_tries)
        .rev()
        .find(|(_, tf)| !tf.unwinding)
        .map(|(i, _)| i)?;
    let try_frame = &mut frame.try_frames[index];
    try_frame.unwinding = true;
    let stack_size = try_frame.stack_size;
    let finally_target = try_frame.finally_target;
    frame.stack.truncate(stack_size);
    Some(finally_target)
}

fn instr_name(instr: &Instr) -> &'static str {
    match &instr.kind {
        InstrKind::LoadLiteral(_) => "LoadLiteral",
        InstrKind::LoadVariable(_) => "LoadVariable",
        InstrKind::DirectAssign(_) => "DirectAssign",
        InstrKind::MemberAssign(_) => "MemberAssign",
        InstrKind::Pop => "Pop",
        InstrKind::PushArgFrame => "PushArgFrame",
        InstrKind::Call => "Call",
        InstrKind::Dot(_) => "Dot",
        InstrKind::Not => "Not",
        InstrKind::Is => "Is",
        InstrKind::BuildTuple => "BuildTuple",
        InstrKind::BuildList => "BuildList",
        InstrKind::BuildMap => "BuildMap",
        InstrKind::BuildSet => "BuildSet",
        InstrKind::BuildSlice => "BuildSlice",
        InstrKind::PushKwarg => "PushKwarg",
        InstrKind::Unpack => "Unpack",
        InstrKind::UnpackMapForMap => "UnpackMapForMap",
        InstrKind::UnpackMapForCall => "UnpackMapForCall",
        InstrKind::Def(_) => "Def",
        InstrKind::Class(_) => "Class",
        InstrKind::Jump { .. } => "Jump",
        InstrKind::UnwindJump { .. } => "UnwindJump",
        InstrKind::JumpIfFalsePop { .. } => "JumpIfFalsePop",
        InstrKind::JumpIfFalseKeep { .. } => "JumpIfFalseKeep",
        InstrKind::JumpIfTrueKeep { .. } => "JumpIfTrueKeep",
        InstrKind::Return => "Return",
        InstrKind::Raise => "Raise",
        InstrKind::PushTry { .. } => "PushTry",
        InstrKind::PopTry => "PopTry",
        InstrKind::ClearException => "ClearException",
        InstrKind::PushCurrentException => "PushCurrentException",
        InstrKind::PushIsInstance => "PushIsInstance",
        InstrKind::Import { .. } => "Import",
        InstrKind::ImportFrom { .. } => "ImportFrom",
    }
}
