//! Call convention: argument frames, kwargs, parameter binding, and the
//! class-construction path.

use std::{cell::Cell, rc::Rc};

use smallvec::SmallVec;

use crate::{
    context::Context,
    exceptions::{ExcKind, RunResult, TraceFrame},
    executor::{Flow, Frame},
    heap::ObjId,
    lex::SourcePos,
    object::{Callable, NativeFn, ObjPayload, ScriptFn},
};

/// How a callable is to be entered, extracted up front so the heap borrow
/// ends before the call machinery starts pushing context stacks.
enum Invoke {
    Native {
        f: NativeFn,
        userdata: Option<ObjId>,
    },
    Scripted(Rc<ScriptFn>),
    ClassCtor(NativeFn),
    ClassStandard,
}

impl Context {
    /// Executes a `Call` instruction on the given frame.
    pub(crate) fn do_call(&mut self, frame_index: usize) -> RunResult<Flow> {
        let (callable, argc, kwargc) = {
            let frame = &self.frames[frame_index];
            let marker = *frame.arg_frames.last().expect("call outside argument frame");
            let kwargc = frame.kwarg_names.last().map_or(0, Vec::len);
            let argc = frame.stack.len() - marker - kwargc - 1;
            let callable = frame.stack[frame.stack.len() - argc - kwargc - 1];
            (callable, argc, kwargc)
        };

        let kwargs = if kwargc == 0 {
            None
        } else {
            let (names, values) = {
                let frame = &self.frames[frame_index];
                let names = frame.kwarg_names.last().cloned().unwrap_or_default();
                let base = frame.stack.len() - kwargc;
                let values: Vec<ObjId> = frame.stack[base..].to_vec();
                (names, values)
            };
            let dict = match self.new_dict() {
                Ok(dict) => dict,
                Err(raised) => {
                    self.frames[frame_index].pop_arg_frame();
                    return Err(raised);
                }
            };
            self.protected.push(dict);
            for (&name, &value) in names.iter().zip(&values) {
                if let Err(raised) = self.dict_set(dict, name, value) {
                    self.protected.pop();
                    self.frames[frame_index].pop_arg_frame();
                    return Err(raised);
                }
            }
            self.protected.pop();
            Some(dict)
        };

        let args: Vec<ObjId> = {
            let frame = &self.frames[frame_index];
            let base = frame.stack.len() - argc - kwargc;
            frame.stack[base..base + argc].to_vec()
        };

        let result = self.call(callable, &args, kwargs);
        let frame = &mut self.frames[frame_index];
        match result {
            Ok(value) => {
                let keep = frame.stack.len() - argc - kwargc - 1;
                frame.stack.truncate(keep);
                frame.push(value);
                frame.pop_arg_frame();
                Ok(Flow::Normal)
            }
            Err(raised) => {
                frame.pop_arg_frame();
                Err(raised)
            }
        }
    }

    /// Calls a callable with positional arguments and an optional kwargs
    /// dictionary.
    ///
    /// Functions and classes are entered directly; any other object is
    /// dispatched through its `__call__` method.
    pub fn call(
        &mut self,
        callable: ObjId,
        argv: &[ObjId],
        kwargs: Option<ObjId>,
    ) -> RunResult<ObjId> {
        if self.kwargs_stack.len() >= self.config.max_recursion {
            return Err(self.raise_kind(ExcKind::RecursionError, ""));
        }

        {
            let obj = self.heap.get(callable);
            if !obj.is_func() && !obj.is_class() {
                return self.call_method(callable, "__call__", argv, kwargs);
            }
        }

        if let Some(kw) = kwargs {
            match &self.heap.get(kw).payload {
                ObjPayload::Dict(dict) => {
                    let keys: Vec<ObjId> = dict.iter().map(|entry| entry.key).collect();
                    for key in keys {
                        if !self.heap.get(key).is_str() {
                            return Err(self.raise_kind(
                                ExcKind::TypeError,
                                "Keyword arguments dictionary must only contain string keys",
                            ));
                        }
                    }
                }
                _ => {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        "Keyword arguments must be a dictionary",
                    ));
                }
            }
        }

        // Pin the callable and arguments across the call.
        let protect_base = self.protected.len();
        self.protected.push(callable);
        self.protected.extend_from_slice(argv);
        if let Some(kw) = kwargs {
            self.protected.push(kw);
        }

        let result = self.call_pinned(callable, argv, kwargs);
        self.protected.truncate(protect_base);
        result
    }

    fn call_pinned(
        &mut self,
        callable: ObjId,
        argv: &[ObjId],
        kwargs: Option<ObjId>,
    ) -> RunResult<ObjId> {
        let obj = self.heap.get(callable);
        let (invoke, self_obj, module, pretty_name, userdata, is_func) = match &obj.payload {
            ObjPayload::Func(func) => {
                let invoke = match &func.callable {
                    Callable::Native { f, userdata } => Invoke::Native {
                        f: *f,
                        userdata: *userdata,
                    },
                    Callable::Scripted(script) => Invoke::Scripted(script.clone()),
                };
                let userdata = match &func.callable {
                    Callable::Native { userdata, .. } => *userdata,
                    Callable::Scripted(_) => None,
                };
                (
                    invoke,
                    func.self_obj,
                    func.module.clone(),
                    func.pretty_name.clone(),
                    userdata,
                    true,
                )
            }
            ObjPayload::Class(class) => {
                let invoke = match class.native_ctor {
                    Some(ctor) => Invoke::ClassCtor(ctor),
                    None => Invoke::ClassStandard,
                };
                (
                    invoke,
                    None,
                    class.module.clone(),
                    class.name.clone(),
                    Some(callable),
                    false,
                )
            }
            _ => unreachable!("call_pinned requires a function or class"),
        };

        let mut full_args: SmallVec<[ObjId; 8]> = SmallVec::new();
        if let Some(self_obj) = self_obj {
            self.protected.push(self_obj);
            full_args.push(self_obj);
        }
        full_args.extend_from_slice(argv);

        self.module_stack.push(module.clone());
        self.userdata_stack.push(userdata);
        self.kwargs_stack.push(kwargs);
        if is_func {
            let source = match &invoke {
                Invoke::Scripted(script) => Some(script.source.clone()),
                _ => None,
            };
            self.current_trace.push(TraceFrame {
                pos: SourcePos::default(),
                module: module.clone(),
                func: pretty_name.clone(),
                source,
                syntax_error: false,
            });
            self.config.tracer.on_call(&pretty_name);
        }

        let result = match invoke {
            Invoke::Native { f, .. } => f(self, &full_args),
            Invoke::Scripted(script) => self.run_scripted(&script, &pretty_name, &full_args),
            Invoke::ClassCtor(ctor) => ctor(self, argv),
            Invoke::ClassStandard => self.construct_instance(callable, argv, kwargs),
        };

        if is_func {
            self.current_trace.pop();
        }
        self.kwargs_stack.pop();
        self.userdata_stack.pop();
        self.module_stack.pop();

        result
    }

    /// Binds parameters and runs an interpreted function body.
    ///
    /// Binding order: keyword arguments into named slots (surplus keywords
    /// into `**kwargs` or `TypeError`); positionals into remaining slots
    /// (surplus into `*args` or `TypeError`); defaults for what is left;
    /// anything still unbound is a `TypeError`.
    fn run_scripted(
        &mut self,
        script: &Rc<ScriptFn>,
        pretty_name: &str,
        args: &[ObjId],
    ) -> RunResult<ObjId> {
        let kwargs = self.kwargs();
        let none = self.none();

        self.frames.push(Frame::new(script.clone()));
        let frame_index = self.frames.len() - 1;
        let result =
            self.bind_and_run(frame_index, script, pretty_name, args, kwargs, none);
        self.frames.pop();
        result
    }

    fn bind_and_run(
        &mut self,
        frame_index: usize,
        script: &Rc<ScriptFn>,
        pretty_name: &str,
        args: &[ObjId],
        kwargs: Option<ObjId>,
        none: ObjId,
    ) -> RunResult<ObjId> {
        for name in &script.local_vars {
            self.frames[frame_index]
                .variables
                .insert(name.clone(), Rc::new(Cell::new(none)));
        }
        for (name, cell) in &script.captures {
            self.frames[frame_index]
                .variables
                .insert(name.clone(), cell.clone());
        }

        let new_kwargs = match &script.kw_args {
            Some(kw_name) => {
                let dict = self.new_dict()?;
                self.frames[frame_index]
                    .variables
                    .insert(kw_name.clone(), Rc::new(Cell::new(dict)));
                Some(dict)
            }
            None => None,
        };

        let mut assigned = vec![false; script.param_names.len()];

        if let Some(kwargs) = kwargs {
            let entries: Vec<(ObjId, ObjId)> = match &self.heap.get(kwargs).payload {
                ObjPayload::Dict(dict) => {
                    dict.iter().map(|entry| (entry.key, entry.value)).collect()
                }
                _ => Vec::new(),
            };
            for (key, value) in entries {
                let key_name = self
                    .heap
                    .get(key)
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_default();
                let slot = script
                    .param_names
                    .iter()
                    .position(|param| **param == key_name);
                match slot {
                    Some(i) => {
                        self.frames[frame_index]
                            .variables
                            .insert(script.param_names[i].clone(), Rc::new(Cell::new(value)));
                        assigned[i] = true;
                    }
                    None => match new_kwargs {
                        Some(dict) => self.dict_set(dict, key, value)?,
                        None => {
                            return Err(self.raise_kind(
                                ExcKind::TypeError,
                                &format!(
                                    "{pretty_name}() got an unexpected keyword argument \
                                     '{key_name}'"
                                ),
                            ));
                        }
                    },
                }
            }
        }

        let mut surplus_positional: Vec<ObjId> = Vec::new();
        for (i, &arg) in args.iter().enumerate() {
            if i < script.param_names.len() {
                if assigned[i] {
                    return Err(self.raise_kind(
                        ExcKind::TypeError,
                        &format!(
                            "{pretty_name}() got multiple values for argument '{}'",
                            script.param_names[i]
                        ),
                    ));
                }
                self.frames[frame_index]
                    .variables
                    .insert(script.param_names[i].clone(), Rc::new(Cell::new(arg)));
                assigned[i] = true;
            } else if script.list_args.is_some() {
                surplus_positional.push(arg);
            } else {
                return Err(self.raise_kind(
                    ExcKind::TypeError,
                    &format!(
                        "{pretty_name}() takes {} positional argument(s) but {} {} given",
                        script.param_names.len(),
                        args.len(),
                        if args.len() == 1 { "was" } else { "were" }
                    ),
                ));
            }
        }
        if let Some(list_name) = &script.list_args {
            let tuple = self.new_tuple(&surplus_positional)?;
            self.frames[frame_index]
                .variables
                .insert(list_name.clone(), Rc::new(Cell::new(tuple)));
        }

        let defaultable_start = script.param_names.len() - script.defaults.len();
        for (j, &default) in script.defaults.iter().enumerate() {
            let i = defaultable_start + j;
            if !assigned[i] {
                self.frames[frame_index]
                    .variables
                    .insert(script.param_names[i].clone(), Rc::new(Cell::new(default)));
                assigned[i] = true;
            }
        }

        let unassigned: Vec<String> = assigned
            .iter()
            .enumerate()
            .filter(|(_, &done)| !done)
            .map(|(i, _)| (i + 1).to_string())
            .collect();
        if !unassigned.is_empty() {
            return Err(self.raise_kind(
                ExcKind::TypeError,
                &format!(
                    "Function {pretty_name}() missing parameter(s) {}",
                    unassigned.join(", ")
                ),
            ));
        }

        self.run_top_frame()
    }

    /// The standard class-call path: allocate an instance aliasing the
    /// class's attribute table, then run `__init__` if the class has one.
    pub(crate) fn construct_instance(
        &mut self,
        class_id: ObjId,
        argv: &[ObjId],
        kwargs: Option<ObjId>,
    ) -> RunResult<ObjId> {
        let (attrs, name) = {
            let class = self
                .heap
                .get(class_id)
                .as_class()
                .expect("constructing from a non-class");
            (class.instance_attrs.copy(), class.name.clone())
        };
        let instance = self.alloc(name, ObjPayload::Instance, attrs)?;
        self.protected.push(instance);

        let result = (|| {
            if let Some(init) = self.has_attribute(instance, "__init__") {
                if self.heap.get(init).is_func() {
                    let ret = self.call(init, argv, kwargs)?;
                    if !self.is_none(ret) {
                        return Err(self.raise_kind(
                            ExcKind::TypeError,
                            "__init__() returned a non NoneType type",
                        ));
                    }
                }
            }
            Ok(instance)
        })();

        self.protected.pop();
        result
    }

    /// Calls `obj.<method>(argv)`, binding the receiver.
    pub fn call_method(
        &mut self,
        obj: ObjId,
        method: &str,
        argv: &[ObjId],
        kwargs: Option<ObjId>,
    ) -> RunResult<ObjId> {
        let callable = self.get_attribute(obj, method)?;
        self.call(callable, argv, kwargs)
    }

    /// Calls a method resolved from the bases only, skipping the
    /// most-derived definition. `base` narrows the search to one base
    /// class's table.
    pub fn call_method_from_base(
        &mut self,
        obj: ObjId,
        method: &str,
        argv: &[ObjId],
        kwargs: Option<ObjId>,
        base: Option<ObjId>,
    ) -> RunResult<ObjId> {
        match self.get_attribute_from_base(obj, method, base) {
            Some(callable) => self.call(callable, argv, kwargs),
            None => {
                let type_name = self.heap.get(obj).type_display();
                Err(self.raise_kind(
                    ExcKind::AttributeError,
                    &format!("'{type_name}' object has no attribute '{method}'"),
                ))
            }
        }
    }

    /// `obj[index]` through the dunder protocol.
    pub fn get_index(&mut self, obj: ObjId, index: ObjId) -> RunResult<ObjId> {
        self.call_method(obj, "__getitem__", &[index], None)
    }

    /// `obj[index] = value` through the dunder protocol.
    pub fn set_index(&mut self, obj: ObjId, index: ObjId, value: ObjId) -> RunResult<ObjId> {
        self.call_method(obj, "__setitem__", &[index, value], None)
    }
}
