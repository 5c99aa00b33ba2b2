//! The heap object: a type tag, a tagged payload, an attribute table,
//! optional embedder userdata, finalizers, and an external pin count.

use std::{any::Any, cell::Cell, rc::Rc};

use crate::{
    attr_table::AttrTable,
    compile::Instr,
    context::Context,
    dict::{Dict, Set},
    exceptions::RunResult,
    heap::ObjId,
};

/// Signature of a native (embedder- or builtin-provided) function.
///
/// `argv[0]` is the bound self for method calls. Errors are reported by
/// raising on the context and returning `Err(Raised)`.
pub type NativeFn = fn(&mut Context, &[ObjId]) -> RunResult<ObjId>;

/// A finalizer runs exactly once, just before its object is reclaimed.
/// It must not allocate or re-enter the interpreter.
pub type Finalizer = Box<dyn FnOnce()>;

/// An interpreted function body plus everything its activation needs.
#[derive(Debug)]
pub(crate) struct ScriptFn {
    pub instructions: Rc<Vec<Instr>>,
    pub module: Rc<str>,
    /// Locals initialised to `None` when a frame is created.
    pub local_vars: Vec<Rc<str>>,
    /// Named parameters in declaration order.
    pub param_names: Vec<Rc<str>>,
    /// Evaluated default values for the trailing named parameters.
    pub defaults: Vec<ObjId>,
    pub list_args: Option<Rc<str>>,
    pub kw_args: Option<Rc<str>>,
    /// Captured name -> shared cell, resolved when the `def` executed.
    pub captures: Vec<(Rc<str>, Rc<Cell<ObjId>>)>,
    /// Original source lines of the defining compilation, for tracebacks.
    pub source: Rc<Vec<String>>,
}

#[derive(Debug)]
pub(crate) enum Callable {
    Native {
        f: NativeFn,
        /// Extra object threaded to the native (e.g. the class object for
        /// generated `__init__` forwarders). Traced by the collector.
        userdata: Option<ObjId>,
    },
    Scripted(Rc<ScriptFn>),
}

#[derive(Debug)]
pub(crate) struct FuncData {
    pub callable: Callable,
    /// Transiently bound receiver, set when the function is read off an
    /// object as a method attribute.
    pub self_obj: Option<ObjId>,
    pub is_method: bool,
    pub module: Rc<str>,
    pub pretty_name: Rc<str>,
}

#[derive(Debug)]
pub(crate) struct ClassData {
    pub name: Rc<str>,
    pub module: Rc<str>,
    pub bases: Vec<ObjId>,
    /// The table instances alias on construction; methods live here.
    pub instance_attrs: AttrTable,
    /// Overrides the standard construct-then-`__init__` path. Used by the
    /// handful of builtin classes whose calls produce singletons or build
    /// their payload before any init runs.
    pub native_ctor: Option<NativeFn>,
}

#[derive(Debug)]
pub(crate) enum ObjPayload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<ObjId>),
    List(Vec<ObjId>),
    Dict(Box<Dict>),
    Set(Box<Set>),
    Func(Box<FuncData>),
    Class(Box<ClassData>),
    /// A user-class instance; its state lives in the attribute table.
    Instance,
}

pub(crate) struct Obj {
    /// Short tag such as `__int`, `__str`, `__class`, or a user class name.
    pub type_name: Rc<str>,
    pub payload: ObjPayload,
    pub attrs: AttrTable,
    pub userdata: Option<Box<dyn Any>>,
    pub finalizers: Vec<Finalizer>,
    /// External pins (`inc_ref`/`dec_ref`); nonzero means GC root.
    pub ref_count: u32,
}

impl std::fmt::Debug for Obj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Obj")
            .field("type_name", &self.type_name)
            .field("payload", &self.payload)
            .field("ref_count", &self.ref_count)
            .finish_non_exhaustive()
    }
}

impl Obj {
    pub fn new(type_name: Rc<str>, payload: ObjPayload, attrs: AttrTable) -> Self {
        Self {
            type_name,
            payload,
            attrs,
            userdata: None,
            finalizers: Vec::new(),
            ref_count: 0,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.payload {
            ObjPayload::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.payload {
            ObjPayload::Int(i) => Some(i as f64),
            ObjPayload::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            ObjPayload::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            ObjPayload::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncData> {
        match &self.payload {
            ObjPayload::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_func_mut(&mut self) -> Option<&mut FuncData> {
        match &mut self.payload {
            ObjPayload::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassData> {
        match &self.payload {
            ObjPayload::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut ClassData> {
        match &mut self.payload {
            ObjPayload::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self.payload, ObjPayload::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self.payload, ObjPayload::Float(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self.payload, ObjPayload::Int(_) | ObjPayload::Float(_))
    }

    pub fn is_str(&self) -> bool {
        matches!(self.payload, ObjPayload::Str(_))
    }

    pub fn is_func(&self) -> bool {
        matches!(self.payload, ObjPayload::Func(_))
    }

    pub fn is_class(&self) -> bool {
        matches!(self.payload, ObjPayload::Class(_))
    }

    /// Human-readable type name for error messages.
    pub fn type_display(&self) -> String {
        match &*self.type_name {
            "__null" => "NoneType".to_string(),
            "__bool" => "bool".to_string(),
            "__int" => "int".to_string(),
            "__float" => "float".to_string(),
            "__str" => "str".to_string(),
            "__tuple" => "tuple".to_string(),
            "__list" => "list".to_string(),
            "__map" => "dict".to_string(),
            "__set" => "set".to_string(),
            "__func" => "function".to_string(),
            "__class" => "class".to_string(),
            "__object" => "object".to_string(),
            other => other.to_string(),
        }
    }
}
