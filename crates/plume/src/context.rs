//! The interpreter context: configuration, heap, globals, modules, the
//! collector, and the embedder-facing API surface.
//!
//! A context is an isolated unit. Objects must never be shared across
//! contexts, and all interaction with one context must stay on one thread.

use std::{any::Any, cell::Cell, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    attr_table::AttrTable,
    builtins,
    dict::{Dict, Set},
    exceptions::{
        format_traceback, ExcKind, InitError, OwnedTraceFrame, Raised, RunResult, TraceFrame,
        DEFAULT_FUNC_NAME,
    },
    executor::Frame,
    heap::{Heap, HeapStats, ObjId},
    io::{PrintWriter, StdPrint},
    lex,
    object::{Callable, ClassData, FuncData, NativeFn, Obj, ObjPayload, ScriptFn},
    parse,
    tracer::{NoopTracer, VmTracer},
};

/// A native module loader, invoked the first time its module is imported.
pub type ModuleLoader = fn(&mut Context) -> RunResult<()>;

/// A module-global binding: a shared mutable cell, so closures compiled
/// against a global observe later rebinds.
pub(crate) type GlobalCell = Rc<Cell<ObjId>>;

/// Context creation options.
pub struct Config {
    /// Heap-size cap, in objects.
    pub max_alloc: usize,
    /// Call-depth cap.
    pub max_recursion: usize,
    /// Collection trigger: collect when the heap exceeds this multiple of
    /// the previous post-collection size. Must be at least 1.0.
    pub gc_run_factor: f64,
    /// Destination for `print` output.
    pub print: Box<dyn PrintWriter>,
    /// Directory searched for `<name>.py` file modules.
    pub import_path: Option<String>,
    /// Script arguments, exposed as `sys.argv`.
    pub argv: Vec<String>,
    /// Enables the `os` module and the global `open` builtin.
    pub enable_os_access: bool,
    /// Execution tracing hooks.
    pub tracer: Box<dyn VmTracer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_alloc: 1_000_000,
            max_recursion: 50,
            gc_run_factor: 2.0,
            print: Box::new(StdPrint),
            import_path: None,
            argv: Vec::new(),
            enable_os_access: false,
            tracer: Box::new(NoopTracer),
        }
    }
}

/// Frequently used type tags, allocated once per context.
#[derive(Debug, Clone)]
pub(crate) struct Tags {
    pub null: Rc<str>,
    pub bool_: Rc<str>,
    pub int: Rc<str>,
    pub float: Rc<str>,
    pub str_: Rc<str>,
    pub tuple: Rc<str>,
    pub list: Rc<str>,
    pub map: Rc<str>,
    pub set: Rc<str>,
    pub func: Rc<str>,
    pub class: Rc<str>,
    pub object: Rc<str>,
}

impl Default for Tags {
    fn default() -> Self {
        Self {
            null: Rc::from("__null"),
            bool_: Rc::from("__bool"),
            int: Rc::from("__int"),
            float: Rc::from("__float"),
            str_: Rc::from("__str"),
            tuple: Rc::from("__tuple"),
            list: Rc::from("__list"),
            map: Rc::from("__map"),
            set: Rc::from("__set"),
            func: Rc::from("__func"),
            class: Rc::from("__class"),
            object: Rc::from("__object"),
        }
    }
}

/// Handles to the built-in types, functions, and singleton instances.
///
/// All fields start as `ObjId::INVALID` and are filled during bootstrap;
/// the collector treats every valid entry as a root.
#[derive(Debug)]
pub(crate) struct Builtins {
    pub object: ObjId,
    pub none_type: ObjId,
    pub bool_class: ObjId,
    pub int_class: ObjId,
    pub float_class: ObjId,
    pub str_class: ObjId,
    pub tuple_class: ObjId,
    pub list_class: ObjId,
    pub dict_class: ObjId,
    pub set_class: ObjId,
    pub func_class: ObjId,
    pub slice_class: ObjId,
    pub module_class: ObjId,
    pub file_class: ObjId,

    pub isinstance: ObjId,
    pub repr: ObjId,
    pub hash: ObjId,
    pub len: ObjId,

    pub base_exception: ObjId,
    pub stop_iteration: ObjId,
    pub system_exit: ObjId,

    pub none: ObjId,
    pub true_: ObjId,
    pub false_: ObjId,
    pub memory_error_instance: ObjId,
    pub recursion_error_instance: ObjId,
}

impl Default for Builtins {
    fn default() -> Self {
        Self {
            object: ObjId::INVALID,
            none_type: ObjId::INVALID,
            bool_class: ObjId::INVALID,
            int_class: ObjId::INVALID,
            float_class: ObjId::INVALID,
            str_class: ObjId::INVALID,
            tuple_class: ObjId::INVALID,
            list_class: ObjId::INVALID,
            dict_class: ObjId::INVALID,
            set_class: ObjId::INVALID,
            func_class: ObjId::INVALID,
            slice_class: ObjId::INVALID,
            module_class: ObjId::INVALID,
            file_class: ObjId::INVALID,
            isinstance: ObjId::INVALID,
            repr: ObjId::INVALID,
            hash: ObjId::INVALID,
            len: ObjId::INVALID,
            base_exception: ObjId::INVALID,
            stop_iteration: ObjId::INVALID,
            system_exit: ObjId::INVALID,
            none: ObjId::INVALID,
            true_: ObjId::INVALID,
            false_: ObjId::INVALID,
            memory_error_instance: ObjId::INVALID,
            recursion_error_instance: ObjId::INVALID,
        }
    }
}

impl Builtins {
    fn all(&self) -> [ObjId; 25] {
        [
            self.object,
            self.none_type,
            self.bool_class,
            self.int_class,
            self.float_class,
            self.str_class,
            self.tuple_class,
            self.list_class,
            self.dict_class,
            self.set_class,
            self.func_class,
            self.slice_class,
            self.module_class,
            self.file_class,
            self.isinstance,
            self.repr,
            self.hash,
            self.len,
            self.base_exception,
            self.stop_iteration,
            self.system_exit,
            self.none,
            self.true_,
            self.false_,
            self.memory_error_instance,
        ]
    }
}

pub struct Context {
    pub(crate) config: Config,
    pub(crate) heap: Heap,
    closing: bool,
    collecting: bool,
    last_count_after_gc: usize,

    pub(crate) globals: AHashMap<Rc<str>, IndexMap<Rc<str>, GlobalCell>>,
    pub(crate) builtins: Builtins,
    pub(crate) tags: Tags,
    pub(crate) argv_obj: ObjId,

    pub(crate) current_exception_obj: Option<ObjId>,
    pub(crate) exception_trace: Vec<OwnedTraceFrame>,

    pub(crate) frames: Vec<Frame>,
    pub(crate) current_trace: Vec<TraceFrame>,
    /// One entry per active call: that call's kwargs dictionary.
    pub(crate) kwargs_stack: Vec<Option<ObjId>>,
    /// One entry per active call: the callee's userdata object.
    pub(crate) userdata_stack: Vec<Option<ObjId>>,
    pub(crate) module_stack: Vec<Rc<str>>,
    /// Temporary roots held across allocations by native code.
    pub(crate) protected: Vec<ObjId>,
    /// Containers currently being formatted, for cycle-safe reprs.
    pub(crate) repr_stack: Vec<ObjId>,

    pub(crate) module_loaders: AHashMap<String, ModuleLoader>,
    pub(crate) import_path: String,
    pub(crate) rng: StdRng,
}

impl Context {
    /// Creates a context, bootstraps the built-in types, runs the prelude,
    /// and registers the native modules.
    pub fn new(config: Config) -> Result<Self, InitError> {
        let mut import_path = config.import_path.clone().unwrap_or_default();
        if !import_path.is_empty() && !import_path.ends_with(['/', '\\']) {
            import_path.push('/');
        }

        let mut ctx = Self {
            config,
            heap: Heap::default(),
            closing: false,
            collecting: false,
            last_count_after_gc: 0,
            globals: AHashMap::new(),
            builtins: Builtins::default(),
            tags: Tags::default(),
            argv_obj: ObjId::INVALID,
            current_exception_obj: None,
            exception_trace: Vec::new(),
            frames: Vec::new(),
            current_trace: Vec::new(),
            kwargs_stack: Vec::new(),
            userdata_stack: Vec::new(),
            module_stack: vec![Rc::from("__main__")],
            protected: Vec::new(),
            repr_stack: Vec::new(),
            module_loaders: AHashMap::new(),
            import_path,
            rng: StdRng::from_entropy(),
        };
        ctx.globals.insert(Rc::from("__main__"), IndexMap::new());

        ctx.register_module("__builtins__", builtins::import_builtins);
        ctx.register_module("math", crate::modules::math::import);
        ctx.register_module("random", crate::modules::random::import);
        ctx.register_module("sys", crate::modules::sys::import);
        ctx.register_module("time", crate::modules::time::import);
        if ctx.config.enable_os_access {
            ctx.register_module("os", crate::modules::os::import);
        }

        if ctx.import_all_from_module("__builtins__").is_err() {
            return Err(InitError(ctx.error_message()));
        }

        let argv: Vec<String> = if ctx.config.argv.is_empty() {
            vec![String::new()]
        } else {
            ctx.config.argv.clone()
        };
        let mut argv_items = Vec::with_capacity(argv.len());
        let protect_base = ctx.protected.len();
        for arg in &argv {
            match ctx.new_str(arg) {
                Ok(id) => {
                    ctx.protected.push(id);
                    argv_items.push(id);
                }
                Err(Raised) => {
                    ctx.protected.truncate(protect_base);
                    return Err(InitError(ctx.error_message()));
                }
            }
        }
        let list = ctx.new_list(&argv_items);
        ctx.protected.truncate(protect_base);
        match list {
            Ok(list) => ctx.argv_obj = list,
            Err(Raised) => return Err(InitError(ctx.error_message())),
        }

        Ok(ctx)
    }

    // ------------------------------------------------------------------
    // Allocation and collection
    // ------------------------------------------------------------------

    /// Allocates a heap object, collecting first if limits require it.
    pub(crate) fn alloc(
        &mut self,
        type_name: Rc<str>,
        payload: ObjPayload,
        attrs: AttrTable,
    ) -> RunResult<ObjId> {
        debug_assert!(!self.collecting, "allocation during collection");

        if self.heap.len() >= self.config.max_alloc {
            self.collect_garbage();
            if self.heap.len() >= self.config.max_alloc {
                return Err(self.raise_memory_error());
            }
        }

        let threshold = (self.config.gc_run_factor * self.last_count_after_gc as f64) as usize;
        if self.heap.len() >= threshold.max(1) {
            self.collect_garbage();
        }

        Ok(self.heap.insert(Obj::new(type_name, payload, attrs)))
    }

    /// Runs a full mark-and-sweep collection.
    ///
    /// Roots: the current exception, externally pinned objects, every
    /// global cell of every module, kwargs and userdata of the active call
    /// chain, the builtin registry, argv, temporarily protected objects,
    /// and all live frame state.
    pub fn collect_garbage(&mut self) {
        if self.collecting {
            return;
        }
        self.collecting = true;

        let mut worklist: Vec<ObjId> = Vec::new();
        if !self.closing {
            if let Some(exc) = self.current_exception_obj {
                worklist.push(exc);
            }
            for id in self.heap.ids() {
                if self.heap.get(id).ref_count > 0 {
                    worklist.push(id);
                }
            }
            for module_globals in self.globals.values() {
                for cell in module_globals.values() {
                    worklist.push(cell.get());
                }
            }
            for kwargs in self.kwargs_stack.iter().flatten() {
                worklist.push(*kwargs);
            }
            for userdata in self.userdata_stack.iter().flatten() {
                worklist.push(*userdata);
            }
            for id in self.builtins.all() {
                worklist.push(id);
            }
            worklist.push(self.builtins.recursion_error_instance);
            worklist.push(self.argv_obj);
            worklist.extend(self.protected.iter().copied());
            worklist.extend(self.repr_stack.iter().copied());
            for frame in &self.frames {
                frame.trace_roots(&mut worklist);
            }
        }

        let mut marked = vec![false; self.heap.slot_count()];
        while let Some(id) = worklist.pop() {
            if !id.valid() || !self.heap.contains(id) || marked[id.index()] {
                continue;
            }
            marked[id.index()] = true;
            trace_children(self.heap.get(id), &mut worklist);
        }

        let dead: Vec<ObjId> = self
            .heap
            .ids()
            .filter(|id| !marked[id.index()])
            .collect();

        // Finalizers run exactly once, on a still-consistent heap. They
        // cannot reach the context, so they cannot allocate.
        for &id in &dead {
            let finalizers = std::mem::take(&mut self.heap.get_mut(id).finalizers);
            for finalizer in finalizers {
                finalizer();
            }
        }
        for &id in &dead {
            self.heap.remove(id);
        }

        self.last_count_after_gc = self.heap.len();
        self.collecting = false;
    }

    /// Pins an object so it survives collections while native code holds
    /// its handle.
    pub fn inc_ref(&mut self, id: ObjId) {
        self.heap.get_mut(id).ref_count += 1;
    }

    pub fn dec_ref(&mut self, id: ObjId) {
        let obj = self.heap.get_mut(id);
        debug_assert!(obj.ref_count > 0, "unbalanced dec_ref");
        obj.ref_count = obj.ref_count.saturating_sub(1);
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    pub(crate) fn current_module(&self) -> Rc<str> {
        self.module_stack
            .last()
            .cloned()
            .unwrap_or_else(|| Rc::from("__main__"))
    }

    /// Reads a global from the currently active module.
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<ObjId> {
        let module = self.current_module();
        self.globals
            .get(&module)?
            .get(name)
            .map(|cell| cell.get())
    }

    /// Binds a global in the currently active module.
    pub fn set_global(&mut self, name: &str, value: ObjId) {
        let module = self.current_module();
        let module_globals = self.globals.entry(module).or_default();
        if let Some(cell) = module_globals.get(name) {
            cell.set(value);
            return;
        }
        module_globals.insert(Rc::from(name), Rc::new(Cell::new(value)));
    }

    /// The shared cell behind a global, creating it (bound to `None`) when
    /// missing. Used by `def` to wire global captures.
    pub(crate) fn global_cell(&mut self, module: &Rc<str>, name: &str) -> GlobalCell {
        let none = self.builtins.none;
        let module_globals = self.globals.entry(module.clone()).or_default();
        if let Some(cell) = module_globals.get(name) {
            return cell.clone();
        }
        let cell: GlobalCell = Rc::new(Cell::new(none));
        module_globals.insert(Rc::from(name), cell.clone());
        cell
    }

    // ------------------------------------------------------------------
    // Compile and execute
    // ------------------------------------------------------------------

    /// Compiles source text into a callable function object.
    pub fn compile(&mut self, code: &str, pretty_name: &str) -> RunResult<ObjId> {
        self.compile_in_module(code, "__main__", pretty_name, false)
    }

    /// Compiles a single expression into a function returning its value.
    pub fn compile_expression(&mut self, code: &str, pretty_name: &str) -> RunResult<ObjId> {
        self.compile_in_module(code, "__main__", pretty_name, true)
    }

    /// Compiles and runs a script in `__main__`.
    pub fn execute(&mut self, code: &str, pretty_name: &str) -> RunResult<ObjId> {
        let function = self.compile(code, pretty_name)?;
        self.call(function, &[], None)
    }

    /// Compiles and evaluates an expression, returning its value.
    pub fn eval_expression(&mut self, code: &str, pretty_name: &str) -> RunResult<ObjId> {
        let function = self.compile_expression(code, pretty_name)?;
        self.call(function, &[], None)
    }

    pub(crate) fn compile_in_module(
        &mut self,
        code: &str,
        module: &str,
        pretty_name: &str,
        expr: bool,
    ) -> RunResult<ObjId> {
        let lexed = lex::lex(code);
        let source = Rc::new(lexed.lines);

        if let Some(error) = lexed.error {
            return Err(self.raise_syntax_error(&error, module, pretty_name, &source));
        }

        let mut root = match parse::parse(&lexed.root) {
            Ok(root) => root,
            Err(error) => {
                return Err(self.raise_syntax_error(&error, module, pretty_name, &source));
            }
        };

        if expr {
            // The body must be a single expression; rewrite it to a return.
            let body = std::mem::take(&mut root.body);
            match (body.len(), body.into_iter().next()) {
                (
                    1,
                    Some(crate::parse::Stat {
                        kind: crate::parse::StatKind::Expr(e),
                        pos,
                    }),
                ) => {
                    root.body = vec![crate::parse::Stat {
                        kind: crate::parse::StatKind::Return(e),
                        pos,
                    }];
                }
                _ => {
                    let error = lex::CodeError::at_unknown("Invalid syntax");
                    return Err(self.raise_syntax_error(&error, module, pretty_name, &source));
                }
            }
        }

        let instructions = crate::compile::compile(&root);
        let script = Rc::new(ScriptFn {
            instructions,
            module: Rc::from(module),
            local_vars: Vec::new(),
            param_names: Vec::new(),
            defaults: Vec::new(),
            list_args: None,
            kw_args: None,
            captures: Vec::new(),
            source,
        });
        self.new_scripted_function(script, pretty_name, false)
    }

    fn raise_syntax_error(
        &mut self,
        error: &lex::CodeError,
        module: &str,
        pretty_name: &str,
        source: &Rc<Vec<String>>,
    ) -> Raised {
        self.current_trace.push(TraceFrame {
            pos: error.pos,
            module: Rc::from(module),
            func: Rc::from(pretty_name),
            source: Some(source.clone()),
            syntax_error: true,
        });
        let raised = self.raise_kind(ExcKind::SyntaxError, &error.message);
        self.current_trace.pop();
        raised
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    /// The current script-level exception, if one is propagating.
    #[must_use]
    pub fn current_exception(&self) -> Option<ObjId> {
        self.current_exception_obj
    }

    pub fn clear_exception(&mut self) {
        self.current_exception_obj = None;
        self.exception_trace.clear();
    }

    /// Raises a built-in exception by kind with an optional message.
    pub fn raise_kind(&mut self, kind: ExcKind, message: &str) -> Raised {
        match kind {
            ExcKind::MemoryError => return self.raise_memory_error(),
            ExcKind::RecursionError => {
                let instance = self.builtins.recursion_error_instance;
                if instance.valid() {
                    return self.raise_object(instance);
                }
            }
            _ => {}
        }

        let class_name: &'static str = kind.into();
        let Some(class) = self.builtin_global(class_name) else {
            // Bootstrap is incomplete; record a bare failure.
            self.current_exception_obj = None;
            return Raised;
        };
        self.raise_class(class, message)
    }

    /// Raises an exception class: constructs an instance with the message
    /// and raises the instance.
    pub fn raise_class(&mut self, class: ObjId, message: &str) -> Raised {
        let Ok(message_obj) = self.new_str(message) else {
            return Raised;
        };
        match self.call(class, &[message_obj], None) {
            Ok(instance) => self.raise_object(instance),
            Err(Raised) => Raised,
        }
    }

    /// Raises an exception object, snapshotting the current trace.
    pub fn raise_object(&mut self, exception: ObjId) -> Raised {
        let base = self.builtins.base_exception;
        if !base.valid() || self.isinstance_of(exception, &[base]).is_none() {
            return self.raise_kind(ExcKind::TypeError, "exceptions must derive from BaseException");
        }
        let type_name = self.heap.get(exception).type_name.clone();
        self.config.tracer.on_exception(&type_name);
        self.current_exception_obj = Some(exception);
        self.exception_trace = self
            .current_trace
            .iter()
            .map(TraceFrame::to_owned_frame)
            .collect();
        Raised
    }

    pub(crate) fn raise_memory_error(&mut self) -> Raised {
        let instance = self.builtins.memory_error_instance;
        if instance.valid() {
            self.raise_object(instance)
        } else {
            self.current_exception_obj = None;
            Raised
        }
    }

    /// Formats the current exception as a traceback, or "Ok" when none is
    /// propagating.
    #[must_use]
    pub fn error_message(&self) -> String {
        let Some(exception) = self.current_exception_obj else {
            return "Ok".to_string();
        };
        let obj = self.heap.get(exception);
        let exc_name = obj.type_display();
        let message = obj
            .attrs
            .get("_message")
            .and_then(|id| self.heap.get(id).as_str().map(str::to_string));
        format_traceback(&self.exception_trace, &exc_name, message.as_deref())
    }

    /// A global of the `__builtins__` module (exception classes live there).
    pub(crate) fn builtin_global(&self, name: &str) -> Option<ObjId> {
        self.globals
            .get("__builtins__")?
            .get(name)
            .map(|cell| cell.get())
    }

    // ------------------------------------------------------------------
    // Object constructors
    // ------------------------------------------------------------------

    /// The `None` singleton.
    #[must_use]
    pub fn none(&self) -> ObjId {
        self.builtins.none
    }

    /// One of the two boolean singletons.
    #[must_use]
    pub fn new_bool(&self, value: bool) -> ObjId {
        if value {
            self.builtins.true_
        } else {
            self.builtins.false_
        }
    }

    pub fn new_int(&mut self, value: i64) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.int_class);
        self.alloc(self.tags.int.clone(), ObjPayload::Int(value), attrs)
    }

    pub fn new_float(&mut self, value: f64) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.float_class);
        self.alloc(self.tags.float.clone(), ObjPayload::Float(value), attrs)
    }

    pub fn new_str(&mut self, value: &str) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.str_class);
        self.alloc(
            self.tags.str_.clone(),
            ObjPayload::Str(value.to_string()),
            attrs,
        )
    }

    pub fn new_tuple(&mut self, items: &[ObjId]) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.tuple_class);
        self.alloc(
            self.tags.tuple.clone(),
            ObjPayload::Tuple(items.to_vec()),
            attrs,
        )
    }

    pub fn new_list(&mut self, items: &[ObjId]) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.list_class);
        self.alloc(
            self.tags.list.clone(),
            ObjPayload::List(items.to_vec()),
            attrs,
        )
    }

    /// Creates an empty dictionary. Populate it with [`Context::dict_set`],
    /// which runs keys through the hash protocol.
    pub fn new_dict(&mut self) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.dict_class);
        self.alloc(
            self.tags.map.clone(),
            ObjPayload::Dict(Box::new(Dict::new())),
            attrs,
        )
    }

    /// Creates an empty set. Populate it with [`Context::set_add`].
    pub fn new_set(&mut self) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.set_class);
        self.alloc(
            self.tags.set.clone(),
            ObjPayload::Set(Box::new(Set::new())),
            attrs,
        )
    }

    /// Wraps a native function in a callable object.
    pub fn new_function(&mut self, f: NativeFn, pretty_name: &str) -> RunResult<ObjId> {
        self.new_native_function(f, pretty_name, None, false)
    }

    pub(crate) fn new_native_function(
        &mut self,
        f: NativeFn,
        pretty_name: &str,
        userdata: Option<ObjId>,
        is_method: bool,
    ) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.func_class);
        let module = self.current_module();
        let pretty_name: Rc<str> = if pretty_name.is_empty() {
            Rc::from(DEFAULT_FUNC_NAME)
        } else {
            Rc::from(pretty_name)
        };
        self.alloc(
            self.tags.func.clone(),
            ObjPayload::Func(Box::new(FuncData {
                callable: Callable::Native { f, userdata },
                self_obj: None,
                is_method,
                module,
                pretty_name,
            })),
            attrs,
        )
    }

    pub(crate) fn new_scripted_function(
        &mut self,
        script: Rc<ScriptFn>,
        pretty_name: &str,
        is_method: bool,
    ) -> RunResult<ObjId> {
        let attrs = self.class_instance_attrs(self.builtins.func_class);
        let module = script.module.clone();
        let pretty_name: Rc<str> = if pretty_name.is_empty() {
            Rc::from(DEFAULT_FUNC_NAME)
        } else {
            Rc::from(pretty_name)
        };
        self.alloc(
            self.tags.func.clone(),
            ObjPayload::Func(Box::new(FuncData {
                callable: Callable::Scripted(script),
                self_obj: None,
                is_method,
                module,
                pretty_name,
            })),
            attrs,
        )
    }

    /// Creates a class with the given bases (implicitly `object` if empty).
    pub fn new_class(&mut self, name: &str, bases: &[ObjId]) -> RunResult<ObjId> {
        for &base in bases {
            if !self.heap.get(base).is_class() {
                return Err(self.raise_kind(ExcKind::TypeError, "Base must be a class"));
            }
        }
        let actual_bases: Vec<ObjId> = if bases.is_empty() {
            vec![self.builtins.object]
        } else {
            bases.to_vec()
        };

        let module = self.current_module();
        let class_id = self.alloc(
            self.tags.class.clone(),
            ObjPayload::Class(Box::new(ClassData {
                name: Rc::from(name),
                module,
                bases: actual_bases.clone(),
                instance_attrs: AttrTable::new(),
                native_ctor: None,
            })),
            AttrTable::new(),
        )?;
        self.protected.push(class_id);

        // The instance table knows its class and chains through the bases'
        // instance tables, giving the left-first depth-first MRO.
        let base_tables: Vec<AttrTable> = actual_bases
            .iter()
            .map(|&base| {
                self.heap
                    .get(base)
                    .as_class()
                    .map(|c| c.instance_attrs.copy())
                    .unwrap_or_default()
            })
            .collect();
        let object_table = self
            .heap
            .get(self.builtins.object)
            .as_class()
            .map(|c| c.instance_attrs.copy());

        {
            let class_name: Rc<str> = Rc::from("__class__");
            let obj = self.heap.get_mut(class_id);
            if let Some(class_data) = obj.as_class_mut() {
                class_data.instance_attrs.set(class_name, class_id);
                for table in &base_tables {
                    class_data.instance_attrs.add_parent(table);
                }
            }
            if let Some(object_table) = &object_table {
                obj.attrs.add_parent(object_table);
            }
        }

        let bases_tuple = self.new_tuple(&actual_bases)?;
        self.heap
            .get_mut(class_id)
            .attrs
            .set(Rc::from("__bases__"), bases_tuple);

        // Default __init__ forwards to the first base's __init__ so derived
        // classes construct through their parents.
        let init_name = format!("{name}.__init__");
        let init = self.new_native_function(
            builtins::class_default_init,
            &init_name,
            Some(class_id),
            true,
        )?;
        if let Some(class_data) = self.heap.get_mut(class_id).as_class_mut() {
            class_data.instance_attrs.set(Rc::from("__init__"), init);
        }

        self.protected.pop();
        Ok(class_id)
    }

    /// Adds an attribute (typically a method) to a class's instance table,
    /// where pre-existing instances see it through their shared tables.
    pub fn add_class_attribute(&mut self, class_id: ObjId, name: &str, value: ObjId) {
        if let Some(class) = self.heap.get_mut(class_id).as_class_mut() {
            class.instance_attrs.set(Rc::from(name), value);
        }
    }

    pub(crate) fn class_instance_attrs(&self, class_id: ObjId) -> AttrTable {
        if class_id.valid() && self.heap.contains(class_id) {
            if let Some(class) = self.heap.get(class_id).as_class() {
                return class.instance_attrs.copy();
            }
        }
        AttrTable::new()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn is_none(&self, id: ObjId) -> bool {
        id == self.builtins.none
    }

    #[must_use]
    pub fn is_bool(&self, id: ObjId) -> bool {
        id == self.builtins.true_ || id == self.builtins.false_
    }

    #[must_use]
    pub fn is_int(&self, id: ObjId) -> bool {
        self.heap.get(id).is_int()
    }

    #[must_use]
    pub fn is_float(&self, id: ObjId) -> bool {
        self.heap.get(id).is_float()
    }

    #[must_use]
    pub fn is_str(&self, id: ObjId) -> bool {
        self.heap.get(id).is_str()
    }

    #[must_use]
    pub fn is_tuple(&self, id: ObjId) -> bool {
        matches!(self.heap.get(id).payload, ObjPayload::Tuple(_))
    }

    #[must_use]
    pub fn is_list(&self, id: ObjId) -> bool {
        matches!(self.heap.get(id).payload, ObjPayload::List(_))
    }

    #[must_use]
    pub fn is_dict(&self, id: ObjId) -> bool {
        matches!(self.heap.get(id).payload, ObjPayload::Dict(_))
    }

    #[must_use]
    pub fn is_set(&self, id: ObjId) -> bool {
        matches!(self.heap.get(id).payload, ObjPayload::Set(_))
    }

    #[must_use]
    pub fn is_function(&self, id: ObjId) -> bool {
        self.heap.get(id).is_func()
    }

    #[must_use]
    pub fn is_class(&self, id: ObjId) -> bool {
        self.heap.get(id).is_class()
    }

    #[must_use]
    pub fn get_bool(&self, id: ObjId) -> Option<bool> {
        self.heap.get(id).as_bool()
    }

    #[must_use]
    pub fn get_int(&self, id: ObjId) -> Option<i64> {
        self.heap.get(id).as_int()
    }

    #[must_use]
    pub fn get_float(&self, id: ObjId) -> Option<f64> {
        self.heap.get(id).as_float()
    }

    #[must_use]
    pub fn get_str(&self, id: ObjId) -> Option<&str> {
        self.heap.get(id).as_str()
    }

    /// Attaches embedder data to an object.
    pub fn set_userdata(&mut self, id: ObjId, userdata: Box<dyn Any>) {
        self.heap.get_mut(id).userdata = Some(userdata);
    }

    /// Borrows embedder data if the object's type tag matches.
    #[must_use]
    pub fn get_userdata<T: 'static>(&self, id: ObjId, type_name: &str) -> Option<&T> {
        let obj = self.heap.get(id);
        if &*obj.type_name != type_name {
            return None;
        }
        obj.userdata.as_ref()?.downcast_ref::<T>()
    }

    /// Registers a finalizer to run exactly once before the object is
    /// reclaimed. Finalizers must not allocate.
    pub fn register_finalizer(&mut self, id: ObjId, finalizer: crate::object::Finalizer) {
        self.heap.get_mut(id).finalizers.push(finalizer);
    }

    // ------------------------------------------------------------------
    // Modules and imports
    // ------------------------------------------------------------------

    /// Registers a native loader invoked the first time `name` is imported.
    pub fn register_module(&mut self, name: &str, loader: ModuleLoader) {
        self.module_loaders.insert(name.to_string(), loader);
    }

    pub(crate) fn load_module(&mut self, name: &str) -> RunResult<()> {
        if self.globals.contains_key(name) {
            return Ok(());
        }
        self.globals.insert(Rc::from(name), IndexMap::new());
        self.module_stack.push(Rc::from(name));

        let result = (|| -> RunResult<()> {
            if name != "__builtins__" {
                self.import_all_from_module("__builtins__")?;
            }
            if let Some(loader) = self.module_loaders.get(name).copied() {
                loader(self)
            } else {
                self.load_file_module(name)
            }
        })();

        self.module_stack.pop();
        if result.is_err() {
            self.globals.remove(name);
        }
        result
    }

    fn load_file_module(&mut self, name: &str) -> RunResult<()> {
        let path = format!("{}{name}.py", self.import_path);
        let Ok(source) = std::fs::read_to_string(&path) else {
            return Err(self.raise_kind(
                ExcKind::ImportError,
                &format!("No module named '{name}'"),
            ));
        };
        let function = self.compile_in_module(&source, name, name, false)?;
        self.call(function, &[], None)?;
        Ok(())
    }

    /// Imports `module` and binds a module object to `alias` (or the
    /// module's own name) in the caller's module.
    pub fn import_module(&mut self, module: &str, alias: Option<&str>) -> RunResult<ObjId> {
        self.load_module(module)?;

        let module_obj = self.call(self.builtins.module_class, &[], None)?;
        self.protected.push(module_obj);
        let bindings: Vec<(Rc<str>, ObjId)> = self
            .globals
            .get(module)
            .map(|module_globals| {
                module_globals
                    .iter()
                    .map(|(name, cell)| (name.clone(), cell.get()))
                    .collect()
            })
            .unwrap_or_default();
        for (name, value) in bindings {
            self.heap.get_mut(module_obj).attrs.set(name, value);
        }
        self.protected.pop();

        self.set_global(alias.unwrap_or(module), module_obj);
        Ok(module_obj)
    }

    /// Imports one name from a module, binding it to `alias` (or itself).
    pub fn import_from_module(
        &mut self,
        module: &str,
        name: &str,
        alias: Option<&str>,
    ) -> RunResult<ObjId> {
        self.load_module(module)?;
        let value = self
            .globals
            .get(module)
            .and_then(|module_globals| module_globals.get(name))
            .map(|cell| cell.get());
        let Some(value) = value else {
            return Err(self.raise_kind(
                ExcKind::ImportError,
                &format!("Cannot import '{name}' from '{module}'"),
            ));
        };
        self.set_global(alias.unwrap_or(name), value);
        Ok(value)
    }

    /// Imports every global of `module` into the caller's module.
    pub fn import_all_from_module(&mut self, module: &str) -> RunResult<()> {
        self.load_module(module)?;
        let bindings: Vec<(Rc<str>, ObjId)> = self
            .globals
            .get(module)
            .map(|module_globals| {
                module_globals
                    .iter()
                    .map(|(name, cell)| (name.clone(), cell.get()))
                    .collect()
            })
            .unwrap_or_default();
        for (name, value) in bindings {
            self.set_global(&name, value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Native-call support
    // ------------------------------------------------------------------

    /// The kwargs dictionary of the innermost active call, if any.
    #[must_use]
    pub fn kwargs(&self) -> Option<ObjId> {
        self.kwargs_stack.last().copied().flatten()
    }

    /// The userdata object of the innermost active native call.
    pub(crate) fn fn_userdata(&self) -> Option<ObjId> {
        self.userdata_stack.last().copied().flatten()
    }

    pub(crate) fn print(&mut self, text: &str) {
        self.config.print.write(text);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Final collection with an empty root set: every object dies and
        // every finalizer runs.
        self.closing = true;
        self.collect_garbage();
    }
}

/// Pushes every object directly reachable from `obj` onto the worklist.
fn trace_children(obj: &Obj, out: &mut Vec<ObjId>) {
    match &obj.payload {
        ObjPayload::Tuple(items) | ObjPayload::List(items) => out.extend(items.iter().copied()),
        ObjPayload::Dict(dict) => {
            for entry in dict.iter() {
                out.push(entry.key);
                out.push(entry.value);
            }
        }
        ObjPayload::Set(set) => out.extend(set.iter()),
        ObjPayload::Func(func) => {
            if let Some(self_obj) = func.self_obj {
                out.push(self_obj);
            }
            match &func.callable {
                Callable::Native { userdata, .. } => {
                    if let Some(userdata) = userdata {
                        out.push(*userdata);
                    }
                }
                Callable::Scripted(script) => {
                    out.extend(script.defaults.iter().copied());
                    for (_, cell) in &script.captures {
                        out.push(cell.get());
                    }
                }
            }
        }
        ObjPayload::Class(class) => {
            out.extend(class.bases.iter().copied());
            class.instance_attrs.for_each(|id| out.push(id));
        }
        ObjPayload::Null
        | ObjPayload::Bool(_)
        | ObjPayload::Int(_)
        | ObjPayload::Float(_)
        | ObjPayload::Str(_)
        | ObjPayload::Instance => {}
    }
    obj.attrs.for_each(|id| out.push(id));
}
