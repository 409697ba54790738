//! User-defined functions: a code object bound to its defining scope.

use std::rc::Rc;

use crate::{
    bytecode::CodeObject,
    namespace::Namespace,
    types::Dict,
    value::{Cell, Value},
};

/// A function created by `MAKE_FUNCTION` or [`crate::VirtualMachine::make_function`].
///
/// Immutable once created. Calling it builds a fresh frame; when the code object
/// carries the generator flag the call produces a generator instead.
///
/// # Closure layout
///
/// `closure` holds one cell per entry of the code object's `freevars`, in order.
/// The cells are shared with the frame that defined the function, so stores made
/// by either side are visible to both.
#[derive(Debug, Clone)]
pub struct Function {
    pub(crate) name: Rc<str>,
    /// Dotted name used in reprs and tracebacks, e.g. `outer.<locals>.inner`.
    pub(crate) qualname: Rc<str>,
    pub(crate) code: Rc<CodeObject>,
    pub(crate) globals: Namespace,
    /// Defaults for the trailing positional parameters.
    pub(crate) defaults: Vec<Value>,
    pub(crate) kwdefaults: Option<Dict>,
    pub(crate) closure: Vec<Cell>,
    pub(crate) annotations: Option<Dict>,
}

impl Function {
    /// Creates a function with no defaults and no closure.
    #[must_use]
    pub fn new(code: Rc<CodeObject>, globals: Namespace) -> Self {
        Self {
            name: code.name.clone(),
            qualname: code.name.clone(),
            code,
            globals,
            defaults: Vec::new(),
            kwdefaults: None,
            closure: Vec::new(),
            annotations: None,
        }
    }

    #[must_use]
    pub fn with_qualname(mut self, qualname: impl Into<Rc<str>>) -> Self {
        self.qualname = qualname.into();
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: Vec<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_kwdefaults(mut self, kwdefaults: Dict) -> Self {
        self.kwdefaults = Some(kwdefaults);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    #[must_use]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.code
    }

    #[must_use]
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    #[must_use]
    pub fn defaults(&self) -> &[Value] {
        &self.defaults
    }

    #[must_use]
    pub fn annotations(&self) -> Option<&Dict> {
        self.annotations.as_ref()
    }

    /// The docstring, taken from the first constant of the code object.
    #[must_use]
    pub fn doc(&self) -> Option<Rc<str>> {
        self.code.docstring()
    }

    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.code.is_generator()
    }

    /// Returns true if the function captured variables from an enclosing scope.
    #[must_use]
    pub fn is_closure(&self) -> bool {
        !self.closure.is_empty()
    }
}
