//! Built-in reference evaluator: a small interpreted scripting language.
//!
//! ```text
//! let greeting = "hello"
//! fn shout(s) { return s + "!" }
//! print(shout(greeting))        # prints: hello!
//! len(greeting) * 2             # echoes: 10
//! ```
//!
//! Globals persist across [`ScriptEvaluator::evaluate`] calls, so one call can
//! define a function that a later call uses. The echoed value of a snippet is
//! its last statement's value, unless that value is `nil`.

mod ast;
mod interp;
mod lexer;
mod parser;
mod value;

use std::collections::HashMap;

pub use interp::MAX_CALL_DEPTH;
pub use value::Value;

use crate::{CancelToken, EvalFault, Evaluator, EvaluatorFactory, OutputCapture};

/// One interpreter instance with its global bindings.
#[derive(Debug, Default)]
pub struct ScriptEvaluator {
    globals: HashMap<String, Value>,
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a global binding.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }
}

impl Evaluator for ScriptEvaluator {
    fn evaluate(
        &mut self,
        code: &str,
        out: &mut OutputCapture,
        cancel: &CancelToken,
    ) -> Result<Option<String>, EvalFault> {
        let program = parser::parse(code)?;
        let value = interp::Run::new(&mut self.globals, out, cancel).program(&program)?;
        Ok((!value.is_nil()).then(|| value.repr()))
    }
}

/// Creates a fresh [`ScriptEvaluator`] per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptEvaluatorFactory;

impl EvaluatorFactory for ScriptEvaluatorFactory {
    fn name(&self) -> &str {
        "script"
    }

    fn create(&self) -> Box<dyn Evaluator> {
        Box::new(ScriptEvaluator::new())
    }
}
