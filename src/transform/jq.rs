//! jq programs, executed by the `jaq` interpreter.
//!
//! Decision oracles write mapping programs in jq. Programs are parsed and
//! compiled once with the jq standard library (`jaq-std`) plus the JSON
//! definitions (`jaq-json`), then run against one document at a time. A
//! program that yields several values contributes only its first one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, FilterT, Native, RcIter};
use jaq_json::Val;
use serde_json::Value;

use super::{TransformError, TransformExecutor};

const PROGRAM_CACHE_MAX: usize = 256;

type Program = jaq_core::Filter<Native<Val>>;

thread_local! {
    // Compiled filters hold reference-counted values and stay on the thread
    // that compiled them.
    static PROGRAM_CACHE: RefCell<HashMap<String, Rc<Program>>> = RefCell::new(HashMap::new());
}

fn cached_program(program: &str) -> Result<Rc<Program>, TransformError> {
    if let Some(hit) = PROGRAM_CACHE.with(|cache| cache.borrow().get(program).cloned()) {
        return Ok(hit);
    }

    let compiled = Rc::new(compile(program)?);

    PROGRAM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.len() >= PROGRAM_CACHE_MAX {
            cache.clear();
        }
        cache
            .entry(program.to_string())
            .or_insert_with(|| Rc::clone(&compiled));
    });
    Ok(compiled)
}

fn compile(program: &str) -> Result<Program, TransformError> {
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = Arena::default();
    let modules = loader
        .load(&arena, File { code: program, path: () })
        .map_err(|errors| invalid("parse", &errors))?;

    Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(|errors| invalid("compile", &errors))
}

fn invalid<F, E: Debug>(stage: &str, errors: &[(F, E)]) -> TransformError {
    let details: Vec<String> = errors.iter().map(|(_, e)| format!("{e:?}")).collect();
    TransformError::InvalidProgram {
        reason: format!("{stage} error: {}", details.join("; ")),
    }
}

/// Converts a jaq value back into JSON through its JSON rendering.
fn to_json(value: &Val) -> Result<Value, TransformError> {
    serde_json::from_str(&value.to_string()).map_err(|e| TransformError::Execution {
        reason: format!("output is not valid JSON: {e}"),
    })
}

/// [`TransformExecutor`] for jq programs.
///
/// Compiled programs are cached per thread, so repeated runs of the same
/// program over a batch pay the parse and compile cost once per worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct JqExecutor;

impl JqExecutor {
    /// Create a new executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransformExecutor for JqExecutor {
    fn run(&self, program: &str, document: &Value) -> Result<Value, TransformError> {
        let filter = cached_program(program)?;
        let inputs = RcIter::new(core::iter::empty());
        let mut outputs = filter.run((Ctx::new([], &inputs), Val::from(document.clone())));

        match outputs.next() {
            Some(Ok(value)) => to_json(&value),
            Some(Err(e)) => Err(TransformError::Execution {
                reason: format!("{e:?}"),
            }),
            None => Err(TransformError::NoOutput),
        }
    }

    fn check(&self, program: &str) -> Result<(), TransformError> {
        cached_program(program).map(|_| ())
    }
}
