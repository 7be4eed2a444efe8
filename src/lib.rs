// Lua Runtime
// A compact Lua VM implementation with bytecode compiler and GC

#[cfg(test)]
mod test;

pub(crate) mod branch;
pub mod compiler;
#[cfg(feature = "loadlib")]
pub mod ffi;
pub mod gc;
pub mod lib_registry;
#[cfg(feature = "async")]
pub mod lua_async;
pub mod lua_pattern;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;
pub use compiler::Compiler;
#[cfg(feature = "loadlib")]
pub use ffi::FFIState;
pub use gc::*;
pub use lib_registry::LibraryRegistry;
pub use lua_value::{Chunk, LuaFunction, LuaString, LuaTable, LuaValue};
pub use lua_vm::{Instruction, LuaError, LuaResult, LuaVM, OpCode, SafeOption};
use std::rc::Rc;

/// Compile and run a chunk of source in a fresh interpreter, returning all
/// values returned by the chunk.
///
/// This is the quickest way to embed the interpreter; callers who need to
/// register host functions or reuse a VM across calls should build a
/// [`LuaVM`] directly and call [`LuaVM::execute_string`].
pub fn execute(source: &str) -> LuaResult<Vec<LuaValue>> {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.execute_string(source)
}

/// Compile and run a chunk of source against an already-configured VM.
pub fn execute_with_vm(vm: &mut LuaVM, source: &str) -> LuaResult<Vec<LuaValue>> {
    vm.execute_string(source)
}

/// Compile and run the contents of a file.
///
/// I/O failures are reported as [`LuaError::FileError`]; the error message
/// (available via [`LuaVM::into_full_error`]) carries the underlying OS error.
pub fn execute_file(vm: &mut LuaVM, path: &std::path::Path) -> LuaResult<Vec<LuaValue>> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "failed to read script file");
        vm.main_state().error(format!("cannot open {}: {}", path.display(), e));
        LuaError::FileError
    })?;
    vm.execute_string(&source)
}
