// Thin, self-consistent facade over `ObjectPool` (the ID-based arena storage) that
// additionally wires each new allocation into the GC's debt/white-color bookkeeping.
// Every create_* method here does exactly two things: allocate into the pool, then
// call `GC::track_object` so the tri-color invariants stay correct from the moment
// the object is born.

use crate::gc::object_pool::{ObjectPool, UpvalueId};
use crate::gc::{GcId, StringId};
use crate::lua_value::{Chunk, LuaThread, LuaUpvalue, LuaUserdata};
use crate::lua_vm::CFunction;
use crate::{GC, LuaValue};
use std::rc::Rc;

pub struct ObjectAllocator {
    pool: ObjectPool,
}

impl ObjectAllocator {
    pub fn new() -> Self {
        ObjectAllocator {
            pool: ObjectPool::new(),
        }
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ObjectPool {
        &mut self.pool
    }

    // ==================== String Operations ====================

    #[inline]
    pub fn create_string(&mut self, gc: &mut GC, s: &str) -> LuaValue {
        let id = self.pool.create_string(s);
        gc.track_object(GcId::StringId(id), s.len(), &mut self.pool);
        LuaValue::shrstring(id)
    }

    #[inline]
    pub fn create_string_owned(&mut self, gc: &mut GC, s: String) -> LuaValue {
        let len = s.len();
        let id = self.pool.create_string_owned(s);
        gc.track_object(GcId::StringId(id), len, &mut self.pool);
        LuaValue::shrstring(id)
    }

    /// Create a binary value, represented as a (possibly non-UTF8-lossy) Lua string.
    #[inline]
    pub fn create_binary(&mut self, gc: &mut GC, data: Vec<u8>) -> LuaValue {
        let s = String::from_utf8_lossy(&data).into_owned();
        self.create_string_owned(gc, s)
    }

    /// Create a substring from an existing string value (string.sub fast path).
    #[inline]
    pub fn create_substring(
        &mut self,
        gc: &mut GC,
        s_value: LuaValue,
        start: usize,
        end: usize,
    ) -> LuaValue {
        let string = match s_value.as_str() {
            Some(s) => s,
            None => return self.create_string(gc, ""),
        };
        let start = start.min(string.len());
        let end = end.min(string.len());
        if start >= end {
            return self.create_string(gc, "");
        }
        if start == 0 && end == string.len() {
            return s_value;
        }
        let substring = string[start..end].to_string();
        self.create_string_owned(gc, substring)
    }

    // ==================== Table Operations ====================

    #[inline]
    pub fn create_table(&mut self, gc: &mut GC, array_size: usize, hash_size: usize) -> LuaValue {
        let id = self.pool.create_table(array_size, hash_size);
        let size = array_size * 17 + hash_size * 24 + 64;
        gc.track_object(GcId::TableId(id), size, &mut self.pool);
        LuaValue::table(id)
    }

    // ==================== Function Operations ====================

    #[inline]
    pub fn create_function(
        &mut self,
        gc: &mut GC,
        chunk: Rc<Chunk>,
        upvalue_ids: Vec<UpvalueId>,
    ) -> LuaValue {
        let size = 256 + chunk.code.len() * 8 + chunk.constants.len() * 32 + upvalue_ids.len() * 64;
        let id = self.pool.create_function(chunk, upvalue_ids);
        gc.track_object(GcId::FunctionId(id), size, &mut self.pool);
        LuaValue::function(id)
    }

    /// Create a C closure (native function with upvalues).
    #[inline]
    pub fn create_c_closure(
        &mut self,
        gc: &mut GC,
        func: CFunction,
        upvalue_ids: Vec<UpvalueId>,
    ) -> LuaValue {
        let size = std::mem::size_of::<CFunction>() + upvalue_ids.len() * 64;
        let id = self.pool.create_c_closure(func, upvalue_ids);
        gc.track_object(GcId::FunctionId(id), size, &mut self.pool);
        LuaValue::function(id)
    }

    // ==================== Upvalue Operations ====================

    #[inline]
    pub fn create_upvalue_open(&mut self, gc: &mut GC, stack_index: usize) -> UpvalueId {
        let id = self.pool.create_upvalue_open(stack_index);
        gc.track_object(GcId::UpvalueId(id), 64, &mut self.pool);
        id
    }

    #[inline]
    pub fn create_upvalue_closed(&mut self, gc: &mut GC, value: LuaValue) -> UpvalueId {
        let id = self.pool.create_upvalue_closed(value);
        gc.track_object(GcId::UpvalueId(id), 64, &mut self.pool);
        id
    }

    pub fn create_upvalue(&mut self, gc: &mut GC, upvalue: Rc<LuaUpvalue>) -> UpvalueId {
        if upvalue.is_open() {
            self.create_upvalue_open(gc, upvalue.get_stack_index().unwrap_or(0))
        } else {
            self.create_upvalue_closed(gc, upvalue.get_closed_value().unwrap_or(LuaValue::nil()))
        }
    }

    // ==================== Userdata Operations ====================

    #[inline]
    pub fn create_userdata(&mut self, gc: &mut GC, userdata: LuaUserdata) -> LuaValue {
        let size = std::mem::size_of::<LuaUserdata>();
        let id = self.pool.create_userdata(userdata);
        gc.track_object(GcId::UserdataId(id), size, &mut self.pool);
        LuaValue::userdata(id)
    }

    // ==================== Thread (coroutine) Operations ====================

    /// Create a coroutine. The main thread is never allocated here; it uses the
    /// `ThreadId::main_id()` sentinel instead.
    #[inline]
    pub fn create_thread(&mut self, gc: &mut GC, thread: LuaThread) -> LuaValue {
        let size = std::mem::size_of::<LuaThread>();
        let id = self.pool.create_thread(thread);
        gc.track_object(GcId::ThreadId(id), size, &mut self.pool);
        LuaValue::thread(id)
    }

    #[inline]
    pub fn remove_str(&mut self, id: StringId) {
        self.pool.remove_string(id);
    }
}

impl Default for ObjectAllocator {
    fn default() -> Self {
        Self::new()
    }
}
