use crate::gc::object_pool::{BinaryId, FunctionId, StringId, TableId, ThreadId, UpvalueId, UserdataId};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcObjectKind {
    String = 0,
    Table = 1,
    Function = 2,
    Upvalue = 3,
    Thread = 4,
    Userdata = 5,
    Binary = 6,
}

/// Tagged GC object identifier, one variant per storage arena in `ObjectPool`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcId {
    StringId(StringId),
    TableId(TableId),
    FunctionId(FunctionId),
    UpvalueId(UpvalueId),
    ThreadId(ThreadId),
    UserdataId(UserdataId),
    BinaryId(BinaryId),
}

impl GcId {
    #[inline(always)]
    pub fn gc_type(self) -> GcObjectKind {
        match self {
            GcId::StringId(_) => GcObjectKind::String,
            GcId::TableId(_) => GcObjectKind::Table,
            GcId::FunctionId(_) => GcObjectKind::Function,
            GcId::UpvalueId(_) => GcObjectKind::Upvalue,
            GcId::ThreadId(_) => GcObjectKind::Thread,
            GcId::UserdataId(_) => GcObjectKind::Userdata,
            GcId::BinaryId(_) => GcObjectKind::Binary,
        }
    }

    pub fn main_id() -> Self {
        GcId::ThreadId(ThreadId::main_id())
    }

    pub fn is_main(self) -> bool {
        matches!(self, GcId::ThreadId(id) if id.is_main())
    }
}
