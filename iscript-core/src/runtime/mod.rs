//! Runtime: values, the generational heap, execution contexts and the VM

pub mod context;
pub mod error;
pub mod frame;
pub mod heap;
pub mod native;
pub mod object;
pub mod value;
pub mod vm;

pub use context::{ContextStatus, ExecutionContext, QueuedEvent};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use heap::{CollectStats, HeapStats};
pub use native::{NativeCall, NativeFn};
pub use object::{DictKey, Object};
pub use value::{ContextId, FunctionRef, NativeId, ObjRef, Value};
pub use vm::{Resume, RunStats, Vm};
