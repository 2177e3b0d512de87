//! Protocol dispatch tables
//!
//! Design: every protocol behavior a type supports lives in its `SlotTable`.
//! 1. `number` names the operators and their hook names
//! 2. `magic` classifies member names as hooks
//! 3. `hooks` adapts typed Rust callables to erased slots
//! 4. `slots` holds the table and its inheritance rules
//! 5. `index` and `buffer` hold the checks the host applies before a hook
//!    or a foreign reader can touch memory

mod buffer;
pub mod hooks;
mod index;
pub mod magic;
mod number;
mod slots;

pub use buffer::{BufferElement, BufferSpec, Dims, ValidBuffer};
pub use index::wrap_index;
pub use magic::{classify, is_hook_name, HookSlot};
pub use number::{BinaryOp, CompareOp, UnaryOp};
pub use slots::*;
