//! Iterator over a list's storage by position

use super::list;
use crate::descriptor::ClassBuilder;
use crate::field;
use crate::host::{HostResult, ObjRef, Value};
use crate::lifecycle;
use crate::module::NativeClass;

/// `list_iterator`: yields items until the index passes the current length
pub struct ListIterator {
    list: Value,
    index: usize,
}

impl ListIterator {
    pub fn over(list: &ObjRef) -> HostResult<ObjRef> {
        lifecycle::create(ListIterator {
            list: Value::Obj(list.clone()),
            index: 0,
        })
    }

    fn advance(&mut self) -> HostResult<Option<Value>> {
        let Value::Obj(list) = &self.list else {
            return Ok(None);
        };
        match list::get(list, self.index)? {
            Some(item) => {
                self.index += 1;
                Ok(Some(item))
            }
            None => {
                // Exhausted iterators stay exhausted even if the list grows.
                self.list = Value::None;
                Ok(None)
            }
        }
    }
}

impl NativeClass for ListIterator {
    const NAME: &'static str = "list_iterator";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .field("_list", field!(ListIterator, list))
            .iter_self()
            .try_next(ListIterator::advance);
    }
}
