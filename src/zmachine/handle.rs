use std::cell::RefCell;
use std::rc::Rc;

// Shared, interior-mutable ownership for the pieces of machine state that
// more than one component holds onto (memory, the stack).
pub type Handle<T> = Rc<RefCell<T>>;

pub fn new_handle<T>(t: T) -> Handle<T> {
    Rc::new(RefCell::new(t))
}
