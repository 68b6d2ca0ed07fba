use std::cell::RefCell;
use std::rc::Rc;

/// Single-threaded shared mutable cell, used for reference-typed values
/// such as environments that are compared and aliased by identity.
pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Identity comparison for two shared cells.
pub fn same<T>(a: &Shared<T>, b: &Shared<T>) -> bool {
    Rc::ptr_eq(a, b)
}
