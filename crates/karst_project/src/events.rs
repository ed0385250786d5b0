// SPDX-License-Identifier: MIT OR Apache-2.0
//! Synchronous event delegates.
//!
//! The store publishes mutations through [`DelegateList`]s; callers
//! install listeners with [`DelegateList::bind`] and remove them with
//! the returned [`Subscription`]. Listeners fire synchronously inside
//! the mutating call and must not mutate the publisher re-entrantly;
//! work that needs the store queues it for the next editor tick.

/// Handle identifying one bound listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// An ordered list of listeners for one event.
pub struct DelegateList<T> {
    listeners: Vec<(Subscription, Box<dyn FnMut(&T)>)>,
    next_id: u64,
}

impl<T> DelegateList<T> {
    /// An empty delegate list.
    pub fn new() -> DelegateList<T> {
        DelegateList {
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    /// Install a listener; the returned handle removes it again.
    pub fn bind(&mut self, listener: impl FnMut(&T) + 'static) -> Subscription {
        let id = Subscription(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a previously bound listener. Unknown handles are ignored.
    pub fn unbind(&mut self, subscription: Subscription) {
        self.listeners.retain(|(id, _)| *id != subscription);
    }

    /// Invoke every listener in bind order.
    pub fn invoke(&mut self, payload: &T) {
        for (_, listener) in &mut self.listeners {
            listener(payload);
        }
    }

    /// Number of bound listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is bound.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T> Default for DelegateList<T> {
    fn default() -> DelegateList<T> {
        DelegateList::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn listeners_fire_in_bind_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = DelegateList::new();
        let a = Rc::clone(&log);
        list.bind(move |v: &i32| a.borrow_mut().push(*v));
        let b = Rc::clone(&log);
        list.bind(move |v: &i32| b.borrow_mut().push(*v * 10));

        list.invoke(&3);
        assert_eq!(*log.borrow(), vec![3, 30]);
    }

    #[test]
    fn unbind_removes_only_the_target() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = DelegateList::new();
        let a = Rc::clone(&log);
        let first = list.bind(move |v: &i32| a.borrow_mut().push(*v));
        let b = Rc::clone(&log);
        list.bind(move |v: &i32| b.borrow_mut().push(-*v));

        list.unbind(first);
        list.invoke(&7);
        assert_eq!(*log.borrow(), vec![-7]);
    }
}
