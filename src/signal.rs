/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Subscription lists for driver notifications

/// Repeatable notification: every `emit` reaches every subscriber
pub struct Signal<T> {
    slots: Vec<Box<dyn FnMut(&T)>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn connect<F>(&mut self, slot: F)
    where
        F: FnMut(&T) + 'static,
    {
        self.slots.push(Box::new(slot));
    }

    pub fn emit(&mut self, value: &T) {
        for slot in self.slots.iter_mut() {
            slot(value);
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-shot notification: only the first `emit` is delivered
pub struct OnceSignal<T> {
    signal: Signal<T>,
    fired: bool,
}

impl<T> OnceSignal<T> {
    pub fn new() -> Self {
        Self {
            signal: Signal::new(),
            fired: false,
        }
    }

    pub fn connect<F>(&mut self, slot: F)
    where
        F: FnMut(&T) + 'static,
    {
        self.signal.connect(slot);
    }

    /// Returns false if the signal had already fired
    pub fn emit(&mut self, value: &T) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        self.signal.emit(value);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

impl<T> Default for OnceSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn signal_reaches_all_slots_each_time() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut sig = Signal::new();
        for tag in 0..2 {
            let seen = seen.clone();
            sig.connect(move |v: &u8| seen.borrow_mut().push((tag, *v)));
        }
        sig.emit(&7);
        sig.emit(&8);
        assert_eq!(*seen.borrow(), vec![(0, 7), (1, 7), (0, 8), (1, 8)]);
    }

    #[test]
    fn once_signal_fires_once() {
        let count = Rc::new(RefCell::new(0));
        let mut sig = OnceSignal::new();
        let c = count.clone();
        sig.connect(move |_: &()| *c.borrow_mut() += 1);
        assert!(sig.emit(&()));
        assert!(!sig.emit(&()));
        assert!(sig.has_fired());
        assert_eq!(*count.borrow(), 1);
    }
}
