/// Observer list, invoked synchronously in registration order
#[derive(Default)]
pub struct Listeners {
    handlers: Vec<Box<dyn FnMut() + Send>>,
}

impl Listeners {
    pub fn add(&mut self, handler: impl FnMut() + Send + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn fire(&mut self) {
        for handler in self.handlers.iter_mut() {
            handler();
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn fire_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();

        for i in 0..3 {
            let calls = calls.clone();
            listeners.add(move || calls.lock().unwrap().push(i));
        }

        listeners.fire();
        listeners.fire();

        assert_eq!(listeners.len(), 3);
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2, 0, 1, 2]);
    }
}
