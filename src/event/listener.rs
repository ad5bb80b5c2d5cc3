use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

/// Fans events out to every subscribed receiver.
pub struct EventListener<E> {
    no_subscribers: AtomicBool,
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E: Clone> EventListener<E> {
    pub fn new() -> EventListener<E> {
        EventListener {
            no_subscribers: AtomicBool::new(true),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Returns a receiver for every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = channel();
        match self.subscribers.lock() {
            Ok(mut guard) => {
                guard.push(tx);
                self.no_subscribers.store(false, Ordering::SeqCst);
            }
            // A poisoned listener delivers nothing; the receiver simply sees a closed channel.
            Err(_) => drop(tx),
        }
        rx
    }

    /// Sends the event built by `make` to all subscribers. The event is only
    /// built if someone is listening.
    pub fn emit_event<F>(&self, make: F)
    where
        F: FnOnce() -> E,
    {
        if self.no_subscribers.load(Ordering::SeqCst) {
            return;
        }

        let mut guard = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        let event = make();
        guard.retain(|tx| tx.send(event.clone()).is_ok());

        if guard.is_empty() {
            self.no_subscribers.store(true, Ordering::SeqCst);
        }
    }

    pub fn has_subscribers(&self) -> bool {
        !self.no_subscribers.load(Ordering::SeqCst)
    }
}

impl<E: Clone> Default for EventListener<E> {
    fn default() -> Self {
        EventListener::new()
    }
}
