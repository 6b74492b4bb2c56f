//! Named events attached to the graph.
//!
//! A named event fires when a transition's synthetic event name matches it,
//! e.g. an event named `transitionTocompleted` fires on arrival at
//! `completed`.

use crate::notify::{Listener, ListenerError, Notification};
use std::fmt;
use std::sync::Arc;

/// A named trigger with a callback.
#[derive(Clone)]
pub struct Event {
    /// Event name.
    pub name: String,
    callback: Listener,
}

impl Event {
    /// Creates a named event.
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }

    /// Invokes the callback.
    ///
    /// # Errors
    ///
    /// Returns whatever the callback returns.
    pub fn fire(&self, notification: &Notification) -> Result<(), ListenerError> {
        (self.callback)(notification)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fire_invokes_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let event = Event::new("transitionTocompleted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let notification = Notification::TimerCancelled {
            target: "completed".to_string(),
        };
        event.fire(&notification).unwrap();
        event.fire(&notification).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
