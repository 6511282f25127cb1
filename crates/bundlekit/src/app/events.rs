//! Element change notifications.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::domain::model::Element;

/// A change to the set of live elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementEvent {
    Added(Element),
    Removed(Element),
    /// Delivered to listeners as a removal followed by an addition.
    Modified(Element),
}

impl ElementEvent {
    pub fn element(&self) -> &Element {
        match self {
            ElementEvent::Added(element)
            | ElementEvent::Removed(element)
            | ElementEvent::Modified(element) => element,
        }
    }
}

/// Observer of element additions and removals.
///
/// Errors and panics raised by a listener are logged and never reach other listeners or the
/// registry operation that triggered the dispatch.
pub trait ElementChangeListener: Send + Sync {
    fn element_added(&self, _element: &Element) -> Result<()> {
        Ok(())
    }

    fn element_removed(&self, _element: &Element) -> Result<()> {
        Ok(())
    }
}

/// Ordered listener list with synchronous dispatch.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: RwLock<Vec<Arc<dyn ElementChangeListener>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. The same listener may be registered more than once.
    pub fn add_listener(&self, listener: Arc<dyn ElementChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove the first registration of `listener`. Returns whether one was found.
    pub fn remove_listener(&self, listener: &Arc<dyn ElementChangeListener>) -> bool {
        let mut listeners = self.listeners.write();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn notify(&self, event: &ElementEvent) {
        match event {
            ElementEvent::Added(element) => self.notify_added(element),
            ElementEvent::Removed(element) => self.notify_removed(element),
            ElementEvent::Modified(element) => self.notify_modified(element),
        }
    }

    pub fn notify_added(&self, element: &Element) {
        for listener in self.snapshot() {
            deliver("added", element, || listener.element_added(element));
        }
    }

    pub fn notify_removed(&self, element: &Element) {
        for listener in self.snapshot() {
            deliver("removed", element, || listener.element_removed(element));
        }
    }

    /// Deliver a removal then an addition to each listener in turn. Skipped entirely for
    /// detached elements so that unload and reload cycles do not churn observers.
    pub fn notify_modified(&self, element: &Element) {
        if !element.is_live() {
            tracing::debug!(element = %element.name, "suppressing modify for detached element");
            return;
        }
        for listener in self.snapshot() {
            deliver("removed", element, || listener.element_removed(element));
            deliver("added", element, || listener.element_added(element));
        }
    }

    // Dispatch runs without the lock held so listeners may (un)register during delivery.
    fn snapshot(&self) -> Vec<Arc<dyn ElementChangeListener>> {
        self.listeners.read().clone()
    }
}

fn deliver<F>(change: &str, element: &Element, callback: F)
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(change, element = %element.name, error = %err, "listener failed");
        }
        Err(_) => {
            tracing::error!(change, element = %element.name, "listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::BundleId;
    use anyhow::anyhow;
    use parking_lot::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ElementChangeListener for Recorder {
        fn element_added(&self, element: &Element) -> Result<()> {
            self.log.lock().push(format!("{}:added:{}", self.label, element.name));
            Ok(())
        }

        fn element_removed(&self, element: &Element) -> Result<()> {
            self.log
                .lock()
                .push(format!("{}:removed:{}", self.label, element.name));
            Ok(())
        }
    }

    struct Failing;

    impl ElementChangeListener for Failing {
        fn element_added(&self, _element: &Element) -> Result<()> {
            Err(anyhow!("boom"))
        }

        fn element_removed(&self, _element: &Element) -> Result<()> {
            panic!("listener panic");
        }
    }

    fn live(name: &str) -> Element {
        let mut element = Element::command(name, "true");
        element.owning_bundle = Some(BundleId(1));
        element
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn ElementChangeListener> {
        Arc::new(Recorder {
            label,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn single_add_is_delivered_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = ChangeNotifier::new();
        notifier.add_listener(recorder("a", &log));

        notifier.notify(&ElementEvent::Added(live("run")));

        assert_eq!(*log.lock(), ["a:added:run"]);
    }

    #[test]
    fn modify_is_remove_then_add_per_listener_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = ChangeNotifier::new();
        notifier.add_listener(recorder("a", &log));
        notifier.add_listener(recorder("b", &log));

        notifier.notify_modified(&live("run"));

        assert_eq!(
            *log.lock(),
            ["a:removed:run", "a:added:run", "b:removed:run", "b:added:run"]
        );
    }

    #[test]
    fn modify_on_detached_element_is_suppressed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = ChangeNotifier::new();
        notifier.add_listener(recorder("a", &log));

        notifier.notify_modified(&Element::command("orphan", "true"));

        assert!(log.lock().is_empty());
    }

    #[test]
    fn failing_listener_does_not_block_later_ones() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = ChangeNotifier::new();
        notifier.add_listener(Arc::new(Failing));
        notifier.add_listener(recorder("b", &log));

        notifier.notify_added(&live("x"));
        notifier.notify_removed(&live("x"));

        assert_eq!(*log.lock(), ["b:added:x", "b:removed:x"]);
    }

    #[test]
    fn remove_listener_drops_first_registration_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = ChangeNotifier::new();
        let listener = recorder("a", &log);
        notifier.add_listener(Arc::clone(&listener));
        notifier.add_listener(Arc::clone(&listener));

        assert!(notifier.remove_listener(&listener));
        assert_eq!(notifier.len(), 1);

        notifier.notify_added(&live("x"));
        assert_eq!(log.lock().len(), 1);

        assert!(notifier.remove_listener(&listener));
        assert!(!notifier.remove_listener(&listener));
        assert!(notifier.is_empty());
    }
}
