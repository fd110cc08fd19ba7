// Signal hub: lazily attached subscriber lists for line and exit events
//
// A signal is "attached" only while it has at least one external subscriber.
// Publishing to a detached signal returns immediately without taking a lock.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

/// Callback for one line of output, `None` marks end-of-stream
pub type LineHandler = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Callback for the process exit code
pub type ExitHandler = Arc<dyn Fn(i32) + Send + Sync>;

type SubscriberId = u64;

/// Anything a [`Subscription`] can detach itself from
trait SubscriberSet: Send + Sync {
    fn remove(&self, id: SubscriberId);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking subscriber must not poison delivery for everyone else
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to one registered callback
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) removes the
/// callback. Use [`Subscription::persist`] to keep it for the lifetime of the
/// signal.
#[must_use = "dropping a Subscription immediately unsubscribes it"]
pub struct Subscription {
    id: SubscriberId,
    owner: Option<Weak<dyn SubscriberSet>>,
}

impl Subscription {
    /// Remove the callback. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(owner) = self.owner.take().and_then(|weak| weak.upgrade()) {
            owner.remove(self.id);
        }
    }

    /// Keep the callback registered until the signal itself is dropped
    pub fn persist(mut self) {
        self.owner = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.owner.is_some())
            .finish()
    }
}

// ============================================================================
// Line signal
// ============================================================================

struct LineSignalInner {
    name: &'static str,
    subscribers: Mutex<Vec<(SubscriberId, LineHandler)>>,
    attached: AtomicBool,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl SubscriberSet for LineSignalInner {
    fn remove(&self, id: SubscriberId) {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);

        if before > 0 && subscribers.is_empty() {
            self.attached.store(false, Ordering::SeqCst);
            debug!(signal = %self.name, "Line signal detached");
        }
    }
}

/// Line event source for one output stream
///
/// Attaches when the subscriber count goes 0 -> 1 and detaches on 1 -> 0.
/// Callbacks run on the reader task that publishes the line; they are never
/// invoked while the subscriber list is locked, so a callback may itself
/// subscribe or unsubscribe.
#[derive(Clone)]
pub struct LineSignal {
    inner: Arc<LineSignalInner>,
}

impl LineSignal {
    /// Create a detached signal
    ///
    /// # Arguments
    /// * `name` - Stream name used in log fields (e.g. "stdout")
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(LineSignalInner {
                name,
                subscribers: Mutex::new(Vec::new()),
                attached: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Register a callback for every line (and the final `None`)
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = lock(&self.inner.subscribers);
            subscribers.push((id, Arc::new(handler)));

            if subscribers.len() == 1 {
                self.inner.attached.store(true, Ordering::SeqCst);
                debug!(signal = %self.inner.name, "Line signal attached");
            }
        }

        let owner: Arc<dyn SubscriberSet> = self.inner.clone();
        Subscription {
            id,
            owner: Some(Arc::downgrade(&owner)),
        }
    }

    /// Whether at least one subscriber is registered
    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    /// Whether the end-of-stream terminator has been published
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Deliver one line to every current subscriber
    ///
    /// Returns the number of callbacks invoked (0 while detached). Publishing
    /// the `None` terminator marks the signal closed even while detached.
    pub fn publish(&self, line: Option<&str>) -> usize {
        if line.is_none() {
            self.inner.closed.store(true, Ordering::SeqCst);
        }

        if !self.is_attached() {
            return 0;
        }

        let handlers: Vec<LineHandler> = lock(&self.inner.subscribers)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(line);
        }

        handlers.len()
    }
}

// ============================================================================
// Exit signal
// ============================================================================

struct ExitSignalInner {
    subscribers: Mutex<Vec<(SubscriberId, ExitHandler)>>,
    attached: AtomicBool,
    fired: AtomicBool,
    next_id: AtomicU64,
}

impl SubscriberSet for ExitSignalInner {
    fn remove(&self, id: SubscriberId) {
        lock(&self.subscribers).retain(|(sid, _)| *sid != id);
    }
}

/// One-shot exit code notification
///
/// The first subscriber attaches the signal and it stays attached. A second `publish` is ignored, so subscribers see
/// the exit exactly once. Subscribers registered after the exit fired are not
/// called back.
#[derive(Clone)]
pub struct ExitSignal {
    inner: Arc<ExitSignalInner>,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ExitSignalInner {
                subscribers: Mutex::new(Vec::new()),
                attached: AtomicBool::new(false),
                fired: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a callback for the exit code
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).push((id, Arc::new(handler)));

        if !self.inner.attached.swap(true, Ordering::SeqCst) {
            debug!("Exit signal attached");
        }

        let owner: Arc<dyn SubscriberSet> = self.inner.clone();
        Subscription {
            id,
            owner: Some(Arc::downgrade(&owner)),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    /// Publish the exit code
    ///
    /// Returns false (and calls nothing) if an exit was already published.
    pub fn publish(&self, exit_code: i32) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        if self.is_attached() {
            let handlers: Vec<ExitHandler> = lock(&self.inner.subscribers)
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in &handlers {
                handler(exit_code);
            }
        }

        true
    }
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn collector() -> (Arc<Mutex<Vec<Option<String>>>>, impl Fn(Option<&str>) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |line: Option<&str>| {
            sink.lock().unwrap().push(line.map(str::to_string))
        })
    }

    #[test]
    fn test_line_signal_attaches_on_first_and_detaches_on_last() {
        let signal = LineSignal::new("stdout");
        assert!(!signal.is_attached());

        let mut first = signal.subscribe(|_| {});
        assert!(signal.is_attached());
        let second = signal.subscribe(|_| {});
        assert_eq!(signal.subscriber_count(), 2);

        first.unsubscribe();
        assert!(signal.is_attached(), "one subscriber left");

        drop(second);
        assert!(!signal.is_attached());
        assert_eq!(signal.subscriber_count(), 0);

        // Re-attach after full detach
        let _third = signal.subscribe(|_| {});
        assert!(signal.is_attached());
    }

    #[test]
    fn test_publish_while_detached_delivers_nothing() {
        let signal = LineSignal::new("stderr");
        assert_eq!(signal.publish(Some("dropped")), 0);

        let (seen, handler) = collector();
        let _sub = signal.subscribe(handler);
        assert_eq!(signal.publish(Some("kept")), 1);

        assert_eq!(*seen.lock().unwrap(), vec![Some("kept".to_string())]);
    }

    #[test]
    fn test_lines_delivered_once_in_order_with_terminator() {
        let signal = LineSignal::new("stdout");
        let (seen, handler) = collector();
        let _sub = signal.subscribe(handler);

        signal.publish(Some("line1"));
        signal.publish(Some("line2"));
        signal.publish(None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("line1".to_string()), Some("line2".to_string()), None]
        );
    }

    #[test]
    fn test_terminator_closes_detached_signal() {
        let signal = LineSignal::new("stdout");
        assert!(!signal.is_closed());
        signal.publish(Some("x"));
        assert!(!signal.is_closed());
        signal.publish(None);
        assert!(signal.is_closed());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let signal = LineSignal::new("stdout");
        let mut sub = signal.subscribe(|_| {});
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_persisted_subscription_survives_drop() {
        let signal = LineSignal::new("stdout");
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        signal
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .persist();

        signal.publish(Some("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(signal.is_attached());
    }

    #[test]
    fn test_handler_may_unsubscribe_itself_during_delivery() {
        let signal = LineSignal::new("stdout");
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in_handler = slot.clone();

        let sub = signal.subscribe(move |_| {
            if let Some(mut sub) = slot_in_handler.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        assert_eq!(signal.publish(Some("once")), 1);
        assert!(!signal.is_attached());
        assert_eq!(signal.publish(Some("twice")), 0);
    }

    #[test]
    fn test_concurrent_subscribe_and_publish() {
        let signal = LineSignal::new("stdout");
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _base = signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let publisher = {
            let signal = signal.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    signal.publish(Some("x"));
                }
            })
        };
        let churner = {
            let signal = signal.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _sub = signal.subscribe(|_| {});
                }
            })
        };

        publisher.join().unwrap();
        churner.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1000);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn test_exit_signal_fires_exactly_once() {
        let signal = ExitSignal::new();
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = codes.clone();
        let _sub = signal.subscribe(move |code| sink.lock().unwrap().push(code));

        assert!(signal.publish(3));
        assert!(!signal.publish(4));

        assert_eq!(*codes.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_exit_publish_while_detached_still_fires_once() {
        let signal = ExitSignal::new();
        assert!(!signal.is_attached());

        assert!(signal.publish(0));
        assert!(!signal.publish(0), "a detached publish still counts");
    }

    #[test]
    fn test_exit_signal_stays_attached_after_unsubscribe() {
        let signal = ExitSignal::new();
        let mut sub = signal.subscribe(|_| {});
        sub.unsubscribe();
        assert!(signal.is_attached());
    }

    #[test]
    fn test_late_exit_subscriber_not_called() {
        let signal = ExitSignal::new();
        signal.publish(1);

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let _sub = signal.subscribe(move |_| flag.store(true, Ordering::SeqCst));

        assert!(!called.load(Ordering::SeqCst));
        assert!(!signal.publish(1));
    }
}
