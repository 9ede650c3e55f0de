use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide counters, cheap to clone and share across connection tasks.
///
/// # Example
///
/// ```
/// use dss_server::statistics::{Number, Statistics};
///
/// let statistics = Statistics::default();
/// statistics.sessions_created.add(1);
/// assert_eq!(statistics.sessions_created.get(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Statistics {
    pub sessions_created: Arc<Count>,
    pub sessions_joined: Arc<Count>,
    pub sessions_left: Arc<Count>,
    pub host_announcements: Arc<Count>,
    pub migrations_started: Arc<Count>,
    pub relay_forwards: Arc<Count>,
    pub rate_limited: Arc<Count>,
}
