//! Progress reporting from worker threads.

use std::sync::Arc;

use crate::executor::SessionExecutor;

/// Reports values from any thread to a handler that runs on the owner thread.
///
/// Each report is a deferred job, so reports arrive in the order made.
pub struct Progress<T> {
    executor: Arc<SessionExecutor>,
    handler: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> Progress<T> {
    pub fn new<H>(executor: Arc<SessionExecutor>, handler: H) -> Self
    where
        H: Fn(T) + Send + Sync + 'static,
    {
        Self {
            executor,
            handler: Arc::new(handler),
        }
    }

    pub fn report(&self, value: T) {
        let handler = Arc::clone(&self.handler);
        self.executor.run_deferred(move || handler(value));
    }
}

impl<T> Clone for Progress<T> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            handler: Arc::clone(&self.handler),
        }
    }
}
