//! Ordered lifecycle composition for daemon subsystems.
//!
//! A [`ServiceStack`] starts its services in registration order and stops
//! them in reverse order on every exit path, including a failed start. No
//! inheritance, no implicit base behavior: the list is the composition.

use std::future::Future;
use std::pin::Pin;

use tracing::{error, info};

/// Boxed future returned by [`Service`] methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A subsystem with an ordered start/stop lifecycle.
pub trait Service: Send {
    fn name(&self) -> &str;

    fn start(&mut self) -> ServiceFuture<'_, anyhow::Result<()>>;

    /// Stop must be safe to call after a failed or missing start.
    fn stop(&mut self) -> ServiceFuture<'_, ()>;
}

/// An ordered collection of services.
#[derive(Default)]
pub struct ServiceStack {
    services: Vec<Box<dyn Service>>,
    started: usize,
}

impl ServiceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, service: Box<dyn Service>) {
        self.services.push(service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Start all services in order.
    ///
    /// If any start fails, the services started so far are stopped in
    /// reverse order before the error is returned.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        for i in 0..self.services.len() {
            let name = self.services[i].name().to_string();
            match self.services[i].start().await {
                Ok(()) => {
                    self.started = i + 1;
                    info!(service = %name, "service started");
                }
                Err(e) => {
                    error!(service = %name, error = %e, "service failed to start");
                    self.stop_all().await;
                    return Err(e.context(format!("failed to start service '{name}'")));
                }
            }
        }
        Ok(())
    }

    /// Stop started services in reverse start order.
    pub async fn stop_all(&mut self) {
        for i in (0..self.started).rev() {
            let name = self.services[i].name().to_string();
            self.services[i].stop().await;
            info!(service = %name, "service stopped");
        }
        self.started = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    impl Recorder {
        fn boxed(name: &str, log: &Arc<Mutex<Vec<String>>>, fail_start: bool) -> Box<dyn Service> {
            Box::new(Self {
                name: name.to_string(),
                log: log.clone(),
                fail_start,
            })
        }
    }

    impl Service for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn start(&mut self) -> ServiceFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("start {}", self.name));
                if self.fail_start {
                    anyhow::bail!("boom");
                }
                Ok(())
            })
        }

        fn stop(&mut self) -> ServiceFuture<'_, ()> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("stop {}", self.name));
            })
        }
    }

    #[tokio::test]
    async fn starts_in_order_stops_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ServiceStack::new();
        stack.push(Recorder::boxed("a", &log, false));
        stack.push(Recorder::boxed("b", &log, false));

        stack.start_all().await.unwrap();
        stack.stop_all().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn failed_start_unwinds_already_started() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ServiceStack::new();
        stack.push(Recorder::boxed("a", &log, false));
        stack.push(Recorder::boxed("b", &log, true));
        stack.push(Recorder::boxed("c", &log, false));

        let err = stack.start_all().await.unwrap_err();
        assert!(err.to_string().contains("b"));

        // "b" failed before being marked started, so only "a" unwinds.
        assert_eq!(*log.lock().unwrap(), vec!["start a", "start b", "stop a"]);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ServiceStack::new();
        stack.push(Recorder::boxed("a", &log, false));

        stack.stop_all().await;
        assert!(log.lock().unwrap().is_empty());
    }
}
