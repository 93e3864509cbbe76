use anyhow::{Context, Result};
use database::Lifecycle;
use std::sync::Arc;

/// The composition root's view of its long-lived services.
///
/// Hooks are initialized in registration order and shut down in reverse, each
/// exactly once.
#[derive(Default)]
pub struct Host {
    hooks: Vec<Arc<dyn Lifecycle>>,
    started: usize,
    stopped: bool,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn Lifecycle>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    /// Initializes every hook. If one fails, the hooks already started are shut
    /// down again and the failure is returned.
    pub async fn start(&mut self) -> Result<()> {
        for idx in self.started..self.hooks.len() {
            let hook = Arc::clone(&self.hooks[idx]);
            tracing::debug!(hook = hook.name(), "Initializing.");
            if let Err(err) = hook.initialize().await {
                tracing::error!(hook = hook.name(), error = %err, "Initialization failed; stopping.");
                if let Err(stop_err) = self.stop().await {
                    tracing::error!(error = %stop_err, "Cleanup after failed start also failed.");
                }
                return Err(err).with_context(|| format!("Failed to initialize `{}`", hook.name()));
            }
            self.started = idx + 1;
        }
        Ok(())
    }

    /// Shuts the started hooks down in reverse order. Every hook is attempted;
    /// the first failure is returned. Later calls do nothing.
    pub async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let mut first_error = None;
        for hook in self.hooks[..self.started].iter().rev() {
            tracing::debug!(hook = hook.name(), "Shutting down.");
            if let Err(err) = hook.shutdown().await {
                tracing::error!(hook = hook.name(), error = %err, "Shutdown failed.");
                if first_error.is_none() {
                    first_error = Some(
                        anyhow::Error::new(err).context(format!("Failed to shut down `{}`", hook.name())),
                    );
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use database::DbError;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        fail_init: bool,
        fail_shutdown: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self { name, fail_init: false, fail_shutdown: false, log: Arc::clone(log) }
        }
    }

    #[async_trait]
    impl Lifecycle for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn initialize(&self) -> Result<(), DbError> {
            self.log.lock().unwrap().push(format!("init {}", self.name));
            if self.fail_init { Err(DbError::NotConnected) } else { Ok(()) }
        }

        async fn shutdown(&self) -> Result<(), DbError> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            if self.fail_shutdown { Err(DbError::Closed) } else { Ok(()) }
        }
    }

    #[tokio::test]
    async fn hooks_start_in_order_and_stop_in_reverse_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut host = Host::new();
        host.register(Arc::new(Recorder::new("db", &log)))
            .register(Arc::new(Recorder::new("cache", &log)));

        host.start().await.unwrap();
        host.stop().await.unwrap();
        host.stop().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["init db", "init cache", "stop cache", "stop db"]);
    }

    #[tokio::test]
    async fn failed_start_unwinds_started_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let broken = Recorder { fail_init: true, ..Recorder::new("broken", &log) };
        let mut host = Host::new();
        host.register(Arc::new(Recorder::new("db", &log)))
            .register(Arc::new(broken))
            .register(Arc::new(Recorder::new("never", &log)));

        let err = host.start().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(*log.lock().unwrap(), vec!["init db", "init broken", "stop db"]);
    }

    #[tokio::test]
    async fn stop_attempts_every_hook_and_reports_the_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stubborn = Recorder { fail_shutdown: true, ..Recorder::new("stubborn", &log) };
        let mut host = Host::new();
        host.register(Arc::new(Recorder::new("db", &log))).register(Arc::new(stubborn));

        host.start().await.unwrap();
        let err = host.stop().await.unwrap_err();
        assert!(err.to_string().contains("stubborn"));
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("stop db"));
    }
}
