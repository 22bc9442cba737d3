//! In-process stand-ins for external services.
//!
//! A satellite is a background task that lives exactly as long as the
//! forklift run: it is started by a provider (a syslog sink, a debugging
//! mail server), handed to the service instance, and shut down when the run
//! ends. Dropping the handle also signals shutdown, so a satellite never
//! outlives the process that started it.

pub mod smtp;
pub mod syslog;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use smtp::start_smtp_sink;
pub use syslog::start_syslog_sink;

/// Where a satellite writes what it receives.
pub type Output = Arc<dyn Fn(&str) + Send + Sync>;

/// Output that prints every record on its own line to stdout.
pub fn stdout() -> Output {
    Arc::new(|record: &str| println!("{record}"))
}

type StopCallback = Box<dyn FnOnce() + Send>;

/// Handle to a running satellite task.
pub struct Satellite {
    name: &'static str,
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    on_stop: Option<StopCallback>,
}

impl Satellite {
    /// Spawn `run` as a satellite. It receives the shutdown signal and should
    /// return promptly once it fires.
    pub fn spawn<F, Fut>(name: &'static str, port: u16, run: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(run(rx));
        tracing::debug!("Started {} satellite on port {}", name, port);
        Self {
            name,
            port,
            shutdown: Some(tx),
            task: Some(task),
            on_stop: None,
        }
    }

    /// Run `callback` once the satellite has been shut down.
    pub fn on_stop(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Port the satellite listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal shutdown and wait for the task to finish.
    pub async fn stop(mut self) {
        self.signal();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("{} satellite ended abnormally: {}", self.name, e);
        }
        self.run_stop_callback();
        tracing::debug!("Stopped {} satellite", self.name);
    }

    fn signal(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The task may already be gone.
            let _ = tx.send(());
        }
    }

    fn run_stop_callback(&mut self) {
        if let Some(callback) = self.on_stop.take() {
            callback();
        }
    }
}

impl Drop for Satellite {
    fn drop(&mut self) {
        self.signal();
        self.run_stop_callback();
    }
}

impl fmt::Debug for Satellite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Satellite")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn stop_signals_task_and_runs_callback() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        let satellite = Satellite::spawn("test", 1, |shutdown| async move {
            let _ = shutdown.await;
        })
        .on_stop(move || flag.store(true, Ordering::SeqCst));

        assert!(satellite.is_running());
        satellite.stop().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_signals_shutdown() {
        let (done_tx, done_rx) = oneshot::channel();
        let satellite = Satellite::spawn("test", 1, |shutdown| async move {
            let _ = shutdown.await;
            let _ = done_tx.send(());
        });

        drop(satellite);
        tokio::time::timeout(std::time::Duration::from_secs(1), done_rx)
            .await
            .expect("satellite did not shut down")
            .unwrap();
    }
}
