use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Errors a module hook may raise; each module brings its own error type.
pub type ModuleError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A unit of the application lifecycle. Hooks run sequentially, in
/// registration order, and the runner aborts the phase on the first error.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    async fn boot(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn start(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn stop(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn shutdown(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Trigger side of the cancellation token held by the application.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> Cancel {
        Cancel {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Clonable cancellation token threaded through every lifecycle hook.
/// Long-running operations race their work against `cancelled()`.
#[derive(Clone)]
pub struct Cancel {
    rx: watch::Receiver<bool>,
}

impl Cancel {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the source has been triggered. If the source is dropped
    /// without triggering, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Drives every registered module through Boot, Start, run, Stop and
/// Shutdown, strictly in registration order.
pub struct App {
    name: String,
    modules: Vec<Arc<dyn Module>>,
    cancel: CancelSource,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
            cancel: CancelSource::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_module(&mut self, module: Arc<dyn Module>) {
        self.modules.push(module);
    }

    /// Token for wiring cancellation into work outside the lifecycle hooks.
    pub fn cancel_token(&self) -> Cancel {
        self.cancel.token()
    }

    /// Requests cancellation of the running lifecycle.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Full lifecycle with an idle run phase.
    pub async fn run(&self) -> Result<(), AppError> {
        self.run_with(async {}).await
    }

    /// Full lifecycle; `run_phase` executes between Start and Stop.
    pub async fn run_with<F>(&self, run_phase: F) -> Result<(), AppError>
    where
        F: std::future::Future<Output = ()>,
    {
        self.sys_boot().await?;
        self.sys_start().await?;
        run_phase.await;
        self.sys_stop().await?;
        self.sys_shutdown().await?;
        Ok(())
    }

    async fn sys_boot(&self) -> Result<(), AppError> {
        let cancel = self.cancel.token();
        for module in &self.modules {
            info!(app = %self.name, module = module.name(), "boot");
            module
                .boot(&cancel)
                .await
                .map_err(|source| AppError::module("boot", module.name(), source))?;
        }
        Ok(())
    }

    async fn sys_start(&self) -> Result<(), AppError> {
        let cancel = self.cancel.token();
        for module in &self.modules {
            info!(app = %self.name, module = module.name(), "start");
            module
                .start(&cancel)
                .await
                .map_err(|source| AppError::module("start", module.name(), source))?;
        }
        Ok(())
    }

    async fn sys_stop(&self) -> Result<(), AppError> {
        let cancel = self.cancel.token();
        for module in &self.modules {
            info!(app = %self.name, module = module.name(), "stop");
            module
                .stop(&cancel)
                .await
                .map_err(|source| AppError::module("stop", module.name(), source))?;
        }
        Ok(())
    }

    async fn sys_shutdown(&self) -> Result<(), AppError> {
        let cancel = self.cancel.token();
        for module in &self.modules {
            info!(app = %self.name, module = module.name(), "shutdown");
            module
                .shutdown(&cancel)
                .await
                .map_err(|source| AppError::module("shutdown", module.name(), source))?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("{phase} failed for module {module:?}: {source}")]
pub struct AppError {
    pub phase: &'static str,
    pub module: String,
    #[source]
    pub source: ModuleError,
}

impl AppError {
    fn module(phase: &'static str, module: &str, source: ModuleError) -> Self {
        Self {
            phase,
            module: module.to_owned(),
            source,
        }
    }
}
