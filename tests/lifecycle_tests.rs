use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cambus::{Adc, App, Cancel, CancelSource, Dac, MockBus, Module, ModuleError, Registry};

/// Lifecycle module that records every hook invocation and can be told to
/// fail in one phase.
struct Probe {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    fail_phase: Option<&'static str>,
}

impl Probe {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            log,
            fail_phase: None,
        })
    }

    fn failing(name: &str, log: Arc<Mutex<Vec<String>>>, phase: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            log,
            fail_phase: Some(phase),
        })
    }

    fn record(&self, phase: &'static str) -> Result<(), ModuleError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{phase}:{}", self.name));
        if self.fail_phase == Some(phase) {
            return Err(format!("{} refused to {phase}", self.name).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Module for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn boot(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        self.record("boot")
    }

    async fn start(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        self.record("start")
    }

    async fn stop(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        self.record("stop")
    }

    async fn shutdown(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        self.record("shutdown")
    }
}

#[tokio::test]
async fn test_phases_run_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new("bench");
    app.add_module(Probe::new("a", log.clone()));
    app.add_module(Probe::new("b", log.clone()));

    app.run().await.expect("lifecycle");

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "boot:a", "boot:b", "start:a", "start:b", "stop:a", "stop:b", "shutdown:a",
            "shutdown:b",
        ]
    );
}

#[tokio::test]
async fn test_phase_aborts_on_first_failure() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new("bench");
    app.add_module(Probe::new("a", log.clone()));
    app.add_module(Probe::failing("b", log.clone(), "start"));
    app.add_module(Probe::new("c", log.clone()));

    let err = app.run().await.expect_err("lifecycle must fail");
    assert_eq!(err.phase, "start");
    assert_eq!(err.module, "b");

    // "c" never started and nothing was stopped afterwards.
    assert_eq!(
        *log.lock().unwrap(),
        vec!["boot:a", "boot:b", "boot:c", "start:a", "start:b"]
    );
}

#[tokio::test]
async fn test_module_with_default_hooks() {
    struct Inert;

    #[async_trait]
    impl Module for Inert {
        fn name(&self) -> &str {
            "inert"
        }
    }

    let mut app = App::new("bench");
    app.add_module(Arc::new(Inert));
    app.run().await.expect("default hooks are no-ops");
}

#[tokio::test]
async fn test_cancel_token_observes_trigger() {
    let source = CancelSource::new();
    let token = source.token();
    let clone = token.clone();
    assert!(!token.is_cancelled());

    source.cancel();
    assert!(token.is_cancelled());
    assert!(clone.is_cancelled());
    token.cancelled().await;
}

#[tokio::test]
async fn test_cancel_token_pends_without_trigger() {
    let source = CancelSource::new();
    let token = source.token();
    drop(source);

    // A dropped source that never fired must not look like a cancellation.
    let waited = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
    assert!(waited.is_err());
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn test_registry_rejects_duplicates() {
    let registry = Registry::new();
    registry
        .register_adc(Adc::new("adc", "04x1541", 1))
        .expect("first registration");

    let err = registry
        .register_adc(Adc::new("adc", "04x1542", 1))
        .expect_err("duplicate name");
    assert!(matches!(err, cambus::RegistryError::Duplicate(name) if name == "adc"));
}

#[tokio::test]
async fn test_registry_lookup_is_typed() {
    let registry = Registry::new();
    let adc = Adc::new("adc", "04x1541", 1);
    let dac = Dac::new("dac", "04x1540");
    registry.register_adc(adc.clone()).expect("adc");
    let bus = MockBus::new("canbus", adc, dac);
    registry.register_bus("canbus", bus).expect("bus");

    assert!(registry.adc("adc").is_some());
    assert!(registry.bus("canbus").is_some());

    // Right name, wrong kind: a miss, not a panic or a bogus handle.
    assert!(registry.bus("adc").is_none());
    assert!(registry.adc("canbus").is_none());
    assert!(registry.dac("dac").is_none());
}
