use std::time::Duration;

use cambus::mock::{MOCK_ADC_NODE, MOCK_DAC_NODE};
use cambus::protocol::ProtocolError;
use cambus::{
    Adc, App, Bus, BusConfig, BusDevice, BusError, CancelSource, Command, Dac, Hd2001, Led,
    MockBus, Module, Registry, Verb,
};

fn mock_bus() -> std::sync::Arc<MockBus> {
    let adc = Adc::new("adc", "04x1541", 1);
    let dac = Dac::new("dac", "04x1540");
    MockBus::new("mock", adc, dac)
}

#[tokio::test]
async fn test_mock_boot_assigns_fixed_nodes() {
    let bus = mock_bus();
    let cancel = CancelSource::new().token();

    assert_eq!(bus.adc().node(), None);
    bus.boot(&cancel).await.expect("boot");

    assert_eq!(bus.adc().node(), Some(MOCK_ADC_NODE));
    assert_eq!(bus.dac().node(), Some(MOCK_DAC_NODE));
}

#[tokio::test]
async fn test_mock_rsdo_is_deterministic() {
    let bus = mock_bus();

    let reply = bus
        .send(Command::new(Verb::Rsdo, "41,2404,1"))
        .await
        .expect("reply");
    assert_eq!(reply.verb, Verb::Rsdo);
    // mid-scale of a 16-bit converter, status 0, node echoed back
    assert_eq!(reply.data, "41,0,4000");
    assert_eq!(reply.rsdo_value().unwrap(), 0x4000);

    let again = bus
        .send(Command::new(Verb::Rsdo, "41,2404,1"))
        .await
        .expect("reply");
    assert_eq!(again, reply);
}

#[tokio::test]
async fn test_mock_wsdo_acknowledges() {
    let bus = mock_bus();

    let reply = bus
        .send(Command::new(Verb::Wsdo, "42,6411,1,2,14000"))
        .await
        .expect("reply");
    assert_eq!(reply.verb, Verb::Wsdo);
    assert_eq!(reply.data, "42,0");
    assert!(reply.sdo_status().is_ok());
}

#[tokio::test]
async fn test_mock_quit_echo() {
    let bus = mock_bus();
    let reply = bus.send(Command::bare(Verb::Quit)).await.expect("reply");
    assert_eq!(reply, Command::bare(Verb::Quit));
}

#[tokio::test]
async fn test_mock_rejects_host_only_verbs() {
    let bus = mock_bus();
    for req in [
        Command::new(Verb::Boot, "1"),
        Command::new(Verb::Info, "1"),
        Command::new(Verb::Sync, "0"),
    ] {
        let err = bus.send(req).await.expect_err("must be rejected");
        assert!(matches!(
            err,
            BusError::Protocol(ProtocolError::UnexpectedCommand(_))
        ));
    }
}

#[tokio::test]
async fn test_mock_rejects_malformed_payload() {
    let bus = mock_bus();

    let err = bus
        .send(Command::new(Verb::Rsdo, "zz,not,hex"))
        .await
        .expect_err("must be rejected");
    assert!(matches!(
        err,
        BusError::Protocol(ProtocolError::MalformedPayload(_))
    ));

    // rsdo needs node, index and subindex; two fields is not enough
    let err = bus
        .send(Command::new(Verb::Rsdo, "41,2404"))
        .await
        .expect_err("must be rejected");
    assert!(matches!(
        err,
        BusError::Protocol(ProtocolError::MalformedPayload(_))
    ));
}

#[tokio::test]
async fn test_full_lifecycle_over_mock() {
    let registry = Registry::new();
    let mut app = App::new("bench");

    let adc = Adc::new("adc", "04x1541", 1);
    let dac = Dac::new("dac", "04x1540");
    let bus = cambus::create_bus("canbus", BusConfig::Mock, adc.clone(), dac, &registry, &mut app)
        .expect("wiring");
    assert_eq!(bus.name(), "canbus");

    let led = Led::new("led", registry.clone(), "canbus");
    app.add_module(led.clone());
    let sensor = Hd2001::new("hpt", registry.clone(), "canbus");
    app.add_module(sensor.clone());

    app.run_with(async {
        assert_eq!(adc.node(), Some(MOCK_ADC_NODE));

        led.blink(Duration::from_millis(1)).await.expect("blink");

        // 0x4000 counts * 0.3125e-3 V/count = 5.12 V, then the linear map
        // per quantity.
        let t = sensor.temperature().await.expect("temperature");
        assert!((t - 462.0).abs() < 1e-9, "temperature was {t}");
        let rh = sensor.humidity().await.expect("humidity");
        assert!((rh - 512.0).abs() < 1e-9, "humidity was {rh}");
        let p = sensor.pressure().await.expect("pressure");
        assert!((p - 3872.0).abs() < 1e-9, "pressure was {p}");
    })
    .await
    .expect("lifecycle");
}

#[tokio::test]
async fn test_driver_before_boot_is_refused() {
    let registry = Registry::new();
    let led = Led::new("led", registry, "canbus");

    // The bus was never resolved; the driver reports that instead of panicking.
    let err = led.on().await.expect_err("must fail");
    assert!(matches!(err, BusError::Unresolved(_)));
}
