use std::time::Duration;

use clap::{App as Cli, Arg};
use colored::*;

use cambus::protocol::DEFAULT_PORT;
use cambus::{Adc, App, BusConfig, BusDevice, Dac, Hd2001, Led, PeerConfig, Registry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Cli::new("cambus")
        .version("0.1.0")
        .author("Camera Control Engineering Team")
        .about("Camera-control hardware command bus bench runner")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port the c-wrapper dials back to")
                .takes_value(true)
                .default_value("50000"),
        )
        .arg(
            Arg::with_name("mock")
                .long("mock")
                .help("Use the in-memory mock bus (no hardware, no socket)"),
        )
        .arg(
            Arg::with_name("ssh-host")
                .long("ssh-host")
                .value_name("HOST")
                .help("ssh destination of the embedded controller")
                .takes_value(true)
                .default_value("root@pc104"),
        )
        .arg(
            Arg::with_name("callback-host")
                .long("callback-host")
                .value_name("ADDR")
                .help("Address the c-wrapper dials back to")
                .takes_value(true)
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let port: u16 = matches
        .value_of("port")
        .unwrap_or("50000")
        .parse()
        .unwrap_or(DEFAULT_PORT);
    let ssh_host = matches.value_of("ssh-host").unwrap_or("root@pc104");
    let callback_host = matches.value_of("callback-host").unwrap_or("127.0.0.1");

    println!("{}", "Camera-Control Command Bus Bench".bold());
    println!("================================");

    let registry = Registry::new();
    let mut app = App::new("bench");

    let adc = Adc::new("adc", "04x1541", 1);
    let dac = Dac::new("dac", "04x1540");

    let config = if matches.is_present("mock") {
        println!("{}", "running against the mock bus".yellow());
        BusConfig::Mock
    } else {
        BusConfig::Tcp {
            peer: PeerConfig::new(ssh_host, callback_host, port),
        }
    };
    let _bus = cambus::create_bus("canbus", config, adc.clone(), dac.clone(), &registry, &mut app)?;

    let led = Led::new("led", registry.clone(), "canbus");
    app.add_module(led.clone());

    let sensor = Hd2001::new("hpt", registry.clone(), "canbus");
    app.add_module(sensor.clone());

    app.run_with(async {
        println!("{} adc node: {:?}", "✓".green(), adc.node());
        println!("{} dac node: {:?}", "✓".green(), dac.node());

        if let Err(err) = led.blink(Duration::from_millis(500)).await {
            eprintln!("{} led blink failed: {err}", "✗".red());
        }

        match sensor.temperature().await {
            Ok(t) => println!("{} temperature: {t:.2} degC", "✓".green()),
            Err(err) => eprintln!("{} temperature read failed: {err}", "✗".red()),
        }
        match sensor.humidity().await {
            Ok(rh) => println!("{} humidity: {rh:.2} %RH", "✓".green()),
            Err(err) => eprintln!("{} humidity read failed: {err}", "✗".red()),
        }
        match sensor.pressure().await {
            Ok(p) => println!("{} pressure: {p:.2} hPa", "✓".green()),
            Err(err) => eprintln!("{} pressure read failed: {err}", "✗".red()),
        }
    })
    .await?;

    println!("{}", "bench run complete".green());
    Ok(())
}
