//! Bridge Board Smoke Test
//!
//! Opens the bridge, taps a key, nudges the mouse and prints what the device
//! confirmed. Useful for checking wiring and baud rate before anything else.
//!
//! Usage:
//!   cargo run --example type_check -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: first detected port)
//!   --baud RATE       Baud rate (default: 500000)
//!   --config FILE     Load session settings from a JSON file
//!   --key CODE        HID usage code to tap, decimal or 0x-hex (default: 0x04 'a')
//!   --list            List serial ports and exit

use anyhow::{anyhow, Context, Result};
use kmlink_core::prelude::*;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn parse_code(text: &str) -> Option<u8> {
    match text.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kmlink_core=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name: Option<String> = None;
    let mut baud_rate: Option<u32> = None;
    let mut config_path: Option<String> = None;
    let mut key_code = 0x04u8;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = Some(args[i].clone());
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    baud_rate = args[i].parse().ok();
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(args[i].clone());
                }
            }
            "--key" | "-k" => {
                i += 1;
                if i < args.len() {
                    key_code = parse_code(&args[i]).unwrap_or(0x04);
                }
            }
            "--list" | "-l" => {
                for port in list_ports() {
                    println!("{:<20} {}", port.name, port.product.unwrap_or_default());
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                port_name = Some(other.to_string());
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => SessionConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => SessionConfig::default(),
    };
    if let Some(name) = port_name {
        config.port_name = name;
    }
    if let Some(rate) = baud_rate {
        config.baud_rate = rate;
    }
    if config.port_name.is_empty() {
        config.port_name = list_ports()
            .into_iter()
            .next()
            .map(|p| p.name)
            .ok_or_else(|| anyhow!("no serial ports found, pass --port"))?;
    }

    println!("=== kmlink smoke test ===");
    println!("Port: {} @ {} baud", config.port_name, config.baud_rate);

    let mut session = Session::open(config)?;
    session.set_report_hook(Some(Box::new(|report: &SendReport| {
        println!(
            "  [report] {} attempts={} confirmed={}",
            report.description, report.attempts, report.confirmed
        );
    })))?;

    let key = KeyCode::new(key_code)?;

    let start = Instant::now();
    match session.key_press(key).and_then(|_| session.key_release(key)) {
        Ok(()) => println!("Key tap {} confirmed in {:?}", key, start.elapsed()),
        Err(e) => println!("Key tap {} failed: {}", key, e),
    }

    let start = Instant::now();
    let moves = [(20, 0), (0, 20), (-20, 0), (0, -20)]
        .into_iter()
        .map(|(dx, dy)| session.mouse_move_relative_async(dx, dy))
        .collect::<Result<Vec<_>, _>>()?;
    let mut confirmed = 0;
    for future in moves {
        if future.wait().is_ok() {
            confirmed += 1;
        }
    }
    println!("Mouse square: {}/4 moves confirmed in {:?}", confirmed, start.elapsed());

    let stats = session.stats();
    println!(
        "Stats: {} confirmed, {} failed, {} retries, {} bytes sent",
        stats.confirmed, stats.failed, stats.retries, stats.tx_bytes
    );

    session.close()?;
    Ok(())
}

fn print_help() {
    println!("kmlink bridge smoke test");
    println!();
    println!("Usage: type_check [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Serial port (default: first detected port)");
    println!("  --baud, -b RATE     Baud rate (default: 500000)");
    println!("  --config, -c FILE   Load session settings from a JSON file");
    println!("  --key, -k CODE      HID usage code to tap (default: 0x04)");
    println!("  --list, -l          List serial ports and exit");
    println!("  --help, -h          Show this help");
}
