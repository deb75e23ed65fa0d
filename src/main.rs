//! fieldscan - field-operations scan-and-submit console.
//!
//! Thin binary entry point. All logic lives in the `fieldscan-core`
//! and `fieldscan-console` crates.
//!
//! Usage: `fieldscan [config.toml]`. Stdin carries both commands and, on
//! the scan view, whatever a keyboard-wedge scanner types.
use anyhow::Context;
use crossbeam_channel::Sender;
use fieldscan_console::{ActionError, Controller, Phase, WedgeEngine};
use fieldscan_core::backend::Backend;
use fieldscan_core::config::AppConfig;
use fieldscan_core::form::Check;
use fieldscan_core::remote::{RemoteCall, ReqwestTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "fieldscan.toml";

/// How often session events are drained.
const TICK: Duration = Duration::from_millis(50);

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never interleave with scanner input echo.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate()?;

    tracing::info!("fieldscan starting");

    let backend = if config.remote.endpoint.is_some() {
        let transport = Arc::new(ReqwestTransport::new()?);
        Some(Backend::new(RemoteCall::from_config(
            transport,
            &config.remote,
        )?))
    } else {
        tracing::warn!("remote.endpoint is not set; lookups and submissions are disabled");
        None
    };

    let latency = spawn_pinger(backend.clone(), config.remote.ping_interval());
    let lines = spawn_stdin_reader()?;

    let (scanner_tx, scanner_rx) = crossbeam_channel::unbounded();
    let wedge = Arc::new(WedgeEngine::new(scanner_rx));
    let mut controller = Controller::new(wedge.ports(), config.scanner.clone(), backend);

    print_help();
    render(&controller);
    run_repl(&mut controller, lines, &scanner_tx, &latency).await;

    controller.go_home().await;
    tracing::info!("fieldscan exiting");
    Ok(())
}

async fn run_repl(
    controller: &mut Controller,
    mut lines: mpsc::UnboundedReceiver<String>,
    scanner: &Sender<String>,
    latency: &watch::Receiver<Option<Duration>>,
) {
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                if let Flow::Quit = handle_line(controller, scanner, latency, line.trim()).await {
                    break;
                }
            }
            _ = ticker.tick() => {
                let before = controller.phase.clone();
                controller.tick().await;
                for notice in controller.take_notices() {
                    println!("! {notice}");
                }
                if controller.phase != before {
                    render(controller);
                }
            }
        }
    }
}

async fn handle_line(
    controller: &mut Controller,
    scanner: &Sender<String>,
    latency: &watch::Receiver<Option<Duration>>,
    line: &str,
) -> Flow {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Flow::Continue;
    };
    let args: Vec<&str> = words.collect();

    let result: Result<(), ActionError> = match command {
        "quit" | "exit" => return Flow::Quit,
        "help" => {
            print_help();
            return Flow::Continue;
        }
        "status" => {
            print_status(controller, *latency.borrow());
            return Flow::Continue;
        }
        "home" => {
            controller.go_home().await;
            Ok(())
        }
        "scan" => {
            controller.enter_scan().await;
            Ok(())
        }
        "code" => {
            controller.enter_code().await;
            Ok(())
        }
        "toggle" => controller
            .toggle_scan()
            .await
            .map(|t| println!("scanner: {t:?}")),
        "switch" => controller
            .switch_camera()
            .await
            .map(|t| println!("switch: {t:?}")),
        "lookup" => match <[&str; 4]>::try_from(args.as_slice()) {
            Ok(boxes) => controller.submit_code(boxes).await,
            Err(_) => {
                println!("usage: lookup <a> <b> <c> <d>");
                return Flow::Continue;
            }
        },
        "link" => match args.first() {
            Some(link) => controller.open_link(link).await,
            None => {
                println!("usage: link <url>");
                return Flow::Continue;
            }
        },
        "check" => match (args.first().and_then(|id| Check::from_id(id)), args.get(1).copied()) {
            (Some(check), Some("y" | "yes")) => controller.answer(check, true),
            (Some(check), Some("n" | "no")) => controller.answer(check, false),
            _ => {
                println!("usage: check <foto|nama|nopol|nolambung|kendaraan> <y|n>");
                return Flow::Continue;
            }
        },
        "qty" => controller
            .set_quantity(args.first().copied().unwrap_or_default())
            .map(|q| println!("quantity: {q}")),
        "submit" => controller.submit().await,
        "resend" => controller.resend().await,
        "ping" => controller
            .ping()
            .await
            .map(|d| println!("latency: {} ms", d.as_millis())),
        _ if controller.phase == Phase::Scan => {
            // Anything else typed on the scan view is scanner input.
            if scanner.send(line.to_owned()).is_err() {
                tracing::warn!("Scanner input channel closed");
            }
            return Flow::Continue;
        }
        other => {
            println!("unknown command `{other}` (try `help`)");
            return Flow::Continue;
        }
    };

    match result {
        Ok(()) => render(controller),
        Err(e) => println!("error: {e}"),
    }
    Flow::Continue
}

/// Ping the backend in the background and publish the latest latency.
fn spawn_pinger(backend: Option<Backend>, period: Duration) -> watch::Receiver<Option<Duration>> {
    let (tx, rx) = watch::channel(None);
    if let Some(backend) = backend {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let latency = backend.ping().await.ok();
                if tx.send(latency).is_err() {
                    break;
                }
            }
        });
    }
    rx
}

/// Read stdin on a dedicated thread; blocking reads never touch the runtime.
fn spawn_stdin_reader() -> anyhow::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("fieldscan-stdin".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

// ─── Output ─────────────────────────────────────────────────────────────────

fn render(controller: &Controller) {
    match &controller.phase {
        Phase::Home => println!("[home] `scan` to scan a code, `code` to type one"),
        Phase::Scan => println!(
            "[scan] scanner {:?}, permission {}, {} camera(s). Scan a code now.",
            controller.lifecycle,
            controller.permission.label(),
            controller.camera_count
        ),
        Phase::Code => println!("[code] `lookup <a> <b> <c> <d>`, e.g. `lookup DT 0 4 2`"),
        Phase::Review => {
            let v = &controller.vehicle;
            println!("[review] {} / {} / {} / {}", v.driver_name, v.plate, v.fleet_number, v.vehicle);
            for check in Check::ALL {
                let answer = match controller.checklist.answer(check) {
                    Some(true) => "yes",
                    Some(false) => "no",
                    None => "?",
                };
                println!("  {:<10} {answer}", check.id());
            }
            println!("  quantity   {}", controller.quantity);
        }
        Phase::Done { ok: true, message } => println!("[saved] {message}"),
        Phase::Done { ok: false, message } => {
            println!("[failed] {message}");
            println!("  `resend` to try again");
            if controller.report_available {
                println!("  a report can be filed for this record");
            }
        }
    }
}

fn print_status(controller: &Controller, latency: Option<Duration>) {
    println!("view:       {}", controller.phase.label());
    println!("scanner:    {:?}", controller.lifecycle);
    println!("permission: {}", controller.permission.label());
    match latency {
        Some(d) => println!("backend:    {} ms", d.as_millis()),
        None => println!("backend:    unreachable"),
    }
}

fn print_help() {
    println!("commands:");
    println!("  scan | code | home         switch view");
    println!("  toggle | switch            start/stop the scanner, next camera");
    println!("  lookup <a> <b> <c> <d>     look up a typed code");
    println!("  link <url>                 open a record link");
    println!("  check <id> <y|n>           answer a check");
    println!("  qty <n>                    set the quantity");
    println!("  submit | resend            send the row");
    println!("  ping | status | help | quit");
}
