//! Shared buffer demo
//!
//! Runs a damped pendulum on a manager thread and attaches a few consumer
//! threads to it: a monitor that pulls the latest values, a controller that
//! pushes a new damping coefficient and a recorder that requests buffer
//! samples. The main thread steers the manager over a command channel.
//!
//! Usage: `simbuf-demo [config.toml]`

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use simbuf_rs::{
    BufferConfig, BufferSampleRequest, CropBufferRequest, LinkedBuffer, LinkedBufferFactory,
    Registry, SharedBuffer, Value, VariableKind,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TICK: Duration = Duration::from_millis(1);
const DT: f64 = 0.001;

/// Commands from the main thread to the manager
#[derive(Debug)]
enum ManagerCommand {
    Resize(usize),
    Crop(CropBufferRequest),
    Shutdown,
}

/// Reports from the consumers to the main thread
#[derive(Debug)]
enum ConsumerMessage {
    Observed { tick: i64, angle: f64 },
    DampingChanged(f64),
    Sample { length: usize, mean: f64 },
}

fn init_logging(config: &BufferConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,simbuf_rs=debug"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "simbuf.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn build_simulation() -> anyhow::Result<Arc<Registry>> {
    let root = Registry::new("sim");
    let pendulum = Registry::new("pendulum");
    root.add_child(pendulum.clone())?;

    root.add_variable("tick", VariableKind::Long)?;
    root.add_variable("running", VariableKind::Boolean)?;
    pendulum.add_variable("angle", VariableKind::Double)?;
    pendulum.add_variable("velocity", VariableKind::Double)?;
    pendulum.add_variable("damping", VariableKind::Double)?;
    pendulum.add_enum_variable("mode", &["Free", "Driven"], false)?;
    Ok(root)
}

fn run_manager(
    mut buffer: SharedBuffer,
    commands: Receiver<ManagerCommand>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let root = buffer.root_registry().clone();
    let var = |path: &str| {
        root.find_variable(path)
            .with_context(|| format!("missing variable {}", path))
    };
    let tick = var("tick")?;
    let active = var("running")?;
    let angle = var("pendulum.angle")?;
    let velocity = var("pendulum.velocity")?;
    let damping = var("pendulum.damping")?;

    angle.set_f64(0.8);
    damping.set_f64(0.05);
    active.set_bool(true);
    buffer.write_buffer();

    let mut t: i64 = 0;
    while running.load(Ordering::Acquire) {
        loop {
            match commands.try_recv() {
                Ok(ManagerCommand::Resize(size)) => {
                    if buffer.resize_buffer(size) {
                        tracing::info!("Resized buffer: {}", buffer.properties());
                    }
                }
                Ok(ManagerCommand::Crop(request)) => {
                    if buffer.crop_buffer(request) {
                        tracing::info!("Cropped buffer: {}", buffer.properties());
                    }
                }
                Ok(ManagerCommand::Shutdown) => running.store(false, Ordering::Release),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    running.store(false, Ordering::Release);
                    break;
                }
            }
        }

        buffer.process_linked_push_requests(true);

        let (theta, omega) = (angle.as_f64(), velocity.as_f64());
        let accel = -9.81 * theta.sin() - damping.as_f64() * omega;
        velocity.set_f64(omega + accel * DT);
        angle.set_f64(theta + velocity.as_f64() * DT);
        t += 1;
        tick.set_i64(t);

        buffer.increment_buffer_index(true);
        buffer.write_buffer();
        buffer.prepare_linked_buffers_for_pull();
        thread::sleep(TICK);
    }

    active.set_bool(false);
    tracing::info!(
        "Manager stopped after {} ticks, {} bytes per frame",
        t,
        buffer.single_buffer_frame_memory_size()
    );
    buffer.dispose();
    Ok(())
}

fn run_monitor(
    factory: LinkedBufferFactory,
    messages: Sender<ConsumerMessage>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let root = Registry::new("sim");
    let linked = factory.new_linked_registry(root.clone())?;
    let tick = root.find_variable("tick").context("tick not mirrored")?;
    let angle = root.find_variable("pendulum.angle").context("angle not mirrored")?;

    while running.load(Ordering::Acquire) {
        if linked.pull() {
            let observed = ConsumerMessage::Observed {
                tick: match tick.value() {
                    Value::Long(v) => v,
                    _ => 0,
                },
                angle: angle.as_f64(),
            };
            if messages.send(observed).is_err() {
                break;
            }
        }
        thread::sleep(TICK * 50);
    }
    linked.dispose();
    Ok(())
}

fn run_controller(
    factory: LinkedBufferFactory,
    messages: Sender<ConsumerMessage>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let root = Registry::new("sim");
    let pendulum = Registry::new("pendulum");
    root.add_child(pendulum.clone())?;
    let damping = pendulum.add_variable("damping", VariableKind::Double)?;
    let linked = factory.new_linked_variable(&damping)?;

    thread::sleep(Duration::from_millis(200));
    damping.set_f64(0.6);
    linked.push();
    messages.send(ConsumerMessage::DampingChanged(0.6))?;

    // The manager drops pushes of links that are gone, so hold on to it.
    while running.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

fn run_recorder(
    factory: LinkedBufferFactory,
    messages: Sender<ConsumerMessage>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let root = Registry::new("sim");
    let linked = factory.new_linked_registry(root)?;
    let angle = linked
        .linked_variable("sim.pendulum.angle")
        .context("angle not linked")?;

    while running.load(Ordering::Acquire) {
        angle.request_buffer_sample(BufferSampleRequest::ActiveOnly);
        thread::sleep(Duration::from_millis(100));
        if let Some(sample) = angle.poll_requested_buffer_sample() {
            let values = sample.data().to_f64_vec();
            let mean = if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            let report = ConsumerMessage::Sample {
                length: sample.sample_length(),
                mean,
            };
            if messages.send(report).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn spawn_named<F>(name: &str, f: F) -> anyhow::Result<thread::JoinHandle<()>>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            if let Err(e) = f() {
                tracing::error!("{} failed: {:#}", thread_name, e);
            }
        })
        .with_context(|| format!("failed to spawn {}", name))
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => BufferConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => BufferConfig::load_or_default(),
    };
    let _log_guard = init_logging(&config);

    tracing::info!("Starting shared buffer demo with {:?}", config);

    let root = build_simulation()?;
    let buffer = SharedBuffer::with_config(root, &config)?;
    let factory = buffer.factory();

    let running = Arc::new(AtomicBool::new(true));
    let (cmd_tx, cmd_rx) = bounded(16);
    let (msg_tx, msg_rx) = bounded(1_000);

    let mut handles = vec![spawn_named("manager", {
        let running = running.clone();
        move || run_manager(buffer, cmd_rx, running)
    })?];
    handles.push(spawn_named("monitor", {
        let (factory, msg_tx, running) = (factory.clone(), msg_tx.clone(), running.clone());
        move || run_monitor(factory, msg_tx, running)
    })?);
    handles.push(spawn_named("controller", {
        let (factory, msg_tx, running) = (factory.clone(), msg_tx.clone(), running.clone());
        move || run_controller(factory, msg_tx, running)
    })?);
    handles.push(spawn_named("recorder", {
        let running = running.clone();
        move || run_recorder(factory, msg_tx, running)
    })?);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut resized = false;
    while std::time::Instant::now() < deadline {
        match msg_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(ConsumerMessage::Observed { tick, angle }) => {
                tracing::debug!("tick {:>6}: angle {:+.4}", tick, angle)
            }
            Ok(ConsumerMessage::DampingChanged(value)) => {
                tracing::info!("Controller set damping to {}", value)
            }
            Ok(ConsumerMessage::Sample { length, mean }) => {
                tracing::info!("Recorded {} frames, mean angle {:+.4}", length, mean);
                if !resized && length > 512 {
                    cmd_tx.send(ManagerCommand::Crop(CropBufferRequest::new(0, 511)))?;
                    cmd_tx.send(ManagerCommand::Resize(config.initial_size))?;
                    resized = true;
                }
            }
            Err(_) => {}
        }
    }

    tracing::info!("Shutting down...");
    let _ = cmd_tx.send(ManagerCommand::Shutdown);
    running.store(false, Ordering::Release);
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}
