use std::{
    fs::File,
    io::{self, Stdout},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use clap::Parser;
use crossterm::{
    cursor,
    event::{
        self, Event, KeyEvent, KeyEventKind, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    style::ResetColor,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use keysmash_core::{
    AccessorySink, AppConfig, ChromaRestEndpoint, Diagnostics, Dispatcher, KeyDebouncer,
    LightingEngine, LightingTimings, OpenRgbClient, StaticKeymap, ToneSink, TracingToneSink,
    VisualEngine,
};
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing_subscriber::EnvFilter;

mod keys;
mod screen;

use screen::{TerminalSurface, CELL_HEIGHT, CELL_WIDTH};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about = "Keyboard-smashing light and particle toy", long_about = None)]
struct Cli {
    /// JSON configuration file; missing or invalid files fall back to defaults.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    /// Where log output goes; the terminal itself is busy drawing.
    #[arg(long, default_value = "keysmash.log")]
    log_file: PathBuf,
    /// Skip the keyboard lighting endpoint.
    #[arg(long)]
    no_lighting: bool,
    /// Skip the RGB accessory server.
    #[arg(long)]
    no_accessory: bool,
    /// Override the animation frame rate.
    #[arg(long)]
    fps: Option<u32>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if self.no_lighting {
            config.lighting.enabled = false;
        }
        if self.no_accessory {
            config.accessory.enabled = false;
        }
        if let Some(fps) = self.fps {
            config.visuals.fps = fps;
        }
    }
}

#[tokio::main]
async fn main() -> keysmash_core::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_file)?;

    let mut config = AppConfig::load_or_default(&cli.config);
    cli.apply(&mut config);
    tracing::info!(?config, "starting keysmash");

    let mut out = io::stdout();
    let enhanced = setup_terminal(&mut out)?;
    let result = run(config, out, enhanced).await;
    cleanup_terminal(&mut io::stdout(), enhanced)?;
    result
}

async fn run(config: AppConfig, out: Stdout, enhanced: bool) -> keysmash_core::Result<()> {
    let (cols, rows) = terminal::size()?;
    let mut surface = TerminalSurface::new(out, cols, rows);
    let visuals = Arc::new(Mutex::new(
        VisualEngine::new(f32::from(cols) * CELL_WIDTH, f32::from(rows) * CELL_HEIGHT)
            .with_max_particles(config.visuals.max_particles),
    ));
    let mut diagnostics = Diagnostics::default();

    let tone = Arc::new(TracingToneSink::new());
    if let Err(err) = tone.set_volume(config.tone.key_tone_volume_db) {
        tracing::warn!(%err, "ignoring configured tone volume");
    }

    let lighting = start_lighting(&config);
    let accessory = start_accessory(&config);

    let mut dispatcher = Dispatcher::new(
        Arc::new(StaticKeymap::new()),
        visuals.clone(),
        tone,
        tokio::runtime::Handle::current(),
    );
    if let Some(lighting) = &lighting {
        dispatcher = dispatcher.with_lighting(lighting.clone());
    }
    if let Some(accessory) = &accessory {
        dispatcher = dispatcher.with_accessory(accessory.clone());
    }

    let mut events = spawn_event_reader();
    let mut debouncer = KeyDebouncer::new();
    let mut quit = keys::QuitChord::new(enhanced);
    let mut frames = interval(config.visuals.frame_interval());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                let mut engine = visuals.lock().unwrap_or_else(PoisonError::into_inner);
                engine.frame(&mut surface, &mut diagnostics);
            }
            event = events.recv() => match event {
                Some(Event::Key(key)) if quit.observe(&key, Instant::now()) => break,
                Some(Event::Key(key)) if quit.matches(&key) => {}
                Some(Event::Key(key)) => on_key(&dispatcher, &mut debouncer, enhanced, key),
                Some(Event::Resize(cols, rows)) => {
                    tracing::debug!(cols, rows, "terminal resized");
                    surface.resize(cols, rows);
                }
                Some(Event::FocusLost) => debouncer.reset(),
                Some(_) => {}
                None => {
                    tracing::warn!("keyboard input closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("shutting down");
    let teardown = async {
        if let Some(lighting) = &lighting {
            lighting.destroy().await;
        }
        if let Some(accessory) = &accessory {
            accessory.destroy().await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, teardown).await.is_err() {
        tracing::warn!("sink teardown timed out");
    }
    Ok(())
}

/// Without release reporting every press arrives as a fresh `Press`, so the
/// debouncer would never re-arm; it only runs when the terminal reports event
/// kinds.
fn on_key(dispatcher: &Dispatcher, debouncer: &mut KeyDebouncer, enhanced: bool, key: KeyEvent) {
    let Some(code) = keys::web_code(key.code) else {
        return;
    };
    match key.kind {
        KeyEventKind::Press if !enhanced || debouncer.on_press(&code) => dispatcher.dispatch(&code),
        KeyEventKind::Release => debouncer.on_release(&code),
        _ => {}
    }
}

fn start_lighting(config: &AppConfig) -> Option<LightingEngine> {
    let settings = &config.lighting;
    if !settings.enabled {
        return None;
    }
    let endpoint = match ChromaRestEndpoint::new(
        settings.endpoint_url.as_str(),
        Duration::from_millis(settings.request_timeout_ms),
    ) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            tracing::warn!(%err, "lighting endpoint unusable");
            return None;
        }
    };

    let engine = LightingEngine::new(Arc::new(endpoint), LightingTimings::from(settings));
    let init = engine.clone();
    tokio::spawn(async move { init.init().await });
    Some(engine)
}

fn start_accessory(config: &AppConfig) -> Option<Arc<AccessorySink>> {
    let settings = &config.accessory;
    if !settings.enabled {
        return None;
    }
    let client = OpenRgbClient::new(&settings.host, settings.port, settings.client_name.as_str());
    let sink = Arc::new(
        AccessorySink::new(Arc::new(client))
            .with_call_timeout(Duration::from_millis(settings.call_timeout_ms)),
    );
    let init = sink.clone();
    tokio::spawn(async move { init.init().await });
    Some(sink)
}

/// Blocking terminal reads live on their own thread and are forwarded into
/// the async loop.
fn spawn_event_reader() -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        if tx.is_closed() {
            break;
        }
        match event::poll(Duration::from_millis(100)) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) => {
                tracing::error!(%err, "terminal input failed");
                break;
            }
        }
        match event::read() {
            Ok(event) => {
                if tx.send(event).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::error!(%err, "terminal input failed");
                break;
            }
        }
    });
    rx
}

fn setup_terminal(out: &mut Stdout) -> io::Result<bool> {
    execute!(out, EnterAlternateScreen, cursor::Hide)?;
    terminal::enable_raw_mode()?;

    let enhanced = terminal::supports_keyboard_enhancement().unwrap_or(false);
    if enhanced {
        execute!(
            out,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                    | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
            )
        )?;
    }
    tracing::info!(enhanced, "terminal ready");
    Ok(enhanced)
}

fn cleanup_terminal(out: &mut Stdout, enhanced: bool) -> io::Result<()> {
    if enhanced {
        execute!(out, PopKeyboardEnhancementFlags)?;
    }
    terminal::disable_raw_mode()?;
    execute!(out, ResetColor, cursor::Show, LeaveAlternateScreen)?;
    Ok(())
}

fn init_tracing(log_file: &Path) -> io::Result<()> {
    let file = File::create(log_file)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
    Ok(())
}
