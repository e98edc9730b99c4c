//! Lighting grid engine.
//!
//! Owns the persistent key colour grid, the active ripples and the session
//! with the lighting endpoint. Three timers drive it once a session exists:
//! a heartbeat, a throttled flush, and one shared ripple scheduler that steps
//! every live ripple per tick. All grid access goes through one mutex that is
//! never held across an `.await`.

mod grid;

pub use grid::{
    square_ring, GridCell, GridFrame, LightingGrid, Ripple, RippleStep, AMBIENT_DECAY, COLS, ROWS,
};

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    config::LightingConfig,
    session::{AppMetadata, LightingEndpoint, LightingSession},
    ColorRgb, KeysmashError, Result,
};

/// Timer periods and ripple shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingTimings {
    pub heartbeat: Duration,
    pub flush: Duration,
    pub ripple_interval: Duration,
    pub ripple_steps: u32,
    pub ripple_decay: f64,
}

impl Default for LightingTimings {
    fn default() -> Self {
        Self::from(&LightingConfig::default())
    }
}

impl From<&LightingConfig> for LightingTimings {
    fn from(config: &LightingConfig) -> Self {
        Self {
            heartbeat: Duration::from_millis(config.heartbeat_ms.max(1)),
            flush: Duration::from_millis(config.flush_ms.max(1)),
            ripple_interval: Duration::from_millis(config.ripple_interval_ms.max(1)),
            ripple_steps: config.ripple_steps,
            ripple_decay: config.ripple_decay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Registering,
    Active(LightingSession),
    /// Handshake failed; the engine stays a no-op for good.
    Inert,
    Destroyed,
}

/// Grid, ripples and session; everything the timers share.
#[derive(Debug)]
struct LightingState {
    grid: LightingGrid,
    ripples: Vec<Ripple>,
    dirty: bool,
    phase: Phase,
}

impl LightingState {
    fn new() -> Self {
        Self {
            grid: LightingGrid::new(),
            ripples: Vec::new(),
            dirty: false,
            phase: Phase::Idle,
        }
    }

    fn session(&self) -> Option<&LightingSession> {
        match &self.phase {
            Phase::Active(session) => Some(session),
            _ => None,
        }
    }

    fn session_mut(&mut self) -> Option<&mut LightingSession> {
        match &mut self.phase {
            Phase::Active(session) => Some(session),
            _ => None,
        }
    }

    fn session_uri(&self) -> Option<String> {
        self.session().map(|session| session.uri().to_string())
    }

    fn press(&mut self, cell: GridCell, color: ColorRgb, timings: &LightingTimings) -> bool {
        if self.session().is_none() {
            return false;
        }
        self.grid.set(cell, color);
        self.dirty = true;
        self.ripples.push(Ripple::new(
            cell,
            color,
            timings.ripple_steps,
            timings.ripple_decay,
        ));
        true
    }

    fn tick_ripples(&mut self) {
        let grid = &mut self.grid;
        let mut painted = false;
        self.ripples.retain_mut(|ripple| match ripple.advance(grid) {
            RippleStep::Painted { .. } => {
                painted = true;
                !ripple.is_finished()
            }
            RippleStep::Finished => false,
        });
        self.dirty |= painted;
    }

    /// Snapshot to send this cycle, if any. Applies ambient decay to the grid
    /// and re-arms the dirty flag while anything is still lit.
    fn take_flush(&mut self) -> Option<(String, GridFrame)> {
        if !self.dirty {
            return None;
        }
        let uri = self.session_uri()?;
        let frame = self.grid.to_frame();
        self.dirty = self.grid.decay(AMBIENT_DECAY);
        Some((uri, frame))
    }
}

struct Shared {
    state: Mutex<LightingState>,
    endpoint: Arc<dyn LightingEndpoint>,
    app: AppMetadata,
    timings: LightingTimings,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn lock_state(&self) -> Result<MutexGuard<'_, LightingState>> {
        self.state
            .lock()
            .map_err(|_| KeysmashError::Poisoned("lighting grid"))
    }

    fn lock_tasks(&self) -> Result<MutexGuard<'_, Vec<JoinHandle<()>>>> {
        self.tasks
            .lock()
            .map_err(|_| KeysmashError::Poisoned("lighting timers"))
    }
}

/// Handle to the lighting engine. Clones share the same grid and session.
#[derive(Clone)]
pub struct LightingEngine {
    shared: Arc<Shared>,
}

impl LightingEngine {
    pub fn new(endpoint: Arc<dyn LightingEndpoint>, timings: LightingTimings) -> Self {
        Self::with_app(endpoint, timings, AppMetadata::default())
    }

    pub fn with_app(
        endpoint: Arc<dyn LightingEndpoint>,
        timings: LightingTimings,
        app: AppMetadata,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LightingState::new()),
                endpoint,
                app,
                timings,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Performs the handshake and starts the timers. Only the first call does
    /// anything; a failed handshake is never retried. Returns whether a session
    /// is active afterwards.
    pub async fn init(&self) -> bool {
        match self.shared.lock_state() {
            Ok(mut state) if state.phase == Phase::Idle => state.phase = Phase::Registering,
            Ok(state) => return matches!(state.phase, Phase::Active(_)),
            Err(err) => {
                tracing::warn!(%err, "lighting init skipped");
                return false;
            }
        }

        let registered = self.shared.endpoint.register(&self.shared.app).await;

        let uri = match registered {
            Ok(uri) => uri,
            Err(err) => {
                tracing::warn!(%err, "lighting endpoint not available; lighting disabled");
                if let Ok(mut state) = self.shared.lock_state() {
                    if state.phase == Phase::Registering {
                        state.phase = Phase::Inert;
                    }
                }
                return false;
            }
        };

        let destroyed_meanwhile = match self.shared.lock_state() {
            Ok(mut state) if state.phase == Phase::Registering => {
                state.phase = Phase::Active(LightingSession::new(uri.clone()));
                false
            }
            _ => true,
        };
        if destroyed_meanwhile {
            if let Err(err) = self.shared.endpoint.teardown(&uri).await {
                tracing::debug!(%err, "late session teardown failed");
            }
            return false;
        }

        tracing::info!(session = %uri, "lighting session established");
        self.start_timers();
        true
    }

    fn start_timers(&self) {
        let timings = self.shared.timings;
        let weak = Arc::downgrade(&self.shared);

        let handles = vec![
            spawn_periodic(weak.clone(), timings.heartbeat, heartbeat_tick),
            spawn_periodic(weak.clone(), timings.flush, flush_tick),
            spawn_periodic(weak, timings.ripple_interval, ripple_tick),
        ];

        match self.shared.lock_tasks() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(err) => {
                tracing::error!(%err, "could not track lighting timers");
                handles.iter().for_each(JoinHandle::abort);
            }
        }
    }

    /// Lights `cell` and starts a ripple from it. No-op without a session or
    /// without a cell.
    pub fn on_key_press(&self, cell: Option<GridCell>, color: ColorRgb) {
        let Some(cell) = cell else {
            return;
        };
        match self.shared.lock_state() {
            Ok(mut state) => {
                state.press(cell, color, &self.shared.timings);
            }
            Err(err) => tracing::warn!(%err, "dropping lighting key press"),
        }
    }

    /// Stops every timer, clears ripples and tears the session down on a
    /// best-effort basis. Safe to call more than once.
    pub async fn destroy(&self) {
        if let Ok(mut tasks) = self.shared.lock_tasks() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        let session = match self.shared.lock_state() {
            Ok(mut state) => {
                state.ripples.clear();
                state.dirty = false;
                match std::mem::replace(&mut state.phase, Phase::Destroyed) {
                    Phase::Active(session) => Some(session),
                    _ => None,
                }
            }
            Err(_) => None,
        };

        if let Some(session) = session {
            match self.shared.endpoint.teardown(session.uri()).await {
                Ok(()) => tracing::info!("lighting session closed"),
                Err(err) => tracing::debug!(%err, "lighting teardown failed"),
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared
            .lock_state()
            .map(|state| matches!(state.phase, Phase::Active(_)))
            .unwrap_or(false)
    }

    /// Copy of the current grid.
    pub fn grid(&self) -> LightingGrid {
        self.shared
            .lock_state()
            .map(|state| state.grid.clone())
            .unwrap_or_default()
    }

    pub fn ripple_count(&self) -> usize {
        self.shared
            .lock_state()
            .map(|state| state.ripples.len())
            .unwrap_or(0)
    }

    pub fn last_heartbeat_at(&self) -> Option<Instant> {
        let state = self.shared.lock_state().ok()?;
        state.session()?.last_heartbeat_at()
    }
}

impl std::fmt::Debug for LightingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightingEngine")
            .field("active", &self.is_active())
            .field("ripples", &self.ripple_count())
            .finish()
    }
}

/// Runs `tick` every `period`, starting one period from now, until the engine
/// is dropped or the tick reports it is done.
fn spawn_periodic<F, Fut>(shared: Weak<Shared>, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(Arc<Shared>) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if !tick(shared).await {
                break;
            }
        }
    })
}

async fn heartbeat_tick(shared: Arc<Shared>) -> bool {
    let uri = match shared.lock_state() {
        Ok(state) => state.session_uri(),
        Err(_) => None,
    };
    let Some(uri) = uri else {
        return false;
    };

    match shared.endpoint.heartbeat(&uri).await {
        Ok(()) => {
            if let Ok(mut state) = shared.lock_state() {
                if let Some(session) = state.session_mut() {
                    session.record_heartbeat(Instant::now());
                }
            }
        }
        Err(err) => tracing::debug!(%err, "heartbeat failed"),
    }
    true
}

async fn flush_tick(shared: Arc<Shared>) -> bool {
    let pending = match shared.lock_state() {
        Ok(mut state) => {
            if state.phase == Phase::Destroyed {
                return false;
            }
            state.take_flush()
        }
        Err(_) => return false,
    };

    // Pushes run detached: neither the cadence nor the fade waits on the
    // endpoint. Failures only reach the log.
    if let Some((uri, frame)) = pending {
        let endpoint = Arc::clone(&shared.endpoint);
        tokio::spawn(async move {
            if let Err(err) = endpoint.push_grid(&uri, &frame).await {
                tracing::debug!(%err, "grid flush failed");
            }
        });
    }
    true
}

async fn ripple_tick(shared: Arc<Shared>) -> bool {
    match shared.lock_state() {
        Ok(mut state) => {
            if state.phase == Phase::Destroyed {
                return false;
            }
            state.tick_ripples();
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::BoxFuture;

    #[derive(Default)]
    struct FakeEndpoint {
        refuse_registration: bool,
        fail_heartbeats: bool,
        push_delay: Option<Duration>,
        fail_pushes: AtomicBool,
        registrations: AtomicUsize,
        heartbeats: AtomicUsize,
        teardowns: AtomicUsize,
        pushes: Mutex<Vec<GridFrame>>,
    }

    impl FakeEndpoint {
        fn refusing() -> Self {
            Self {
                refuse_registration: true,
                ..Default::default()
            }
        }

        fn push_count(&self) -> usize {
            self.pushes.lock().unwrap().len()
        }
    }

    impl LightingEndpoint for FakeEndpoint {
        fn register<'a>(&'a self, _app: &'a AppMetadata) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                self.registrations.fetch_add(1, Ordering::SeqCst);
                if self.refuse_registration {
                    Err(KeysmashError::msg("connection refused"))
                } else {
                    Ok("http://localhost:54236/chromasdk".to_string())
                }
            })
        }

        fn heartbeat<'a>(&'a self, _uri: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.heartbeats.fetch_add(1, Ordering::SeqCst);
                if self.fail_heartbeats {
                    Err(KeysmashError::msg("heartbeat rejected"))
                } else {
                    Ok(())
                }
            })
        }

        fn push_grid<'a>(&'a self, _uri: &'a str, grid: &'a GridFrame) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.pushes.lock().unwrap().push(grid.clone());
                if let Some(delay) = self.push_delay {
                    time::sleep(delay).await;
                }
                if self.fail_pushes.load(Ordering::SeqCst) {
                    Err(KeysmashError::msg("endpoint went away"))
                } else {
                    Ok(())
                }
            })
        }

        fn teardown<'a>(&'a self, _uri: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.teardowns.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn cell(row: usize, col: usize) -> Option<GridCell> {
        GridCell::new(row, col)
    }

    const RED: ColorRgb = ColorRgb::new(255, 50, 50);

    #[tokio::test(start_paused = true)]
    async fn failed_handshake_leaves_engine_inert() {
        let endpoint = Arc::new(FakeEndpoint::refusing());
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());

        assert!(!engine.init().await);
        assert!(!engine.init().await);
        engine.on_key_press(cell(3, 2), RED);
        time::sleep(Duration::from_secs(20)).await;

        assert_eq!(endpoint.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.heartbeats.load(Ordering::SeqCst), 0);
        assert_eq!(endpoint.push_count(), 0);
        assert!(engine.grid().is_dark());
        assert_eq!(engine.ripple_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn key_press_lights_cell_and_flushes_packed_grid() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);

        engine.on_key_press(cell(3, 2), RED);
        assert_eq!(engine.grid().get(GridCell::new(3, 2).unwrap()), RED);
        assert_eq!(engine.ripple_count(), 1);

        time::sleep(Duration::from_millis(40)).await;
        let first = endpoint.pushes.lock().unwrap()[0].clone();
        assert_eq!(first.0[3][2], 0x32_32_FF);

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.ripple_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn presses_without_a_cell_are_ignored() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);

        engine.on_key_press(None, RED);
        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.ripple_count(), 0);
        assert_eq!(endpoint.push_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn grid_fades_out_and_flushing_stops() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);

        engine.on_key_press(cell(0, 0), ColorRgb::WHITE);
        time::sleep(Duration::from_secs(5)).await;
        assert!(engine.grid().is_dark());

        let settled = endpoint.push_count();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(endpoint.push_count(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pushes_do_not_stop_the_flush_timer() {
        let endpoint = Arc::new(FakeEndpoint::default());
        endpoint.fail_pushes.store(true, Ordering::SeqCst);
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);

        engine.on_key_press(cell(2, 5), ColorRgb::WHITE);
        time::sleep(Duration::from_millis(200)).await;

        assert!(endpoint.push_count() >= 3);
        assert!(engine.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_endpoint_does_not_slow_the_fade() {
        let endpoint = Arc::new(FakeEndpoint {
            push_delay: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);

        engine.on_key_press(cell(0, 21), ColorRgb::WHITE);
        time::sleep(Duration::from_secs(1)).await;

        // About thirty flushes in a second, each one a x0.9 decay.
        let origin = engine.grid().get(GridCell::new(0, 21).unwrap());
        assert!(origin.r < 20, "origin only faded to {origin:?}");
        assert!(endpoint.push_count() >= 25);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_heartbeats_keep_the_session_alive() {
        let endpoint = Arc::new(FakeEndpoint {
            fail_heartbeats: true,
            ..Default::default()
        });
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);

        time::sleep(Duration::from_millis(16_100)).await;
        assert_eq!(endpoint.heartbeats.load(Ordering::SeqCst), 2);
        assert!(engine.is_active());
        assert!(engine.last_heartbeat_at().is_none());

        engine.on_key_press(cell(1, 1), RED);
        time::sleep(Duration::from_millis(100)).await;
        assert!(endpoint.push_count() >= 2);

        time::sleep(Duration::from_millis(8_000)).await;
        assert_eq!(endpoint.heartbeats.load(Ordering::SeqCst), 3);
        assert!(engine.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_runs_on_its_own_interval() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);

        time::sleep(Duration::from_millis(7_900)).await;
        assert_eq!(endpoint.heartbeats.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(8_200)).await;
        assert_eq!(endpoint.heartbeats.load(Ordering::SeqCst), 2);
        assert!(engine.last_heartbeat_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_stops_timers_and_tears_down_once() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let engine = LightingEngine::new(endpoint.clone(), LightingTimings::default());
        assert!(engine.init().await);
        engine.on_key_press(cell(3, 2), RED);

        engine.destroy().await;
        engine.destroy().await;
        let pushes = endpoint.push_count();

        engine.on_key_press(cell(3, 3), RED);
        time::sleep(Duration::from_secs(20)).await;

        assert_eq!(endpoint.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.push_count(), pushes);
        assert_eq!(endpoint.heartbeats.load(Ordering::SeqCst), 0);
        assert_eq!(engine.ripple_count(), 0);
        assert!(!engine.is_active());
        assert!(!engine.init().await);
    }
}
