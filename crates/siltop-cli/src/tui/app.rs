//! TUI application state and event loop.
//!
//! The sampler is started by the caller (so `sudo` can prompt on a normal
//! terminal) and handed to the [`App`], which owns it from then on. Every
//! tick polls the reader once and folds the outcome into a
//! [`DashboardState`]; drawing only ever reads that state.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;

use siltop_core::{
    CapabilityEntry, MemoryMetrics, MetricsSnapshot, Poll, PowerHistory, RecordReader,
    SamplerHandle, SocInfo, Supervisor, normalize, timecode_now,
};

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

/// Dashboard settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Index into [`THEME_COLORS`].
    pub color: u8,
    pub avg_secs: u64,
    pub show_cores: bool,
    /// Rotate the sampler after this many readings; 0 disables rotation.
    pub max_count: u64,
    pub niceness: i32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            color: 2,
            avg_secs: 30,
            show_cores: false,
            max_count: 0,
            niceness: 10,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_secs.max(1) * 1000
    }

    pub fn avg_window(&self) -> Duration {
        Duration::from_secs(self.avg_secs.max(1))
    }

    pub fn theme_color(&self) -> Color {
        theme_color(self.color)
    }
}

/// Selectable accent colors for `--color`.
pub const THEME_COLORS: [Color; 9] = [
    Color::Reset,
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::White,
    Color::Gray,
];

pub fn theme_color(index: u8) -> Color {
    THEME_COLORS
        .get(usize::from(index))
        .copied()
        .unwrap_or(Color::Green)
}

// ---------------------------------------------------------------------------
// DashboardState
// ---------------------------------------------------------------------------

/// Rolling power readouts per domain.
#[derive(Debug, Clone)]
pub struct PowerTracks {
    pub cpu: PowerHistory,
    pub gpu: PowerHistory,
    pub ane: PowerHistory,
    pub package: PowerHistory,
}

impl PowerTracks {
    pub fn new(window: Duration) -> Self {
        Self {
            cpu: PowerHistory::new(window),
            gpu: PowerHistory::new(window),
            ane: PowerHistory::new(window),
            package: PowerHistory::new(window),
        }
    }

    fn record(&mut self, snap: &MetricsSnapshot) {
        let at = snap.timestamp;
        self.cpu.push(at, snap.cpu.power.watts);
        self.gpu.push(at, snap.gpu.power.watts);
        self.ane.push(at, snap.cpu.ane_power.watts);
        let package = snap
            .cpu
            .package_power_w
            .unwrap_or(snap.cpu.power.watts + snap.gpu.power.watts + snap.cpu.ane_power.watts);
        self.package.push(at, package);
    }
}

/// Everything the dashboard draws.
#[derive(Debug, Clone)]
pub struct DashboardState {
    latest: Option<MetricsSnapshot>,
    no_data: Option<String>,
    power: PowerTracks,
    memory: Option<MemoryMetrics>,
    readings: u64,
    since_rotation: u64,
}

impl DashboardState {
    pub fn new(avg_window: Duration) -> Self {
        Self {
            latest: None,
            no_data: None,
            power: PowerTracks::new(avg_window),
            memory: None,
            readings: 0,
            since_rotation: 0,
        }
    }

    /// Fold one poll outcome in. Returns true for a fresh reading.
    pub fn apply(&mut self, poll: Poll, capability: &CapabilityEntry) -> bool {
        match poll {
            Poll::Fresh(record) => {
                let snap = normalize(&record, capability);
                self.power.record(&snap);
                self.latest = Some(snap);
                self.no_data = None;
                self.readings += 1;
                self.since_rotation += 1;
                true
            }
            Poll::Unchanged => {
                self.no_data = None;
                false
            }
            Poll::Unavailable(reason) => {
                log::debug!("no reading this cycle: {reason}");
                self.no_data = Some(reason.to_string());
                false
            }
        }
    }

    pub fn set_memory(&mut self, memory: MemoryMetrics) {
        self.memory = Some(memory);
    }

    pub fn rotation_due(&self, max_count: u64) -> bool {
        max_count > 0 && self.since_rotation >= max_count
    }

    pub fn rotated(&mut self) {
        self.since_rotation = 0;
    }

    pub fn latest(&self) -> Option<&MetricsSnapshot> {
        self.latest.as_ref()
    }

    /// Why the last cycle produced nothing, if it did.
    pub fn no_data(&self) -> Option<&str> {
        self.no_data.as_deref()
    }

    pub fn power(&self) -> &PowerTracks {
        &self.power
    }

    pub fn memory(&self) -> Option<&MemoryMetrics> {
        self.memory.as_ref()
    }

    pub fn readings(&self) -> u64 {
        self.readings
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// How often cached sudo credentials are refreshed, well inside the
/// 5 minute default `timestamp_timeout`, so rotation never needs a prompt.
pub const SUDO_REFRESH_PERIOD: Duration = Duration::from_secs(60);

pub struct App {
    config: MonitorConfig,
    soc: SocInfo,
    supervisor: Supervisor,
    reader: RecordReader,
    state: DashboardState,
    running: bool,
    sampler_alive: bool,
    interrupted: Arc<AtomicBool>,
    last_sudo_refresh: Instant,
    fatal: Option<String>,
}

impl App {
    pub fn new(
        config: MonitorConfig,
        soc: SocInfo,
        supervisor: Supervisor,
        handle: &SamplerHandle,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        let state = DashboardState::new(config.avg_window());
        Self {
            config,
            soc,
            supervisor,
            reader: RecordReader::new(&handle.path),
            state,
            running: true,
            sampler_alive: true,
            interrupted,
            last_sudo_refresh: Instant::now(),
            fatal: None,
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // Install panic hook that restores terminal before printing the panic.
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
            original_hook(info);
        }));

        let result = self.run_loop(&mut terminal);

        // Always restore terminal, even if the loop returned an error.
        let _ = std::panic::take_hook(); // remove our hook
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;

        self.supervisor.shutdown();
        result
    }

    fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> io::Result<()> {
        self.tick();
        let mut last_tick = Instant::now();

        while self.running {
            if self.interrupted.load(Ordering::SeqCst) {
                break;
            }
            terminal.draw(|f| super::ui::draw(f, self))?;

            if event::poll(Duration::from_millis(50))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key);
            }

            if last_tick.elapsed() >= self.config.interval() {
                self.tick();
                last_tick = Instant::now();
            }
        }

        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if is_quit_key(key) {
            self.running = false;
        }
    }

    fn tick(&mut self) {
        let poll = self.reader.poll();
        let fresh = self.state.apply(poll, &self.soc.capability);
        self.state.set_memory(MemoryMetrics::collect());

        if self.sampler_alive && !self.supervisor.is_running() {
            log::warn!("sampler process exited unexpectedly");
            self.sampler_alive = false;
        }

        if self.last_sudo_refresh.elapsed() >= SUDO_REFRESH_PERIOD {
            self.last_sudo_refresh = Instant::now();
            if let Err(e) = self.supervisor.keep_alive() {
                log::warn!("could not refresh sudo credentials: {e}");
            }
        }

        if fresh && self.state.rotation_due(self.config.max_count) {
            self.rotate();
        }
    }

    fn rotate(&mut self) {
        // Suffix keeps timecodes unique when two rotations land in the same second.
        let timecode = format!("{}_{}", timecode_now(), self.state.readings());
        match self.supervisor.rotate(&timecode) {
            Ok(handle) => {
                self.reader.retarget(&handle.path);
                self.state.rotated();
                self.sampler_alive = true;
            }
            Err(e) => {
                self.fatal = Some(format!("sampler restart failed: {e}"));
                self.running = false;
            }
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn soc(&self) -> &SocInfo {
        &self.soc
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn sampler_alive(&self) -> bool {
        self.sampler_alive
    }

    /// `(fallbacks, misses)` counted by the reader over the whole session.
    pub fn reader_stats(&self) -> (u64, u64) {
        (self.reader.fallbacks(), self.reader.misses())
    }

    /// Error that ended the session, if any.
    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }
}

pub fn is_quit_key(key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}
