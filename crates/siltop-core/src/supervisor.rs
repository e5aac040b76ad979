//! Lifecycle of the privileged `powermetrics` sampler.
//!
//! The [`Supervisor`] is the only owner of the sampler process. Starting a
//! session clears every stale output file, launches one process writing to a
//! freshly timecoded path, and publishes a [`SamplerHandle`] for it. Stopping
//! (explicitly, by rotation, or on drop) terminates the process and deletes
//! its file, so a reader holding an old path sees the file as absent.
//!
//! The sampler is launched as the leader of its own process group so that
//! teardown reaches `powermetrics` even when `sudo` sits in between. Output
//! the current user cannot unlink is handed to [`Launcher::cleanup_command`],
//! which removes it with the sampler's privileges.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::store::RecordStore;

/// Errors raised while starting the sampler. All of them are fatal to a session.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("root privileges are required to run the sampler (sudo authentication failed)")]
    PrivilegeDenied,

    #[error("failed to launch sampler: {0}")]
    Spawn(#[source] io::Error),

    #[error("sampler exited right after launch ({status})")]
    ExitedEarly { status: ExitStatus },

    #[error("failed to prepare sampler output directory: {0}")]
    Store(#[source] io::Error),
}

/// How the sampler obtains root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Prefix the command with `sudo` unless already running as root.
    Sudo,
    /// Run the command as the current user.
    None,
}

/// Sampler settings.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub program: String,
    pub interval_ms: u64,
    pub niceness: i32,
    pub samplers: Vec<String>,
    pub store: RecordStore,
    pub elevation: Elevation,
    /// How long to watch a fresh process for an immediate exit.
    pub startup_grace: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            program: "powermetrics".to_string(),
            interval_ms: 1000,
            niceness: 10,
            samplers: ["cpu_power", "gpu_power", "thermal"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            store: RecordStore::default(),
            elevation: Elevation::Sudo,
            startup_grace: Duration::from_millis(250),
        }
    }
}

/// Everything a [`Launcher`] needs to build the sampler command line.
#[derive(Debug, Clone)]
pub struct LaunchSpec<'a> {
    pub program: &'a str,
    pub output_path: &'a Path,
    pub interval_ms: u64,
    pub niceness: i32,
    pub samplers: &'a [String],
    pub elevate: bool,
}

/// Builds the commands that start the sampler and clean up after it.
pub trait Launcher {
    fn command(&self, spec: &LaunchSpec<'_>) -> Command;

    /// Command deleting `paths` that the current user cannot remove, or
    /// `None` when there is no privileged route.
    fn cleanup_command(&self, paths: &[PathBuf], elevate: bool) -> Option<Command> {
        if !elevate {
            return None;
        }
        let mut cmd = Command::new("sudo");
        cmd.args(["-n", "rm", "-f", "--"]).args(paths);
        Some(cmd)
    }
}

/// `[sudo -n] nice -n N powermetrics --samplers ... -o PATH -f plist -i MS`
#[derive(Debug, Clone, Copy, Default)]
pub struct PowermetricsLauncher;

impl Launcher for PowermetricsLauncher {
    fn command(&self, spec: &LaunchSpec<'_>) -> Command {
        let mut cmd = if spec.elevate {
            let mut c = Command::new("sudo");
            c.arg("-n").arg("nice");
            c
        } else {
            Command::new("nice")
        };
        cmd.arg("-n")
            .arg(spec.niceness.to_string())
            .arg(spec.program)
            .arg("--samplers")
            .arg(spec.samplers.join(","))
            .arg("-o")
            .arg(spec.output_path)
            .arg("-f")
            .arg("plist")
            .arg("-i")
            .arg(spec.interval_ms.to_string());
        cmd
    }
}

/// Identifies one running sampler session.
///
/// A handle is invalidated as soon as its session is stopped or rotated;
/// check with [`Supervisor::is_current`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerHandle {
    pub pid: u32,
    pub path: PathBuf,
    pub timecode: String,
    /// Strictly increasing per supervisor.
    pub epoch: u64,
}

impl SamplerHandle {
    pub fn is_current<L: Launcher>(&self, supervisor: &Supervisor<L>) -> bool {
        supervisor.is_current(self)
    }
}

/// Sole owner of the sampler process.
pub struct Supervisor<L: Launcher = PowermetricsLauncher> {
    config: SamplerConfig,
    launcher: L,
    child: Option<Child>,
    handle: Option<SamplerHandle>,
    /// Whether the running session was launched through `sudo`.
    elevated: bool,
    epoch: u64,
}

impl Supervisor<PowermetricsLauncher> {
    pub fn new(config: SamplerConfig) -> Self {
        Self::with_launcher(config, PowermetricsLauncher)
    }
}

impl<L: Launcher> Supervisor<L> {
    pub fn with_launcher(config: SamplerConfig, launcher: L) -> Self {
        Self {
            config,
            launcher,
            child: None,
            handle: None,
            elevated: false,
            epoch: 0,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Handle of the running session, if any.
    pub fn current(&self) -> Option<&SamplerHandle> {
        self.handle.as_ref()
    }

    /// Output path the reader should poll right now.
    pub fn current_path(&self) -> Option<&Path> {
        self.handle.as_ref().map(|h| h.path.as_path())
    }

    pub fn is_current(&self, handle: &SamplerHandle) -> bool {
        self.handle.as_ref().is_some_and(|h| h.epoch == handle.epoch)
    }

    /// True while the sampler process is alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Launch a new session, tearing down any running one first.
    ///
    /// May prompt for a sudo password on the controlling terminal.
    pub fn start(
        &mut self,
        timecode: &str,
        interval_ms: u64,
        niceness: i32,
    ) -> Result<SamplerHandle, SamplerError> {
        self.launch(timecode, interval_ms, niceness, true)
    }

    fn launch(
        &mut self,
        timecode: &str,
        interval_ms: u64,
        niceness: i32,
        interactive: bool,
    ) -> Result<SamplerHandle, SamplerError> {
        self.shutdown();
        self.config.interval_ms = interval_ms;
        self.config.niceness = niceness;

        let elevate = self.config.elevation == Elevation::Sudo && !is_root();
        if elevate {
            acquire_sudo(interactive)?;
        }

        let store = &self.config.store;
        fs::create_dir_all(store.dir()).map_err(SamplerError::Store)?;
        let sweep = store.clear_stale().map_err(SamplerError::Store)?;
        if sweep.removed > 0 {
            log::info!("removed {} stale sampler output file(s)", sweep.removed);
        }
        if !sweep.blocked.is_empty() {
            self.remove_privileged(&sweep.blocked, elevate);
        }

        // Created as the invoking user so it stays removable without root.
        let output_path = store.create(timecode).map_err(SamplerError::Store)?;
        let spec = LaunchSpec {
            program: &self.config.program,
            output_path: &output_path,
            interval_ms,
            niceness,
            samplers: &self.config.samplers,
            elevate,
        };
        let mut cmd = self.launcher.command(&spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.discard_output(&output_path, timecode, elevate);
                return Err(SamplerError::Spawn(e));
            }
        };

        if let Some(status) = wait_for_exit(&mut child, self.config.startup_grace) {
            self.discard_output(&output_path, timecode, elevate);
            return Err(SamplerError::ExitedEarly { status });
        }

        self.epoch += 1;
        let handle = SamplerHandle {
            pid: child.id(),
            path: output_path,
            timecode: timecode.to_string(),
            epoch: self.epoch,
        };
        log::info!(
            "sampler started: pid={} interval={}ms nice={} output={}",
            handle.pid,
            interval_ms,
            niceness,
            handle.path.display()
        );
        self.child = Some(child);
        self.handle = Some(handle.clone());
        self.elevated = elevate;
        Ok(handle)
    }

    /// Refresh cached sudo credentials without prompting, so a later
    /// [`rotate`](Self::rotate) still finds them valid. Does nothing unless
    /// the running session was launched through `sudo`.
    pub fn keep_alive(&self) -> Result<(), SamplerError> {
        if self.elevated && self.handle.is_some() {
            acquire_sudo(false)
        } else {
            Ok(())
        }
    }

    /// Stop the current session and start a new one with the same settings.
    ///
    /// Never prompts: cached sudo credentials must still be valid.
    pub fn rotate(&mut self, timecode: &str) -> Result<SamplerHandle, SamplerError> {
        let (interval_ms, niceness) = (self.config.interval_ms, self.config.niceness);
        log::info!("rotating sampler output to timecode {timecode}");
        self.launch(timecode, interval_ms, niceness, false)
    }

    /// Stop the session identified by `handle`. Stale handles are ignored.
    pub fn stop(&mut self, handle: &SamplerHandle) {
        if self.is_current(handle) {
            self.shutdown();
        } else {
            log::debug!("ignoring stop for stale sampler epoch {}", handle.epoch);
        }
    }

    /// Terminate whatever is running and delete its output. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.elevated);
        }
        if let Some(handle) = self.handle.take() {
            self.discard_output(&handle.path, &handle.timecode, self.elevated);
            log::info!("sampler stopped: pid={} epoch={}", handle.pid, handle.epoch);
        }
        self.elevated = false;
    }

    /// Delete one session's output, escalating if the sampler owns it.
    fn discard_output(&self, path: &Path, timecode: &str, elevate: bool) {
        match self.config.store.remove(timecode) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                self.remove_privileged(&[path.to_path_buf()], elevate);
            }
            Err(e) => log::warn!("failed to remove {}: {e}", path.display()),
        }
    }

    fn remove_privileged(&self, paths: &[PathBuf], elevate: bool) {
        let Some(mut cmd) = self.launcher.cleanup_command(paths, elevate) else {
            log::warn!(
                "cannot remove {} sampler file(s) owned by another user",
                paths.len()
            );
            return;
        };
        let status = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {
                log::info!("removed {} sampler file(s) with elevated privileges", paths.len());
            }
            Ok(status) => log::warn!("privileged cleanup of sampler output failed ({status})"),
            Err(e) => log::warn!("privileged cleanup of sampler output failed: {e}"),
        }
    }
}

impl<L: Launcher> Drop for Supervisor<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: `geteuid` has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Refresh cached sudo credentials, prompting on the terminal if `interactive`.
fn acquire_sudo(interactive: bool) -> Result<(), SamplerError> {
    let mut cmd = Command::new("sudo");
    if !interactive {
        cmd.arg("-n")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
    }
    let status = cmd.arg("-v").status().map_err(SamplerError::Spawn)?;
    if status.success() {
        Ok(())
    } else {
        Err(SamplerError::PrivilegeDenied)
    }
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if start.elapsed() >= timeout => return None,
            Ok(None) => std::thread::sleep(Duration::from_millis(5)),
            Err(_) => return None,
        }
    }
}

/// SIGTERM to the sampler's process group, then SIGKILL if it lingers.
///
/// An unprivileged signal only reaches `sudo`, which relays SIGTERM but dies
/// silently on SIGKILL. For elevated sessions the kill is therefore repeated
/// through `sudo` so the root `powermetrics` is not orphaned.
#[cfg(unix)]
fn terminate(child: &mut Child, elevated: bool) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    let pid = child.id();
    signal_group(pid, libc::SIGTERM);
    if wait_for_exit(child, Duration::from_secs(1)).is_some() {
        return;
    }

    log::warn!("sampler pid {pid} ignored SIGTERM, killing its process group");
    if elevated {
        let status = Command::new("sudo")
            .args(["-n", "kill", "-KILL", "--"])
            .arg(format!("-{pid}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if !matches!(status, Ok(s) if s.success()) {
            log::warn!("could not kill process group {pid} as root; powermetrics may still be running");
        }
    }
    signal_group(pid, libc::SIGKILL);
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _elevated: bool) {
    if let Err(e) = child.kill() {
        log::warn!("failed to kill sampler pid {}: {e}", child.id());
    }
    let _ = child.wait();
}

#[cfg(unix)]
fn signal_group(leader: u32, signal: libc::c_int) {
    if let Ok(pgid) = libc::pid_t::try_from(leader) {
        // SAFETY: `kill` only sends a signal. The group is led by our own
        // unreaped child, so its id cannot have been reused.
        unsafe {
            libc::kill(-pgid, signal);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::reader::{Unavailable, read_latest};
    use crate::record::fixtures::nominal;
    use std::ffi::OsStr;

    /// Ignores the launch request and runs `program args...` unprivileged.
    struct StandIn(&'static str, &'static [&'static str]);

    impl Launcher for StandIn {
        fn command(&self, _spec: &LaunchSpec<'_>) -> Command {
            let mut cmd = Command::new(self.0);
            cmd.args(self.1);
            cmd
        }
    }

    fn config(dir: &Path) -> SamplerConfig {
        SamplerConfig {
            store: RecordStore::new(dir, "pm_"),
            elevation: Elevation::None,
            startup_grace: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn sleeper(dir: &Path) -> Supervisor<StandIn> {
        Supervisor::with_launcher(config(dir), StandIn("sleep", &["30"]))
    }

    /// Idles like a sampler. Cleanup restores write access to the output
    /// directory before deleting, the way `sudo rm` ignores it.
    struct Unlocking(PathBuf);

    impl Launcher for Unlocking {
        fn command(&self, _spec: &LaunchSpec<'_>) -> Command {
            let mut cmd = Command::new("sleep");
            cmd.arg("30");
            cmd
        }

        fn cleanup_command(&self, paths: &[PathBuf], _elevate: bool) -> Option<Command> {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg("chmod u+w \"$0\" && rm -f -- \"$@\"")
                .arg(&self.0)
                .args(paths);
            Some(cmd)
        }
    }

    /// Idles in a child of its own, like `sudo` running `powermetrics`, and
    /// writes that child's pid to the given file.
    struct Forking(PathBuf);

    impl Launcher for Forking {
        fn command(&self, _spec: &LaunchSpec<'_>) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg("sleep 30 & echo $! > \"$0\"; wait")
                .arg(&self.0);
            cmd
        }
    }

    fn set_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    /// True once `pid` has exited (a zombie awaiting its reaper counts).
    fn is_gone(pid: libc::pid_t) -> bool {
        // SAFETY: signal 0 only checks that the process exists.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return true;
        }
        fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| stat.contains(") Z "))
    }

    #[test]
    fn powermetrics_command_line() {
        let samplers = vec!["cpu_power".to_string(), "thermal".to_string()];
        let spec = LaunchSpec {
            program: "powermetrics",
            output_path: Path::new("/tmp/pm_1"),
            interval_ms: 500,
            niceness: 5,
            samplers: &samplers,
            elevate: true,
        };
        let cmd = PowermetricsLauncher.command(&spec);
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(
            args,
            [
                "-n", "nice", "-n", "5", "powermetrics", "--samplers", "cpu_power,thermal",
                "-o", "/tmp/pm_1", "-f", "plist", "-i", "500"
            ]
        );

        let unprivileged = PowermetricsLauncher.command(&LaunchSpec {
            elevate: false,
            ..spec
        });
        assert_eq!(unprivileged.get_program(), "nice");
    }

    #[test]
    fn start_clears_stale_files_and_publishes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("pm_old");
        fs::write(&stale, b"stale").unwrap();

        let mut sup = sleeper(dir.path());
        let handle = sup.start("100", 1000, 10).unwrap();
        assert!(!stale.exists());
        assert_eq!(handle.path, dir.path().join("pm_100"));
        assert!(handle.path.exists());
        assert_eq!(handle.epoch, 1);
        assert_eq!(sup.current_path(), Some(handle.path.as_path()));
        assert!(sup.is_running());
        assert!(sup.is_current(&handle));
    }

    #[test]
    fn stop_tears_down_process_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = sleeper(dir.path());
        let handle = sup.start("1", 1000, 10).unwrap();
        fs::write(&handle.path, nominal()).unwrap();
        assert!(read_latest(&handle.path).is_ok());

        sup.stop(&handle);
        assert!(!sup.is_running());
        assert!(sup.current().is_none());
        assert!(matches!(read_latest(&handle.path), Err(Unavailable::Missing)));

        // Safe to repeat.
        sup.stop(&handle);
        sup.shutdown();
    }

    #[test]
    fn restart_invalidates_old_handle_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = sleeper(dir.path());
        let first = sup.start("1", 1000, 10).unwrap();
        fs::write(&first.path, nominal()).unwrap();

        let second = sup.rotate("2").unwrap();
        assert!(second.epoch > first.epoch);
        assert_ne!(second.path, first.path);
        assert!(!first.is_current(&sup));
        assert!(second.is_current(&sup));
        assert!(matches!(read_latest(&first.path), Err(Unavailable::Missing)));

        // A stale handle cannot stop the new session.
        sup.stop(&first);
        assert!(sup.is_running());
        assert_eq!(sup.config().interval_ms, 1000);
    }

    #[test]
    fn drop_tears_down_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut sup = sleeper(dir.path());
            let handle = sup.start("9", 1000, 10).unwrap();
            fs::write(&handle.path, nominal()).unwrap();
            handle.path
        };
        assert!(!path.exists());
    }

    #[test]
    fn immediate_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SamplerConfig {
            startup_grace: Duration::from_secs(5),
            ..config(dir.path())
        };
        let mut sup = Supervisor::with_launcher(cfg, StandIn("false", &[]));
        let err = sup.start("1", 1000, 10).unwrap_err();
        assert!(matches!(err, SamplerError::ExitedEarly { .. }));
        assert!(sup.current().is_none());
        assert!(!dir.path().join("pm_1").exists());
    }

    #[test]
    fn stale_file_owned_by_sampler_is_removed_with_privileges() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let stale = out.join("pm_1700000000");
        fs::write(&stale, nominal()).unwrap();
        set_mode(&out, 0o555);

        let mut sup = Supervisor::with_launcher(config(&out), Unlocking(out.clone()));
        let started = sup.start("2", 1000, 10);
        set_mode(&out, 0o755);

        let handle = started.unwrap();
        assert!(!stale.exists());
        assert!(handle.path.exists());
        assert!(matches!(read_latest(&stale), Err(Unavailable::Missing)));
    }

    #[test]
    fn stop_removes_session_file_the_user_cannot_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let mut sup = Supervisor::with_launcher(config(&out), Unlocking(out.clone()));
        let handle = sup.start("1", 1000, 10).unwrap();
        fs::write(&handle.path, nominal()).unwrap();
        set_mode(&out, 0o555);

        sup.stop(&handle);
        set_mode(&out, 0o755);
        assert!(matches!(read_latest(&handle.path), Err(Unavailable::Missing)));
    }

    #[test]
    fn stop_terminates_the_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("grandchild.pid");
        let mut sup = Supervisor::with_launcher(config(dir.path()), Forking(pidfile.clone()));
        sup.start("1", 1000, 10).unwrap();

        let mut grandchild = None;
        for _ in 0..200 {
            if let Ok(pid) = fs::read_to_string(&pidfile).unwrap_or_default().trim().parse() {
                grandchild = Some(pid);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let grandchild: libc::pid_t = grandchild.expect("sampler never reported its child");

        sup.shutdown();
        let mut gone = false;
        for _ in 0..200 {
            if is_gone(grandchild) {
                gone = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(gone, "process {grandchild} outlived the sampler");
    }

    #[test]
    fn keep_alive_is_a_no_op_without_elevation() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = sleeper(dir.path());
        assert!(sup.keep_alive().is_ok());
        sup.start("1", 1000, 10).unwrap();
        assert!(sup.keep_alive().is_ok());
    }

    #[test]
    fn default_cleanup_route_needs_elevation() {
        let paths = vec![PathBuf::from("/tmp/pm_1")];
        assert!(PowermetricsLauncher.cleanup_command(&paths, false).is_none());
        let cmd = PowermetricsLauncher.cleanup_command(&paths, true).unwrap();
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(args, ["-n", "rm", "-f", "--", "/tmp/pm_1"]);
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::with_launcher(
            config(dir.path()),
            StandIn("/nonexistent/siltop-sampler", &[]),
        );
        assert!(matches!(
            sup.start("1", 1000, 10),
            Err(SamplerError::Spawn(_))
        ));
    }
}
