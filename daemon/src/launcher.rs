/// Fire-and-forget external commands.
///
/// Commands run through `/bin/sh -c` in their own session. Every descriptor the
/// daemon holds above stdin/stdout/stderr is marked close-on-exec in the child
/// before the shell starts, so scripts never see recordings, sockets or pipes
/// that happen to be open in the daemon. The parent never waits: one shared
/// reaper thread collects exit statuses and logs failures.
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::process::{Child, Command};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use crate::timefmt::{self, Placeholders};

const SHELL: &str = "/bin/sh";

/// How often the reaper polls children that are still running.
const REAP_POLL: Duration = Duration::from_millis(200);

#[cfg(target_os = "linux")]
const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;

/// Runs a fully rendered command line.
pub trait Launcher: Send {
    fn launch(&self, command_line: &str);
}

/// Launches commands through the system shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellLauncher;

impl Launcher for ShellLauncher {
    fn launch(&self, command_line: &str) {
        if let Err(e) = spawn_detached(command_line) {
            log::error!("[command] Unable to start external command '{command_line}': {e:#}");
        }
    }
}

/// Renders `template` at `time` and appends `arg` after a space.
/// Returns `None` when no command is configured.
pub fn command_line(
    template: Option<&str>,
    arg: Option<&str>,
    time: &DateTime<Local>,
    vars: &Placeholders<'_>,
) -> Option<String> {
    let template = template.filter(|t| !t.trim().is_empty())?;
    let mut line = timefmt::render(template, time, vars);
    if let Some(arg) = arg {
        line.push(' ');
        line.push_str(arg);
    }
    Some(line)
}

/// Starts `command_line` detached from the daemon and returns the child pid.
pub fn spawn_detached(command_line: &str) -> Result<u32> {
    if command_line.trim().is_empty() {
        bail!("Refusing to run an empty command");
    }

    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(command_line);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let limit = sweep_limit();
        // SAFETY: the hook only makes raw syscalls (setsid, close_range, fcntl),
        // all async-signal-safe, and touches no memory shared with the parent.
        unsafe {
            cmd.pre_exec(move || seal_child(limit));
        }
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {SHELL} -c '{command_line}'"))?;
    let pid = child.id();
    log::info!("[command] Executing external command '{command_line}' (pid {pid})");
    reap(child);
    Ok(pid)
}

/// Hands `child` to the shared reaper thread, starting it on first use.
fn reap(child: Child) {
    static REAPER: OnceLock<Option<Sender<Child>>> = OnceLock::new();
    let reaper = REAPER.get_or_init(|| {
        let (tx, rx) = unbounded();
        let spawned =
            thread::Builder::new().name("command-reaper".into()).spawn(move || reap_loop(rx));
        match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                log::error!("[command] Could not start reaper thread: {e}");
                None
            }
        }
    });
    let pid = child.id();
    match reaper {
        Some(tx) if tx.send(child).is_ok() => {}
        _ => log::warn!("[command] pid {pid} will not be reaped"),
    }
}

fn reap_loop(children: Receiver<Child>) {
    let mut running: Vec<Child> = Vec::new();
    loop {
        let received = if running.is_empty() {
            children.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            children.recv_timeout(REAP_POLL)
        };
        match received {
            Ok(child) => {
                running.push(child);
                running.extend(children.try_iter());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) if running.is_empty() => return,
            Err(RecvTimeoutError::Disconnected) => thread::sleep(REAP_POLL),
        }
        running.retain_mut(|child| !collected(child));
    }
}

/// Collects `child` if it has exited.
fn collected(child: &mut Child) -> bool {
    let pid = child.id();
    match child.try_wait() {
        Ok(None) => false,
        Ok(Some(status)) if status.success() => {
            log::debug!("[command] pid {pid} finished");
            true
        }
        Ok(Some(status)) => {
            log::warn!("[command] pid {pid} exited with {status}");
            true
        }
        Err(e) => {
            log::warn!("[command] Failed to wait for pid {pid}: {e}");
            true
        }
    }
}

/// One past the highest descriptor the child may inherit, for kernels
/// without `close_range`. Taken from the open descriptor list when the
/// platform exposes one, else from the descriptor limit.
#[cfg(unix)]
fn sweep_limit() -> libc::c_int {
    highest_open_descriptor().map_or_else(descriptor_limit, |fd| fd.saturating_add(1))
}

#[cfg(unix)]
fn highest_open_descriptor() -> Option<libc::c_int> {
    ["/proc/self/fd", "/dev/fd"].iter().find_map(|dir| {
        std::fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<libc::c_int>().ok())
            .max()
    })
}

#[cfg(unix)]
fn descriptor_limit() -> libc::c_int {
    let mut rl = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: getrlimit writes only into `rl`.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } == 0
        && rl.rlim_cur != libc::RLIM_INFINITY
    {
        return libc::c_int::try_from(rl.rlim_cur).unwrap_or(libc::c_int::MAX);
    }
    // SAFETY: sysconf has no memory-safety preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    libc::c_int::try_from(n).ok().filter(|n| *n > 0).unwrap_or(libc::c_int::MAX)
}

/// Runs in the forked child: new session, then close-on-exec for every
/// descriptor from 3 up.
#[cfg(unix)]
fn seal_child(limit: libc::c_int) -> std::io::Result<()> {
    // SAFETY: plain syscalls on the child's own process state.
    unsafe {
        if libc::setsid() == -1 {
            return Err(std::io::Error::last_os_error());
        }
        #[cfg(target_os = "linux")]
        {
            let sealed = libc::syscall(
                libc::SYS_close_range,
                3 as libc::c_uint,
                libc::c_uint::MAX,
                CLOSE_RANGE_CLOEXEC,
            );
            if sealed == 0 {
                return Ok(());
            }
        }
        for fd in 3..limit {
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }
    Ok(())
}
