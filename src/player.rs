//! Media element backed by an external mpv process controlled over its JSON
//! IPC socket.
//!
//! One mpv window is alive per attached element at most. Rewinding tears the
//! process down and the next `play` starts a fresh one from zero, which keeps
//! paused neighbours from holding decoders open.

use std::fs;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::model::{FeedItem, MediaKind};
use crate::playback::{MediaElement, MediaError, MediaEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(30);

#[derive(Debug, Clone)]
pub struct MpvOptions {
    pub mpv_path: String,
    pub fullscreen: bool,
    pub user_agent: String,
}

struct Session {
    kill_tx: Sender<()>,
    alive: Arc<AtomicBool>,
    ipc_path: Option<String>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Session {
    fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.kill_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

pub struct MpvElement {
    options: Arc<MpvOptions>,
    title: String,
    source: Option<(String, MediaKind)>,
    session: Option<Session>,
    muted: bool,
    events_tx: Sender<MediaEvent>,
    events_rx: Receiver<MediaEvent>,
}

impl MpvElement {
    pub fn new(options: Arc<MpvOptions>, item: &FeedItem) -> Self {
        let (events_tx, events_rx) = unbounded();
        let title = if item.caption.trim().is_empty() {
            format!("@{}", item.author.handle)
        } else {
            format!("@{} · {}", item.author.handle, first_line(&item.caption))
        };
        Self {
            options,
            title,
            source: None,
            session: None,
            muted: true,
            events_tx,
            events_rx,
        }
    }

    fn spawn(&mut self, paused: bool) -> Result<(), MediaError> {
        self.kill();
        let Some((url, kind)) = self.source.clone() else {
            return Err(MediaError::NotAttached);
        };

        let ipc_path = unique_ipc_path();
        #[cfg(unix)]
        if let Some(path) = &ipc_path {
            let _ = fs::remove_file(path);
        }

        let args = self.args(&url, paused, ipc_path.as_deref());
        tracing::debug!(%url, ?kind, ipc = ipc_path.as_deref().unwrap_or("n/a"), "spawning mpv");
        let child = Command::new(&self.options.mpv_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let (kill_tx, kill_rx) = bounded::<()>(1);
        let alive = Arc::new(AtomicBool::new(true));
        let watcher = Watcher {
            child,
            kill_rx,
            events: self.events_tx.clone(),
            alive: alive.clone(),
            ipc_path: ipc_path.clone(),
        };
        let handle = thread::spawn(move || watcher.run());

        self.session = Some(Session {
            kill_tx,
            alive,
            ipc_path,
            handle: Some(handle),
        });
        Ok(())
    }

    fn args(&self, url: &str, paused: bool, ipc_path: Option<&str>) -> Vec<String> {
        let mut args = vec![
            url.to_string(),
            "--force-window=yes".to_string(),
            "--keep-open=no".to_string(),
            "--loop-file=inf".to_string(),
            "--really-quiet".to_string(),
            "--no-config".to_string(),
            "--ytdl=no".to_string(),
            "--idle=no".to_string(),
            "--terminal=no".to_string(),
            format!("--pause={}", yes_no(paused)),
            format!("--mute={}", yes_no(self.muted)),
            format!("--force-media-title={}", self.title),
            format!("--http-header-fields=User-Agent: {}", self.options.user_agent),
        ];
        if self.options.fullscreen {
            args.push("--fullscreen".to_string());
        }
        if let Some(path) = ipc_path {
            args.push(format!("--input-ipc-server={path}"));
        }
        args
    }

    fn kill(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    fn command(&self, payload: serde_json::Value) -> Result<(), MediaError> {
        let Some(path) = self.session.as_ref().and_then(|s| s.ipc_path.as_deref()) else {
            return Err(MediaError::NotAttached);
        };
        let serialized = json!({ "command": payload }).to_string();
        send_ipc(path, &serialized)
    }
}

impl MediaElement for MpvElement {
    fn attach(&mut self, url: &str, kind: MediaKind) -> Result<(), MediaError> {
        self.source = Some((url.to_string(), kind));
        self.spawn(true)
    }

    fn play(&mut self) -> Result<(), MediaError> {
        if self.session.is_none() {
            return self.spawn(false);
        }
        self.command(json!(["set_property", "pause", false]))
            .map_err(|err| MediaError::PlayRejected(err.to_string()))
    }

    fn pause(&mut self) {
        if self.session.is_none() {
            return;
        }
        if let Err(err) = self.command(json!(["set_property", "pause", true])) {
            tracing::debug!(error = %err, "mpv pause failed, stopping session");
            self.kill();
        }
    }

    fn rewind(&mut self) {
        self.kill();
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if self.session.is_some() {
            if let Err(err) = self.command(json!(["set_property", "mute", muted])) {
                tracing::debug!(error = %err, "mpv mute failed");
            }
        }
    }

    fn reload(&mut self) -> Result<(), MediaError> {
        self.spawn(true)
    }

    fn release(&mut self) {
        self.kill();
        self.source = None;
        while self.events_rx.try_recv().is_ok() {}
    }

    fn poll_event(&mut self) -> Option<MediaEvent> {
        self.events_rx.try_recv().ok()
    }
}

impl Drop for MpvElement {
    fn drop(&mut self) {
        self.kill();
    }
}

struct Watcher {
    child: Child,
    kill_rx: Receiver<()>,
    events: Sender<MediaEvent>,
    alive: Arc<AtomicBool>,
    ipc_path: Option<String>,
}

impl Watcher {
    fn run(mut self) {
        let mut announced = false;
        if self.ipc_path.is_none() {
            announced = true;
            self.emit(MediaEvent::Ready);
        }

        loop {
            if !announced && self.ipc_path.as_deref().is_some_and(ipc_ready) {
                announced = true;
                self.emit(MediaEvent::Ready);
            }

            match self.child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    self.emit(MediaEvent::Closed);
                    break;
                }
                Ok(Some(status)) => {
                    self.emit(MediaEvent::Error {
                        fatal: true,
                        message: format!("mpv exited with {status}"),
                    });
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    self.emit(MediaEvent::Error {
                        fatal: true,
                        message: format!("poll mpv status: {err}"),
                    });
                    break;
                }
            }

            // Waiting on the kill channel doubles as the poll delay, so a
            // stop wakes the watcher at once.
            match self.kill_rx.recv_timeout(POLL_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    break;
                }
            }
        }

        if let Some(path) = &self.ipc_path {
            cleanup_ipc_path(path);
        }
    }

    /// Events from a session that has been stopped are dropped.
    fn emit(&self, event: MediaEvent) {
        if self.alive.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

#[cfg(unix)]
fn send_ipc(path: &str, serialized: &str) -> Result<(), MediaError> {
    let mut stream = UnixStream::connect(path)
        .map_err(|err| MediaError::Ipc(format!("connect {path}: {err}")))?;
    stream
        .write_all(serialized.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|err| MediaError::Ipc(format!("write command: {err}")))
}

#[cfg(target_os = "windows")]
fn send_ipc(path: &str, serialized: &str) -> Result<(), MediaError> {
    let mut pipe = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| MediaError::Ipc(format!("open pipe {path}: {err}")))?;
    pipe.write_all(serialized.as_bytes())
        .and_then(|_| pipe.write_all(b"\n"))
        .map_err(|err| MediaError::Ipc(format!("write command: {err}")))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn send_ipc(_path: &str, _serialized: &str) -> Result<(), MediaError> {
    Err(MediaError::Ipc("not supported on this platform".into()))
}

#[cfg(unix)]
fn ipc_ready(path: &str) -> bool {
    UnixStream::connect(path).is_ok()
}

#[cfg(target_os = "windows")]
fn ipc_ready(path: &str) -> bool {
    fs::OpenOptions::new().read(true).write(true).open(path).is_ok()
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn ipc_ready(_path: &str) -> bool {
    true
}

fn ipc_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "reelfeed-mpv-{}-{}.sock",
        std::process::id(),
        ipc_suffix()
    ));
    Some(path.to_string_lossy().to_string())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    Some(format!(
        r"\\.\pipe\reelfeed-mpv-{}-{}",
        std::process::id(),
        ipc_suffix()
    ))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(%path, error = %err, "failed to remove mpv ipc socket");
        }
    }
}

#[cfg(not(unix))]
fn cleanup_ipc_path(_path: &str) {}
