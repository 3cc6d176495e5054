//! Best-effort backend cleanup on cancellation.
//!
//! Cancelling a chat mid-generation leaves the model resident in VRAM;
//! the node fires `ollama stop <model>` (with `OLLAMA_HOST` set) to unload
//! it, and on unix additionally schedules a delayed `kill -9` of whatever
//! process is listening on the backend port. Both are fire-and-forget:
//! the stop path must never block and never fail.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tracing::debug;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable process cleanup for the current process. Test fixtures only:
/// the delayed port kill would otherwise target the test's own mock
/// backend listener.
pub fn disable_for_tests() {
    ENABLED.store(false, Ordering::SeqCst);
}

/// Spawn the CLI unload for `model`, plus the delayed port kill on unix.
///
/// Idempotent and infallible; spawn errors (CLI not installed, no shell)
/// are logged at debug level and swallowed.
pub fn unload_model(host: Option<&str>, model: &str) {
    if model.is_empty() || !ENABLED.load(Ordering::SeqCst) {
        return;
    }

    let mut command = Command::new("ollama");
    command
        .arg("stop")
        .arg(model)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(host) = host {
        command.env("OLLAMA_HOST", host);
    }
    if let Err(e) = command.spawn() {
        debug!("ollama stop spawn failed: {e}");
    }

    #[cfg(unix)]
    {
        let port = host.map_or(11434, port_from_host);
        let script =
            format!("sleep 2; pid=$(lsof -ti :{port}); [ -n \"$pid\" ] && kill -9 $pid");
        let result = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = result {
            debug!("delayed port kill spawn failed: {e}");
        }
    }
}

/// TCP port of a backend URL like `http://localhost:11434`; defaults to the
/// standard Ollama port when absent or unparseable.
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn port_from_host(host: &str) -> u16 {
    let trimmed = host
        .trim_end_matches('/')
        .rsplit(':')
        .next()
        .unwrap_or_default();
    trimmed.parse().unwrap_or(11434)
}
