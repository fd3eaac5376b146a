//! Child process bridging to the messaging backend.
//!
//! The bridge program reads one JSON command per line on stdin and writes
//! one JSON event per line on stdout. Its stderr is forwarded to the log.
//! When its stdout closes the event channel closes with it, which stops
//! the event worker.

use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use chatfs_shared::BackendCommand;

use crate::error::ServerError;

/// Start `argv` and wire it to the command and event channels.
///
/// The child's exit is logged. It is killed if still running when the
/// runtime shuts down.
pub fn spawn(
    argv: &[String],
    commands: mpsc::UnboundedReceiver<BackendCommand>,
    events: mpsc::Sender<String>,
) -> Result<(), ServerError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ServerError::Bridge("empty bridge command".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    info!(program = %program, pid = ?child.id(), "Backend bridge started");

    let missing = |stream: &str| ServerError::Bridge(format!("bridge {stream} not captured"));
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    tokio::spawn(async move {
        if let Err(e) = forward_commands(stdin, commands).await {
            warn!(error = %e, "Writing to the backend bridge failed");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = forward_events(BufReader::new(stdout), events).await {
            warn!(error = %e, "Reading from the backend bridge failed");
        }
    });
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "chatfs_server::bridge::stderr", "{line}");
        }
    });

    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => warn!(%status, "Backend bridge exited"),
            Err(e) => error!(error = %e, "Failed to wait for the backend bridge"),
        }
    });
    Ok(())
}

/// Write each command as a JSON line until the queue closes.
pub async fn forward_commands<W>(
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<BackendCommand>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        let line = match command.to_json() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, ?command, "Dropping unencodable command");
                continue;
            }
        };
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Forward each non-blank line as one event until EOF or until nobody is
/// listening.
pub async fn forward_events<R>(reader: R, events: mpsc::Sender<String>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if events.send(line).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Stand-in for a bridge when none is configured: commands are logged and
/// dropped.
pub async fn discard_commands(mut commands: mpsc::UnboundedReceiver<BackendCommand>) {
    while let Some(command) = commands.recv().await {
        warn!(?command, "No backend bridge configured, command dropped");
    }
}
