//! Stdio transport.
//!
//! Reads one host call per line from stdin and writes one response per line
//! to stdout. Every call runs in its own task, so responses can come back out
//! of order; the host matches them by `id`.

use crate::bridge::{Bridge, HostResponse};
use crate::error::{DbError, DbResult};
use crate::transport::Transport;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How long in-flight calls may keep running once input has ended.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfInput,
    /// Reading from the input failed; nothing more can be read.
    InputError,
    Signal,
}

/// Stdio transport implementation.
pub struct StdioTransport {
    bridge: Bridge,
}

impl StdioTransport {
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }

    /// Serve calls from `input`, writing responses to `output`, until the
    /// input ends or `stop` resolves.
    ///
    /// Returns once every accepted call has been answered (or the drain
    /// timeout passes).
    pub async fn serve<R, W, S>(&self, input: R, output: W, stop: S) -> DbResult<StopReason>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(write_responses(output, rx));

        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        tokio::pin!(stop);

        let reason = loop {
            buf.clear();
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => {
                        info!("Input closed");
                        break StopReason::EndOfInput;
                    }
                    Ok(_) => self.accept(&buf, &tx),
                    Err(e) => {
                        error!(error = %e, "Failed to read from input");
                        break StopReason::InputError;
                    }
                },
                _ = &mut stop => {
                    info!("Shutdown signal received");
                    break StopReason::Signal;
                }
            }
        };

        // The writer finishes once every in-flight call has dropped its sender.
        drop(tx);
        match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
            Ok(Ok(Ok(()))) => debug!("All responses written"),
            Ok(Ok(Err(e))) => {
                return Err(DbError::internal(format!("Failed to write response: {}", e)));
            }
            Ok(Err(e)) => {
                return Err(DbError::internal(format!("Response writer failed: {}", e)));
            }
            Err(_) => warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "Gave up waiting for in-flight calls"
            ),
        }

        Ok(reason)
    }

    /// Start answering one raw input line.
    fn accept(&self, raw: &[u8], tx: &mpsc::UnboundedSender<String>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(error = %e, "Input line is not valid UTF-8");
                send(tx, &HostResponse::new(JsonValue::Null, JsonValue::Null));
                return;
            }
        };
        if line.is_empty() {
            return;
        }

        let line = line.to_string();
        let bridge = self.bridge.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = bridge.handle_line(&line).await;
            send(&tx, &response);
        });
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &HostResponse) {
    match serde_json::to_string(response) {
        Ok(encoded) => {
            let _ = tx.send(encoded);
        }
        Err(e) => error!(error = %e, "Failed to encode response"),
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Serving host calls on stdio");

        let reason = self
            .serve(tokio::io::stdin(), tokio::io::stdout(), wait_for_signal())
            .await?;

        info!("Closing database connections");
        self.bridge.database().shutdown().await;

        if reason == StopReason::Signal {
            // stdin is read on a blocking thread that a signal cannot interrupt.
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

async fn write_responses<W>(
    mut output: W,
    mut rx: mpsc::UnboundedReceiver<String>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
///
/// If a handler cannot be installed that signal is simply never observed.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
