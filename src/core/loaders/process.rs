use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::core::error::{PanelError, PanelResult};
use crate::core::events::LogBuffer;
use crate::core::session::ServerVariant;

/// Line reader over child output that survives bytes which are not UTF-8.
///
/// Invalid sequences are replaced rather than ending the stream, so a
/// pipe is always drained until the writer closes it.
pub(crate) struct LossyLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<BufReader<R>> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }
}

impl<R: AsyncBufRead + Unpin> LossyLines<R> {
    /// Next line without its terminator. `None` at end of stream or on a
    /// read error.
    pub(crate) async fn next_line(&mut self) -> Option<String> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => None,
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(String::from_utf8_lossy(&self.buf).into_owned())
            }
            Err(err) => {
                warn!("Stopped reading process output: {}", err);
                None
            }
        }
    }
}

/// Runs an installer to completion, streaming its output into the terminal
/// feed tagged with `variant`. Any exit code other than 0 is `InstallFailed`.
pub async fn run_installer(
    variant: ServerVariant,
    program: &str,
    args: &[String],
    cwd: &Path,
    logs: &LogBuffer,
) -> PanelResult<()> {
    let failed = |reason: String| PanelError::InstallFailed {
        variant: variant.to_string(),
        reason,
    };

    info!(variant = %variant, "Running installer: {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| failed(format!("could not start {program}: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let forward_stdout = async {
        if let Some(out) = stdout {
            let mut lines = LossyLines::new(out);
            while let Some(line) = lines.next_line().await {
                info!(variant = %variant, "{}", line);
                logs.append(format!("[{variant}] {line}")).await;
            }
        }
    };
    let forward_stderr = async {
        if let Some(err) = stderr {
            let mut lines = LossyLines::new(err);
            while let Some(line) = lines.next_line().await {
                warn!(variant = %variant, "{}", line);
                logs.append(format!("[{variant}] [stderr] {line}")).await;
            }
        }
    };

    let (status, _, _) = tokio::join!(child.wait(), forward_stdout, forward_stderr);
    let status = status.map_err(|e| failed(format!("waiting for installer: {e}")))?;

    if !status.success() {
        let reason = match status.code() {
            Some(code) => format!("installer exited with code {code}"),
            None => "installer terminated by signal".to_string(),
        };
        logs.append(format!("[{variant}] {reason}")).await;
        return Err(failed(reason));
    }

    info!(variant = %variant, "Installer finished");
    Ok(())
}
