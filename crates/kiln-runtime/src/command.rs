//! Cancellable external commands with output routed to the build log.

use crate::backend::BuildContext;
use crate::RuntimeError;
use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, trace};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn render(program: &str, args: &[OsString]) -> String {
    let mut rendered = program.to_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

/// Run `program` to completion and return its trimmed stdout.
///
/// The command line goes to the build log, followed by each line of output
/// as the child writes it. Cancelling the context kills the child.
pub async fn run<I, S>(ctx: &BuildContext, program: &str, args: I) -> Result<String, RuntimeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
    let rendered = render(program, &args);
    ctx.log(format!("$ {rendered}"));

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RuntimeError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = async {
        let (stdout, stderr) = tokio::join!(stream_lines(ctx, stdout), stream_lines(ctx, stderr));
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout?, stderr?))
    };

    let (status, stdout, stderr) = tokio::select! {
        biased;
        () = ctx.cancel_token().cancelled() => {
            debug!("cancelled: {rendered}");
            return Err(RuntimeError::Cancelled);
        }
        finished = finished => finished?,
    };

    if !status.success() {
        return Err(RuntimeError::CommandFailed {
            command: rendered,
            status: status.to_string(),
            stderr: stderr.trim().to_owned(),
        });
    }
    Ok(stdout.trim().to_owned())
}

/// Log every line read from `pipe` and return them all, newline-joined.
async fn stream_lines<R>(ctx: &BuildContext, pipe: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(pipe) = pipe else {
        return Ok(collected);
    };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(collected);
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        ctx.log(line);
        collected.push_str(line);
        collected.push('\n');
    }
}

/// Run a short query command outside any build.
///
/// Returns `None` if the program is missing, fails, or does not finish in time.
pub async fn probe(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(PROBE_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        }
        Ok(Ok(output)) => {
            trace!("{program} exited with {}", output.status);
            None
        }
        Ok(Err(e)) => {
            trace!("{program} could not run: {e}");
            None
        }
        Err(_) => {
            debug!("{program} timed out");
            None
        }
    }
}
