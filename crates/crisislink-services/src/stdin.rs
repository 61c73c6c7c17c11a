use futures::future::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

use crisislink_core::error::{CrisisError, Result};
use crisislink_core::traits::InputSource;
use crisislink_core::types::SessionId;

const SERVICE: &str = "stdin";

/// Reads the dispatcher's lines from a terminal, one per turn.
///
/// Blank lines are skipped; end of input is a collaborator failure.
pub struct StdinInput<R = BufReader<tokio::io::Stdin>, W = tokio::io::Stdout> {
    lines: Mutex<Lines<R>>,
    prompt: Mutex<W>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self::from_parts(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdinInput<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn from_parts(reader: R, prompt: W) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
            prompt: Mutex::new(prompt),
        }
    }

    async fn read_line(&self) -> Result<String> {
        {
            let mut out = self.prompt.lock().await;
            out.write_all(b"dispatcher> ").await?;
            out.flush().await?;
        }

        let mut lines = self.lines.lock().await;
        loop {
            match lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(line.trim().to_string()),
                None => return Err(CrisisError::collaborator(SERVICE, "input closed")),
            }
        }
    }
}

impl<R, W> InputSource for StdinInput<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn next_input<'a>(&'a self, _session: &'a SessionId) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.read_line())
    }
}
