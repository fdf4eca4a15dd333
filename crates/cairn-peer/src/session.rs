//! The interactive command loop.
//!
//! `run` reads commands until end of input, a `leave` command or an
//! interrupt, and executes them one at a time. Leaving the network is left
//! to the caller. An interrupt also cancels a command that is still waiting
//! on the registry.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;

use cairn_services::{PeerError, PeerNode};

use crate::command::{Command, NeedsName, ParseError, MENU};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Leave,
    EndOfInput,
    Interrupted,
}

/// Read one line, decoding invalid UTF-8 lossily. `None` at end of input.
///
/// A read error is logged and reported as end of input.
pub async fn read_line<R>(input: &mut R) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    match input.read_until(b'\n', &mut raw).await {
        Ok(0) => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(&raw);
            Some(line.trim_end_matches(['\n', '\r']).to_string())
        }
        Err(e) => {
            tracing::warn!(error = %e, "reading commands failed");
            None
        }
    }
}

pub async fn run<R, W>(
    node: &mut PeerNode,
    input: &mut R,
    out: &mut W,
    interrupt: &mut broadcast::Receiver<()>,
) -> std::io::Result<Exit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "{MENU}")?;
    let mut awaiting: Option<NeedsName> = None;

    loop {
        if awaiting.is_none() {
            prompt(out, "Enter your option here: ")?;
        }

        let line = tokio::select! {
            line = read_line(input) => line,
            _ = interrupt.recv() => return Ok(Exit::Interrupted),
        };
        let Some(line) = line else {
            return Ok(Exit::EndOfInput);
        };

        let command = match awaiting.take() {
            Some(complete) => match line.split_whitespace().next() {
                Some(name) => complete(name.to_string()),
                None => continue,
            },
            None => match line.parse::<Command>() {
                Ok(command) => command,
                Err(ParseError::Empty) => continue,
                Err(ParseError::MissingName { prompt: text, complete }) => {
                    prompt(out, text)?;
                    awaiting = Some(complete);
                    continue;
                }
                Err(e) => {
                    writeln!(out, "{e}")?;
                    continue;
                }
            },
        };

        match command {
            Command::Leave => return Ok(Exit::Leave),
            Command::Help => status(node, out)?,
            other => {
                tokio::select! {
                    result = execute(node, other, out) => result?,
                    _ = interrupt.recv() => {
                        writeln!(out, "Interrupted")?;
                        return Ok(Exit::Interrupted);
                    }
                }
            }
        }
    }
}

fn status<W: Write>(node: &PeerNode, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{MENU}")?;
    writeln!(
        out,
        "Peer {} serving from {}",
        node.name(),
        node.content_dir().display()
    )?;
    for item in node.published() {
        writeln!(out, "  {} at {}", item.content(), item.addr())?;
    }
    Ok(())
}

/// Run one command and print its one-line outcome.
async fn execute<W: Write>(node: &mut PeerNode, command: Command, out: &mut W) -> std::io::Result<()> {
    match command {
        Command::List => match node.list().await {
            Ok(listing) => writeln!(out, "Online list:\n{listing}"),
            Err(e) => writeln!(out, "Error: {e}"),
        },

        Command::Publish(content) => match node.publish(&content).await {
            Ok(addr) => writeln!(out, "Registered and listening on {addr} for {content}"),
            Err(PeerError::Rejected(reason)) => writeln!(out, "Server error: {reason}"),
            Err(e) => writeln!(out, "Publish failed: {e}"),
        },

        Command::Download(content) => match node.download(&content).await {
            Ok((hit, bytes)) => {
                writeln!(
                    out,
                    "Downloaded {content} ({bytes} bytes) from {} at {}",
                    hit.publisher, hit.addr
                )?;
                if node.published().iter().any(|item| item.content() == content) {
                    writeln!(out, "Auto-registered downloaded content {content}")?;
                }
                Ok(())
            }
            Err(PeerError::Timeout) => writeln!(out, "No response from index server"),
            Err(PeerError::Rejected(reason)) => writeln!(out, "Index server: {reason}"),
            Err(e) => writeln!(out, "Download failed: {e}"),
        },

        Command::Unpublish(content) => match node.unpublish(&content).await {
            Ok(()) => writeln!(out, "Deregistered: {content}"),
            Err(e) => writeln!(out, "Deregister error: {e}"),
        },

        Command::Leave | Command::Help => Ok(()),
    }
}

pub fn prompt<W: Write>(out: &mut W, text: &str) -> std::io::Result<()> {
    write!(out, "{text}")?;
    out.flush()
}
