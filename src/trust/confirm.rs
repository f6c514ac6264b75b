//! Interactive confirmation of first-contact host keys.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

/// What the operator is asked to confirm.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfirmationPrompt {
    /// Immutable id of the resource being contacted.
    pub instance_id: String,
    /// Display name of the resource.
    pub instance_name: String,
    /// Address the connection goes to.
    pub address: SocketAddr,
    /// Fingerprint of the presented host key.
    pub fingerprint: String,
}

impl fmt::Display for ConfirmationPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "The authenticity of instance {} ({}) at {} can't be established.",
            self.instance_name, self.instance_id, self.address
        )?;
        writeln!(f, "Host key fingerprint is {}.", self.fingerprint)?;
        write!(f, "Are you sure you want to continue connecting (yes/no)? ")
    }
}

/// Line-based channel used to ask an operator whether to trust a key.
///
/// Implementations block until an answer arrives. Anything but an explicit
/// yes counts as a rejection.
pub trait ConfirmationChannel: Send + Sync {
    /// Shows `prompt` and returns the operator's decision.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the prompt cannot be written or
    /// the answer cannot be read.
    fn confirm(&self, prompt: &ConfirmationPrompt) -> io::Result<bool>;
}

/// Returns `true` for an affirmative answer line.
#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    let trimmed = answer.trim();
    trimmed.eq_ignore_ascii_case("yes") || trimmed.eq_ignore_ascii_case("y")
}

fn ask(
    prompt: &ConfirmationPrompt,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> io::Result<bool> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Ok(false);
    }
    Ok(is_affirmative(&answer))
}

/// Confirmation over an arbitrary reader and writer pair.
#[derive(Debug)]
pub struct LineConfirmation<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> LineConfirmation<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    /// Wraps `input` and `output`.
    pub const fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }

    /// Returns the reader and writer.
    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, W> ConfirmationChannel for LineConfirmation<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn confirm(&self, prompt: &ConfirmationPrompt) -> io::Result<bool> {
        let mut guard = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let (input, output) = &mut *guard;
        ask(prompt, input, output)
    }
}

/// Confirmation on the process terminal: prompts on stderr, reads stdin.
///
/// A blocking stdin read cannot be cancelled. When a prompt times out, its
/// reader keeps waiting on stdin and takes the next line typed, so an answer
/// meant for a later prompt is lost and that prompt waits for another line.
/// Embedders that keep prompting after timeouts should supply their own
/// [`ConfirmationChannel`] that can discard a late answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdioConfirmation;

impl ConfirmationChannel for StdioConfirmation {
    fn confirm(&self, prompt: &ConfirmationPrompt) -> io::Result<bool> {
        ask(prompt, &mut io::stdin().lock(), &mut io::stderr().lock())
    }
}
