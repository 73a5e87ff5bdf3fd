//! Turning operation results into something a person reads.

use std::io::Write;
use std::sync::Mutex;

use crate::error::RelocationResult;
use crate::service::Operation;

/// Receives the terminal result of every operation.
pub trait ResultReporter: Send + Sync {
    fn report(&self, operation: Operation, result: &RelocationResult);

    fn reboot_failed(&self, message: &str);
}

pub fn render(operation: Operation, result: &RelocationResult) -> String {
    match (operation, result) {
        (Operation::Reboot { .. }, Ok(())) => format!("{} issued.", operation),
        (_, Ok(())) => format!(
            "{} complete. Reboot your device for the changes to take effect.",
            operation
        ),
        (_, Err(e)) => format!("{} failed ({}): {}", operation, e.kind, e.message),
    }
}

/// Writes reports as plain lines; failures go to the error stream.
pub struct ConsoleReporter<O: Write + Send, E: Write + Send> {
    out: Mutex<O>,
    err: Mutex<E>,
}

impl ConsoleReporter<std::io::Stdout, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<O: Write + Send, E: Write + Send> ConsoleReporter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
        }
    }

    fn write_line<W: Write>(stream: &Mutex<W>, line: &str) {
        if let Ok(mut w) = stream.lock() {
            let _ = writeln!(w, "{}", line);
        }
    }

    pub fn into_inner(self) -> (O, E) {
        let out = self.out.into_inner().unwrap_or_else(|p| p.into_inner());
        let err = self.err.into_inner().unwrap_or_else(|p| p.into_inner());
        (out, err)
    }
}

impl<O: Write + Send, E: Write + Send> ResultReporter for ConsoleReporter<O, E> {
    fn report(&self, operation: Operation, result: &RelocationResult) {
        let line = render(operation, result);
        match result {
            Ok(()) => Self::write_line(&self.out, &line),
            Err(_) => Self::write_line(&self.err, &line),
        }
    }

    fn reboot_failed(&self, message: &str) {
        Self::write_line(&self.err, message);
    }
}
