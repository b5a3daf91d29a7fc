//! Terminal front-ends for the toast queue and the confirmation gate.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use ossportable_app::{ConfirmationGate, Severity, ToastEntry, ToastQueue};

/// Prints every new toast to stderr.
pub struct ToastRenderer {
    shown: Arc<Mutex<u64>>,
    task: JoinHandle<()>,
}

impl ToastRenderer {
    pub fn spawn(queue: &ToastQueue) -> Self {
        let shown = Arc::new(Mutex::new(0));
        let mut rx = queue.subscribe();
        let task = {
            let shown = shown.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let entries = rx.borrow_and_update().clone();
                    show_new(&entries, &shown);
                }
            })
        };
        Self { shown, task }
    }

    /// Stop the task and print whatever it has not printed yet.
    pub fn finish(self, queue: &ToastQueue) {
        self.task.abort();
        show_new(&queue.entries(), &self.shown);
    }
}

fn show_new(entries: &[ToastEntry], shown: &Mutex<u64>) {
    let mut last = shown.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let seen = *last;
    for entry in entries.iter().filter(|e| e.id > seen) {
        let marker = match entry.severity {
            Severity::Success => "✓",
            Severity::Error => "✗",
            Severity::Info => "•",
        };
        eprintln!("{} {}", marker, entry.message);
        *last = entry.id;
    }
}

/// Answer confirmation requests from stdin, or always "yes" with `assume_yes`.
///
/// End of input answers "no".
pub fn spawn_prompter(gate: ConfirmationGate, assume_yes: bool) -> JoinHandle<()> {
    let mut rx = gate.subscribe();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while rx.changed().await.is_ok() {
            let Some(prompt) = gate.pending() else {
                continue;
            };
            if assume_yes {
                debug!(message = %prompt.message, "confirmed by --yes");
                gate.respond(true);
                continue;
            }

            eprint!("{}\n{} [y/N] ", prompt.title, prompt.message);
            let answer = match lines.next_line().await {
                Ok(Some(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
                _ => false,
            };
            gate.respond(answer);
        }
    })
}
