//! Interactive review in the terminal.
//!
//! Shows the triggering errors and the unified diff, then asks for
//! approve / reject / edit / quit. Editing opens `$EDITOR` on the proposed
//! content. Quitting, or Ctrl-C while the prompt owns the terminal, cancels
//! the whole run.

use std::io;

use async_trait::async_trait;
use buildfix::{ReviewCollaborator, ReviewDecision, ReviewRequest};
use dialoguer::{theme::ColorfulTheme, Editor, Select};
use tokio_util::sync::CancellationToken;

const CHOICES: [&str; 4] = ["Approve", "Reject", "Edit, then approve", "Quit"];
const QUIT: usize = 3;

#[derive(Debug, Clone)]
pub struct TerminalReviewer {
    cancel: CancellationToken,
}

impl TerminalReviewer {
    /// `cancel` is cancelled when the user quits at the prompt.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

/// Text shown before the prompt.
pub fn render_request(request: &ReviewRequest<'_>) -> String {
    let mut out = String::new();
    match request.error_group {
        Some(group) => {
            out.push_str(&format!(
                "Fix for {} ({} error(s)):\n",
                group.key,
                group.errors.len()
            ));
            for error in &group.errors {
                out.push_str(&format!(
                    "  {}: {}\n",
                    error.display_location(),
                    error.headline()
                ));
            }
        }
        None => out.push_str(&format!(
            "Planned change to {}:\n",
            request.patch.target_file.display()
        )),
    }
    out.push('\n');
    out.push_str(&request.patch.diff_summary);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Map a menu choice (and editor result) to a decision; `None` means quit.
/// An edit that is aborted or leaves the proposal unchanged keeps the
/// proposal.
pub fn decision_for(
    choice: usize,
    proposed: &str,
    edited: Option<String>,
) -> Option<ReviewDecision> {
    let decision = match choice {
        0 => ReviewDecision::Approve,
        2 => match edited {
            Some(content) if content != proposed => ReviewDecision::EditAndApprove(content),
            _ => ReviewDecision::Approve,
        },
        QUIT => return None,
        _ => ReviewDecision::Reject,
    };
    Some(decision)
}

/// Ctrl-C in raw mode comes back from dialoguer as an interrupted read.
pub fn is_interrupt(err: &dialoguer::Error) -> bool {
    match err {
        dialoguer::Error::IO(e) => e.kind() == io::ErrorKind::Interrupted,
    }
}

fn prompt(rendered: &str, proposed: &str) -> dialoguer::Result<Option<ReviewDecision>> {
    eprintln!("{rendered}");
    let theme = ColorfulTheme::default();
    let choice = Select::with_theme(&theme)
        .with_prompt("Apply this patch?")
        .items(&CHOICES)
        .default(0)
        .interact()?;
    let edited = if choice == 2 {
        Editor::new().extension(".txt").edit(proposed)?
    } else {
        None
    };
    Ok(decision_for(choice, proposed, edited))
}

#[async_trait]
impl ReviewCollaborator for TerminalReviewer {
    async fn review(&self, request: &ReviewRequest<'_>) -> ReviewDecision {
        let rendered = render_request(request);
        let proposed = request.patch.proposed_content.clone();
        let file = request.patch.target_file.display().to_string();

        match tokio::task::spawn_blocking(move || prompt(&rendered, &proposed)).await {
            Ok(Ok(Some(decision))) => decision,
            Ok(Ok(None)) => {
                tracing::warn!(%file, "Quit at review, stopping the run");
                self.cancel.cancel();
                ReviewDecision::Reject
            }
            Ok(Err(e)) if is_interrupt(&e) => {
                tracing::warn!(%file, "Interrupted at review, stopping the run");
                self.cancel.cancel();
                ReviewDecision::Reject
            }
            Ok(Err(e)) => {
                tracing::warn!(%file, error = %e, "Review prompt failed, rejecting patch");
                ReviewDecision::Reject
            }
            Err(e) => {
                tracing::warn!(%file, error = %e, "Review task failed, rejecting patch");
                ReviewDecision::Reject
            }
        }
    }
}
