//! Fix Requester: turns one error group into a candidate patch via the LLM.
//!
//! The prompt carries the group's errors and a line-numbered view of the file
//! (whole, or header plus windows around the errors). Two answer formats are
//! accepted, checked in order:
//!
//! 1. a JSON [`StructuredResponse`] (bare or in a ```json fence), composed
//!    onto the current content;
//! 2. one fenced code block holding the complete file, only when the whole
//!    file was in the prompt.
//!
//! Anything else becomes [`NoSuggestion`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::FixLoopConfig;
use crate::context::{language_for, source_context, SourceContext};
use crate::error::{LlmError, NoSuggestion};
use crate::feedback::classifier::ErrorGroup;
use crate::patch::{compose, Patch, StructuredResponse};

/// Chat-completion style backend. `Ok(None)` means the model answered with
/// no content.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Option<String>, LlmError>;
}

/// One fix request for one group.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    pub group: &'a ErrorGroup,
    /// Current content of the group's file.
    pub source: &'a str,
    /// 1-based request number for this group.
    pub attempt: u32,
    /// Why the previous proposal for this group went nowhere.
    pub previous_failure: Option<&'a str>,
}

#[async_trait]
pub trait FixRequester: Send + Sync {
    async fn request_fix(&self, request: &FixRequest<'_>) -> Result<Patch, NoSuggestion>;
}

const PRESERVATION_RULES: &str = "\
- Change only what is needed to make the listed errors go away on the target JDK.
- Keep behaviour identical: control flow, signatures, exception handling, null handling and concurrency stay as they are.
- Replace removed or internal APIs with their supported equivalents (for example javax.xml.bind to jakarta.xml.bind) and adjust imports accordingly.
- Prefer explicit types over `var`.
- Do not reformat, reorder or rename unrelated code.";

const RESPONSE_FORMAT: &str = r#"Answer with a JSON object and nothing else:
{
  "summary": "one sentence",
  "changes": [
    {
      "reason": "why this change fixes an error",
      "location": {"file_path": "<path>", "start_line": 12, "end_line": 12},
      "kind": "update",
      "before": "exact current text of lines start_line..=end_line",
      "after": "replacement text"
    }
  ]
}
`kind` is "insert" (insert `after` before start_line), "update" or "delete". Line numbers are 1-based and inclusive and refer to the numbered source above; do not copy the numbers into `before` or `after`."#;

/// Default requester backed by an [`LlmClient`].
pub struct LlmFixRequester {
    client: Arc<dyn LlmClient>,
    target_jdk: String,
    context_lines: usize,
    max_full_file_bytes: usize,
    max_prompt_bytes: usize,
    max_errors_per_group: usize,
    extra_prompt: Option<String>,
    timeout: Duration,
}

impl LlmFixRequester {
    pub fn new(client: Arc<dyn LlmClient>, config: &FixLoopConfig) -> Self {
        Self {
            client,
            target_jdk: config.target_jdk.clone(),
            context_lines: config.context_lines,
            max_full_file_bytes: config.max_full_file_bytes,
            max_prompt_bytes: config.max_prompt_bytes,
            max_errors_per_group: config.max_errors_per_group,
            extra_prompt: config.extra_prompt.clone(),
            timeout: config.fix_timeout(),
        }
    }

    /// Build the prompt and report whether the whole file is in it.
    pub fn build_prompt(&self, request: &FixRequest<'_>) -> Result<(String, bool), NoSuggestion> {
        let file = request
            .group
            .file
            .as_deref()
            .ok_or_else(|| NoSuggestion::new("error group has no file"))?;
        let language = language_for(file);
        let lines = request.group.lines();

        let mut head = format!(
            "You are fixing build errors in a {language} file after the project was moved to JDK {}.\n\n",
            self.target_jdk
        );
        head.push_str(&format!("## File\n{}\n\n## Build errors\n", file.display()));
        for error in request.group.errors.iter().take(self.max_errors_per_group) {
            let location = error.line.map(|l| format!("line {l}")).unwrap_or_else(|| "file".into());
            let mut message = error.raw_message.lines();
            head.push_str(&format!(
                "- {location} [{}]: {}\n",
                error.kind,
                message.next().unwrap_or("")
            ));
            for extra in message {
                head.push_str(&format!("    {extra}\n"));
            }
        }
        let hidden = request.group.errors.len().saturating_sub(self.max_errors_per_group);
        if hidden > 0 {
            head.push_str(&format!("- ... and {hidden} more\n"));
        }
        if let Some(previous) = request.previous_failure {
            head.push_str(&format!(
                "\n## Previous attempt\nAttempt {} for this file was not accepted: {previous}\nPropose a different fix.\n",
                request.attempt.saturating_sub(1)
            ));
        }
        head.push_str(&format!("\n## Rules\n{PRESERVATION_RULES}\n"));
        if let Some(extra) = self.extra_prompt.as_deref().filter(|e| !e.trim().is_empty()) {
            head.push_str(&format!("\n{}\n", extra.trim()));
        }

        let mut tail = format!("\n## Response format\n{RESPONSE_FORMAT}\n");

        let mut ctx = source_context(
            request.source,
            &lines,
            self.context_lines,
            self.max_full_file_bytes,
        );
        let fixed = head.len() + tail.len() + 64;
        if ctx.whole_file && fixed + ctx.sections[0].len() > self.max_prompt_bytes && !lines.is_empty() {
            ctx = source_context(request.source, &lines, self.context_lines, 0);
        }
        if ctx.whole_file {
            tail.push_str(
                "Alternatively, reply with the complete corrected file in a single fenced code block.\n",
            );
        }

        let body = self.fit_sections(&ctx, language, self.max_prompt_bytes.saturating_sub(fixed))?;
        Ok((format!("{head}{body}{tail}"), ctx.whole_file))
    }

    /// Source block with trailing sections dropped to fit `budget` bytes.
    fn fit_sections(
        &self,
        ctx: &SourceContext,
        language: &str,
        budget: usize,
    ) -> Result<String, NoSuggestion> {
        let title = if ctx.whole_file {
            "Source (complete file, line-numbered)"
        } else {
            "Source excerpts (line-numbered)"
        };
        let mut kept: Vec<&str> = Vec::new();
        let mut used = 0;
        for section in &ctx.sections {
            let cost = section.len() + 8;
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(section);
        }
        if kept.is_empty() {
            return Err(NoSuggestion::new("source context does not fit the prompt budget"));
        }
        if kept.len() < ctx.sections.len() {
            tracing::debug!(
                kept = kept.len(),
                total = ctx.sections.len(),
                "Dropped source windows to fit prompt budget"
            );
        }
        Ok(format!(
            "\n## {title}\n```{language}\n{}\n```\n",
            kept.join("\n    ...\n")
        ))
    }
}

#[async_trait]
impl FixRequester for LlmFixRequester {
    async fn request_fix(&self, request: &FixRequest<'_>) -> Result<Patch, NoSuggestion> {
        let (prompt, whole_file) = self.build_prompt(request)?;
        let file = request
            .group
            .file
            .as_deref()
            .ok_or_else(|| NoSuggestion::new("error group has no file"))?;

        tracing::info!(
            group = %request.group.key,
            attempt = request.attempt,
            prompt_bytes = prompt.len(),
            "Requesting fix"
        );

        let answer = match tokio::time::timeout(self.timeout, self.client.complete(&prompt)).await {
            Err(_) => {
                return Err(NoSuggestion::new(format!(
                    "fix request timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(NoSuggestion::new(e.to_string())),
            Ok(Ok(None)) => return Err(NoSuggestion::new("model returned no content")),
            Ok(Ok(Some(text))) => text,
        };

        let proposed = proposed_content(&answer, file, request.source, whole_file)?;
        if proposed == request.source {
            return Err(NoSuggestion::new("suggested patch does not change the file"));
        }
        Ok(Patch::new(file, request.source, proposed))
    }
}

/// Interpret a model answer as new content for `file`.
pub fn proposed_content(
    answer: &str,
    file: &Path,
    source: &str,
    whole_file: bool,
) -> Result<String, NoSuggestion> {
    if let Some(response) = extract_json_block(answer)
        .and_then(|json| serde_json::from_str::<StructuredResponse>(json).ok())
    {
        let changes = response.changes_for(file);
        if changes.is_empty() {
            return Err(NoSuggestion::new(format!(
                "response contained no changes for {}",
                file.display()
            )));
        }
        return compose(source, &changes)
            .map_err(|e| NoSuggestion::new(format!("changes could not be applied: {e}")));
    }

    if whole_file {
        if let Some(code) = single_fenced_block(answer) {
            return Ok(match_trailing_newline(code, source));
        }
    }
    Err(NoSuggestion::new("response was neither a change set nor a complete file"))
}

/// ```json fenced block, else the outermost `{ ... }`.
fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Some(text[json_start..json_start + end].trim());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Body of the only fenced code block in `text`.
fn single_fenced_block(text: &str) -> Option<&str> {
    if text.matches("```").count() != 2 {
        return None;
    }
    let open = text.find("```")?;
    let body_start = open + text[open..].find('\n')? + 1;
    let close = body_start + text[body_start..].find("```")?;
    Some(text[body_start..close].trim_end_matches(['\n', '\r']))
}

fn match_trailing_newline(code: &str, source: &str) -> String {
    let eol = if source.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out = code.replace("\r\n", "\n");
    if eol == "\r\n" {
        out = out.replace('\n', "\r\n");
    }
    if source.ends_with('\n') {
        out.push_str(eol);
    }
    out
}
