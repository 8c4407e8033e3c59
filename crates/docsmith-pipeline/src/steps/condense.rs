//! condense — deterministic whitespace normalisation of proposal text.
//! No model call.

use async_trait::async_trait;

use crate::error::Result;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, StepOutcome};

pub struct CondenseStep;

pub(crate) fn condense_text(text: &str) -> String {
    let normalised = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalised.len());
    let mut blank_run = 0usize;
    for line in normalised.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            // At most one blank line between paragraphs.
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

#[async_trait]
impl PipelineStep for CondenseStep {
    fn name(&self) -> &'static str {
        "condense"
    }

    async fn run(&self, _ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        if state.proposals.is_empty() {
            return Ok(StepOutcome::Skip("no proposals to condense".to_string()));
        }
        for proposal in &mut state.proposals {
            proposal.suggested_text = condense_text(&proposal.suggested_text);
        }
        Ok(StepOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_blank_runs_and_trailing_spaces() {
        let input = "First paragraph.   \r\n\r\n\r\n\r\nSecond paragraph.\n\n\n";
        assert_eq!(condense_text(input), "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn idempotent() {
        let once = condense_text("a\n\n\nb");
        assert_eq!(condense_text(&once), once);
    }
}
