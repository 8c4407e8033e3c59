//! ruleset-review — apply the tenant ruleset to every generated proposal.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, StepOutcome};

pub struct RulesetReviewStep;

#[async_trait]
impl PipelineStep for RulesetReviewStep {
    fn name(&self) -> &'static str {
        "ruleset_review"
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        if state.ruleset.is_empty() {
            return Ok(StepOutcome::Skip("tenant ruleset is empty".to_string()));
        }
        if state.proposals.is_empty() {
            return Ok(StepOutcome::Skip("no proposals to review".to_string()));
        }

        let mut rejected = 0usize;
        let mut reviewed = Vec::with_capacity(state.proposals.len());
        for proposal in state.proposals.drain(..) {
            let outcome = ctx
                .ruleset_engine
                .apply(&state.ruleset, proposal, Some(&ctx.cancel))
                .await?;
            if outcome.rejected {
                rejected += 1;
            }
            // Rejected proposals are kept: they commit with status `ignored`
            // and a discard reason, invisible to the pending queue.
            reviewed.push(outcome.proposal);
        }
        state.proposals = reviewed;

        info!(total = state.proposals.len(), rejected, "ruleset review complete");
        Ok(StepOutcome::Continue)
    }
}
