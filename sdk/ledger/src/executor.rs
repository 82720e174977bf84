//! Plan execution
//!
//! Drives a [`TransferPlan`] step by step: settle the step, then publish each
//! of its outputs to its owner. Steps run strictly in order. Work already
//! recorded in the plan (a settlement receipt, a posted output) is skipped,
//! which makes a failed plan safe to hand back to [`PlanExecutor::execute`].

use std::sync::Arc;

use tracing::{info, warn};

use nocta_note::MessageKind;

use crate::error::LedgerError;
use crate::plan::{PlanState, TransferPlan};
use crate::publish::NotePublisher;
use crate::services::{MessagingRelay, ProvingSettlementSystem};

pub struct PlanExecutor<S, R> {
    settlement: Arc<S>,
    publisher: NotePublisher<R>,
}

impl<S, R> PlanExecutor<S, R>
where
    S: ProvingSettlementSystem,
    R: MessagingRelay,
{
    pub fn new(settlement: Arc<S>, publisher: NotePublisher<R>) -> Self {
        Self {
            settlement,
            publisher,
        }
    }

    /// Run the plan to completion or to the first failing step.
    ///
    /// On failure the plan is left in `Failed` with the error text as reason
    /// and the error is returned.
    pub async fn execute(&self, plan: &mut TransferPlan) -> Result<(), LedgerError> {
        if let PlanState::Failed { step, reason } = plan.state() {
            info!("Resuming plan at step {} after: {}", step, reason);
            plan.resume()?;
        }

        loop {
            let index = match plan.state() {
                PlanState::Completed => return Ok(()),
                PlanState::StepInFlight(i) => *i,
                _ => plan.begin_step()?,
            };

            if let Err(e) = self.run_step(plan, index).await {
                warn!("Plan step {} failed: {}", index, e);
                plan.fail_step(e.to_string())?;
                return Err(e);
            }
            plan.complete_step()?;
        }
    }

    async fn run_step(&self, plan: &mut TransferPlan, index: usize) -> Result<(), LedgerError> {
        if plan.progress()[index].settlement.is_none() {
            let receipt = self.settlement.submit_transfer(&plan.steps()[index]).await?;
            info!(
                "Step {} settled in {} (input {})",
                index,
                receipt.tx_id,
                plan.steps()[index].nullifier()
            );
            plan.record_settlement(receipt)?;
        }

        for output in 0..2 {
            if !plan.needs_publication(index, output)? {
                continue;
            }
            let key = plan.output_key(index, output)?;
            let note = &plan.steps()[index].outputs[output];
            let ack = self.publisher.publish(note, &key, MessageKind::Transfer).await?;
            plan.record_publication(output, ack)?;
        }
        Ok(())
    }
}
