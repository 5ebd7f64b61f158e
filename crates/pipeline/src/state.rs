//! Single authoritative holder of the chain's current step
//!
//! Loops never write the step directly. Every change goes through
//! [`StepMachine::transition`], which checks the expected source step and the
//! legal transition table atomically.

use tokio::sync::watch;
use voice_chain_core::Step;

use crate::PipelineError;

pub struct StepMachine {
    session_id: String,
    tx: watch::Sender<Step>,
}

impl StepMachine {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(Step::Started);
        Self {
            session_id: session_id.into(),
            tx,
        }
    }

    pub fn current(&self) -> Step {
        *self.tx.borrow()
    }

    /// Move `from -> to`
    ///
    /// Fails with `InvalidTransition` when the current step is not `from` or
    /// the move is not in the transition table. Nothing changes on failure.
    pub fn transition(&self, from: Step, to: Step) -> Result<(), PipelineError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|step| {
            if *step != from || !from.can_transition_to(to) {
                outcome = Err(PipelineError::InvalidTransition {
                    from,
                    to,
                    current: *step,
                });
                return false;
            }
            *step = to;
            true
        });

        if outcome.is_ok() {
            tracing::debug!(session_id = %self.session_id, %from, %to, "Step transition");
        }
        outcome
    }

    /// Force the terminal step from wherever the chain is. Returns the previous step.
    pub fn stop(&self) -> Step {
        let previous = self.tx.send_replace(Step::Stopped);
        if previous != Step::Stopped {
            tracing::debug!(session_id = %self.session_id, from = %previous, "Step transition to stopped");
        }
        previous
    }

    /// Observe step changes
    pub fn subscribe(&self) -> watch::Receiver<Step> {
        self.tx.subscribe()
    }

    /// Resolve once the current step satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl Fn(Step) -> bool) -> Step {
        let mut rx = self.tx.subscribe();
        let reached = match rx.wait_for(|step| predicate(*step)).await {
            Ok(step) => *step,
            // Sender lives in self, so the channel cannot close while we borrow it
            Err(_) => self.current(),
        };
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_turn_cycle() {
        let steps = StepMachine::new("test");
        assert_eq!(steps.current(), Step::Started);

        steps.transition(Step::Started, Step::Asr).unwrap();
        steps.transition(Step::Asr, Step::Llm).unwrap();
        steps.transition(Step::Llm, Step::Tts).unwrap();
        steps.transition(Step::Tts, Step::Asr).unwrap();
        steps.transition(Step::Asr, Step::Paused).unwrap();
        steps.transition(Step::Paused, Step::Asr).unwrap();
        assert_eq!(steps.current(), Step::Asr);
    }

    #[test]
    fn test_mismatched_source_step() {
        let steps = StepMachine::new("test");
        steps.transition(Step::Started, Step::Asr).unwrap();

        let err = steps.transition(Step::Llm, Step::Asr).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: Step::Llm,
                to: Step::Asr,
                current: Step::Asr
            }
        ));
        assert_eq!(steps.current(), Step::Asr);
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let steps = StepMachine::new("test");
        assert!(steps.transition(Step::Started, Step::Llm).is_err());
        assert_eq!(steps.current(), Step::Started);
    }

    #[test]
    fn test_stop_is_terminal() {
        let steps = StepMachine::new("test");
        steps.transition(Step::Started, Step::Asr).unwrap();

        assert_eq!(steps.stop(), Step::Asr);
        assert_eq!(steps.stop(), Step::Stopped);
        assert!(steps.transition(Step::Stopped, Step::Asr).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_observes_transition() {
        let steps = Arc::new(StepMachine::new("test"));
        steps.transition(Step::Started, Step::Asr).unwrap();
        steps.transition(Step::Asr, Step::Llm).unwrap();

        let waiter = {
            let steps = Arc::clone(&steps);
            tokio::spawn(async move { steps.wait_for(|step| step == Step::Asr).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        steps.transition(Step::Llm, Step::Asr).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, Step::Asr);
    }
}
