//! Bounded self-repair of rejected templates.
//!
//! ```text
//!             safe
//!  Validating ─────▶ Succeeded
//!     │  ▲
//!     │  │ correction received (or call failed)
//!     │  │
//!     ▼  │ unsafe, attempt < max_retries
//!  Repairing
//!
//!  Validating ─────▶ Exhausted      unsafe, attempt == max_retries
//! ```
//!
//! Each repair sends the rejected template, its parameters and the
//! rejection reason back to the generator and parses the answer exactly like
//! a first answer. A correction that cannot be parsed, or a correction call
//! that fails, still uses up its attempt; the next round works from the last
//! template that did parse.

use std::time::Duration;

use crate::error::Rejection;
use crate::generator::{generate_with_timeout, Generator};
use crate::models::{Attempt, Candidate};
use crate::pipeline::CandidateBuilder;
use crate::prompts::PromptBook;
use crate::validate::{SafetyValidator, Verdict};

#[derive(Debug)]
enum State {
    /// `carried` holds a rejection that did not come from validating
    /// `current` (unparseable correction, failed call).
    Validating { carried: Option<Rejection> },
    Repairing(Rejection),
    Succeeded,
    Exhausted(Rejection),
}

#[derive(Debug)]
pub enum RepairOutcome {
    Succeeded {
        candidate: Candidate,
        attempts: Vec<Attempt>,
    },
    Exhausted {
        last_reason: Rejection,
        attempts: Vec<Attempt>,
    },
}

pub struct RepairLoop<'a> {
    pub validator: &'a SafetyValidator,
    pub builder: &'a CandidateBuilder,
    pub generator: &'a dyn Generator,
    pub prompts: &'a PromptBook,
    pub max_retries: u32,
    pub call_timeout: Duration,
}

impl RepairLoop<'_> {
    /// Drives `initial` to a safe candidate or to exhaustion. Issues at most
    /// `max_retries` correction calls.
    pub async fn run(&self, query: &str, initial: Candidate) -> RepairOutcome {
        let mut current = initial;
        let mut attempt: u32 = 0;
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut state = State::Validating { carried: None };

        loop {
            state = match state {
                State::Validating { carried } => {
                    let verdict = match carried {
                        Some(reason) => Err(reason),
                        None => match self.validator.validate_candidate(&current) {
                            Verdict::Safe => Ok(()),
                            Verdict::Unsafe(reason) => Err(reason.into()),
                        },
                    };
                    match verdict {
                        Ok(()) => State::Succeeded,
                        Err(reason) if attempt < self.max_retries => State::Repairing(reason),
                        Err(reason) => State::Exhausted(reason),
                    }
                }
                State::Repairing(reason) => {
                    attempt += 1;
                    let (record, next) = self.repair_once(query, attempt, &mut current, reason).await;
                    attempts.push(record);
                    next
                }
                State::Succeeded => {
                    if attempt > 0 {
                        tracing::info!(attempts = attempt, "template repaired");
                    }
                    return RepairOutcome::Succeeded {
                        candidate: current,
                        attempts,
                    };
                }
                State::Exhausted(last_reason) => {
                    tracing::warn!(
                        attempts = attempt,
                        reason = %last_reason,
                        "repair attempts exhausted"
                    );
                    return RepairOutcome::Exhausted {
                        last_reason,
                        attempts,
                    };
                }
            };
        }
    }

    async fn repair_once(
        &self,
        query: &str,
        number: u32,
        current: &mut Candidate,
        reason: Rejection,
    ) -> (Attempt, State) {
        tracing::info!(
            attempt = number,
            max = self.max_retries,
            reason = %reason,
            "requesting corrected template"
        );

        let mut record = Attempt {
            number,
            template_before: current.template.sql.clone(),
            params_before: current.params.clone(),
            reason: reason.clone(),
            template_after: None,
            params_after: None,
            generator_error: None,
        };

        let prompt = self.prompts.repair_prompt(
            query,
            current.template.as_str(),
            &current.params,
            &reason.to_string(),
        );

        let next = match generate_with_timeout(self.generator, &prompt, self.call_timeout).await {
            Ok(text) => match self.builder.build(&text) {
                Ok(corrected) => {
                    tracing::debug!(
                        attempt = number,
                        sql = %corrected.template.sql,
                        params = %corrected.params.to_json_string(),
                        "correction parsed"
                    );
                    record.template_after = Some(corrected.template.sql.clone());
                    record.params_after = Some(corrected.params.clone());
                    *current = corrected;
                    State::Validating { carried: None }
                }
                Err(rejection) => {
                    tracing::warn!(attempt = number, reason = %rejection, "correction unparseable");
                    State::Validating {
                        carried: Some(rejection),
                    }
                }
            },
            Err(err) => {
                tracing::warn!(attempt = number, error = %err, "correction call failed");
                record.generator_error = Some(err);
                State::Validating {
                    carried: Some(reason),
                }
            }
        };

        (record, next)
    }
}
