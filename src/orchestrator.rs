//! Construct Orchestrator: the state machine driving INVESTIGATE,
//! BUILD, VERIFY, DECOMPOSE to completion, with circuit breakers and
//! the terminal git commit.

use std::path::PathBuf;
use std::time::Instant;

use crate::agent::{AgentDriver, CancelToken};
use crate::cache::SimpleFilter;
use crate::config::{Config, Metrics};
use crate::error::{RalphError, Result};
use crate::git;
use crate::log::{PlanEvent, StageEventFields};
use crate::prioritize;
use crate::rejection_analyzer;
use crate::stages::{self, Outcome, Stage, StageResult};
use crate::store::PlanStore;
use crate::types::{TicketStatus, TicketType};

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Complete { tasks_done: u32 },
    Aborted { reason: String },
    Cancelled,
}

pub struct Orchestrator {
    pub store: PlanStore,
    pub driver: AgentDriver,
    pub config: Config,
    pub metrics: Metrics,
    pub cwd: PathBuf,
    pub project_rules: String,
    pub spec_path: String,
    pub cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        store: PlanStore,
        driver: AgentDriver,
        config: Config,
        cwd: impl Into<PathBuf>,
        project_rules: impl Into<String>,
        spec_path: impl Into<String>,
    ) -> Self {
        Orchestrator {
            store,
            driver,
            config,
            metrics: Metrics::default(),
            cwd: cwd.into(),
            project_rules: project_rules.into(),
            spec_path: spec_path.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Entry rule: the store condition that decides the next stage.
    async fn determine_stage(&self) -> Result<Stage> {
        let any_killed = self
            .store
            .list_tickets_filtered(&SimpleFilter {
                kill_reason_set: Some(true),
                ..Default::default()
            })
            .await?;
        if !any_killed.is_empty() {
            return Ok(Stage::Decompose);
        }

        let pending_issues = self
            .store
            .list_tickets_filtered(&SimpleFilter {
                ticket_type: Some(TicketType::Issue),
                status: Some(TicketStatus::Pending),
                ..Default::default()
            })
            .await?;
        if !pending_issues.is_empty() {
            return Ok(Stage::Investigate);
        }

        let pending_tasks = self
            .store
            .list_tickets_filtered(&SimpleFilter {
                ticket_type: Some(TicketType::Task),
                status: Some(TicketStatus::Pending),
                ..Default::default()
            })
            .await?;
        if !pending_tasks.is_empty() {
            let ready = stages::build::ready_tasks(&self.store, &pending_tasks).await?;
            if !ready.is_empty() {
                return Ok(Stage::Build);
            }
        }

        let done_tasks = self
            .store
            .list_tickets_filtered(&SimpleFilter {
                ticket_type: Some(TicketType::Task),
                status: Some(TicketStatus::Done),
                ..Default::default()
            })
            .await?;
        if !done_tasks.is_empty() {
            return Ok(Stage::Verify);
        }

        if pending_tasks.is_empty() && pending_issues.is_empty() {
            return Ok(Stage::Complete);
        }

        // Pending tasks remain, all blocked on unresolved deps, and
        // nothing else is actionable: wait on VERIFY to unblock them.
        Ok(Stage::Verify)
    }

    async fn run_stage(&self, stage: Stage) -> Result<StageResult> {
        match stage {
            Stage::Investigate => {
                stages::investigate::run(&self.store, &self.driver, &self.config, &self.cwd, &self.cancel)
                    .await
            }
            Stage::Build => {
                stages::build::run(
                    &self.store,
                    &self.driver,
                    &self.config,
                    &self.cwd,
                    &self.project_rules,
                    &self.cancel,
                )
                .await
            }
            Stage::Verify => {
                stages::verify::run(
                    &self.store,
                    &self.driver,
                    &self.config,
                    &self.cwd,
                    &self.spec_path,
                    &self.cancel,
                )
                .await
            }
            Stage::Decompose => {
                stages::decompose::run(&self.store, &self.driver, &self.config, &self.cwd, &self.cancel)
                    .await
            }
            Stage::Complete => unreachable!("COMPLETE is handled by run(), not run_stage"),
        }
    }

    pub async fn run(&mut self) -> Result<SessionOutcome> {
        let start = Instant::now();
        let mut iterations = 0u32;

        loop {
            if self.cancel.is_requested() {
                tracing::info!("orchestrator cancelled");
                return Ok(SessionOutcome::Cancelled);
            }

            iterations += 1;
            if iterations >= self.config.max_iterations {
                self.append_breaker_event("max_iterations exceeded").await?;
                return Ok(SessionOutcome::Aborted {
                    reason: "max_iterations exceeded".to_string(),
                });
            }
            if self.metrics.exceeds_cost_cap(self.config.session_cost_cap) {
                self.append_breaker_event("session_cost_cap exceeded").await?;
                return Ok(SessionOutcome::Aborted {
                    reason: "session_cost_cap exceeded".to_string(),
                });
            }

            let stage = self.determine_stage().await?;
            tracing::info!(
                stage = stage.as_str(),
                iteration = iterations,
                consecutive_failures = self.metrics.consecutive_failures,
                "entering stage"
            );

            if stage == Stage::Complete {
                return self.complete(start, iterations).await;
            }

            self.store
                .append_event(&PlanEvent::Stage(StageEventFields {
                    stage: stage.as_str().to_string(),
                }))
                .await?;

            match self.run_stage(stage).await {
                Ok(result) => {
                    self.store.append_events(&result.new_events).await?;
                    self.metrics.record_usage(
                        result.usage.tokens_in,
                        result.usage.tokens_out,
                        result.usage.cost,
                    );

                    match result.outcome {
                        Outcome::Success => self.metrics.record_success(),
                        Outcome::Failure => {
                            self.metrics.record_failure(stage.as_str());
                            if self.trip_failure_breaker(stage).await? {
                                return Ok(SessionOutcome::Aborted {
                                    reason: "consecutive_failures reached max_failures".to_string(),
                                });
                            }
                        }
                        Outcome::Skip => {}
                    }

                    if stage == Stage::Verify {
                        let analyzer_events =
                            rejection_analyzer::analyze(&self.store, &self.config).await?;
                        self.store.append_events(&analyzer_events).await?;
                    }
                }
                Err(RalphError::Cancelled) => {
                    tracing::info!("orchestrator cancelled mid-stage");
                    return Ok(SessionOutcome::Cancelled);
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, stage = stage.as_str(), "stage recoverable failure");
                    self.metrics.record_failure(stage.as_str());
                    if self.trip_failure_breaker(stage).await? {
                        return Ok(SessionOutcome::Aborted {
                            reason: "consecutive_failures reached max_failures".to_string(),
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, stage = stage.as_str(), "stage errored");
                    return Ok(SessionOutcome::Aborted {
                        reason: format!("{stage:?} failed: {e}"),
                    });
                }
            }
        }
    }

    async fn trip_failure_breaker(&mut self, stage: Stage) -> Result<bool> {
        if self.metrics.consecutive_failures >= self.config.max_failures {
            self.append_breaker_event(&format!(
                "{} consecutive failures in {}",
                self.metrics.consecutive_failures,
                stage.as_str()
            ))
            .await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn append_breaker_event(&self, reason: &str) -> Result<()> {
        tracing::warn!(reason, "breaker tripped, aborting session");
        self.store
            .append_event(&PlanEvent::Stage(StageEventFields {
                stage: format!("breaker:{reason}"),
            }))
            .await
    }

    async fn complete(&mut self, start: Instant, iterations: u32) -> Result<SessionOutcome> {
        let report = self.store.validate().await?;
        if !report.valid {
            tracing::warn!(errors = ?report.errors, "validation failed at COMPLETE, not committing");
            return Ok(SessionOutcome::Aborted {
                reason: format!("plan invalid at completion: {}", report.errors.join("; ")),
            });
        }

        // Run a final prioritization pass so anything left pending
        // carries a sensible priority, even though nothing will build it.
        let reprioritized = prioritize::prioritize(&self.store).await?;
        self.store.append_events(&reprioritized).await?;

        let tasks_done = self.metrics.iterations_completed;
        let elapsed = start.elapsed();
        let body = format!(
            "tasks completed: {tasks_done}\nduration: {:.0}s\ncost: ${:.4}\niterations: {iterations}",
            elapsed.as_secs_f64(),
            self.metrics.total_cost,
        );

        let commit_result = git::commit(
            &self.store.repo_root,
            &self.store.log_path,
            &self.config.commit_prefix,
            &format!("complete {}", self.spec_path),
            &body,
        );

        if let Err(e) = commit_result {
            tracing::warn!(error = %e, "final commit failed");
        }

        tracing::info!(tasks_done, iterations, "construct session complete");
        Ok(SessionOutcome::Complete { tasks_done })
    }
}
