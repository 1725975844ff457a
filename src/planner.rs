//! Catalogue planning.
//!
//! [`CataloguePlanner::plan`] runs a two-pass protocol against the
//! generation service:
//!
//! 1. **Think pass** — streamed free-form reasoning over the file catalogue.
//! 2. **Plan pass** — streamed request for the JSON plan, given the reasoning.
//!
//! The plan is recovered from the second pass with the extraction chain in
//! [`repo_scribe_core::plan`]. Any failure in either pass or in recovery
//! fails the whole round, and the round is retried under a [`RetryPolicy`].
//!
//! # Retry Strategy
//!
//! Linear backoff: the delay before attempt `k` (k ≥ 2) is
//! `base_delay × (k − 1)`. With the defaults (5 attempts, 5000 ms) the
//! waits are 5s, 10s, 15s and 20s.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use repo_scribe_core::plan::{recover_plan, PlanTree};

use crate::config::PlannerConfig;
use crate::generation::{collect_stream, GenerationService};
use crate::prompts;

/// Bounded linear-backoff retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Wait before the 1-based `attempt`. Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.saturating_sub(1)
    }

    /// Run `op` until it succeeds or attempts run out, returning the last error.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = self.delay_before(attempt);
                debug!(%label, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(%label, attempt, max_attempts = self.max_attempts, error = %format!("{:#}", e), "Attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts were made"));
        Err(err.context(format!(
            "{} failed after {} attempts",
            label, self.max_attempts
        )))
    }
}

/// Inputs to one planning run.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub job_id: String,
    pub working_path: PathBuf,
    pub repository_url: String,
    /// The (possibly simplified) file catalogue.
    pub catalogue: String,
    pub readme: String,
}

pub struct CataloguePlanner<'a> {
    service: &'a dyn GenerationService,
    policy: RetryPolicy,
}

impl<'a> CataloguePlanner<'a> {
    pub fn new(service: &'a dyn GenerationService, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    /// Produce a plan, retrying whole think+plan rounds on failure.
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlanTree> {
        let tree = self
            .policy
            .run("catalogue planning", move |attempt| self.round(request, attempt))
            .await?;

        info!(
            job_id = %request.job_id,
            nodes = tree.len(),
            "Catalogue plan recovered"
        );
        Ok(tree)
    }

    async fn round(&self, request: &PlanRequest, attempt: u32) -> Result<PlanTree> {
        debug!(job_id = %request.job_id, attempt, path = %request.working_path.display(), "Think pass");
        let think = prompts::think_prompt(&request.repository_url, &request.catalogue, &request.readme);
        let reasoning = collect_stream(self.service.complete_streaming(&think).await?)
            .await
            .context("think pass failed")?;

        debug!(job_id = %request.job_id, attempt, reasoning_chars = reasoning.len(), "Plan pass");
        let plan = prompts::plan_prompt(&request.repository_url, &request.catalogue, &reasoning);
        let output = collect_stream(self.service.complete_streaming(&plan).await?)
            .await
            .context("plan pass failed")?;

        Ok(recover_plan(&output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::FragmentStream;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use repo_scribe_core::plan::PLAN_TAG;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails the plan pass until `succeed_on` (1-based round), recording
    /// when each think pass started.
    struct ScriptedService {
        succeed_on: Option<u32>,
        think_started: Mutex<Vec<Instant>>,
        calls: Mutex<u32>,
    }

    impl ScriptedService {
        fn new(succeed_on: Option<u32>) -> Self {
            Self {
                succeed_on,
                think_started: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            }
        }

        fn rounds(&self) -> usize {
            self.think_started.lock().unwrap().len()
        }
    }

    fn fragments(text: String) -> FragmentStream {
        let parts: Vec<Result<String>> = text
            .split_inclusive('\n')
            .map(|s| Ok(s.to_string()))
            .collect();
        stream::iter(parts).boxed()
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("not used")
        }

        async fn complete_streaming(&self, prompt: &str) -> Result<FragmentStream> {
            *self.calls.lock().unwrap() += 1;
            if !prompt.contains("<analysis>") {
                self.think_started.lock().unwrap().push(Instant::now());
                return Ok(fragments("The repo has a CLI\nand a core.\n".into()));
            }
            let round = self.rounds() as u32;
            if Some(round) == self.succeed_on {
                Ok(fragments(format!(
                    "```json\n[]\n```\n<{0}>\n{{\"items\":[{{\"name\":\"Intro\",\"title\":\"getting started\",\"prompt\":\"p\"}}]}}\n</{0}>",
                    PLAN_TAG
                )))
            } else {
                Ok(fragments("I could not decide on a structure.".into()))
            }
        }
    }

    fn request() -> PlanRequest {
        PlanRequest {
            job_id: "job".into(),
            working_path: PathBuf::from("/tmp/repo"),
            repository_url: "https://example.com/acme/tool".into(),
            catalogue: "src/main.rs".into(),
            readme: "# Tool".into(),
        }
    }

    #[test]
    fn linear_backoff_boundaries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(5000));
        assert_eq!(policy.delay_before(5), Duration::from_millis(20000));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_rounds_with_linear_backoff() {
        let service = ScriptedService::new(None);
        let planner = CataloguePlanner::new(&service, RetryPolicy::default());

        let start = Instant::now();
        let err = planner.plan(&request()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("failed after 5 attempts"));

        let starts = service.think_started.lock().unwrap().clone();
        assert_eq!(starts.len(), 5);
        assert_eq!(*service.calls.lock().unwrap(), 10);
        assert_eq!(starts[1] - starts[0], Duration::from_millis(5000));
        assert_eq!(starts[4] - starts[3], Duration::from_millis(20000));
        assert_eq!(starts[4] - start, Duration::from_millis(50000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_round_preferring_the_tag() {
        let service = ScriptedService::new(Some(3));
        let planner = CataloguePlanner::new(&service, RetryPolicy::default());

        let tree = planner.plan(&request()).await.unwrap();
        assert_eq!(service.rounds(), 3);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.items[0].title, "gettingstarted");
    }

    #[tokio::test(start_paused = true)]
    async fn respects_configured_attempts() {
        let service = ScriptedService::new(None);
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
        };
        assert!(CataloguePlanner::new(&service, policy)
            .plan(&request())
            .await
            .is_err());
        assert_eq!(service.rounds(), 2);
    }
}
