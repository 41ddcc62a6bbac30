//! Suite runner: run every case, report all results at the end
//!
//! Each case gets a fresh [`TestContext`] over the shared environment. Panics
//! are caught so one broken case cannot hide the others, and every case is
//! torn down whether it passed or not.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info, warn};

use mlflow_rbac_common::kube_utils::random_suffix;
use mlflow_rbac_common::Result;

use crate::context::{BaselineResources, CleanupReport, TestContext};
use crate::environment::HarnessEnvironment;
use crate::executor::{run_case, TestCase};

const MAX_ERROR_CHARS: usize = 200;

/// Outcome of one case
#[derive(Clone, Debug)]
pub struct CaseResult {
    /// Case name
    pub name: String,
    /// Whether every step passed
    pub passed: bool,
    /// Wall time including teardown
    pub duration: Duration,
    /// Failure message
    pub error: Option<String>,
    /// Teardown problems; reported, never fatal
    pub cleanup_failures: Vec<String>,
}

/// Results of a whole suite
#[derive(Debug)]
pub struct SuiteSummary {
    /// Suite name
    pub suite: String,
    /// One entry per case, in run order
    pub results: Vec<CaseResult>,
}

impl SuiteSummary {
    /// Number of passing cases
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Number of failing cases
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    /// Log the PASS/FAIL table
    pub fn log(&self) {
        let total: Duration = self.results.iter().map(|r| r.duration).sum();

        info!("========================================");
        info!("  {}", self.suite.to_uppercase());
        info!("========================================");
        for r in &self.results {
            let tag = if r.passed { "PASS" } else { "FAIL" };
            info!("  {tag}  {:60} {:.1}s", r.name, r.duration.as_secs_f64());
            if let Some(e) = &r.error {
                let truncated: String = e.chars().take(MAX_ERROR_CHARS).collect();
                info!("        -> {truncated}");
            }
            for c in &r.cleanup_failures {
                info!("        cleanup: {c}");
            }
        }
        info!("----------------------------------------");
        info!(
            "  {} passed, {} failed ({:.1}s total)",
            self.passed(),
            self.failed(),
            total.as_secs_f64()
        );
        info!("========================================");
    }

    /// `Err` listing failing cases if any failed
    pub fn into_result(self) -> std::result::Result<(), String> {
        let failures: Vec<_> = self
            .results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} case(s) failed in {}: {}",
                failures.len(),
                self.suite,
                failures.join(", ")
            ))
        }
    }
}

/// Create one experiment, one run in it and one registered model per
/// workspace as the administrative identity.
///
/// On failure everything seeded so far, in every workspace, is removed before
/// the error is returned.
pub async fn seed_baseline(env: &HarnessEnvironment) -> Result<BTreeMap<String, BaselineResources>> {
    let mut baseline = BTreeMap::new();
    for scope in env.scopes() {
        let mut seeded = BaselineResources::default();
        let outcome = seed_scope(env, scope, &mut seeded).await;
        baseline.insert(scope.clone(), seeded);

        if let Err(e) = outcome {
            error!(scope = %scope, error = %e, "Baseline seeding failed; removing partial baseline");
            remove_baseline(env, &baseline).await;
            return Err(e);
        }
    }
    Ok(baseline)
}

async fn seed_scope(env: &HarnessEnvironment, scope: &str, seeded: &mut BaselineResources) -> Result<()> {
    let admin = env.admin_client_for(scope);
    let suffix = random_suffix(8);
    seeded.experiment_id = admin
        .create_experiment(&format!("baseline-experiment-{}", suffix))
        .await?;
    seeded.run_id = admin.create_run(&seeded.experiment_id).await?;
    seeded.model_name = admin
        .create_registered_model(&format!("baseline-model-{}", suffix))
        .await?;
    info!(
        scope = %scope,
        experiment_id = %seeded.experiment_id,
        run_id = %seeded.run_id,
        model = %seeded.model_name,
        "Seeded baseline"
    );
    Ok(())
}

/// Delete seeded baselines, skipping anything never created. Never fails.
pub async fn remove_baseline(
    env: &HarnessEnvironment,
    baseline: &BTreeMap<String, BaselineResources>,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    for (scope, resources) in baseline {
        let admin = env.admin_client_for(scope);
        if !resources.model_name.is_empty() {
            report.attempted += 1;
            if let Err(e) = admin.delete_registered_model(&resources.model_name).await {
                report.failures.push(format!(
                    "delete baseline model {} in {}: {}",
                    resources.model_name, scope, e
                ));
            }
        }
        if !resources.run_id.is_empty() {
            report.attempted += 1;
            if let Err(e) = admin.delete_run(&resources.run_id).await {
                report.failures.push(format!(
                    "delete baseline run {} in {}: {}",
                    resources.run_id, scope, e
                ));
            }
        }
        if !resources.experiment_id.is_empty() {
            report.attempted += 1;
            if let Err(e) = admin.delete_experiment(&resources.experiment_id).await {
                report.failures.push(format!(
                    "delete baseline experiment {} in {}: {}",
                    resources.experiment_id, scope, e
                ));
            }
        }
    }
    for f in &report.failures {
        warn!(failure = %f, "Baseline cleanup");
    }
    report
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs cases against one environment and collects results
pub struct SuiteRunner {
    suite: String,
    env: Arc<HarnessEnvironment>,
    baseline: BTreeMap<String, BaselineResources>,
    results: Vec<CaseResult>,
}

impl SuiteRunner {
    /// Runner over an already-seeded baseline
    pub fn new(
        suite: impl Into<String>,
        env: Arc<HarnessEnvironment>,
        baseline: BTreeMap<String, BaselineResources>,
    ) -> Self {
        Self {
            suite: suite.into(),
            env,
            baseline,
            results: Vec::new(),
        }
    }

    /// Seed the baseline, then build a runner over it
    pub async fn seeded(suite: impl Into<String>, env: Arc<HarnessEnvironment>) -> Result<Self> {
        let baseline = seed_baseline(&env).await?;
        Ok(Self::new(suite, env, baseline))
    }

    /// Run one case in a fresh context and tear it down afterwards
    pub async fn run(&mut self, case: &TestCase) -> &CaseResult {
        info!("{}", "=".repeat(80));
        info!(case = %case.name, steps = case.steps.len(), "Starting case");

        let start = Instant::now();
        let mut ctx = TestContext::new(self.env.clone(), self.baseline.clone());
        let outcome = AssertUnwindSafe(run_case(case, &mut ctx)).catch_unwind().await;

        let (passed, error) = match outcome {
            Ok(Ok(_report)) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(panic) => (false, Some(format!("PANIC: {}", panic_message(panic)))),
        };

        let cleanup = ctx.teardown().await;
        match &error {
            None => info!(case = %case.name, "Case passed"),
            Some(e) => error!(case = %case.name, error = %e, "Case failed"),
        }

        self.results.push(CaseResult {
            name: case.name.clone(),
            passed,
            duration: start.elapsed(),
            error,
            cleanup_failures: cleanup.failures,
        });
        &self.results[self.results.len() - 1]
    }

    /// Run every case in order
    pub async fn run_all(&mut self, cases: &[TestCase]) {
        for case in cases {
            self.run(case).await;
        }
    }

    /// Remove the baseline, log the summary and hand it back
    pub async fn finish(self) -> SuiteSummary {
        remove_baseline(&self.env, &self.baseline).await;
        let summary = SuiteSummary {
            suite: self.suite,
            results: self.results,
        };
        summary.log();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::MockAuthorizationBackend;
    use crate::environment::TrackingClientFactory;
    use crate::identity::{Credential, MockIdentityBackend};
    use crate::tracking::{MockTrackingClient, TrackingClient};
    use crate::verifier::VerifierConfig;
    use mlflow_rbac_common::Error;
    use std::sync::Mutex;

    /// Admin clients that seed successfully except where `fail_model_in` or
    /// `fail_experiment_in` names the workspace; deletions are recorded
    struct SeedingFactory {
        fail_experiment_in: Option<&'static str>,
        fail_model_in: Option<&'static str>,
        deleted: Arc<Mutex<Vec<String>>>,
    }

    impl TrackingClientFactory for SeedingFactory {
        fn client_for(&self, _: &str, _: &Credential, workspace: &str) -> Arc<dyn TrackingClient> {
            let ws = workspace.to_string();
            let mut client = MockTrackingClient::new();

            let fail = self.fail_experiment_in == Some(workspace);
            let id = format!("exp-{ws}");
            client.expect_create_experiment().returning(move |_| {
                if fail {
                    Err(Error::tracking("create_experiment", 500, "boom"))
                } else {
                    Ok(id.clone())
                }
            });
            let id = format!("run-{ws}");
            client
                .expect_create_run()
                .returning(move |_| Ok(id.clone()));
            let fail = self.fail_model_in == Some(workspace);
            let name = format!("model-{ws}");
            client.expect_create_registered_model().returning(move |_| {
                if fail {
                    Err(Error::tracking("create_registered_model", 503, "unavailable"))
                } else {
                    Ok(name.clone())
                }
            });

            let log = self.deleted.clone();
            client.expect_delete_registered_model().returning(move |name| {
                log.lock().unwrap().push(name.to_string());
                Ok(())
            });
            let log = self.deleted.clone();
            client.expect_delete_run().returning(move |id| {
                log.lock().unwrap().push(id.to_string());
                Ok(())
            });
            let log = self.deleted.clone();
            client.expect_delete_experiment().returning(move |id| {
                log.lock().unwrap().push(id.to_string());
                Ok(())
            });
            Arc::new(client)
        }
    }

    fn seeding_env(factory: SeedingFactory) -> HarnessEnvironment {
        HarnessEnvironment::new(
            vec!["ws1".to_string(), "ws2".to_string()],
            Arc::new(MockAuthorizationBackend::new()),
            Arc::new(MockIdentityBackend::new()),
            Arc::new(factory),
            Credential::unvalidated("admin"),
            VerifierConfig::default(),
        )
    }

    #[tokio::test]
    async fn seeding_creates_experiment_run_and_model_per_workspace() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let env = seeding_env(SeedingFactory {
            fail_experiment_in: None,
            fail_model_in: None,
            deleted: deleted.clone(),
        });

        let baseline = seed_baseline(&env).await.unwrap();
        assert_eq!(
            baseline["ws2"],
            BaselineResources {
                experiment_id: "exp-ws2".to_string(),
                run_id: "run-ws2".to_string(),
                model_name: "model-ws2".to_string(),
            }
        );
        assert!(deleted.lock().unwrap().is_empty());

        let report = remove_baseline(&env, &baseline).await;
        assert_eq!(report.attempted, 6);
        assert!(report.is_clean());
    }

    /// Story: the second workspace cannot register its model; the first
    /// workspace's baseline and the second's experiment and run are removed
    /// before the error surfaces
    #[tokio::test]
    async fn story_failed_seeding_removes_partial_baseline() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let env = seeding_env(SeedingFactory {
            fail_experiment_in: None,
            fail_model_in: Some("ws2"),
            deleted: deleted.clone(),
        });

        let err = seed_baseline(&env).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"), "{err}");

        let deleted = deleted.lock().unwrap();
        assert_eq!(
            *deleted,
            vec!["model-ws1", "run-ws1", "exp-ws1", "run-ws2", "exp-ws2"]
        );
    }

    #[tokio::test]
    async fn failure_before_anything_is_created_deletes_nothing() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let env = seeding_env(SeedingFactory {
            fail_experiment_in: Some("ws1"),
            fail_model_in: None,
            deleted: deleted.clone(),
        });

        assert!(seed_baseline(&env).await.is_err());
        assert!(deleted.lock().unwrap().is_empty());
    }

    fn result(name: &str, passed: bool) -> CaseResult {
        CaseResult {
            name: name.to_string(),
            passed,
            duration: Duration::from_millis(10),
            error: (!passed).then(|| "boom".to_string()),
            cleanup_failures: vec![],
        }
    }

    #[test]
    fn summary_counts_and_lists_failures() {
        let summary = SuiteSummary {
            suite: "rbac".to_string(),
            results: vec![result("a", true), result("b", false), result("c", false)],
        };
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.failed(), 2);
        let err = summary.into_result().unwrap_err();
        assert_eq!(err, "2 case(s) failed in rbac: b, c");
    }

    #[test]
    fn all_passing_summary_is_ok() {
        let summary = SuiteSummary {
            suite: "rbac".to_string(),
            results: vec![result("a", true)],
        };
        summary.log();
        assert!(summary.into_result().is_ok());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }
}
