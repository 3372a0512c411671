//! Main test runner that orchestrates the server, Playwright and file checks

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use testbed_common::SoftAssertions;
use tracing::{debug, error, info};

use crate::error::{E2eError, E2eResult};
use crate::files::wait_for_download;
use crate::playwright::{PlaywrightConfig, PlaywrightHandle, ScriptPlan, StepResult};
use crate::server::{ServerConfig, ServerHandle};
use crate::spec::{TestSpec, TestStep};

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub downloads: Vec<PathBuf>,
    pub error: Option<String>,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }
}

/// Main E2E test runner
pub struct TestRunner {
    /// Server to spawn before the first test; None when testing an external URL
    server_config: Option<ServerConfig>,

    /// Playwright configuration
    playwright_config: PlaywrightConfig,

    /// Running server handle (if any)
    server: Option<ServerHandle>,

    /// Test specs directory
    specs_dir: PathBuf,

    /// Output directory for results
    output_dir: PathBuf,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    /// Create a new test runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            server_config: config.server,
            playwright_config: config.playwright,
            server: None,
            specs_dir: config.specs_dir,
            output_dir: config.output_dir,
        }
    }

    /// Start the server, if one is configured
    pub async fn start_server(&mut self) -> E2eResult<()> {
        if self.server.is_some() {
            return Ok(()); // Already running
        }
        let Some(server_config) = self.server_config.clone() else {
            return Ok(());
        };

        let server = ServerHandle::spawn(server_config).await?;

        // Point the browser at the actual server URL
        self.playwright_config.base_url = server.base_url().to_string();

        self.server = Some(server);
        Ok(())
    }

    /// Stop the server
    pub fn stop_server(&mut self) -> E2eResult<()> {
        if let Some(mut server) = self.server.take() {
            server.stop()?;
        }
        Ok(())
    }

    /// Run all tests in the specs directory
    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.specs_dir)?;
        self.run_specs(&specs).await
    }

    /// Run tests matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.specs_dir)?;
        let filtered: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_specs(&filtered).await
    }

    /// Run a specific test by name
    pub async fn run_test(&mut self, name: &str) -> E2eResult<TestResult> {
        let specs = TestSpec::load_all(&self.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Test not found: {}", name)))?;

        self.start_server().await?;
        self.run_spec(&spec).await
    }

    /// Run a list of test specs
    pub async fn run_specs(&mut self, specs: &[TestSpec]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();
        let mut results = Vec::new();

        // Ensure server is running
        self.start_server().await?;

        info!("Running {} test(s)...", specs.len());

        for spec in specs {
            let result = match self.run_spec(spec).await {
                Ok(result) => result,
                Err(e) => TestResult {
                    name: spec.name.clone(),
                    success: false,
                    duration_ms: 0,
                    steps: vec![],
                    downloads: vec![],
                    error: Some(e.to_string()),
                },
            };

            if result.success {
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let suite = TestSuiteResult::from_results(results, start.elapsed().as_millis() as u64);

        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            suite.passed, suite.failed, suite.duration_ms
        );

        Ok(suite)
    }

    /// Run a single test spec
    pub async fn run_spec(&mut self, spec: &TestSpec) -> E2eResult<TestResult> {
        let start = Instant::now();
        debug!("Running test: {}", spec.name);

        // Update viewport from spec
        let mut pw_config = self.playwright_config.clone();
        pw_config.viewport_width = spec.viewport.width;
        pw_config.viewport_height = spec.viewport.height;

        let playwright = PlaywrightHandle::new(pw_config)?;
        let step_results = playwright
            .execute(ScriptPlan {
                steps: &spec.steps,
                mocks: &spec.mocks,
                poll: spec.poll,
                soft: spec.soft,
            })
            .await?;

        let mut soft = SoftAssertions::new(spec.name.as_str());
        let mut test_error = first_hard_failure(spec, &step_results, &mut soft);

        // Confirm downloads landed on disk and finished writing
        let mut downloads = Vec::new();
        if test_error.is_none() {
            let download_dir = &playwright.config().download_dir;
            for (step, result) in spec.steps.iter().zip(&step_results) {
                let TestStep::Download { filename, .. } = step else {
                    continue;
                };
                let verified = match filename {
                    Some(pattern) => {
                        let pattern = Regex::new(pattern)?;
                        wait_for_download(download_dir, &pattern, spec.poll).await
                    }
                    None => match &result.download_path {
                        Some(path) if path.exists() => Ok(path.clone()),
                        Some(path) => Err(E2eError::Download(format!(
                            "{} reported but not found",
                            path.display()
                        ))),
                        None => Err(E2eError::Download(format!(
                            "{} did not report a file",
                            result.step_name
                        ))),
                    },
                };
                match verified {
                    Ok(path) => downloads.push(path),
                    Err(e) => {
                        test_error = Some(format!("{}: {}", result.step_name, e));
                        break;
                    }
                }
            }
        }

        if test_error.is_none() {
            if let Err(e) = soft.finish() {
                test_error = Some(e.to_string());
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = test_error.is_none();

        Ok(TestResult {
            name: spec.name.clone(),
            success,
            duration_ms,
            steps: step_results,
            downloads,
            error: test_error,
        })
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Record soft failures and return the first failure that stopped the test
fn first_hard_failure(
    spec: &TestSpec,
    step_results: &[StepResult],
    soft: &mut SoftAssertions,
) -> Option<String> {
    for result in step_results {
        if result.success {
            continue;
        }
        let reason = format!(
            "{}: {}",
            result.step_name,
            result.error.as_deref().unwrap_or("unknown error")
        );
        if result.soft_failure {
            soft.fail(reason);
        } else {
            return Some(reason);
        }
    }

    if step_results.len() < spec.steps.len() {
        return Some(format!(
            "script stopped after {} of {} steps",
            step_results.len(),
            spec.steps.len()
        ));
    }
    None
}

impl Drop for TestRunner {
    fn drop(&mut self) {
        let _ = self.stop_server();
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub server: Option<ServerConfig>,
    pub playwright: PlaywrightConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server: None,
            playwright: PlaywrightConfig::default(),
            specs_dir: PathBuf::from("tests/e2e/specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}
