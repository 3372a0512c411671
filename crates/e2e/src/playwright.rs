//! Playwright browser automation
//!
//! A test runs as one generated Node script, so page state carries from one
//! step to the next. Each step reports back on stdout as a line
//! `@@step {json}`, which is parsed into a [`StepResult`].
//!
//! The script carries JS counterparts of the Rust poller (`pollUntil`) and
//! builds page readiness, stable click/fill and download capture on it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use testbed_common::PollConfig;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::mock::{js_str, MockRoute};
use crate::spec::TestStep;

/// Prefix of the per-step report lines written by the script
const STEP_MARKER: &str = "@@step";

/// Playwright browser handle
pub struct PlaywrightHandle {
    config: PlaywrightConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
    pub download_path: Option<PathBuf>,
    /// The step failed but the test kept going
    #[serde(default)]
    pub soft_failure: bool,
}

/// One `@@step` line as the script writes it
#[derive(Debug, Deserialize)]
struct StepReport {
    index: usize,
    name: String,
    ok: bool,
    duration_ms: u64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    soft: bool,
    #[serde(default)]
    screenshot: Option<PathBuf>,
    #[serde(default)]
    download: Option<PathBuf>,
}

/// What to run in one browser session
#[derive(Debug, Clone, Copy)]
pub struct ScriptPlan<'a> {
    pub steps: &'a [TestStep],
    pub mocks: &'a [MockRoute],
    pub poll: PollConfig,
    pub soft: bool,
}

impl PlaywrightHandle {
    /// Create a new Playwright handle
    pub fn new(mut config: PlaywrightConfig) -> E2eResult<Self> {
        // Verify playwright is installed
        Self::check_playwright_installed()?;

        // Scripts run from a temp dir, so output paths must be absolute
        std::fs::create_dir_all(&config.screenshot_dir)?;
        std::fs::create_dir_all(&config.download_dir)?;
        config.screenshot_dir = std::fs::canonicalize(&config.screenshot_dir)?;
        config.download_dir = std::fs::canonicalize(&config.download_dir)?;

        Ok(Self { config })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }

    /// Run every step of `plan` in a single browser session.
    ///
    /// Steps after an aborting failure are not reported. An `Err` means the
    /// script itself broke (browser failed to launch, syntax error, hang).
    pub async fn execute(&self, plan: ScriptPlan<'_>) -> E2eResult<Vec<StepResult>> {
        let script = build_script(&self.config, plan);
        let (success, stdout, stderr) = self.run_script(&script).await?;
        let results = parse_step_reports(&stdout)?;

        let any_failed = results.iter().any(|r| !r.success);
        if !success && !any_failed {
            return Err(E2eError::Playwright(format!(
                "Script failed before reporting a step failure:\nstdout: {}\nstderr: {}",
                stdout, stderr
            )));
        }

        Ok(results)
    }

    /// Execute the script via Node and collect its output
    async fn run_script(&self, script: &str) -> E2eResult<(bool, String, String)> {
        // Write script to temp file
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("test.js");
        std::fs::write(&script_path, script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path)
            .current_dir(temp_dir.path())
            .kill_on_drop(true);

        // The script lives in a temp dir, so point module resolution back
        // at the project's node_modules
        if let Some(node_path) = &self.config.node_path {
            let node_path = std::fs::canonicalize(node_path).unwrap_or_else(|_| node_path.clone());
            cmd.env("NODE_PATH", node_path);
        }

        let output = match timeout(self.config.script_timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(E2eError::Playwright(format!(
                    "Script did not finish within {} s",
                    self.config.script_timeout.as_secs()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stderr.trim().is_empty() {
            debug!("Playwright stderr: {}", stderr.trim());
        }

        Ok((output.status.success(), stdout, stderr))
    }
}

/// Parse the `@@step` lines out of the script's stdout
fn parse_step_reports(stdout: &str) -> E2eResult<Vec<StepResult>> {
    let marker = Regex::new(&format!(r"^{}\s+(\{{.*\}})\s*$", STEP_MARKER))?;
    let mut results = Vec::new();

    for line in stdout.lines() {
        let Some(caps) = marker.captures(line.trim_end()) else {
            if !line.trim().is_empty() {
                info!("[browser] {}", line);
            }
            continue;
        };
        let report: StepReport = serde_json::from_str(&caps[1])?;
        if !report.ok {
            warn!(
                "Step {} ({}) failed: {}",
                report.index + 1,
                report.name,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        results.push(StepResult {
            success: report.ok,
            step_name: report.name,
            duration_ms: report.duration_ms,
            error: report.error,
            screenshot_path: report.screenshot,
            download_path: report.download,
            soft_failure: report.soft && !report.ok,
        });
    }

    Ok(results)
}

/// Build the Node script for a whole test
pub fn build_script(config: &PlaywrightConfig, plan: ScriptPlan<'_>) -> String {
    let mut script = String::new();

    // Header
    script.push_str(&format!(
        r#"const {{ chromium, firefox, webkit }} = require('playwright');
const {{ expect }} = require('@playwright/test');
const path = require('path');

const POLL = {{ timeout: {timeout}, interval: {interval} }};
const DOWNLOAD_DIR = {download_dir};
"#,
        timeout = plan.poll.timeout_ms,
        interval = plan.poll.interval_ms,
        download_dir = js_str(&config.download_dir.to_string_lossy()),
    ));
    script.push_str(SCRIPT_HELPERS);
    script.push_str(&format!(
        r#"
(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }},
    acceptDownloads: true,
  }});
  const page = await context.newPage();
  const baseUrl = {base_url};
  let failed = false;

  try {{
"#,
        browser = config.browser.as_str(),
        headless = config.headless,
        width = config.viewport_width,
        height = config.viewport_height,
        base_url = js_str(&config.base_url),
    ));

    for mock in plan.mocks {
        script.push_str(&mock.to_js());
    }

    for (i, step) in plan.steps.iter().enumerate() {
        let soft = plan.soft && step.is_assertion();
        script.push_str(&format!("\n    // Step {}: {}\n", i + 1, step.name()));
        script.push_str(&format!(
            "    await runStep({}, {}, {}, async () => {{\n{}\n    }}).then((ok) => {{ if (!ok) failed = true; }});\n",
            i,
            js_str(&step.name()),
            soft,
            step_to_js(config, step),
        ));
    }

    // Footer
    script.push_str(
        r#"  } catch (error) {
    failed = true;
    console.error(JSON.stringify({ success: false, error: String(error && error.message || error) }));
  } finally {
    await browser.close();
  }
  process.exit(failed ? 1 : 0);
})();
"#,
    );

    script
}

/// Poll override for steps that carry their own timeout
fn poll_override(timeout_ms: Option<u64>) -> String {
    match timeout_ms {
        Some(t) => format!("{{ timeout: {}, interval: POLL.interval }}", t),
        None => "POLL".to_string(),
    }
}

/// Convert a step to JavaScript; the body returns an object merged into the report
fn step_to_js(config: &PlaywrightConfig, step: &TestStep) -> String {
    match step {
        TestStep::Navigate { url, wait_for_selector } => {
            let wait = wait_for_selector
                .as_ref()
                .map(|s| {
                    format!(
                        "\n      await page.waitForSelector({}, {{ timeout: POLL.timeout }});",
                        js_str(s)
                    )
                })
                .unwrap_or_default();
            format!(
                "      await page.goto(new URL({}, baseUrl).toString());\n      await waitForPageReady(page);{}",
                js_str(url),
                wait
            )
        }
        TestStep::WaitForReady => "      await waitForPageReady(page);".to_string(),
        TestStep::Click { selector, timeout_ms } => {
            format!(
                "      await stableClick(page, {}, {});",
                js_str(selector),
                poll_override(*timeout_ms)
            )
        }
        TestStep::Fill { selector, value, clear_first } => {
            format!(
                "      await stableFill(page, {}, {}, {});",
                js_str(selector),
                js_str(value),
                clear_first
            )
        }
        TestStep::Press { selector, key } => match selector {
            Some(sel) => format!(
                "      await page.locator({}).press({});",
                js_str(sel),
                js_str(key)
            ),
            None => format!("      await page.keyboard.press({});", js_str(key)),
        },
        TestStep::Wait { selector, timeout_ms, state } => {
            format!(
                "      await page.waitForSelector({}, {{ state: '{}', timeout: {} }});",
                js_str(selector),
                state.as_str(),
                timeout_ms.map(|t| t.to_string()).unwrap_or_else(|| "POLL.timeout".to_string())
            )
        }
        TestStep::Assert { selector, visible, text, text_contains, attribute, count } => {
            let loc = format!("page.locator({})", js_str(selector));
            let opts = "{ timeout: POLL.timeout }";
            let mut assertions = Vec::new();

            match visible {
                Some(true) => assertions.push(format!(
                    "      await expect({}).toBeVisible({});",
                    loc, opts
                )),
                Some(false) => assertions.push(format!(
                    "      await expect({}).toBeHidden({});",
                    loc, opts
                )),
                None => {}
            }
            if let Some(t) = text {
                assertions.push(format!(
                    "      await expect({}).toHaveText({}, {});",
                    loc,
                    js_str(t),
                    opts
                ));
            }
            if let Some(tc) = text_contains {
                assertions.push(format!(
                    "      await expect({}).toContainText({}, {});",
                    loc,
                    js_str(tc),
                    opts
                ));
            }
            if let Some(attr) = attribute {
                if let Some(val) = &attr.value {
                    assertions.push(format!(
                        "      await expect({}).toHaveAttribute({}, {}, {});",
                        loc,
                        js_str(&attr.name),
                        js_str(val),
                        opts
                    ));
                }
                if let Some(part) = &attr.contains {
                    assertions.push(format!(
                        "      await expect({}).toHaveAttribute({}, new RegExp(escapeRegExp({})), {});",
                        loc,
                        js_str(&attr.name),
                        js_str(part),
                        opts
                    ));
                }
                if attr.value.is_none() && attr.contains.is_none() {
                    assertions.push(format!(
                        "      await expect({}).toHaveAttribute({}, /.*/, {});",
                        loc,
                        js_str(&attr.name),
                        opts
                    ));
                }
            }
            if let Some(c) = count {
                assertions.push(format!(
                    "      await expect({}).toHaveCount({}, {});",
                    loc, c, opts
                ));
            }

            assertions.join("\n")
        }
        TestStep::Screenshot { name, selector, full_page } => {
            let screenshot_path = config.screenshot_dir.join(format!("{}.png", name));
            let path_str = js_str(&screenshot_path.to_string_lossy());

            let shot = match selector {
                Some(sel) => format!(
                    "      await page.locator({}).screenshot({{ path: {} }});",
                    js_str(sel),
                    path_str
                ),
                None => format!(
                    "      await page.screenshot({{ path: {}, fullPage: {} }});",
                    path_str, full_page
                ),
            };
            format!("{}\n      return {{ screenshot: {} }};", shot, path_str)
        }
        TestStep::Hover { selector } => {
            format!("      await page.hover({});", js_str(selector))
        }
        TestStep::Select { selector, value } => {
            format!(
                "      await page.selectOption({}, {});",
                js_str(selector),
                js_str(value)
            )
        }
        TestStep::Check { selector } => {
            format!("      await page.check({});", js_str(selector))
        }
        TestStep::Uncheck { selector } => {
            format!("      await page.uncheck({});", js_str(selector))
        }
        TestStep::Evaluate { script, expected } => {
            let body = format!("(async () => {{ {} }})()", script);
            let mut js = format!("      const result = await page.evaluate({});", js_str(&body));
            if let Some(expected) = expected {
                js.push_str(&format!("\n      expect(result).toEqual({});", expected));
            }
            js
        }
        TestStep::Download { selector, save_as, .. } => {
            let target = match save_as {
                Some(name) => js_str(name),
                None => "download.suggestedFilename()".to_string(),
            };
            format!(
                r#"      const [download] = await Promise.all([
        page.waitForEvent('download', {{ timeout: POLL.timeout }}),
        stableClick(page, {selector}, POLL),
      ]);
      const target = path.join(DOWNLOAD_DIR, {target});
      await download.saveAs(target);
      return {{ download: target }};"#,
                selector = js_str(selector),
                target = target,
            )
        }
        TestStep::Log { message } => {
            format!("      console.log('[TEST] ' + {});", js_str(message))
        }
    }
}

/// Helpers shared by every generated script
const SCRIPT_HELPERS: &str = r#"
const sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));

function escapeRegExp(s) {
  return s.replace(/[.*+?^${}()|[\]\\]/g, '\\$&');
}

// Same contract as the Rust poller: at least one attempt, attempts never
// overlap, a thrown error aborts, and an attempt only starts before the deadline.
async function pollUntil(check, description, poll = POLL) {
  const start = Date.now();
  let attempts = 0;
  for (;;) {
    attempts += 1;
    const value = await check();
    if (value) return value;
    const elapsed = Date.now() - start;
    if (elapsed >= poll.timeout) break;
    const remaining = poll.timeout - elapsed;
    await sleep(Math.min(poll.interval, remaining));
    if (poll.interval >= remaining) break;
  }
  throw new Error(`timed out waiting for ${description} after ${attempts} attempt(s) in ${Date.now() - start}ms`);
}

async function waitForPageReady(page, poll = POLL) {
  await page.waitForLoadState('domcontentloaded', { timeout: poll.timeout });
  await pollUntil(
    async () => (await page.evaluate(() => document.readyState)) === 'complete',
    'document ready state',
    poll,
  );
  // Long-polling pages never go idle; readiness above is what matters
  await page.waitForLoadState('networkidle', { timeout: poll.timeout }).catch(() => {});
}

// Visible, enabled, and the same bounding box on two consecutive polls
async function waitForStable(locator, description, poll = POLL) {
  let last = null;
  await pollUntil(async () => {
    if (!(await locator.isVisible()) || !(await locator.isEnabled())) {
      last = null;
      return false;
    }
    const box = await locator.boundingBox();
    const same = !!box && !!last &&
      box.x === last.x && box.y === last.y &&
      box.width === last.width && box.height === last.height;
    last = box;
    return same;
  }, description, poll);
}

async function stableClick(page, selector, poll = POLL) {
  const locator = page.locator(selector).first();
  await waitForStable(locator, `${selector} to be clickable`, poll);
  await locator.click({ timeout: poll.timeout });
}

async function stableFill(page, selector, value, clearFirst, poll = POLL) {
  const locator = page.locator(selector).first();
  await waitForStable(locator, `${selector} to be editable`, poll);
  if (clearFirst) {
    await locator.fill('');
  }
  await locator.fill(value);
  await expect(locator).toHaveValue(value, { timeout: poll.timeout });
}

function report(index, name, ok, started, soft, error, extra) {
  const line = {
    index,
    name,
    ok,
    soft,
    duration_ms: Date.now() - started,
    error: error ? String(error.message || error) : null,
    ...(extra || {}),
  };
  console.log('@@step ' + JSON.stringify(line));
}

// Soft steps report their failure and let the test continue
async function runStep(index, name, soft, body) {
  const started = Date.now();
  try {
    const extra = await body();
    report(index, name, true, started, soft, null, extra);
    return true;
  } catch (error) {
    report(index, name, false, started, soft, error, null);
    if (soft) return false;
    throw error;
  }
}
"#;

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub base_url: String,
    pub screenshot_dir: PathBuf,
    pub download_dir: PathBuf,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    /// `node_modules` holding `playwright` and `@playwright/test`
    pub node_path: Option<PathBuf>,
    /// Upper bound on one test's script, as a backstop for hung browsers
    pub script_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            download_dir: PathBuf::from("test-results/downloads"),
            viewport_width: 1280,
            viewport_height: 720,
            browser: Browser::Chromium,
            headless: true,
            node_path: Some(PathBuf::from("node_modules")),
            script_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{AttributeAssertion, WaitState};

    fn plan<'a>(steps: &'a [TestStep], mocks: &'a [MockRoute], soft: bool) -> ScriptPlan<'a> {
        ScriptPlan {
            steps,
            mocks,
            poll: PollConfig::new(8000, 200),
            soft,
        }
    }

    #[test]
    fn test_script_embeds_poll_config_and_base_url() {
        let config = PlaywrightConfig {
            base_url: "http://127.0.0.1:4000".to_string(),
            browser: Browser::Firefox,
            ..Default::default()
        };
        let steps = vec![TestStep::Navigate {
            url: "/login".to_string(),
            wait_for_selector: None,
        }];
        let script = build_script(&config, plan(&steps, &[], false));

        assert!(script.contains("const POLL = { timeout: 8000, interval: 200 };"));
        assert!(script.contains(r#"const baseUrl = "http://127.0.0.1:4000";"#));
        assert!(script.contains("await firefox.launch({ headless: true })"));
        assert!(script.contains(r#"await page.goto(new URL("/login", baseUrl).toString());"#));
        assert!(script.contains("await waitForPageReady(page);"));
    }

    #[test]
    fn test_click_and_fill_use_stable_helpers() {
        let steps = vec![
            TestStep::Click {
                selector: "#save".to_string(),
                timeout_ms: Some(1500),
            },
            TestStep::Fill {
                selector: "input[name='q']".to_string(),
                value: "O'Brien".to_string(),
                clear_first: true,
            },
        ];
        let script = build_script(&PlaywrightConfig::default(), plan(&steps, &[], false));

        assert!(script.contains(r##"await stableClick(page, "#save", { timeout: 1500, interval: POLL.interval });"##));
        assert!(script.contains(r#"await stableFill(page, "input[name='q']", "O'Brien", true);"#));
    }

    #[test]
    fn test_soft_mode_only_applies_to_assertions() {
        let steps = vec![
            TestStep::Click {
                selector: "#open".to_string(),
                timeout_ms: None,
            },
            TestStep::Assert {
                selector: ".banner".to_string(),
                visible: Some(true),
                text: None,
                text_contains: Some("Welcome".to_string()),
                attribute: Some(AttributeAssertion {
                    name: "class".to_string(),
                    value: None,
                    contains: Some("active".to_string()),
                }),
                count: None,
            },
        ];
        let script = build_script(&PlaywrightConfig::default(), plan(&steps, &[], true));

        assert!(script.contains(r##"await runStep(0, "click:#open", false"##));
        assert!(script.contains(r#"await runStep(1, "assert:.banner", true"#));
        assert!(script.contains(r#"toContainText("Welcome", { timeout: POLL.timeout })"#));
        assert!(script.contains(r#"new RegExp(escapeRegExp("active"))"#));
    }

    #[test]
    fn test_mocks_installed_before_steps() {
        let mocks = vec![MockRoute::status("**/api/flags", 500)];
        let steps = vec![TestStep::Wait {
            selector: "#error".to_string(),
            timeout_ms: None,
            state: WaitState::Attached,
        }];
        let script = build_script(&PlaywrightConfig::default(), plan(&steps, &mocks, false));

        let route_at = script.find(r#"page.route("**/api/flags""#).unwrap();
        let step_at = script.find("runStep(0").unwrap();
        assert!(route_at < step_at);
        assert!(script.contains("state: 'attached', timeout: POLL.timeout"));
    }

    #[test]
    fn test_download_step_saves_into_download_dir() {
        let config = PlaywrightConfig {
            download_dir: PathBuf::from("/tmp/dl"),
            ..Default::default()
        };
        let steps = vec![TestStep::Download {
            selector: "#export".to_string(),
            filename: None,
            save_as: Some("report.csv".to_string()),
        }];
        let script = build_script(&config, plan(&steps, &[], false));

        assert!(script.contains(r#"const DOWNLOAD_DIR = "/tmp/dl";"#));
        assert!(script.contains("page.waitForEvent('download'"));
        assert!(script.contains(r#"path.join(DOWNLOAD_DIR, "report.csv")"#));
    }

    #[test]
    fn test_parse_step_reports() {
        let stdout = r#"[TEST] starting
@@step {"index":0,"name":"navigate:/","ok":true,"soft":false,"duration_ms":120,"error":null}
@@step {"index":1,"name":"assert:.x","ok":false,"soft":true,"duration_ms":5000,"error":"Timed out"}
@@step {"index":2,"name":"download:#e","ok":true,"soft":false,"duration_ms":300,"error":null,"download":"/tmp/dl/a.csv"}
"#;
        let results = parse_step_reports(stdout).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].soft_failure);
        assert_eq!(results[1].error.as_deref(), Some("Timed out"));
        assert_eq!(results[2].download_path, Some(PathBuf::from("/tmp/dl/a.csv")));
    }
}
