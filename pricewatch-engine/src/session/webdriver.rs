//! WebDriver-backed browser sessions
//!
//! Each session owns its own driver process (chromedriver or compatible)
//! listening on a free local port. The driver is spoken to over the W3C
//! WebDriver HTTP protocol with reqwest:
//! - `POST /session` to launch the browser
//! - `POST /session/{id}/url` to navigate
//! - `GET /session/{id}/source` to read the rendered markup
//! - `POST /session/{id}/execute/sync` as liveness probe
//! - `DELETE /session/{id}` to quit

use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::{Session, SessionFactory};
use crate::adapter::profile::is_sold_out_text;
use crate::config::FetchConfig;
use crate::error::{CrawlError, CrawlResult};
use crate::process;

/// How long a freshly spawned driver gets to report ready
const DRIVER_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser flags keeping a headless Chrome small and quiet
const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--window-size=1920,1080",
    "--lang=ko-KR",
    "--disable-blink-features=AutomationControlled",
    "--disable-extensions",
    "--disable-plugins",
    "--blink-settings=imagesEnabled=false",
    "--disable-background-networking",
    "--disable-default-apps",
    "--disable-sync",
    "--disable-translate",
    "--mute-audio",
    "--no-first-run",
    "--js-flags=--max-old-space-size=256",
];

/// Launches one driver process plus browser per session
pub struct WebDriverFactory {
    driver_path: String,
    headless: bool,
    user_agent: String,
    page_load_timeout: Duration,
    client: reqwest::Client,
}

impl WebDriverFactory {
    pub fn new(fetch: &FetchConfig) -> Self {
        Self {
            driver_path: fetch.webdriver_path.clone(),
            headless: fetch.headless,
            user_agent: fetch.user_agent.clone(),
            page_load_timeout: fetch.navigate_timeout,
            client: reqwest::Client::new(),
        }
    }

    fn capabilities(&self) -> Value {
        let mut args: Vec<String> = CHROME_ARGS.iter().map(|s| s.to_string()).collect();
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.push(format!("--user-agent={}", self.user_agent));

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "timeouts": { "pageLoad": self.page_load_timeout.as_millis() as u64 },
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation", "enable-logging"],
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn create(&self) -> CrawlResult<Box<dyn Session>> {
        let port = free_port()?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let child = Command::new(&self.driver_path)
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CrawlError::Network(format!("failed to start {}: {}", self.driver_path, e))
            })?;

        // The child is killed on drop if anything below fails
        wait_until_ready(&self.client, &base_url).await?;

        let response = self
            .client
            .post(format!("{}/session", base_url))
            .json(&self.capabilities())
            .send()
            .await?;
        let body = read_value(response).await?;

        let session_id = body
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| CrawlError::Network("driver returned no session id".to_string()))?
            .to_string();

        info!("Browser started on driver port {} (session {})", port, session_id);

        Ok(Box::new(
            WebDriverSession::attach(self.client.clone(), base_url, session_id, child).await,
        ))
    }
}

/// A browser session driven through its own driver process
pub struct WebDriverSession {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    /// Killed and reaped on drop, after the tracked processes were force-killed
    child: Child,
    /// Driver plus every descendant seen so far, parents first
    tracked: Vec<u32>,
}

impl WebDriverSession {
    async fn attach(
        client: reqwest::Client,
        base_url: String,
        session_id: String,
        child: Child,
    ) -> Self {
        let mut session = Self {
            client,
            base_url,
            session_id,
            child,
            tracked: Vec::new(),
        };
        session.refresh_tracked().await;
        session
    }

    /// Adds processes spawned since the last snapshot
    ///
    /// Browsers are reparented away from a dead driver, so descendants have
    /// to be recorded while the driver is still alive.
    async fn refresh_tracked(&mut self) {
        let Some(driver) = self.child.id() else {
            return;
        };
        for pid in process::process_tree(driver).await {
            if !self.tracked.contains(&pid) {
                self.tracked.push(pid);
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }
}

#[async_trait]
impl Session for WebDriverSession {
    async fn navigate(&mut self, url: &str, settle: Duration) -> CrawlResult<String> {
        let response = self
            .client
            .post(self.endpoint("/url"))
            .json(&json!({ "url": url }))
            .send()
            .await?;

        if let Err(e) = read_value(response).await {
            // Shops announce discontinued products with a blocking alert
            if is_sold_out_text(&e.to_string()) {
                return Err(CrawlError::SoldOut(url.to_string()));
            }
            return Err(e);
        }

        tokio::time::sleep(settle).await;
        self.refresh_tracked().await;

        let response = self.client.get(self.endpoint("/source")).send().await?;
        let value = read_value(response).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CrawlError::Network("page source was not a string".to_string()))
    }

    async fn ping(&mut self) -> bool {
        let probe = self
            .client
            .post(self.endpoint("/execute/sync"))
            .json(&json!({ "script": "return 1", "args": [] }))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match probe {
            Ok(response) => read_value(response).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Ends the browser session; the driver keeps running until force-killed
    async fn quit(&mut self) -> CrawlResult<()> {
        let response = self
            .client
            .delete(self.endpoint(""))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        read_value(response).await.map(|_| ())
    }

    fn pids(&self) -> Vec<u32> {
        self.tracked.clone()
    }
}

/// Asks the OS for a free local port
fn free_port() -> CrawlResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| CrawlError::Network(format!("no free port for driver: {}", e)))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| CrawlError::Network(format!("no free port for driver: {}", e)))
}

async fn wait_until_ready(client: &reqwest::Client, base_url: &str) -> CrawlResult<()> {
    let deadline = tokio::time::Instant::now() + DRIVER_READY_TIMEOUT;

    loop {
        let ready = match client.get(format!("{}/status", base_url)).send().await {
            Ok(response) => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.pointer("/value/ready").and_then(Value::as_bool))
                .unwrap_or(false),
            Err(_) => false,
        };

        if ready {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(CrawlError::Timeout(format!(
                "driver at {} not ready after {:?}",
                base_url, DRIVER_READY_TIMEOUT
            )));
        }

        debug!("Waiting for driver at {}", base_url);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Unwraps a WebDriver response envelope
///
/// Successful responses carry `{"value": ...}`; errors carry
/// `{"value": {"error": ..., "message": ...}}` with a non-2xx status.
async fn read_value(response: reqwest::Response) -> CrawlResult<Value> {
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    Err(driver_error(&value))
}

fn driver_error(value: &Value) -> CrawlError {
    let kind = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");
    let text = format!("{}: {}", kind, message);

    match kind {
        "timeout" | "script timeout" => CrawlError::Timeout(text),
        "unexpected alert open" => CrawlError::Network(text),
        _ => CrawlError::from_driver_message(text),
    }
}
