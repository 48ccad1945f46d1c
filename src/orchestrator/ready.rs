use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::error::StackError;

/// How long and how often a component is probed before it is declared dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Upper bound on a single probe attempt; a hung attempt counts as a failure.
    pub attempt_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessResult {
    pub ready: bool,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Call `probe` until it succeeds or the policy's attempts are used up.
///
/// Every failure mode of a single attempt (error, refused connection, attempt
/// timeout) just means "not ready yet". Exhaustion is reported in the result,
/// never as an error.
pub async fn wait_until_ready<F, Fut>(
    target: &str,
    policy: &ReadinessPolicy,
    mut probe: F,
) -> ReadinessResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();
    if policy.max_attempts == 0 {
        return ReadinessResult {
            ready: false,
            attempts: 0,
            elapsed: start.elapsed(),
        };
    }

    let attempts = AtomicU32::new(0);
    let attempt_timeout = policy.attempt_timeout;

    let outcome = (|| {
        attempts.fetch_add(1, Ordering::Relaxed);
        let attempt = probe();
        async move {
            match tokio::time::timeout(attempt_timeout, attempt).await {
                Ok(result) => result,
                Err(_) => bail!("attempt timed out after {:?}", attempt_timeout),
            }
        }
    })
    .retry(
        ConstantBuilder::default()
            .with_delay(policy.interval)
            .with_max_times(policy.max_attempts.saturating_sub(1) as usize),
    )
    .notify(|err: &anyhow::Error, dur: Duration| {
        debug!(target = %target, "not ready: {:#}, retrying in {:?}", err, dur);
    })
    .await;

    let result = ReadinessResult {
        ready: outcome.is_ok(),
        attempts: attempts.load(Ordering::Relaxed),
        elapsed: start.elapsed(),
    };
    if result.ready {
        info!(target = %target, attempts = result.attempts, "ready after {:?}", result.elapsed);
    }
    result
}

/// Like [`wait_until_ready`], but exhaustion becomes
/// [`StackError::ReadinessTimeout`].
pub async fn require_ready<F, Fut>(
    target: &str,
    policy: &ReadinessPolicy,
    probe: F,
) -> Result<ReadinessResult, StackError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let result = wait_until_ready(target, policy, probe).await;
    if result.ready {
        Ok(result)
    } else {
        Err(StackError::ReadinessTimeout {
            component: target.to_string(),
            attempts: result.attempts,
            elapsed: result.elapsed,
        })
    }
}

/// What "ready" means for a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Probe {
    /// EVM JSON-RPC `eth_chainId` answered with a 2xx.
    ChainId,
    /// JSON-RPC `getHealth` answered with `result == "ok"`.
    Health,
    /// Plain GET answered with a 2xx.
    Http {
        #[serde(default = "default_http_path")]
        path: String,
    },
    /// A TCP connection is accepted.
    Tcp,
    /// Started is good enough.
    None,
}

fn default_http_path() -> String {
    "/".to_string()
}

impl Probe {
    /// Run a single attempt against `host:port`.
    pub async fn check(&self, client: &reqwest::Client, host: &str, port: u16) -> Result<()> {
        match self {
            Probe::ChainId => {
                let body = json!({"jsonrpc": "2.0", "method": "eth_chainId", "params": [], "id": 1});
                let response = client
                    .post(format!("http://{}:{}", host, port))
                    .json(&body)
                    .send()
                    .await
                    .context("eth_chainId request")?;
                if !response.status().is_success() {
                    bail!("eth_chainId returned status {}", response.status());
                }
                Ok(())
            }
            Probe::Health => {
                let body = json!({"jsonrpc": "2.0", "method": "getHealth", "id": 1});
                let response = client
                    .post(format!("http://{}:{}", host, port))
                    .json(&body)
                    .send()
                    .await
                    .context("getHealth request")?;
                if !response.status().is_success() {
                    bail!("getHealth returned status {}", response.status());
                }
                let payload: serde_json::Value =
                    response.json().await.context("getHealth response body")?;
                match payload.get("result").and_then(|r| r.as_str()) {
                    Some("ok") => Ok(()),
                    other => bail!("getHealth reported {:?}", other),
                }
            }
            Probe::Http { path } => {
                let url = format!("http://{}:{}{}", host, port, path);
                let response = client.get(&url).send().await.context("HTTP ready check")?;
                if !response.status().is_success() {
                    bail!("HTTP ready check returned status {}", response.status());
                }
                Ok(())
            }
            Probe::Tcp => {
                tokio::net::TcpStream::connect((host, port))
                    .await
                    .context("TCP connect failed")?;
                Ok(())
            }
            Probe::None => Ok(()),
        }
    }
}

/// Block until `probe` passes against `host:port`, or fail the component.
pub async fn wait_for_probe(
    component: &str,
    probe: &Probe,
    host: &str,
    port: u16,
    policy: &ReadinessPolicy,
) -> Result<ReadinessResult, StackError> {
    if *probe == Probe::None {
        return Ok(ReadinessResult {
            ready: true,
            attempts: 0,
            elapsed: Duration::ZERO,
        });
    }

    let client = reqwest::Client::builder()
        .timeout(policy.attempt_timeout)
        .build()
        .context("building HTTP client")?;

    require_ready(component, policy, || {
        let client = client.clone();
        let probe = probe.clone();
        let host = host.to_string();
        async move { probe.check(&client, &host, port).await }
    })
    .await
}
