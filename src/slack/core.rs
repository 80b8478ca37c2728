use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, RetryConfig};

use super::error::{SlackError, SlackResult};

const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Shared HTTP plumbing for every Slack Web API group: token selection,
/// client-side throttling and retries.
#[derive(Clone)]
pub struct SlackCore {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry: RetryConfig,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl SlackCore {
    pub fn new(config: &Config) -> SlackResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.connection.timeout_seconds))
            .pool_max_idle_per_host(config.connection.max_idle_per_host.max(0) as usize)
            .pool_idle_timeout(Duration::from_secs(
                config.connection.pool_idle_timeout_seconds,
            ))
            .build()?;

        let per_minute =
            NonZeroU32::new(config.rate_limit.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        // Bot tokens can read every channel the bot was invited to
        let token = config
            .slack
            .bot_token
            .clone()
            .or_else(|| config.slack.user_token.clone());

        Ok(Self {
            http,
            base_url: config.slack.api_base_url.trim_end_matches('/').to_string(),
            token,
            retry: config.retry.clone(),
            limiter: Arc::new(limiter),
        })
    }

    /// Call a Web API method with GET query parameters and return the JSON body
    /// once Slack reports `ok: true`.
    pub async fn get(&self, method: &str, params: &[(&str, String)]) -> SlackResult<Value> {
        let token = self.token.as_deref().ok_or(SlackError::MissingToken)?;
        let query = serde_urlencoded::to_string(params)?;
        let url = if query.is_empty() {
            format!("{}/{}", self.base_url, method)
        } else {
            format!("{}/{}?{}", self.base_url, method, query)
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = Duration::from_millis(self.retry.initial_delay_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.until_ready().await;
            debug!(method, attempt, "calling Slack API");

            let response = self.http.get(&url).bearer_auth(token).send().await;

            match response {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = retry_after_secs(resp.headers());
                    if attempt >= max_attempts {
                        return Err(SlackError::RateLimited {
                            method: method.to_string(),
                            retry_after_secs: retry_after,
                        });
                    }
                    warn!(method, retry_after, "Slack rate limited, waiting");
                    tokio::time::sleep(self.cap(Duration::from_secs(retry_after))).await;
                }
                Ok(resp) if resp.status().is_server_error() && attempt < max_attempts => {
                    warn!(method, status = %resp.status(), attempt, "Slack server error, retrying");
                    tokio::time::sleep(delay).await;
                    delay = self.next_delay(delay);
                }
                Ok(resp) => {
                    let resp = resp.error_for_status()?;
                    let headers = resp.headers().clone();
                    let body: Value = resp.json().await?;

                    if body.get("ok").and_then(Value::as_bool) == Some(true) {
                        return Ok(body);
                    }

                    let error = body
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown_error")
                        .to_string();

                    if error == "ratelimited" {
                        let retry_after = retry_after_secs(&headers);
                        if attempt >= max_attempts {
                            return Err(SlackError::RateLimited {
                                method: method.to_string(),
                                retry_after_secs: retry_after,
                            });
                        }
                        tokio::time::sleep(self.cap(Duration::from_secs(retry_after))).await;
                        continue;
                    }

                    return Err(SlackError::Api {
                        method: method.to_string(),
                        error,
                    });
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < max_attempts => {
                    warn!(method, attempt, error = %e, "Slack request failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = self.next_delay(delay);
                }
                Err(e) => return Err(SlackError::Http(e)),
            }
        }
    }

    fn cap(&self, delay: Duration) -> Duration {
        delay.min(Duration::from_millis(self.retry.max_delay_ms))
    }

    fn next_delay(&self, current: Duration) -> Duration {
        next_backoff(current, self.retry.exponential_base, self.retry.max_delay_ms)
    }
}

pub(crate) fn next_backoff(current: Duration, base: f64, max_delay_ms: u64) -> Duration {
    let next_ms = (current.as_millis() as f64 * base.max(1.0)).min(max_delay_ms as f64);
    Duration::from_millis(next_ms as u64)
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}
