// ABOUTME: HTTP probes against a deployed program's health route
// ABOUTME: Single-shot status probe plus bounded readiness polling

use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of one probe attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The server answered with 200 or 404
    Responding(u16),
    /// The server answered with some other status
    BadStatus(u16),
    Timeout,
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_responding(&self) -> bool {
        matches!(self, ProbeOutcome::Responding(_))
    }
}

/// Result of polling until ready
#[derive(Debug, Clone)]
pub struct Readiness {
    pub ready: bool,
    pub attempts: u32,
    pub elapsed: Duration,
    pub last: ProbeOutcome,
}

#[derive(Clone)]
pub struct HealthProber {
    client: reqwest::Client,
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProber {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET `{endpoint}/health` once, bounded by `timeout`
    pub async fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeOutcome {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));

        match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // 404 still proves something is listening on the port
                if status == 200 || status == 404 {
                    ProbeOutcome::Responding(status)
                } else {
                    ProbeOutcome::BadStatus(status)
                }
            }
            Err(e) if e.is_timeout() => ProbeOutcome::Timeout,
            Err(e) => ProbeOutcome::Unreachable(e.to_string()),
        }
    }

    /// Probe up to `attempts` times, `interval` apart, until the server responds
    pub async fn wait_until_ready(
        &self,
        endpoint: &str,
        attempts: u32,
        interval: Duration,
        per_attempt: Duration,
    ) -> Readiness {
        let started = Instant::now();
        let attempts = attempts.max(1);
        let mut last = ProbeOutcome::Timeout;

        for attempt in 1..=attempts {
            last = self.probe(endpoint, per_attempt).await;
            if last.is_responding() {
                return Readiness {
                    ready: true,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last,
                };
            }

            debug!(
                "Readiness attempt {}/{} against {} failed: {:?}",
                attempt, attempts, endpoint, last
            );
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Readiness {
            ready: false,
            attempts,
            elapsed: started.elapsed(),
            last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_probe_accepts_200_and_404() {
        let server = MockServer::start().await;
        let prober = HealthProber::new();

        // No mocks mounted: wiremock answers 404
        assert_eq!(
            prober.probe(&server.uri(), Duration::from_secs(1)).await,
            ProbeOutcome::Responding(404)
        );

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert_eq!(
            prober.probe(&server.uri(), Duration::from_secs(1)).await,
            ProbeOutcome::Responding(200)
        );
    }

    #[tokio::test]
    async fn test_probe_reports_bad_status_and_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let prober = HealthProber::new();
        assert_eq!(
            prober.probe(&server.uri(), Duration::from_secs(1)).await,
            ProbeOutcome::BadStatus(503)
        );
        assert_eq!(
            prober.probe(&server.uri(), Duration::from_millis(50)).await,
            ProbeOutcome::Timeout
        );
    }

    #[tokio::test]
    async fn test_unreachable_port() {
        let prober = HealthProber::new();
        let outcome = prober
            .probe("http://127.0.0.1:1", Duration::from_secs(1))
            .await;
        assert!(matches!(outcome, ProbeOutcome::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_wait_until_ready_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let readiness = HealthProber::new()
            .wait_until_ready(
                &server.uri(),
                5,
                Duration::from_millis(10),
                Duration::from_secs(1),
            )
            .await;

        assert!(readiness.ready);
        assert_eq!(readiness.attempts, 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let readiness = HealthProber::new()
            .wait_until_ready(
                &server.uri(),
                3,
                Duration::from_millis(5),
                Duration::from_secs(1),
            )
            .await;

        assert!(!readiness.ready);
        assert_eq!(readiness.attempts, 3);
        assert_eq!(readiness.last, ProbeOutcome::BadStatus(500));
    }
}
