use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::probe::{CredentialProbe, ProbeResult};

/// One username/password pair to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Every password for the first user, then the next user, and so on.
    pub fn cross(usernames: &[String], passwords: &[String]) -> Vec<Self> {
        usernames
            .iter()
            .flat_map(|u| passwords.iter().map(move |p| Self::new(u.clone(), p.clone())))
            .collect()
    }
}

/// Runs credential probes against one target with a bounded number in flight.
pub struct SprayRunner {
    probe: CredentialProbe,
    semaphore: Arc<Semaphore>,
    completed: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl SprayRunner {
    pub fn new(probe: CredentialProbe, concurrency: usize) -> Self {
        Self {
            probe,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            completed: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Results come back in completion order. A probe whose task panicked
    /// is counted in `errors` and has no result.
    pub async fn run(&self, base_url: &str, credentials: Vec<Credential>) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(credentials.len());
        self.run_each(base_url, credentials, |result| results.push(result.clone()))
            .await;
        results
    }

    /// Hands each result to `on_result` as soon as its task finishes, while
    /// later credentials are still waiting for a slot.
    pub async fn run_each<F>(&self, base_url: &str, credentials: Vec<Credential>, mut on_result: F)
    where
        F: FnMut(&ProbeResult),
    {
        let mut futures = FuturesUnordered::new();

        for cred in credentials {
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // every slot is busy: drain one finished task first
                    if let Some(joined) = futures.next().await {
                        self.finish(joined, &mut on_result);
                    }
                    match self.semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
            };
            let probe = self.probe.clone();
            let base_url = base_url.to_string();
            let completed = self.completed.clone();

            futures.push(tokio::spawn(async move {
                let result = probe.probe(&base_url, &cred.username, &cred.password).await;
                completed.fetch_add(1, Ordering::Relaxed);
                drop(permit);
                result
            }));
        }

        while let Some(joined) = futures.next().await {
            self.finish(joined, &mut on_result);
        }
    }

    fn finish<F>(&self, joined: Result<ProbeResult, JoinError>, on_result: &mut F)
    where
        F: FnMut(&ProbeResult),
    {
        match joined {
            Ok(result) => on_result(&result),
            Err(e) => {
                tracing::warn!(error = %e, "credential probe task failed");
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// `(completed, errors)` so far.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::*;
    use crate::probe::Verdict;
    use std::time::Duration;

    #[test]
    fn test_cross_order() {
        let users = vec!["a".to_string(), "b".to_string()];
        let passwords = vec!["1".to_string(), "2".to_string()];
        let creds = Credential::cross(&users, &passwords);
        assert_eq!(
            creds,
            vec![
                Credential::new("a", "1"),
                Credential::new("a", "2"),
                Credential::new("b", "1"),
                Credential::new("b", "2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_runs_every_credential() {
        let transport = MockTransport::always(403);
        let probe = CredentialProbe::new(executor(transport.clone()), fixed_headers());
        let runner = SprayRunner::new(probe, 2);

        let creds = Credential::cross(
            &["alice".to_string(), "bob".to_string(), "carol".to_string()],
            &["pw".to_string()],
        );
        let mut results = runner.run("https://mail.example.com", creds).await;
        results.sort_by(|a, b| a.username.cmp(&b.username));

        let names: Vec<&str> = results.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
        assert!(results.iter().all(|r| r.verdict == Some(Verdict::Failure)));
        assert_eq!(runner.stats(), (3, 0));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_results_stream_before_all_requests_start() {
        let transport = MockTransport::always(403);
        let probe = CredentialProbe::new(executor(transport.clone()), fixed_headers());
        let runner = SprayRunner::new(probe, 1);

        let users: Vec<String> = (0..5).map(|i| format!("user{i}")).collect();
        let mut sent_at_each_result = Vec::new();
        runner
            .run_each(
                "https://mail.example.com",
                Credential::cross(&users, &["pw".to_string()]),
                |_| sent_at_each_result.push(transport.calls()),
            )
            .await;

        assert_eq!(sent_at_each_result.len(), 5);
        assert!(sent_at_each_result[0] < 5, "{sent_at_each_result:?}");
        assert_eq!(runner.stats(), (5, 0));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        use std::sync::atomic::AtomicUsize;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let transport = {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            MockTransport::new(move |_, _| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(response(200))
            })
        };
        let probe = CredentialProbe::new(executor(transport), fixed_headers());
        let runner = SprayRunner::new(probe, 2);

        let users: Vec<String> = (0..8).map(|i| format!("user{i}")).collect();
        let results = runner
            .run("https://mail.example.com", Credential::cross(&users, &["pw".to_string()]))
            .await;
        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
