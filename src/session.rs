//! Runtime-mutable connection target
//!
//! The adapter can be repointed at another Blaze instance while it runs. The
//! current target lives behind a lock as an `Arc<Target>`; readers clone the
//! `Arc` and release the lock immediately, writers swap the whole value.

use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};

/// Backend base URL plus the timeout applied to every call against it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    base_url: Url,
    timeout: Duration,
}

impl Target {
    /// Validate and normalize a target
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::invalid_target(url, "timeout must be greater than zero"));
        }
        Ok(Self {
            base_url: parse_base_url(url)?,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Base URL rendered without a trailing slash
    pub fn display_url(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }

    /// Same target with another timeout
    pub fn with_timeout(&self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::invalid_target(
                self.display_url(),
                "timeout must be greater than zero",
            ));
        }
        Ok(Self {
            base_url: self.base_url.clone(),
            timeout,
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| Error::invalid_target(raw, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::invalid_target(raw, "URL must start with http:// or https://"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_target(raw, "URL must include a host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::invalid_target(
            raw,
            "base URL must not carry a query string or fragment",
        ));
    }
    Ok(url)
}

/// Process-wide session shared by every tool invocation
#[derive(Debug)]
pub struct SessionState {
    current: RwLock<Arc<Target>>,
}

impl SessionState {
    pub fn new(target: Target) -> Self {
        Self {
            current: RwLock::new(Arc::new(target)),
        }
    }

    /// Snapshot of the current target
    pub async fn get_target(&self) -> Arc<Target> {
        self.current.read().await.clone()
    }

    /// Replace the target, returning the previous one.
    ///
    /// When `timeout` is `None` the current timeout is kept. On error the
    /// stored target is left untouched.
    pub async fn set_target(&self, url: &str, timeout: Option<Duration>) -> Result<Arc<Target>> {
        let mut guard = self.current.write().await;
        let timeout = timeout.unwrap_or(guard.timeout);
        let next = Arc::new(Target::new(url, timeout)?);

        info!(
            previous = %guard.display_url(),
            current = %next.display_url(),
            timeout_secs = timeout.as_secs_f64(),
            "Blaze target updated"
        );
        Ok(std::mem::replace(&mut *guard, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn session(url: &str) -> SessionState {
        SessionState::new(Target::new(url, Duration::from_secs(30)).unwrap())
    }

    #[rstest]
    #[case("http://localhost:8080/fhir", "http://localhost:8080/fhir")]
    #[case("http://localhost:8080/fhir/", "http://localhost:8080/fhir")]
    #[case("https://blaze.example.org", "https://blaze.example.org")]
    #[case("  http://10.0.0.5:8080/fhir//  ", "http://10.0.0.5:8080/fhir")]
    fn test_target_normalizes_trailing_slash(#[case] input: &str, #[case] expected: &str) {
        let target = Target::new(input, Duration::from_secs(5)).unwrap();
        assert_eq!(target.display_url(), expected);
    }

    #[rstest]
    #[case("localhost:8080/fhir")]
    #[case("ftp://blaze.example.org/fhir")]
    #[case("not a url")]
    #[case("")]
    #[case("http://blaze/fhir?tenant=a")]
    #[case("http://blaze/fhir#frag")]
    fn test_target_rejects_malformed_urls(#[case] input: &str) {
        let err = Target::new(input, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);
    }

    #[test]
    fn test_target_rejects_zero_timeout() {
        let err = Target::new("http://blaze/fhir", Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);
    }

    #[tokio::test]
    async fn test_set_target_returns_previous() {
        let session = session("http://first:8080/fhir");

        let previous = session
            .set_target("http://second:8080/fhir", None)
            .await
            .unwrap();

        assert_eq!(previous.display_url(), "http://first:8080/fhir");
        let current = session.get_target().await;
        assert_eq!(current.display_url(), "http://second:8080/fhir");
        assert_eq!(current.timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_set_target_with_timeout() {
        let session = session("http://first:8080/fhir");
        session
            .set_target("http://second:8080/fhir", Some(Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(session.get_target().await.timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_rejected_target_leaves_previous_in_place() {
        let session = session("http://first:8080/fhir");

        let err = session.set_target("blaze-without-scheme", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);

        let err = session
            .set_target("http://second:8080/fhir", Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);

        assert_eq!(session.get_target().await.display_url(), "http://first:8080/fhir");
    }

    #[tokio::test]
    async fn test_snapshot_is_not_affected_by_later_writes() {
        let session = session("http://first:8080/fhir");
        let snapshot = session.get_target().await;

        session.set_target("https://second/r4", None).await.unwrap();

        assert_eq!(snapshot.display_url(), "http://first:8080/fhir");
        assert_eq!(session.get_target().await.display_url(), "https://second/r4");
    }
}
