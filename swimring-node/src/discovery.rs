use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DiscoveryError;

#[async_trait]
/// A source of seed hosts used to bootstrap a node.
pub trait DiscoverProvider: Send + Sync + 'static {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError>;
}

#[derive(Debug, Clone)]
/// A fixed list of hosts.
pub struct StaticHosts(Vec<String>);

impl StaticHosts {
    pub fn new(hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(hosts.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl DiscoverProvider for StaticHosts {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
/// Hosts read from a file.
///
/// The file contains either one host per line, with `#` comments, or an
/// array of quoted hosts such as `["10.0.0.1:3000", "10.0.0.2:3000"]`.
pub struct FileHosts {
    path: PathBuf,
}

impl FileHosts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DiscoverProvider for FileHosts {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        parse_hosts(&contents).map_err(|message| DiscoveryError::Parse {
            source_name: self.path.display().to_string(),
            message,
        })
    }
}

fn parse_hosts(contents: &str) -> Result<Vec<String>, String> {
    let trimmed = contents.trim();

    if !trimmed.starts_with('[') {
        return Ok(trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string)
            .collect());
    }

    serde_json::from_str::<Vec<String>>(trimmed)
        .map_err(|e| format!("Invalid host array: {e}"))
}

/// Retries another provider with a fixed backoff until it produces hosts.
pub struct RetryingProvider<P> {
    inner: P,
    max_attempts: usize,
    backoff: Duration,
}

impl<P: DiscoverProvider> RetryingProvider<P> {
    pub fn new(inner: P, max_attempts: usize, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

#[async_trait]
impl<P: DiscoverProvider> DiscoverProvider for RetryingProvider<P> {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self.inner.discover().await {
                Ok(hosts) if !hosts.is_empty() => return Ok(hosts),
                Ok(_) => DiscoveryError::Parse {
                    source_name: "provider".to_string(),
                    message: "No hosts were discovered.".to_string(),
                },
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                return Err(DiscoveryError::Exhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            warn!(attempt = attempt, error = %error, "Discovery failed, retrying.");
            tokio::time::sleep(self.backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_parse_hosts() {
        let hosts = parse_hosts("10.0.0.1:3000\n# comment\n\n 10.0.0.2:3000 \n").unwrap();
        assert_eq!(hosts, vec!["10.0.0.1:3000", "10.0.0.2:3000"]);

        let hosts = parse_hosts(r#"["10.0.0.1:3000", "10.0.0.2:3000"]"#).unwrap();
        assert_eq!(hosts, vec!["10.0.0.1:3000", "10.0.0.2:3000"]);

        assert!(parse_hosts("[10.0.0.1:3000]").is_err());
        assert!(parse_hosts(r#"["10.0.0.1:3000""#).is_err());
        assert!(parse_hosts("[]").unwrap().is_empty());

        let hosts = parse_hosts(r#"["10.0.0.\u0031:3000", "host\"quoted:1"]"#).unwrap();
        assert_eq!(hosts, vec!["10.0.0.1:3000", "host\"quoted:1"]);

        assert!(parse_hosts(r#"["10.0.0.1:3000",,, ]"#).is_err());
        assert!(parse_hosts(r#"["10.0.0.1:3000",]"#).is_err());
        assert!(parse_hosts(r#"["10.0.0.1:3000", 42]"#).is_err());
    }

    #[tokio::test]
    async fn test_file_hosts() {
        let path = std::env::temp_dir().join(format!(
            "swimring-hosts-{}.json",
            std::process::id()
        ));
        tokio::fs::write(&path, r#"["127.0.0.1:3000"]"#)
            .await
            .unwrap();

        let hosts = FileHosts::new(&path).discover().await.unwrap();
        assert_eq!(hosts, vec!["127.0.0.1:3000"]);
        tokio::fs::remove_file(&path).await.unwrap();

        let err = FileHosts::new(&path).discover().await.unwrap_err();
        assert_eq!(err.kind(), "discovery-io");
    }

    struct Flaky {
        calls: AtomicUsize,
        succeed_after: usize,
    }

    #[async_trait]
    impl DiscoverProvider for Flaky {
        async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call > self.succeed_after {
                Ok(vec!["127.0.0.1:3000".to_string()])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_provider() {
        let provider = RetryingProvider::new(
            Flaky {
                calls: AtomicUsize::new(0),
                succeed_after: 2,
            },
            5,
            Duration::from_secs(1),
        );
        assert_eq!(provider.discover().await.unwrap().len(), 1);

        let provider = RetryingProvider::new(
            Flaky {
                calls: AtomicUsize::new(0),
                succeed_after: 10,
            },
            3,
            Duration::from_secs(1),
        );
        let err = provider.discover().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Exhausted { attempts: 3, .. }));

        let hosts = StaticHosts::new(["a:1", "b:1"]).discover().await.unwrap();
        assert_eq!(hosts.len(), 2);
    }
}
