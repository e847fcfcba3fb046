use crate::config::ConfigError;
use crate::descriptor::FlagDescriptor;
use crate::fetch::{FetchError, FlagSource};
use crate::metrics_defs::{FETCH_DURATION, histogram};
use crate::resolver::{Resolved, Resolver};
use crate::state::ResolutionError;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("no feature url configured")]
    MissingUrl,
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("invalid payload: {0}")]
    InvalidData(#[from] ResolutionError),
    #[error("the flag service has shut down")]
    ShutDown,
}

#[derive(Debug)]
pub enum Command {
    // Fetch again, from `url` or the configured feature url. The worker replies
    // with the number of keys received once the attempt finishes.
    Refresh {
        url: Option<String>,
        reply: oneshot::Sender<Result<usize, LoadError>>,
    },
    // Stop the loader.
    Shutdown,
}

struct FlagServiceInner {
    resolver: Arc<RwLock<Resolver>>,
    tx: mpsc::Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Shares a [`Resolver`] with a background task that feeds it fetched data.
///
/// Must be created inside a tokio runtime. The loader performs one load on
/// startup and afterwards only on [`FlagService::refresh`].
#[derive(Clone)]
pub struct FlagService {
    inner: Arc<FlagServiceInner>,
}

impl FlagService {
    pub fn new(resolver: Resolver, source: Arc<dyn FlagSource>) -> Self {
        // Channel to send commands to the loader. All fetching happens on that task.
        let (tx, rx) = mpsc::channel::<Command>(64);
        let resolver = Arc::new(RwLock::new(resolver));

        let loader = Loader {
            resolver: resolver.clone(),
            source,
        };
        let handle = tokio::spawn(loader.run(rx));

        FlagService {
            inner: Arc::new(FlagServiceInner {
                resolver,
                tx,
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    pub fn resolve(&self, requested_key: &str) -> Resolved {
        self.inner.resolver.read().resolve(requested_key)
    }

    pub fn flag(&self, requested_key: &str) -> Arc<FlagDescriptor> {
        self.inner.resolver.read().flag(requested_key)
    }

    pub fn configure(&self, options: &Value) -> Result<(), ConfigError> {
        self.inner.resolver.write().configure(options)
    }

    pub fn enter_test_mode(&self) {
        self.inner.resolver.write().enter_test_mode();
    }

    /// Ready once data was fetched successfully, or in test mode.
    pub fn is_ready(&self) -> bool {
        self.inner.resolver.read().did_fetch_data()
    }

    /// Runs `f` with shared access to the resolver.
    pub fn with_resolver<R>(&self, f: impl FnOnce(&Resolver) -> R) -> R {
        f(&self.inner.resolver.read())
    }

    pub async fn refresh(&self, url: Option<String>) -> Result<usize, LoadError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .tx
            .send(Command::Refresh { url, reply })
            .await
            .map_err(|_| LoadError::ShutDown)?;
        rx.await.map_err(|_| LoadError::ShutDown)?
    }

    /// Stops the loader and releases every memoized descriptor.
    pub async fn shutdown(&self) {
        let _ = self.inner.tx.send(Command::Shutdown).await;

        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::error!("flag loader panicked: {err}");
        }

        self.inner.resolver.write().teardown();
    }
}

struct Loader {
    resolver: Arc<RwLock<Resolver>>,
    source: Arc<dyn FlagSource>,
}

impl Loader {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        if let Err(err) = self.load(None).await {
            tracing::error!(error = %err, "initial feature load failed");
        }

        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Refresh { url, reply } => {
                    let result = self.load(url).await;
                    if let Err(err) = &result {
                        tracing::error!(error = %err, "feature refresh failed");
                    }
                    let _ = reply.send(result);
                }
                Command::Shutdown => break,
            }
        }
    }

    async fn load(&self, url: Option<String>) -> Result<usize, LoadError> {
        let url = match url {
            Some(url) => url,
            None => self.configured_url().ok_or(LoadError::MissingUrl)?,
        };

        let started = Instant::now();
        let fetched = self.source.fetch(&url).await;
        histogram!(FETCH_DURATION).record(started.elapsed().as_secs_f64());

        match fetched {
            Ok(payload) => Ok(self.resolver.write().receive(&payload)?),
            Err(err) => {
                self.resolver.write().receive_error(err.to_string());
                Err(err.into())
            }
        }
    }

    fn configured_url(&self) -> Option<String> {
        self.resolver.read().config().feature_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlagConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Serves queued responses in order, then repeats the last one.
    struct QueuedSource {
        responses: Mutex<Vec<Result<Value, String>>>,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl QueuedSource {
        fn new(responses: Vec<Result<Value, String>>) -> Arc<Self> {
            Arc::new(QueuedSource {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FlagSource for QueuedSource {
        async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.urls.lock().push(url.to_string());

            let mut responses = self.responses.lock();
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            };
            next.map_err(|reason| {
                FetchError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    reason,
                ))
            })
        }
    }

    fn resolver() -> Resolver {
        Resolver::new(FlagConfig {
            feature_url: Some("https://flags.example.com/features.json".into()),
            feature_key: "name".into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_initial_load_and_refresh() {
        let source = QueuedSource::new(vec![
            Ok(json!([{"name": "dark-mode", "enabled": true}])),
            Ok(json!([{"name": "dark-mode", "enabled": false}, {"name": "beta"}])),
        ]);
        let service = FlagService::new(resolver(), source.clone());

        // Queued behind the initial load on the loader task.
        assert_eq!(service.refresh(None).await.unwrap(), 2);
        assert!(service.is_ready());
        assert_eq!(source.calls.load(Ordering::Relaxed), 2);
        assert!(!service.flag("darkMode").is_enabled());

        service.shutdown().await;
        assert!(!service.with_resolver(|r| r.is_memoized("darkMode")));
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_error() {
        let source = QueuedSource::new(vec![Err("connection refused".into())]);
        let service = FlagService::new(resolver(), source);

        let result = service.refresh(None).await;
        assert!(matches!(result, Err(LoadError::Fetch(FetchError::Io(_)))));
        assert!(!service.is_ready());
        assert!(service.flag("darkMode").is_relay());
        assert_eq!(
            service.with_resolver(|r| r.last_error().map(ToString::to_string)),
            Some("I/O error: connection refused".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let source = QueuedSource::new(vec![Ok(json!({"features": []}))]);
        let service = FlagService::new(resolver(), source);

        let result = service.refresh(None).await;
        assert!(matches!(
            result,
            Err(LoadError::InvalidData(ResolutionError::InvalidData))
        ));
        assert!(!service.is_ready());
    }

    #[tokio::test]
    async fn test_missing_url_and_explicit_url() {
        let source = QueuedSource::new(vec![Ok(json!([{"name": "beta", "enabled": true}]))]);
        let service = FlagService::new(Resolver::default(), source.clone());

        assert!(matches!(
            service.refresh(None).await,
            Err(LoadError::MissingUrl)
        ));

        service.configure(&json!({"featureKey": "name"})).unwrap();
        let keys = service
            .refresh(Some("https://other.example.com/flags".into()))
            .await
            .unwrap();
        assert_eq!(keys, 1);
        assert_eq!(
            source.urls.lock().as_slice(),
            &["https://other.example.com/flags".to_string()]
        );
        assert!(service.flag("beta").is_enabled());
    }

    #[tokio::test]
    async fn test_test_mode_is_ready() {
        let source = QueuedSource::new(vec![Err("offline".into())]);
        let service = FlagService::new(resolver(), source);
        service.enter_test_mode();

        let _ = service.refresh(None).await;
        assert!(service.is_ready());
        let descriptor = service.flag("neverFetched");
        assert!(descriptor.is_relay());
        assert!(descriptor.is_enabled());
    }

    #[tokio::test]
    async fn test_refresh_after_shutdown() {
        let source = QueuedSource::new(vec![Ok(json!([]))]);
        let service = FlagService::new(resolver(), source);
        service.shutdown().await;

        assert!(matches!(
            service.refresh(None).await,
            Err(LoadError::ShutDown)
        ));
    }
}
