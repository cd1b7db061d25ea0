use outreach_core::{ConfigError, CoreError, ProxyConfig, ProxyScheme, RotationMode};
use reqwest::{Client, ClientBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a single liveness probe through a candidate proxy.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether this build can route through SOCKS5 proxies.
pub fn socks_supported() -> bool {
    cfg!(feature = "socks")
}

/// Fail fast when a proxy needs a capability the build lacks.
pub fn ensure_supported(proxy: &ProxyConfig) -> Result<(), ConfigError> {
    proxy.validate()?;
    if proxy.scheme == ProxyScheme::Socks5 && !socks_supported() {
        return Err(ConfigError::SocksUnsupported {
            proxy: proxy.endpoint(),
        });
    }
    Ok(())
}

/// Route every request of `builder` through `proxy`, or disable
/// environment proxies when there is none.
pub fn apply_proxy(
    builder: ClientBuilder,
    proxy: Option<&ProxyConfig>,
) -> Result<ClientBuilder, CoreError> {
    let Some(proxy) = proxy else {
        return Ok(builder.no_proxy());
    };

    ensure_supported(proxy)?;
    let reqwest_proxy = reqwest::Proxy::all(proxy.to_url())
        .map_err(|e| CoreError::from_transport(e, Some(&proxy.endpoint())))?;
    Ok(builder.proxy(reqwest_proxy))
}

/// Checks whether a candidate proxy can carry traffic.
///
/// `Ok(false)` and ordinary errors mean "try the next one". A configuration
/// error aborts the search because it applies to every candidate of that kind.
pub trait LivenessProbe {
    async fn probe(&self, proxy: &ProxyConfig) -> Result<bool, CoreError>;
}

/// Probes by fetching an IP-echo endpoint through the candidate.
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    url: String,
    timeout: Duration,
}

impl HttpLivenessProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl LivenessProbe for HttpLivenessProbe {
    async fn probe(&self, proxy: &ProxyConfig) -> Result<bool, CoreError> {
        let client: Client = apply_proxy(Client::builder().timeout(self.timeout), Some(proxy))?
            .build()
            .map_err(|e| CoreError::from_transport(e, Some(&proxy.endpoint())))?;

        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CoreError::from_transport(e, Some(&proxy.endpoint())))?;

        Ok(response.status().as_u16() == 200)
    }
}

/// An ordered set of egress proxies with a shared rotation cursor.
///
/// The cursor is never exposed; `next` advances it atomically so concurrent
/// callers each get a distinct step of the cycle.
#[derive(Debug, Default)]
pub struct ProxyRotationPool {
    proxies: Vec<ProxyConfig>,
    cursor: AtomicUsize,
}

impl ProxyRotationPool {
    pub fn new(proxies: Vec<ProxyConfig>) -> Self {
        Self {
            proxies,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn proxies(&self) -> &[ProxyConfig] {
        &self.proxies
    }

    /// The proxy under the cursor; the cursor moves to the following entry.
    pub fn next(&self) -> Option<ProxyConfig> {
        let len = self.proxies.len();
        if len == 0 {
            return None;
        }

        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1) % len)
            })
            .unwrap_or_else(|current| current);

        Some(self.proxies[index].clone())
    }

    /// Uniform pick with replacement. Leaves the cursor alone.
    pub fn random(&self) -> Option<ProxyConfig> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = fastrand::usize(..self.proxies.len());
        Some(self.proxies[index].clone())
    }

    /// First proxy, in pool order, that passes `probe`. Stops probing at the
    /// first success.
    pub async fn first_working<P: LivenessProbe>(
        &self,
        probe: &P,
    ) -> Result<Option<ProxyConfig>, CoreError> {
        for (position, proxy) in self.proxies.iter().enumerate() {
            debug!("Probing proxy #{} {}", position, proxy.endpoint());
            match probe.probe(proxy).await {
                Ok(true) => {
                    info!("Proxy {} passed liveness probe", proxy.endpoint());
                    return Ok(Some(proxy.clone()));
                }
                Ok(false) => {
                    debug!("Proxy {} failed liveness probe", proxy.endpoint());
                }
                Err(error) if error.is_configuration() => {
                    warn!(
                        "Proxy {} cannot be used by this build: {}",
                        proxy.endpoint(),
                        error
                    );
                    return Err(error);
                }
                Err(error) => {
                    debug!("Proxy {} probe error: {}", proxy.endpoint(), error);
                }
            }
        }

        warn!("No working proxy among {} candidates", self.proxies.len());
        Ok(None)
    }

    /// Pick a proxy according to `mode`.
    pub async fn select<P: LivenessProbe>(
        &self,
        mode: RotationMode,
        probe: &P,
    ) -> Result<Option<ProxyConfig>, CoreError> {
        match mode {
            RotationMode::Sequential => Ok(self.next()),
            RotationMode::Random => Ok(self.random()),
            RotationMode::FirstWorking => self.first_working(probe).await,
        }
    }
}
