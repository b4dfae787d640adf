use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::MojangError;
use crate::models::*;

/// Connect timeout used when a call passes `None`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

const MAX_CACHED_CLIENTS: usize = 16;

// Used only when no executor was injected; lives for the whole process.
static DEFAULT_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    Builder::new_multi_thread()
        .thread_name("mojang-metadata")
        .enable_all()
        .build()
        .expect("failed to start the default mojang-metadata runtime")
});

/// Base URLs of the two Mojang services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub api: String,
    pub session: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api: "https://api.mojang.com".to_string(),
            session: "https://sessionserver.mojang.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Points both services at the same base, e.g. a local mock server.
    pub fn single(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            api: base.clone(),
            session: base,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    UniqueId,
    SkinInfo,
    NameHistory,
    BlockedServers,
}

impl Operation {
    fn fetcher(self) -> &'static str {
        match self {
            Operation::UniqueId => "UUIDFetcher",
            Operation::SkinInfo => "SkinFetcher",
            Operation::NameHistory => "NameHistoryFetcher",
            Operation::BlockedServers => "BlockedServersFetcher",
        }
    }

    fn accepts_json(self) -> bool {
        !matches!(self, Operation::BlockedServers)
    }
}

/// Handle to an operation running on the client's executor.
///
/// Resolves to the operation's result. Dropping it does not abort the
/// underlying request; the outcome is simply discarded.
#[must_use = "a Pending does nothing observable unless awaited"]
pub struct Pending<T> {
    inner: BoxFuture<'static, Result<T, MojangError>>,
}

impl<T: Send + 'static> Pending<T> {
    fn spawn<F>(executor: &Handle, work: F) -> Self
    where
        F: Future<Output = Result<T, MojangError>> + Send + 'static,
    {
        let task = executor.spawn(work);
        Self {
            inner: async move {
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(MojangError::Task(e.to_string())),
                }
            }
            .boxed(),
        }
    }

    fn ready(result: Result<T, MojangError>) -> Self {
        Self {
            inner: futures::future::ready(result).boxed(),
        }
    }

    /// Chains a fallible step onto the result. The step runs on whichever
    /// task polls the returned handle.
    pub fn map<U, F>(self, f: F) -> Pending<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, MojangError> + Send + 'static,
    {
        Pending {
            inner: self.inner.map(|result| result.and_then(f)).boxed(),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, MojangError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

/// Asynchronous client for the unauthenticated Mojang metadata endpoints.
///
/// Every call is spawned onto the configured executor and returns a
/// [`Pending`] right away. Each call takes an optional connect timeout;
/// `None` falls back to the client's timeout ([`DEFAULT_TIMEOUT`] unless
/// changed with [`with_timeout`](Self::with_timeout)).
#[derive(Clone)]
pub struct MojangApi {
    program: Arc<str>,
    timeout: Duration,
    max_parallel: usize,
    endpoints: Arc<Endpoints>,
    executor: Option<Handle>,
    clients: Arc<DashMap<Duration, reqwest::Client>>,
}

impl Default for MojangApi {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

impl MojangApi {
    /// `program` prefixes the `User-Agent` of every request, typically the
    /// name of the plugin using the client.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: Arc::from(program.into()),
            timeout: DEFAULT_TIMEOUT,
            max_parallel: 10,
            endpoints: Arc::new(Endpoints::default()),
            executor: None,
            clients: Arc::new(DashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Arc::new(endpoints);
        self
    }

    /// Runs requests on `executor` instead of the library's own runtime.
    /// The client never shuts it down.
    pub fn with_executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Looks up the unique id currently owned by `name`.
    pub fn unique_id(&self, name: &str, timeout: Option<Duration>) -> Pending<IdentityLookup> {
        self.unique_id_json(name, timeout)
            .map(|json| decoded(Operation::UniqueId, IdentityLookup::from_json(&json)))
    }

    /// The name is sent as a single escaped path segment.
    pub fn unique_id_json(&self, name: &str, timeout: Option<Duration>) -> Pending<Value> {
        if matches!(name, "" | "." | "..") {
            return Pending::ready(Err(MojangError::InvalidName));
        }
        match endpoint(&self.endpoints.api, &["users", "profiles", "minecraft", name]) {
            Ok(url) => self.spawn_json(Operation::UniqueId, url, timeout),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Fetches the signed texture property of a profile.
    pub fn skin_info(&self, uuid: Uuid, timeout: Option<Duration>) -> Pending<SkinInfo> {
        self.skin_info_json(uuid, timeout)
            .map(|json| decoded(Operation::SkinInfo, SkinInfo::from_json(&json)))
    }

    pub fn skin_info_json(&self, uuid: Uuid, timeout: Option<Duration>) -> Pending<Value> {
        let id = uuid.simple().to_string();
        match endpoint(&self.endpoints.session, &["session", "minecraft", "profile", id.as_str()]) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("unsigned", "false");
                self.spawn_json(Operation::SkinInfo, url, timeout)
            }
            Err(e) => Pending::ready(Err(e)),
        }
    }

    pub fn name_history(&self, uuid: Uuid, timeout: Option<Duration>) -> Pending<NameHistory> {
        self.name_history_json(uuid, timeout)
            .map(move |json| decoded(Operation::NameHistory, NameHistory::from_json(uuid, &json)))
    }

    pub fn name_history_json(&self, uuid: Uuid, timeout: Option<Duration>) -> Pending<Value> {
        let id = uuid.simple().to_string();
        match endpoint(&self.endpoints.api, &["user", "profiles", id.as_str(), "names"]) {
            Ok(url) => self.spawn_json(Operation::NameHistory, url, timeout),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Fetches the newline-delimited list of blocked server hashes.
    pub fn blocked_servers(&self, timeout: Option<Duration>) -> Pending<BlockedServers> {
        let url = match endpoint(&self.endpoints.session, &["blockedservers"]) {
            Ok(url) => url,
            Err(e) => return Pending::ready(Err(e)),
        };
        let request = self.request(Operation::BlockedServers, url, timeout);
        Pending::spawn(self.executor(), async move {
            let body = request.send().await?.text().await?;
            trace!(bytes = body.len(), "Received blocked server list");
            Ok::<_, MojangError>(BlockedServers::from_text(&body))
        })
    }

    /// Resolves several names concurrently, at most `max_parallel` at a time.
    /// Results come back in completion order.
    pub async fn unique_ids<I, S>(
        &self,
        names: I,
        timeout: Option<Duration>,
    ) -> Vec<(String, Result<IdentityLookup, MojangError>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        use futures::stream::StreamExt;

        futures::stream::iter(names.into_iter().map(Into::into))
            .map(|name: String| {
                let pending = self.unique_id(&name, timeout);
                async move { (name, pending.await) }
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await
    }

    // Helper methods
    fn executor(&self) -> &Handle {
        self.executor.as_ref().unwrap_or_else(|| DEFAULT_RUNTIME.handle())
    }

    fn user_agent(&self, operation: Operation) -> String {
        format!("{}-{}", self.program, operation.fetcher())
    }

    fn request(&self, operation: Operation, url: Url, timeout: Option<Duration>) -> Request {
        Request {
            operation,
            url,
            user_agent: self.user_agent(operation),
            timeout: whole_millis(timeout.unwrap_or(self.timeout)),
            clients: self.clients.clone(),
        }
    }

    fn spawn_json(&self, operation: Operation, url: Url, timeout: Option<Duration>) -> Pending<Value> {
        let request = self.request(operation, url, timeout);
        Pending::spawn(self.executor(), async move {
            let body = request.send().await?.bytes().await?;
            trace!(bytes = body.len(), "Received JSON response");
            let json: Value = serde_json::from_slice(&body)?;
            Ok::<_, MojangError>(json)
        })
    }
}

/// One outgoing GET, fully described before it leaves the caller's thread.
struct Request {
    operation: Operation,
    url: Url,
    user_agent: String,
    timeout: Duration,
    clients: Arc<DashMap<Duration, reqwest::Client>>,
}

impl Request {
    async fn send(self) -> Result<reqwest::Response, MojangError> {
        debug!(
            operation = ?self.operation,
            url = %self.url,
            timeout = ?self.timeout,
            "Sending request"
        );

        let client = self.http_client()?;
        let mut builder = client
            .get(self.url.clone())
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        if self.operation.accepts_json() {
            builder = builder.header(reqwest::header::ACCEPT, "application/json");
        }

        let response = builder.send().await?.error_for_status()?;
        Ok(response)
    }

    // reqwest only knows connect timeouts per client, so keep one client per value.
    fn http_client(&self) -> Result<reqwest::Client, MojangError> {
        if let Some(client) = self.clients.get(&self.timeout) {
            return Ok(client.value().clone());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .build()?;
        if self.clients.len() < MAX_CACHED_CLIENTS {
            self.clients.insert(self.timeout, client.clone());
        }
        Ok(client)
    }
}

/// Appends `segments` to `base`, escaping each one as a single path segment.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, MojangError> {
    let mut url = Url::parse(base).map_err(|e| MojangError::InvalidEndpoint(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| MojangError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

// Sub-millisecond remainders round up so a tiny timeout never becomes zero.
fn whole_millis(timeout: Duration) -> Duration {
    let millis = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

fn decoded<T>(operation: Operation, result: Result<T, MojangError>) -> Result<T, MojangError> {
    if let Err(e) = &result {
        warn!(operation = ?operation, error = %e, "Unexpected response body");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn defaults() {
        let api = MojangApi::new("HeadsPlugin");
        assert_eq!(api.timeout(), Duration::from_millis(5000));
        assert_eq!(api.program(), "HeadsPlugin");
        assert_eq!(api.endpoints(), &Endpoints::default());
        assert_eq!(api.endpoints().api, "https://api.mojang.com");
        assert_eq!(api.endpoints().session, "https://sessionserver.mojang.com");
    }

    #[test]
    fn user_agent_names_the_operation() {
        let api = MojangApi::new("HeadsPlugin");
        assert_eq!(api.user_agent(Operation::UniqueId), "HeadsPlugin-UUIDFetcher");
        assert_eq!(api.user_agent(Operation::SkinInfo), "HeadsPlugin-SkinFetcher");
        assert_eq!(api.user_agent(Operation::NameHistory), "HeadsPlugin-NameHistoryFetcher");
        assert_eq!(api.user_agent(Operation::BlockedServers), "HeadsPlugin-BlockedServersFetcher");
    }

    #[test]
    fn only_text_endpoint_skips_accept_header() {
        assert!(Operation::UniqueId.accepts_json());
        assert!(Operation::SkinInfo.accepts_json());
        assert!(Operation::NameHistory.accepts_json());
        assert!(!Operation::BlockedServers.accepts_json());
    }

    #[test]
    fn request_timeout_falls_back_to_client_default() {
        let api = MojangApi::new("p").with_timeout(Duration::from_millis(750));
        let implicit = api.request(Operation::UniqueId, url("http://x"), None);
        assert_eq!(implicit.timeout, Duration::from_millis(750));

        let explicit = api.request(Operation::UniqueId, url("http://x"), Some(Duration::from_millis(1234)));
        assert_eq!(explicit.timeout, Duration::from_millis(1234));
    }

    #[test]
    fn timeouts_round_up_to_whole_millis() {
        assert_eq!(whole_millis(Duration::from_millis(200)), Duration::from_millis(200));
        assert_eq!(whole_millis(Duration::from_micros(200_300)), Duration::from_millis(201));
        assert_eq!(whole_millis(Duration::from_micros(200_700)), Duration::from_millis(201));
        assert_eq!(whole_millis(Duration::from_nanos(1)), Duration::from_millis(1));
        assert_eq!(whole_millis(Duration::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn endpoints_deserialize_with_defaults() {
        let endpoints: Endpoints = serde_json::from_str(r#"{ "api": "http://localhost:1/" }"#).unwrap();
        assert_eq!(endpoints.api, "http://localhost:1/");
        assert_eq!(endpoints.session, Endpoints::default().session);
        let built = endpoint(&endpoints.api, &["blockedservers"]).unwrap();
        assert_eq!(built.as_str(), "http://localhost:1/blockedservers");
    }

    #[test]
    fn names_are_escaped_as_one_segment() {
        let base = "https://api.mojang.com";
        let cases = [
            ("Notch?x=1", "https://api.mojang.com/users/profiles/minecraft/Notch%3Fx=1"),
            ("Notch#frag", "https://api.mojang.com/users/profiles/minecraft/Notch%23frag"),
            ("x/../Notch", "https://api.mojang.com/users/profiles/minecraft/x%2F..%2FNotch"),
        ];
        for (name, expected) in cases {
            let built = endpoint(base, &["users", "profiles", "minecraft", name]).unwrap();
            assert_eq!(built.as_str(), expected, "name {name:?}");
            assert_eq!(built.query(), None);
            assert_eq!(built.fragment(), None);
        }
    }

    #[test]
    fn unusable_base_is_rejected() {
        assert!(matches!(endpoint("not a url", &["x"]), Err(MojangError::InvalidEndpoint(_))));
        assert!(matches!(endpoint("mailto:someone", &["x"]), Err(MojangError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn empty_name_fails_without_request() {
        let api = MojangApi::new("p").with_endpoints(Endpoints::single("http://127.0.0.1:9"));
        for name in ["", ".", ".."] {
            let err = api.unique_id(name, None).await.unwrap_err();
            assert!(matches!(err, MojangError::InvalidName));
        }
        assert!(api.clients.is_empty());
    }

    #[test]
    fn http_clients_are_cached_per_timeout() {
        let api = MojangApi::new("p");
        let short = api.request(Operation::SkinInfo, url("http://x"), Some(Duration::from_millis(100)));
        short.http_client().unwrap();
        short.http_client().unwrap();
        let long = api.request(Operation::SkinInfo, url("http://x"), None);
        long.http_client().unwrap();
        assert_eq!(api.clients.len(), 2);
    }

    #[test]
    fn client_cache_is_bounded() {
        let api = MojangApi::new("p");
        for step in 0..(MAX_CACHED_CLIENTS as u64 * 3) {
            let timeout = Duration::from_micros(100_000 + step * 1_000 + 1);
            let request = api.request(Operation::UniqueId, url("http://x"), Some(timeout));
            request.http_client().unwrap();
        }
        assert_eq!(api.clients.len(), MAX_CACHED_CLIENTS);
    }

    #[tokio::test]
    async fn default_timeout_is_used_for_none() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let api = MojangApi::new("p")
            .with_endpoints(Endpoints::single(format!("http://127.0.0.1:{closed}")))
            .with_executor(Handle::current());

        assert!(api.blocked_servers(None).await.is_err());
        assert!(api.clients.contains_key(&DEFAULT_TIMEOUT));
        assert_eq!(api.clients.len(), 1);
    }
}
