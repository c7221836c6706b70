//! HTTP server bootstrap for the analytics service.
//!
//! This module wires together:
//! - configuration
//! - the salt, site store and collaborators
//! - pairing and request authentication
//! - the Axum router and graceful shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::api;
use crate::auth::{
    pairing_throttle, signature_gate, PairingManager, PairingThrottleState, RateLimiter,
    RequestAuthenticator, SignatureGateState, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::infra::{
    shutdown_signal, spawn_until_shutdown, AnalyticsError, CidrGeoLocator, GeoLocator,
    HeuristicClassifier, IdentityHasher, IngestionPath, MaxMindGeoLocator, SaltStore,
    ShutdownCoordinator, ShutdownSignal, SiteRegistry, SiteStore, UnknownGeoLocator,
};
use crate::metrics::MetricsRegistry;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?} (expected text or json)")),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Root of the salt file and the per-site databases.
    pub data_dir: PathBuf,
    /// Lifetime of a pairing challenge.
    pub challenge_ttl: chrono::Duration,
    /// Accepted clock skew of signed reads; also the replay memory span.
    pub signature_window: chrono::Duration,
    pub replay_cache_capacity: usize,
    /// Period of the expired-challenge sweeper.
    pub sweep_interval: Duration,
    /// Take the client address from `X-Forwarded-For`.
    pub trust_proxy_headers: bool,
    /// MaxMind GeoLite2 Country or City database. When unset, one is looked
    /// for in the data directory and the working directory.
    pub geoip_database: Option<PathBuf>,
    /// Optional `cidr,country` table for country lookup.
    pub geoip_table: Option<PathBuf>,
    /// Comma-separated origins, or `*`.
    pub cors_allow_origins: Option<String>,
    /// Per-client limit on pairing requests.
    pub rate_limit_per_minute: Option<u32>,
    /// Upper bound on draining connections after a shutdown signal.
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            data_dir: PathBuf::from("data"),
            challenge_ttl: chrono::Duration::seconds(300),
            signature_window: chrono::Duration::seconds(300),
            replay_cache_capacity: 100_000,
            sweep_interval: Duration::from_secs(60),
            trust_proxy_headers: false,
            geoip_database: None,
            geoip_table: None,
            cors_allow_origins: None,
            rate_limit_per_minute: None,
            shutdown_timeout: Duration::from_secs(30),
            log_format: LogFormat::Text,
        }
    }
}

fn config_error(name: &str, raw: &str, reason: impl std::fmt::Display) -> AnalyticsError {
    AnalyticsError::Configuration(format!("{name}={raw:?}: {reason}"))
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, AnalyticsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| config_error(name, &raw, e)),
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<u64, AnalyticsError> {
    let value = parse_var(lookup, name, default)?;
    if value == 0 {
        return Err(config_error(name, "0", "must be greater than zero"));
    }
    Ok(value)
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool, AnalyticsError> {
    match non_empty(lookup, name) {
        None => Ok(false),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(config_error(name, &raw, "expected a boolean")),
        },
    }
}

fn seconds(name: &str, secs: u64) -> Result<chrono::Duration, AnalyticsError> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| config_error(name, &secs.to_string(), "out of range"))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AnalyticsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any variable source. Invalid values are errors, never defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AnalyticsError> {
        let host = non_empty(&lookup, "HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_var(&lookup, "PORT", 8000)?;
        let listen_addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| config_error("HOST", &host, e))?;

        let challenge_ttl_secs = parse_positive(&lookup, "CHALLENGE_TTL_SECS", 300)?;
        let window_secs = parse_positive(&lookup, "SIGNATURE_WINDOW_SECS", 300)?;
        let replay_cache_capacity =
            parse_positive(&lookup, "REPLAY_CACHE_CAPACITY", 100_000)? as usize;
        let sweep_secs = parse_positive(&lookup, "SWEEP_INTERVAL_SECS", 60)?;
        let shutdown_secs = parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30u64)?;

        let rate_limit_per_minute = match non_empty(&lookup, "RATE_LIMIT_PER_MINUTE") {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) => return Err(config_error("RATE_LIMIT_PER_MINUTE", &raw, "must be greater than zero")),
                Ok(n) => Some(n),
                Err(e) => return Err(config_error("RATE_LIMIT_PER_MINUTE", &raw, e)),
            },
        };

        Ok(Self {
            listen_addr,
            data_dir: non_empty(&lookup, "DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            challenge_ttl: seconds("CHALLENGE_TTL_SECS", challenge_ttl_secs)?,
            signature_window: seconds("SIGNATURE_WINDOW_SECS", window_secs)?,
            replay_cache_capacity,
            sweep_interval: Duration::from_secs(sweep_secs),
            trust_proxy_headers: parse_flag(&lookup, "TRUST_PROXY_HEADERS")?,
            geoip_database: non_empty(&lookup, "GEOIP_DATABASE").map(PathBuf::from),
            geoip_table: non_empty(&lookup, "GEOIP_TABLE").map(PathBuf::from),
            cors_allow_origins: non_empty(&lookup, "CORS_ALLOW_ORIGINS"),
            rate_limit_per_minute,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            log_format: parse_var(&lookup, "LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

fn is_mmdb(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("mmdb"))
}

/// Pick the country locator.
///
/// A configured database or table must load. A discovered GeoLite2 file that
/// fails to load only degrades lookups to `Unknown`.
fn geo_locator(config: &Config) -> Result<Arc<dyn GeoLocator>, AnalyticsError> {
    if let Some(path) = &config.geoip_database {
        return Ok(Arc::new(MaxMindGeoLocator::open(path)?));
    }
    if let Some(path) = &config.geoip_table {
        if is_mmdb(path) {
            return Ok(Arc::new(MaxMindGeoLocator::open(path)?));
        }
        return Ok(Arc::new(CidrGeoLocator::from_file(path)?));
    }
    if let Some(path) = MaxMindGeoLocator::discover(&[config.data_dir.as_path(), Path::new(".")]) {
        match MaxMindGeoLocator::open(&path) {
            Ok(locator) => return Ok(Arc::new(locator)),
            Err(e) => warn!(error = %e, "Ignoring unreadable GeoIP database"),
        }
    }
    info!("No GeoIP database configured; countries will be reported as Unknown");
    Ok(Arc::new(UnknownGeoLocator))
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sites: Arc<SiteStore>,
    pub ingest: Arc<IngestionPath>,
    pub pairing: Arc<PairingManager>,
    pub authenticator: Arc<RequestAuthenticator>,
    pub identity: IdentityHasher,
    pub metrics: Arc<MetricsRegistry>,
    pub trust_proxy_headers: bool,
    pub data_dir: PathBuf,
    pub salt_path: PathBuf,
    pub shutdown: ShutdownSignal,
}

impl AppState {
    /// Prepare storage and services. Creates the data directory and salt on first start.
    pub async fn build(config: &Config, shutdown: ShutdownSignal) -> Result<Self, AnalyticsError> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let salt_store = SaltStore::new(&config.data_dir);
        let identity = IdentityHasher::new(salt_store.load_or_create()?);

        let geo = geo_locator(config)?;

        let sites = Arc::new(SiteStore::new(&config.data_dir));
        let registry: Arc<dyn SiteRegistry> = sites.clone();

        let ingest = Arc::new(IngestionPath::new(
            Arc::clone(&sites),
            identity.clone(),
            geo,
            Arc::new(HeuristicClassifier),
        ));
        let pairing = Arc::new(PairingManager::new(
            Arc::clone(&registry),
            config.challenge_ttl,
        ));
        let authenticator = Arc::new(RequestAuthenticator::new(
            registry,
            config.signature_window,
            config.replay_cache_capacity,
        ));

        Ok(Self {
            sites,
            ingest,
            pairing,
            authenticator,
            identity,
            metrics: Arc::new(MetricsRegistry::new()),
            trust_proxy_headers: config.trust_proxy_headers,
            data_dir: config.data_dir.clone(),
            salt_path: salt_store.path().to_path_buf(),
            shutdown,
        })
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!("Starting visitor analytics v{}", env!("CARGO_PKG_VERSION"));

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let state = AppState::build(&config, coordinator.signal()).await?;
    info!(data_dir = %config.data_dir.display(), "Storage ready");

    let sweeper = spawn_until_shutdown(
        coordinator.signal(),
        Arc::clone(&state.pairing).run_sweeper(config.sweep_interval),
    );

    let sites = Arc::clone(&state.sites);
    let app = build_router(state, &config)?;

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    let trigger = Arc::clone(&coordinator);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        trigger.trigger();
    })
    .into_future();

    let mut draining = coordinator.signal();
    let drain_timeout = config.shutdown_timeout;
    tokio::select! {
        result = server => result?,
        _ = async {
            draining.wait().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            warn!(timeout_secs = drain_timeout.as_secs(), "Graceful shutdown timed out; closing remaining connections");
        }
    }

    coordinator.trigger();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Challenge sweeper ended abnormally");
    }
    sites.close_all().await;

    info!("Shutdown complete");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` filters, `info` by default.
pub fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_thread_ids(true).init(),
    }
}

/// Assemble the router with the signature gate, optional pairing throttle, tracing and CORS.
pub fn build_router(state: AppState, config: &Config) -> anyhow::Result<Router> {
    let gate = SignatureGateState {
        authenticator: Arc::clone(&state.authenticator),
        metrics: Arc::clone(&state.metrics),
    };
    let stats = api::stats_router().route_layer(from_fn_with_state(gate, signature_gate));

    let mut pairing = api::pairing_router();
    if let Some(limit) = config.rate_limit_per_minute {
        info!(limit, "Pairing rate limit enabled");
        let throttle = PairingThrottleState {
            limiter: Arc::new(RateLimiter::new(limit)),
            identity: state.identity.clone(),
            trust_proxy_headers: config.trust_proxy_headers,
            metrics: Arc::clone(&state.metrics),
        };
        pairing = pairing.route_layer(from_fn_with_state(throttle, pairing_throttle));
    }

    let mut router = Router::new()
        .merge(api::tracking_router())
        .merge(stats)
        .merge(pairing)
        .merge(api::status_router())
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer(config.cors_allow_origins.as_deref())? {
        router = router.layer(cors_layer);
    }

    Ok(router.with_state(state))
}

fn cors_layer(origins: Option<&str>) -> anyhow::Result<Option<CorsLayer>> {
    let Some(origins) = origins.map(str::trim).filter(|o| !o.is_empty()) else {
        return Ok(None);
    };

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static(SIGNATURE_HEADER),
                HeaderName::from_static(TIMESTAMP_HEADER),
            ]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.listen_addr.port(), 8000);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.challenge_ttl, chrono::Duration::seconds(300));
        assert_eq!(config.replay_cache_capacity, 100_000);
        assert!(!config.trust_proxy_headers);
        assert!(config.rate_limit_per_minute.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9100"),
            ("DATA_DIR", "/var/lib/analytics"),
            ("SIGNATURE_WINDOW_SECS", "60"),
            ("TRUST_PROXY_HEADERS", "true"),
            ("RATE_LIMIT_PER_MINUTE", "10"),
            ("LOG_FORMAT", "json"),
            ("GEOIP_DATABASE", "/usr/share/GeoIP/GeoLite2-City.mmdb"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/analytics"));
        assert_eq!(config.signature_window, chrono::Duration::seconds(60));
        assert!(config.trust_proxy_headers);
        assert_eq!(config.rate_limit_per_minute, Some(10));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.geoip_database,
            Some(PathBuf::from("/usr/share/GeoIP/GeoLite2-City.mmdb"))
        );
    }

    fn config_in(dir: &Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_geo_locator_selection() {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::infra::geo_test_support::tiny_database();

        // Nothing configured or discovered
        let geo = geo_locator(&config_in(dir.path())).unwrap();
        assert_eq!(geo.country("8.8.8.8"), "Unknown");

        // Discovered in the data directory
        std::fs::write(dir.path().join("GeoLite2-Country.mmdb"), &db).unwrap();
        let geo = geo_locator(&config_in(dir.path())).unwrap();
        assert_eq!(geo.country("8.8.8.8"), "US");

        // A MaxMind file given as the table is read as a database
        let other = tempfile::tempdir().unwrap();
        let path = other.path().join("countries.mmdb");
        std::fs::write(&path, &db).unwrap();
        let mut config = config_in(other.path());
        config.geoip_table = Some(path.clone());
        assert_eq!(geo_locator(&config).unwrap().country("8.8.8.8"), "US");

        config.geoip_table = None;
        config.geoip_database = Some(path);
        assert_eq!(geo_locator(&config).unwrap().country("10.0.0.1"), "Unknown");
    }

    #[test]
    fn test_geo_locator_configured_failures_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("GeoLite2-Country.mmdb");
        std::fs::write(&bogus, b"not a database").unwrap();

        let mut config = config_in(dir.path());
        config.geoip_database = Some(bogus);
        assert!(matches!(geo_locator(&config), Err(AnalyticsError::Configuration(_))));

        // The same file merely discovered degrades to Unknown
        config.geoip_database = None;
        assert_eq!(geo_locator(&config).unwrap().country("8.8.8.8"), "Unknown");
    }

    #[test]
    fn test_invalid_config_fails() {
        for vars in [
            [("PORT", "eighty")],
            [("SIGNATURE_WINDOW_SECS", "0")],
            [("TRUST_PROXY_HEADERS", "maybe")],
            [("RATE_LIMIT_PER_MINUTE", "0")],
            [("LOG_FORMAT", "xml")],
            [("HOST", "not a host")],
        ] {
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, AnalyticsError::Configuration(_)), "{vars:?}");
        }
    }

    #[test]
    fn test_cors_layer() {
        assert!(cors_layer(None).unwrap().is_none());
        assert!(cors_layer(Some("  ")).unwrap().is_none());
        assert!(cors_layer(Some("*")).unwrap().is_some());
        assert!(cors_layer(Some("https://a.example, https://b.example")).unwrap().is_some());
        assert!(cors_layer(Some("bad\norigin")).is_err());
    }
}
