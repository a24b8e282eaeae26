/**
 * Process-wide settings
 *
 * Read once at start-up from the command line / environment and shared
 * read-only with every pipeline component.
 */
use crate::error::{Error, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default handler retry count. Reserved: translation failures are never retried.
pub const DEFAULT_HANDLER_RETRY_COUNT: u32 = 5;

/// Default number of handler consumers
pub const DEFAULT_HANDLER_THREADS: usize = 1;

/// Handler work queue backoff bounds in milliseconds
pub const DEFAULT_HANDLER_RATE_LIMITER_BASE_MS: u64 = 200;
pub const DEFAULT_HANDLER_RATE_LIMITER_MAX_MS: u64 = 60_000;

/// Default number of dispatch attempts per (host, event)
pub const DEFAULT_SYNCHRONIZER_RETRY_COUNT: u32 = 5;

/// Default number of synchronizer workers
pub const DEFAULT_SYNCHRONIZER_THREADS: usize = 1;

/// Synchronizer work queue backoff bounds in milliseconds
pub const DEFAULT_SYNCHRONIZER_RATE_LIMITER_BASE_MS: u64 = 500;
pub const DEFAULT_SYNCHRONIZER_RATE_LIMITER_MAX_MS: u64 = 60_000;

/// Bounds of the random delay applied to each fan-out write
pub const DEFAULT_MIN_JITTER_MS: u64 = 10;
pub const DEFAULT_MAX_JITTER_MS: u64 = 750;

/// Port the liveness/readiness/startup endpoints listen on
pub const DEFAULT_HEALTH_PORT: u16 = 51031;

/// Timeout for a single border server API call
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const _: () = {
    assert!(DEFAULT_HANDLER_RETRY_COUNT > 0, "DEFAULT_HANDLER_RETRY_COUNT must be greater than 0");
    assert!(DEFAULT_SYNCHRONIZER_RETRY_COUNT > 0, "DEFAULT_SYNCHRONIZER_RETRY_COUNT must be greater than 0");
    assert!(DEFAULT_MIN_JITTER_MS <= DEFAULT_MAX_JITTER_MS, "jitter bounds are inverted");
    assert!(
        DEFAULT_SYNCHRONIZER_RATE_LIMITER_BASE_MS <= DEFAULT_SYNCHRONIZER_RATE_LIMITER_MAX_MS,
        "synchronizer backoff bounds are inverted"
    );
};

/// How the border server API connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// No certificate verification
    #[default]
    NoTls,
    /// Verified against public certificate authorities
    CaTls,
    /// `CaTls` plus a client certificate
    CaMutualTls,
    /// Verified against a private CA supplied in the settings
    SelfSignedTls,
    /// `SelfSignedTls` plus a client certificate
    SelfSignedMutualTls,
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no-tls" => Ok(Self::NoTls),
            "ca-tls" => Ok(Self::CaTls),
            "ca-mtls" => Ok(Self::CaMutualTls),
            "ss-tls" => Ok(Self::SelfSignedTls),
            "ss-mtls" => Ok(Self::SelfSignedMutualTls),
            other => Err(Error::UnknownTlsMode(other.to_string())),
        }
    }
}

/// PEM encoded certificate material, as read from disk
#[derive(Debug, Clone, Default)]
pub struct Certificates {
    pub ca_certificate: Option<Vec<u8>>,
    pub client_certificate: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct WorkQueueSettings {
    pub name: String,
    pub rate_limiter_base: Duration,
    pub rate_limiter_max: Duration,
}

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Reserved; the handler drops events that fail translation
    pub retry_count: u32,
    pub threads: usize,
    pub work_queue: WorkQueueSettings,
}

#[derive(Debug, Clone)]
pub struct SynchronizerSettings {
    pub retry_count: u32,
    pub threads: usize,
    pub min_jitter_ms: u64,
    pub max_jitter_ms: u64,
    pub work_queue: WorkQueueSettings,
}

#[derive(Debug, Clone, Default)]
pub struct WatcherSettings {
    /// Restricts the watched Services, e.g. `app=nginx-ingress`
    pub label_selector: Option<String>,
}

/// Immutable configuration for the lifetime of the pipeline
#[derive(Debug, Clone)]
pub struct Settings {
    pub nginx_hosts: Vec<String>,
    pub tls_mode: TlsMode,
    pub certificates: Certificates,
    pub handler: HandlerSettings,
    pub synchronizer: SynchronizerSettings,
    pub watcher: WatcherSettings,
    pub health_port: u16,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nginx_hosts: Vec::new(),
            tls_mode: TlsMode::default(),
            certificates: Certificates::default(),
            handler: HandlerSettings {
                retry_count: DEFAULT_HANDLER_RETRY_COUNT,
                threads: DEFAULT_HANDLER_THREADS,
                work_queue: WorkQueueSettings {
                    name: "nlk-handler".to_string(),
                    rate_limiter_base: Duration::from_millis(DEFAULT_HANDLER_RATE_LIMITER_BASE_MS),
                    rate_limiter_max: Duration::from_millis(DEFAULT_HANDLER_RATE_LIMITER_MAX_MS),
                },
            },
            synchronizer: SynchronizerSettings {
                retry_count: DEFAULT_SYNCHRONIZER_RETRY_COUNT,
                threads: DEFAULT_SYNCHRONIZER_THREADS,
                min_jitter_ms: DEFAULT_MIN_JITTER_MS,
                max_jitter_ms: DEFAULT_MAX_JITTER_MS,
                work_queue: WorkQueueSettings {
                    name: "nlk-synchronizer".to_string(),
                    rate_limiter_base: Duration::from_millis(
                        DEFAULT_SYNCHRONIZER_RATE_LIMITER_BASE_MS,
                    ),
                    rate_limiter_max: Duration::from_millis(
                        DEFAULT_SYNCHRONIZER_RATE_LIMITER_MAX_MS,
                    ),
                },
            },
            watcher: WatcherSettings::default(),
            health_port: DEFAULT_HEALTH_PORT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Command line arguments; every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Comma separated NGINX Plus API URLs, e.g. `http://10.0.0.5:9000/api`
    #[arg(long, env = "NGINX_HOSTS", default_value = "")]
    pub nginx_hosts: String,

    /// One of no-tls, ca-tls, ca-mtls, ss-tls, ss-mtls
    #[arg(long, env = "TLS_MODE", default_value = "no-tls")]
    pub tls_mode: String,

    #[arg(long, env = "CA_CERTIFICATE")]
    pub ca_certificate: Option<PathBuf>,

    #[arg(long, env = "CLIENT_CERTIFICATE")]
    pub client_certificate: Option<PathBuf>,

    #[arg(long, env = "CLIENT_KEY")]
    pub client_key: Option<PathBuf>,

    /// Reserved, currently unused: events that fail translation are dropped, not retried
    #[arg(long, env = "HANDLER_RETRY_COUNT", default_value_t = DEFAULT_HANDLER_RETRY_COUNT)]
    pub handler_retry_count: u32,

    #[arg(long, env = "HANDLER_THREADS", default_value_t = DEFAULT_HANDLER_THREADS)]
    pub handler_threads: usize,

    #[arg(long, env = "HANDLER_RATE_LIMITER_BASE_MS", default_value_t = DEFAULT_HANDLER_RATE_LIMITER_BASE_MS)]
    pub handler_rate_limiter_base_ms: u64,

    #[arg(long, env = "HANDLER_RATE_LIMITER_MAX_MS", default_value_t = DEFAULT_HANDLER_RATE_LIMITER_MAX_MS)]
    pub handler_rate_limiter_max_ms: u64,

    #[arg(long, env = "SYNCHRONIZER_RETRY_COUNT", default_value_t = DEFAULT_SYNCHRONIZER_RETRY_COUNT)]
    pub synchronizer_retry_count: u32,

    #[arg(long, env = "SYNCHRONIZER_THREADS", default_value_t = DEFAULT_SYNCHRONIZER_THREADS)]
    pub synchronizer_threads: usize,

    #[arg(long, env = "SYNCHRONIZER_RATE_LIMITER_BASE_MS", default_value_t = DEFAULT_SYNCHRONIZER_RATE_LIMITER_BASE_MS)]
    pub synchronizer_rate_limiter_base_ms: u64,

    #[arg(long, env = "SYNCHRONIZER_RATE_LIMITER_MAX_MS", default_value_t = DEFAULT_SYNCHRONIZER_RATE_LIMITER_MAX_MS)]
    pub synchronizer_rate_limiter_max_ms: u64,

    #[arg(long, env = "MIN_JITTER_MS", default_value_t = DEFAULT_MIN_JITTER_MS)]
    pub min_jitter_ms: u64,

    #[arg(long, env = "MAX_JITTER_MS", default_value_t = DEFAULT_MAX_JITTER_MS)]
    pub max_jitter_ms: u64,

    /// Only watch Services matching this label selector
    #[arg(long, env = "SERVICE_LABEL_SELECTOR")]
    pub service_label_selector: Option<String>,

    #[arg(long, env = "HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    pub health_port: u16,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Used when `RUST_LOG` is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Split a comma separated host list, dropping blanks but keeping order
#[must_use]
pub fn parse_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn read_pem(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(std::fs::read).transpose().map_err(Error::from)
}

impl Settings {
    /// Build settings from parsed arguments, reading certificate files from disk
    ///
    /// # Errors
    ///
    /// Will return `Err` for an unknown TLS mode, unreadable certificate
    /// files, or inconsistent bounds
    pub fn try_from_args(args: &Args) -> Result<Self> {
        let defaults = Self::default();

        let settings = Self {
            nginx_hosts: parse_hosts(&args.nginx_hosts),
            tls_mode: args.tls_mode.parse()?,
            certificates: Certificates {
                ca_certificate: read_pem(args.ca_certificate.as_deref())?,
                client_certificate: read_pem(args.client_certificate.as_deref())?,
                client_key: read_pem(args.client_key.as_deref())?,
            },
            handler: HandlerSettings {
                retry_count: args.handler_retry_count,
                threads: args.handler_threads,
                work_queue: WorkQueueSettings {
                    rate_limiter_base: Duration::from_millis(args.handler_rate_limiter_base_ms),
                    rate_limiter_max: Duration::from_millis(args.handler_rate_limiter_max_ms),
                    ..defaults.handler.work_queue
                },
            },
            synchronizer: SynchronizerSettings {
                retry_count: args.synchronizer_retry_count,
                threads: args.synchronizer_threads,
                min_jitter_ms: args.min_jitter_ms,
                max_jitter_ms: args.max_jitter_ms,
                work_queue: WorkQueueSettings {
                    rate_limiter_base: Duration::from_millis(args.synchronizer_rate_limiter_base_ms),
                    rate_limiter_max: Duration::from_millis(args.synchronizer_rate_limiter_max_ms),
                    ..defaults.synchronizer.work_queue
                },
            },
            watcher: WatcherSettings {
                label_selector: args.service_label_selector.clone(),
            },
            health_port: args.health_port,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// # Errors
    ///
    /// Will return `Err` if a bound or worker count is unusable
    pub fn validate(&self) -> Result<()> {
        if self.synchronizer.min_jitter_ms > self.synchronizer.max_jitter_ms {
            return Err(Error::Custom(format!(
                "min jitter ({}ms) is greater than max jitter ({}ms)",
                self.synchronizer.min_jitter_ms, self.synchronizer.max_jitter_ms
            )));
        }

        if self.handler.threads == 0 || self.synchronizer.threads == 0 {
            return Err(Error::Custom("worker thread counts must be at least 1".to_string()));
        }

        for queue in [&self.handler.work_queue, &self.synchronizer.work_queue] {
            if queue.rate_limiter_base > queue.rate_limiter_max {
                return Err(Error::Custom(format!(
                    "{}: rate limiter base {:?} exceeds max {:?}",
                    queue.name, queue.rate_limiter_base, queue.rate_limiter_max
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["edgesync"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_parse_hosts_keeps_order_and_drops_blanks() {
        let hosts = parse_hosts(" http://a/api, ,http://b/api,");
        assert_eq!(hosts, vec!["http://a/api", "http://b/api"]);
        assert!(parse_hosts("").is_empty());
    }

    #[test]
    fn test_tls_mode_parsing() {
        assert_eq!("no-tls".parse::<TlsMode>().unwrap(), TlsMode::NoTls);
        assert_eq!("CA-MTLS".parse::<TlsMode>().unwrap(), TlsMode::CaMutualTls);
        assert_eq!("ss-tls".parse::<TlsMode>().unwrap(), TlsMode::SelfSignedTls);
        assert!(matches!(
            "plaintext".parse::<TlsMode>(),
            Err(Error::UnknownTlsMode(mode)) if mode == "plaintext"
        ));
    }

    #[test]
    fn test_settings_from_args() {
        let settings = Settings::try_from_args(&args(&[
            "--nginx-hosts",
            "http://10.0.0.5:9000/api,http://10.0.0.6:9000/api",
            "--synchronizer-threads",
            "4",
            "--min-jitter-ms",
            "0",
            "--max-jitter-ms",
            "20",
        ]))
        .unwrap();

        assert_eq!(settings.nginx_hosts.len(), 2);
        assert_eq!(settings.synchronizer.threads, 4);
        assert_eq!(settings.synchronizer.max_jitter_ms, 20);
        assert_eq!(settings.tls_mode, TlsMode::NoTls);
        assert_eq!(settings.synchronizer.work_queue.name, "nlk-synchronizer");
    }

    #[test]
    fn test_handler_retry_count_is_documented_as_reserved() {
        use clap::CommandFactory;

        let command = Args::command();
        let flag = command
            .get_arguments()
            .find(|arg| arg.get_id() == "handler_retry_count")
            .unwrap();
        let help = flag.get_help().unwrap().to_string();
        assert!(help.starts_with("Reserved"));
    }

    #[test]
    fn test_inverted_jitter_is_rejected() {
        let result = Settings::try_from_args(&args(&["--min-jitter-ms", "100", "--max-jitter-ms", "5"]));
        assert!(matches!(result, Err(Error::Custom(_))));
    }

    #[test]
    fn test_missing_certificate_file_is_an_error() {
        let result = Settings::try_from_args(&args(&[
            "--ca-certificate",
            "/nonexistent/edgesync/ca.pem",
        ]));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
