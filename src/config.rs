use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // address the listener binds to
    #[clap(long, env, default_value = "0.0.0.0")]
    pub host: String,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // either * for allowing everything, or a comma seperated list of origins like
    // https://example.com,https://something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,

    // where the rolling log file goes in production
    #[clap(long, env, default_value = "logs")]
    pub log_dir: String,

    // prefix for every proxy url we hand out. leave empty to emit root relative urls
    // (/api/v1/proxy/...), which is what players on the same origin want anyway
    #[clap(long, env)]
    pub public_base_url: Option<String>,

    // base url of the episode source extraction sidecar
    #[clap(long, env, default_value = "http://127.0.0.1:8000/api")]
    pub extractor_url: String,

    // sent upstream when the source didn't come with its own user agent
    #[clap(
        long,
        env,
        default_value = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
    )]
    pub default_user_agent: String,

    #[clap(long, env, default_value = "5")]
    pub upstream_connect_timeout_secs: u64,

    // max silence between two body chunks
    #[clap(long, env, default_value = "15")]
    pub upstream_read_timeout_secs: u64,

    // max wait for upstream response headers, per attempt
    #[clap(long, env, default_value = "20")]
    pub upstream_request_timeout_secs: u64,

    // retries on top of the first attempt, only for transient failures
    #[clap(long, env, default_value = "2")]
    pub upstream_max_retries: u32,

    #[clap(long, env, default_value = "200")]
    pub upstream_retry_base_ms: u64,

    // playlists are buffered to rewrite them, anything bigger than this is refused
    #[clap(long, env, default_value = "8388608")]
    pub max_manifest_bytes: usize,

    #[clap(long, env, default_value = "30")]
    pub resolution_timeout_secs: u64,

    #[clap(long, env, default_value = "1024")]
    pub max_concurrent_requests: usize,
}

impl AppConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_read_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_request_timeout_secs)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }

    pub fn environment_name(&self) -> &'static str {
        match self.cargo_env {
            CargoEnv::Development => "development",
            CargoEnv::Production => "production",
        }
    }
}

impl Default for AppConfig {
    // used by tests and as a local fallback, mirrors the clap defaults
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origin: "*".to_string(),
            sentry_dsn: None,
            log_dir: "logs".to_string(),
            public_base_url: None,
            extractor_url: "http://127.0.0.1:8000/api".to_string(),
            default_user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            upstream_connect_timeout_secs: 5,
            upstream_read_timeout_secs: 15,
            upstream_request_timeout_secs: 20,
            upstream_max_retries: 2,
            upstream_retry_base_ms: 200,
            max_manifest_bytes: 8 * 1024 * 1024,
            resolution_timeout_secs: 30,
            max_concurrent_requests: 1024,
        }
    }
}
