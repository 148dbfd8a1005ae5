/* Logger initialization */
use std::{panic, thread};

use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{AppConfig, CargoEnv};

pub struct LoggerGuards {
    pub _tracing_guard: WorkerGuard,
    // option because it can be loaded without this if wanted
    pub _sentry_guard: Option<sentry::ClientInitGuard>,
}

pub struct Logger {}

impl Logger {
    pub fn init(config: &AppConfig) -> LoggerGuards {
        // RUST_LOG wins when it's set, otherwise segment relaying at debug is way too loud for
        // production so that one only gets info
        let default_directive = match config.cargo_env {
            CargoEnv::Development => "hls_relay=debug,tower_http=debug,info",
            CargoEnv::Production => "hls_relay=info,tower_http=info,warn",
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        // hosts capture stdout in development, production writes a daily file next to it
        let (non_blocking, guard) = match config.cargo_env {
            CargoEnv::Development => tracing_appender::non_blocking(std::io::stdout()),
            CargoEnv::Production => tracing_appender::non_blocking(
                tracing_appender::rolling::daily(&config.log_dir, "relay.log"),
            ),
        };

        let sentry_guard = config.sentry_dsn.clone().map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(config.environment_name().into()),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking));

        if sentry_guard.is_some() {
            registry.with(sentry_tracing::layer()).init();
        } else {
            registry.init();
        }

        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let thread = thread.name().unwrap_or("unknown");

            let msg = info
                .payload()
                .downcast_ref::<&'static str>()
                .copied()
                .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
                .unwrap_or("Box<Any>");

            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown location".to_string());

            error!(
                target: "panic", "thread '{}' panicked at '{}': {}\n{:?}",
                thread,
                msg,
                location,
                backtrace::Backtrace::new()
            );
        }));

        // return both guards so they're not dropped
        LoggerGuards {
            _tracing_guard: guard,
            _sentry_guard: sentry_guard,
        }
    }
}
