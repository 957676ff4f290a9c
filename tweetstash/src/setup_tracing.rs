use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

const ENV_DEBUG: &str = "TWEETSTASH_DEBUG";

/// Logs a panic as one structured event, so it ends up in the JSON log stream with the rest.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    let message = panic_message(panic_info.payload());
    let current = std::thread::current();
    let thread = current.name().unwrap_or("<unnamed>");
    let location = panic_info.location().map(ToString::to_string);

    // only captured when RUST_BACKTRACE or RUST_LIB_BACKTRACE is set
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        tracing::error!(thread, location, %backtrace, "Panicked: {message}");
    } else {
        tracing::error!(thread, location, "Panicked: {message}");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Filter used when `RUST_LOG` is not set.
fn default_directives(debug_mode: bool) -> &'static str {
    if debug_mode {
        // the http/2 codec and the aws sdk are too noisy at debug
        "debug,h2=info,hyper_util=info,aws_smithy_runtime=info,aws_config=info"
    } else {
        "info"
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the level, `TWEETSTASH_DEBUG=true`
/// switches from flattened JSON to text output at debug level.
pub(crate) fn register() {
    let debug_mode = std::env::var(ENV_DEBUG).is_ok_and(|v| v.eq_ignore_ascii_case("true"));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_directives(debug_mode))
            .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()))
    });

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
