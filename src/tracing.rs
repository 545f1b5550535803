//! Tracing (logging)

use crate::cli::CommandLineArgs;

use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initlialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back to info logging
/// for this crate if not set. Events are written to stderr. If enabled, spans are also exported
/// to a Jaeger agent.
pub fn init_tracing(args: &CommandLineArgs) {
    let (jaeger_layer, jaeger_error) = if args.enable_jaeger {
        global::set_text_map_propagator(opentelemetry_jaeger::Propagator::new());
        match opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .install_simple()
        {
            Ok(tracer) => (Some(tracing_opentelemetry::layer().with_tracer(tracer)), None),
            Err(err) => (None, Some(err)),
        }
    } else {
        (None, None)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ensemble_explorer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(jaeger_layer)
        .init();
    if let Some(err) = jaeger_error {
        tracing::warn!("Failed to initialise Jaeger exporter: {}", err);
    }
}

/// Flushes and shuts down any trace exporters.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
