//! Shared test bootstrap for the Tanager workspace.
//!
//! Every test's first line is `tanager_test::init();`, which installs the
//! tracing subscriber and error reporting hooks exactly once per process.

use lazy_static::lazy_static;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

lazy_static! {
    static ref INSTALLED: () = {
        let fmt_layer = fmt::layer().with_target(true);
        // Tests default to warnings only; override with RUST_LOG.
        let filter_layer =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();

        color_eyre::install().expect("color-eyre installs once");
    };
}

/// Initialize global test context. Idempotent; safe to call from every
/// test in a binary.
pub fn init() {
    lazy_static::initialize(&INSTALLED);
}
