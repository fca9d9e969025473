use once_cell::sync::OnceCell;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Installs a stderr logger; stdout is reserved for the protocol.
///
/// The filter comes from `log_level` when given, else `RUST_LOG`, else `info`.
/// Only the first call installs anything; later calls are no-ops.
pub fn init_logger(no_color: bool, log_level: Option<&str>) -> io::Result<()> {
    INSTALLED.get_or_try_init(|| {
        let filter = match log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(!no_color)
            .with_target(false)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(stderr_layer)
            .try_init()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_installs_are_no_ops() {
        init_logger(true, Some("debug")).unwrap();
        init_logger(false, None).unwrap();
        assert!(INSTALLED.get().is_some());
    }
}
