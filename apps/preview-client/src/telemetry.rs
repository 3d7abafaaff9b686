use std::io::IsTerminal;

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber on stderr. Safe to call more than once;
/// later calls are ignored.
pub fn init_tracing(filter: &str) {
    let ansi = std::io::stderr().is_terminal();
    let _ = subscriber(filter, std::io::stderr, ansi).try_init();
}

/// Filtered fmt subscriber writing to `make_writer`. Module paths are left
/// out; every event carries its component in a `target = "preview.*"` field
/// instead, which is printed with the other fields.
pub fn subscriber<W>(
    filter: &str,
    make_writer: W,
    ansi: bool,
) -> impl Subscriber + Send + Sync + use<W>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(make_writer);
    Registry::default().with(env_filter).with(fmt_layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn component_field_is_printed() {
        let out = Captured::default();
        let writer = out.clone();
        let sub = subscriber("info", move || writer.clone(), false);
        tracing::subscriber::with_default(sub, || {
            tracing::info!(target = "preview.font", version = 3, "font swapped");
        });
        let text = out.text();
        assert!(text.contains("target=\"preview.font\""), "{text}");
        assert!(text.contains("version=3"), "{text}");
        assert!(text.contains("font swapped"), "{text}");
    }

    #[test]
    fn filter_drops_lower_levels() {
        let out = Captured::default();
        let writer = out.clone();
        let sub = subscriber("warn", move || writer.clone(), false);
        tracing::subscriber::with_default(sub, || {
            tracing::debug!(target = "preview.epoch", "epoch started");
            tracing::warn!(target = "preview.epoch", "malformed message from server");
        });
        let text = out.text();
        assert!(!text.contains("epoch started"), "{text}");
        assert!(text.contains("malformed message from server"), "{text}");
    }
}
