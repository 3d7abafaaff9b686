use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use font_registry::InMemoryFontRegistry;
use preview_client_core::api::BackendClient;
use preview_client_core::cli::{Cli, Command, WatchArgs};
use preview_client_core::config::Config;
use preview_client_core::model::{FontSnapshot, char_list};
use preview_client_core::session::{
    ConnectionStatus, SessionView, acquire_session, release_session, session_finished,
};
use preview_client_core::telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.apply(Config::from_env());
    init_tracing(&config.log_filter);

    info!(
        server = %config.server_url,
        family_prefix = %config.family_prefix,
        http_timeout_ms = config.http_timeout.as_millis() as u64,
        "starting preview-client"
    );

    match cli.command() {
        Command::Watch(args) => watch(&config, args).await,
        Command::Ping => {
            backend(&config)?.ping().await.context("ping failed")?;
            println!("ok");
            Ok(())
        }
        Command::Glyph(args) => {
            let detail = backend(&config)?
                .glyph_detail(args.id)
                .await
                .with_context(|| format!("fetching glyph {}", args.id))?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
            Ok(())
        }
        Command::Chars(args) => {
            for entry in char_list(args.text.chars()) {
                println!("{}\t{}\t{}", entry.unicode, entry.charcode, entry.ch);
            }
            Ok(())
        }
    }
}

fn backend(config: &Config) -> anyhow::Result<BackendClient> {
    BackendClient::new(&config.server_url, config.http_timeout).context("building http client")
}

async fn watch(config: &Config, args: WatchArgs) -> anyhow::Result<()> {
    let registry = Arc::new(InMemoryFontRegistry::new());
    let state = acquire_session(config, registry.clone()).context("starting session")?;
    let mut rx = state.subscribe();
    let mut seen = SeenView::default();

    loop {
        let view = rx.borrow_and_update().clone();
        seen.report(&view, args.diagnostics);
        let closed = view.connection == ConnectionStatus::Closed;
        if closed && !view.font.loading && session_finished() {
            break;
        }
        tokio::select! {
            // Reloads still draining after close may finish without another change.
            _ = tokio::time::sleep(Duration::from_millis(250)), if closed => {}
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    release_session();
    info!(families = ?registry.families(), "preview-client stopped");
    Ok(())
}

/// What has already been logged, so each view change is reported once.
#[derive(Default)]
struct SeenView {
    connection: Option<ConnectionStatus>,
    in_progress: bool,
    font: Option<Arc<FontSnapshot>>,
    family: Option<String>,
    error: Option<String>,
    diagnostics: u64,
}

impl SeenView {
    fn report(&mut self, view: &SessionView, diagnostics: bool) {
        if self.connection != Some(view.connection) {
            info!(connection = ?view.connection, "connection status");
            self.connection = Some(view.connection);
        }
        if view.in_progress && !self.in_progress {
            info!("receiving epoch");
        }
        self.in_progress = view.in_progress;

        let font_changed = match (&self.font, &view.rendered_font) {
            (Some(old), Some(new)) => !Arc::ptr_eq(old, new),
            (None, Some(_)) => true,
            _ => false,
        };
        if font_changed {
            if let Some(font) = &view.rendered_font {
                info!(
                    glyphs = font.glyph_count(),
                    chars = font.cmap().len(),
                    mapped_glyphs = font.reverse_cmap().len(),
                    "epoch published"
                );
            }
            self.font = view.rendered_font.clone();
        }

        if self.family != view.font.family {
            if let Some(family) = &view.font.family {
                info!(family = %family, "font active");
            }
            self.family = view.font.family.clone();
        }

        if self.error != view.error {
            if let Some(error) = &view.error {
                warn!(error = %error, "backend error");
            }
            self.error = view.error.clone();
        }

        let fresh = view.diagnostics_total.saturating_sub(self.diagnostics);
        if diagnostics && fresh > 0 {
            let skip = view.diagnostics.len().saturating_sub(fresh as usize);
            for diagnostic in view.diagnostics.iter().skip(skip) {
                warn!(diagnostic = %diagnostic, "protocol diagnostic");
            }
        }
        self.diagnostics = view.diagnostics_total;
    }
}
