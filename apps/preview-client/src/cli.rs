use clap::{Args, Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "preview-client",
    about = "Follow a font preview backend and keep its compiled font registered",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long = "server",
        global = true,
        value_name = "URL",
        help = "Origin of the preview page (overrides PREVIEW_SERVER_URL)"
    )]
    pub server_url: Option<String>,

    #[arg(
        long = "family-prefix",
        global = true,
        value_name = "PREFIX",
        help = "Prefix for registered font families (overrides PREVIEW_FONT_FAMILY_PREFIX)"
    )]
    pub family_prefix: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Layers command-line overrides on top of the environment.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(url) = &self.server_url {
            config = config.with_server_url(url.clone());
        }
        if let Some(prefix) = &self.family_prefix {
            config = config.with_family_prefix(prefix.clone());
        }
        config
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Watch(WatchArgs::default()))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Follow epochs and font swaps until the push channel closes (default)
    Watch(WatchArgs),
    /// Check that the backend answers
    Ping,
    /// Print the construction detail of one glyph as JSON
    Glyph(GlyphArgs),
    /// List code points of the given characters
    Chars(CharsArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    #[arg(
        long = "diagnostics",
        action = clap::ArgAction::SetTrue,
        help = "Also log protocol diagnostics as they are recorded"
    )]
    pub diagnostics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct GlyphArgs {
    #[arg(value_name = "ID")]
    pub id: u32,
}

#[derive(Args, Debug, Clone)]
pub struct CharsArgs {
    #[arg(value_name = "TEXT")]
    pub text: String,
}
