use thiserror::Error;
use url::Url;

pub mod websocket;

pub use websocket::ConnectionChannel;

/// Path of the push channel relative to the page origin.
pub const WS_PATH: &str = "/api/ws";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel setup failed: {0}")]
    Setup(String),
    #[error("websocket connect failed: {0}")]
    Connect(String),
}

/// One discrete message as delivered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Derives the push-channel URL from the page origin: `https` becomes `wss`,
/// anything else `ws`; path is [`WS_PATH`]; query and fragment are dropped.
pub fn derive_websocket_url(page_url: &str) -> Result<Url, ChannelError> {
    let base = Url::parse(page_url)
        .map_err(|err| ChannelError::Setup(format!("invalid page url {page_url}: {err}")))?;
    if base.cannot_be_a_base() || base.host_str().is_none() {
        return Err(ChannelError::Setup(format!(
            "page url {page_url} has no host"
        )));
    }
    let mut ws = base.clone();
    ws.set_scheme(if base.scheme() == "https" { "wss" } else { "ws" })
        .map_err(|_| ChannelError::Setup(format!("cannot derive websocket scheme from {}", base.scheme())))?;
    ws.set_path(WS_PATH);
    ws.set_query(None);
    ws.set_fragment(None);
    Ok(ws)
}
