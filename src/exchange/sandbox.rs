use super::{Exchange, ExchangeClass, ExchangeConfig};
use crate::error::ExchangeResult;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Which mechanism was used to put a new client into sandbox mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxPath {
    /// Sandbox mode was not requested.
    Disabled,
    /// The client exposes `set_sandbox_mode`.
    Toggle,
    /// The class publishes a test URL, substituted as the api endpoint.
    TestUrl,
    /// `options.sandboxMode` was set for a class that recognizes it.
    OptionFlag,
    /// Nothing matched; the client was built unmodified.
    Unsupported,
}

/// Builds a client for `class`, applying sandbox mode on a best-effort basis.
///
/// Venues enable their test environments in different ways, so the checks run
/// in a fixed order and the first match wins. There is no guarantee that the
/// result actually talks to a sandbox for every venue.
pub fn instantiate(
    class: &dyn ExchangeClass,
    mut config: ExchangeConfig,
    sandbox: bool,
) -> ExchangeResult<(Box<dyn Exchange>, SandboxPath)> {
    if !sandbox {
        return Ok((class.build(config)?, SandboxPath::Disabled));
    }

    let path = if class.has_sandbox_toggle() {
        SandboxPath::Toggle
    } else if let Some(test_url) = class.test_url() {
        config.urls = Some(BTreeMap::from([("api".to_string(), test_url.to_string())]));
        SandboxPath::TestUrl
    } else if class.has_sandbox_marker()
        || class
            .option_keys()
            .iter()
            .any(|key| *key == "sandboxMode" || *key == "test")
    {
        config
            .options
            .insert("sandboxMode".to_string(), Value::Bool(true));
        SandboxPath::OptionFlag
    } else {
        warn!(
            exchange = class.id(),
            "Exchange {} may not support enabling sandbox mode this way; continuing without it",
            class.id()
        );
        SandboxPath::Unsupported
    };

    let mut exchange = class.build(config)?;
    if path == SandboxPath::Toggle {
        exchange.set_sandbox_mode(true);
    }
    debug!(exchange = class.id(), ?path, "Sandbox resolution complete");

    Ok((exchange, path))
}
