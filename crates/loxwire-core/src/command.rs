// ── Command dispatch ──
//
// Device commands are plain GETs of `jdev/sps/io/{target}/{suffix}`, where
// the target is the device's command-target id. Formatting the suffix for a
// particular device type is the caller's business.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use loxwire_api::transport::HttpTransport;
use loxwire_api::websocket::value_text;

use crate::error::CoreError;
use crate::model::Device;

/// Outcome of an accepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub code: i32,
    /// Whatever the Miniserver echoed back as `value`, as text.
    pub value: Option<String>,
}

/// Build the command path for `target_id` and `suffix`.
///
/// Each `/`-separated segment of the suffix is percent-encoded on its own so
/// multi-segment suffixes such as `changeTo/3` keep their structure.
pub fn command_path(target_id: &str, suffix: &str) -> String {
    let encoded: Vec<_> = suffix
        .trim_matches('/')
        .split('/')
        .map(urlencoding::encode)
        .collect();
    format!(
        "jdev/sps/io/{}/{}",
        urlencoding::encode(target_id),
        encoded.join("/")
    )
}

/// Sends device commands over HTTP.
pub struct CommandDispatcher {
    http: Arc<dyn HttpTransport>,
}

impl CommandDispatcher {
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self { http }
    }

    /// Send `suffix` to `device`. A failing result code becomes
    /// [`CoreError::Rejected`] carrying the server's message.
    pub async fn dispatch(
        &self,
        device: &Device,
        suffix: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, CoreError> {
        self.dispatch_to(&device.command_target_id, suffix, cancel)
            .await
    }

    /// Send `suffix` to a raw command-target id.
    pub async fn dispatch_to(
        &self,
        target_id: &str,
        suffix: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, CoreError> {
        let path = command_path(target_id, suffix);
        debug!(target = target_id, "dispatching device command");

        let ack = self.http.get_envelope(&path, cancel).await?.into_success()?;
        Ok(CommandResult {
            code: ack.code,
            value: ack.value.as_ref().map(value_text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_command_paths() {
        assert_eq!(command_path("0f1e-act", "on"), "jdev/sps/io/0f1e-act/on");
        assert_eq!(
            command_path("0f1e-act", "/changeTo/3/"),
            "jdev/sps/io/0f1e-act/changeTo/3"
        );
        assert_eq!(
            command_path("0f1e-act", "setText/hello world"),
            "jdev/sps/io/0f1e-act/setText/hello%20world"
        );
    }
}
