//! Stub chat-transport and browser-automation facades. Both collaborators
//! are out of scope (spec §1); the daemon only needs *something* that
//! implements the C4 facade traits so the Bash/tool surface can be
//! exercised from the REPL without a real gateway or browser attached.

use async_trait::async_trait;
use conduit_tools::{BrowserFacade, GatewayFacade};

pub struct StubGateway;

#[async_trait]
impl GatewayFacade for StubGateway {
    async fn send_message(&self, channel_key: &str, text: &str) -> Result<(), String> {
        tracing::info!(channel = channel_key, text, "stub gateway: send_message");
        Ok(())
    }
    async fn send_file(&self, channel_key: &str, path: &str) -> Result<(), String> {
        tracing::info!(channel = channel_key, path, "stub gateway: send_file");
        Ok(())
    }
    async fn send_image(&self, channel_key: &str, path: &str) -> Result<(), String> {
        tracing::info!(channel = channel_key, path, "stub gateway: send_image");
        Ok(())
    }
}

pub struct StubBrowser;

#[async_trait]
impl BrowserFacade for StubBrowser {
    async fn navigate(&self, _url: &str) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn screenshot(&self) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn click(&self, _selector: &str) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn type_text(&self, _selector: &str, _text: &str) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn get_text(&self, _selector: &str) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn scroll(&self, _dx: i64, _dy: i64) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn wait_for(&self, _selector: &str) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn evaluate(&self, _script: &str) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn pdf(&self) -> Result<String, String> {
        Err("browser automation is not wired up in this harness".to_string())
    }
    async fn close(&self) -> Result<(), String> {
        Ok(())
    }
}
