//! External collaborator interfaces: the chat transport gateway and
//! browser automation (both out of scope per spec §1, surfaced only as the
//! facades C4 delegates to).

use async_trait::async_trait;

#[async_trait]
pub trait GatewayFacade: Send + Sync {
    async fn send_message(&self, channel_key: &str, text: &str) -> Result<(), String>;
    async fn send_file(&self, channel_key: &str, path: &str) -> Result<(), String>;
    async fn send_image(&self, channel_key: &str, path: &str) -> Result<(), String>;
}

#[async_trait]
pub trait BrowserFacade: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<String, String>;
    async fn screenshot(&self) -> Result<String, String>;
    async fn click(&self, selector: &str) -> Result<String, String>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<String, String>;
    async fn get_text(&self, selector: &str) -> Result<String, String>;
    async fn scroll(&self, dx: i64, dy: i64) -> Result<String, String>;
    async fn wait_for(&self, selector: &str) -> Result<String, String>;
    async fn evaluate(&self, script: &str) -> Result<String, String>;
    async fn pdf(&self) -> Result<String, String>;
    async fn close(&self) -> Result<(), String>;
}
