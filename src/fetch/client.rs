use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport used by the downloader. Implemented by [`super::BasicClient`];
/// wrappers can add headers or retries around another client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
