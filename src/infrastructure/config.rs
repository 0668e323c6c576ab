//! Environment-driven client configuration

use crate::core::upload::{DemoEndpoint, Endpoints};
use anyhow::{Context, anyhow, bail};
use std::env;
use url::Url;

pub const API_URL_VAR: &str = "PLAYGROUND_API_URL";
pub const CHAT_PATH_VAR: &str = "PLAYGROUND_CHAT_PATH";
pub const CHUNK_SIZE_VAR: &str = "PLAYGROUND_UPLOAD_CHUNK_SIZE";

pub const DEFAULT_CHAT_PATH: &str = "chat";
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct PlaygroundConfig {
    api_url: Url,
    chat_path: String,
    chunk_size: usize,
}

impl PlaygroundConfig {
    /// Reads the configuration from the environment, loading `.env` first if there is one.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_url = env::var(API_URL_VAR).with_context(|| format!("{API_URL_VAR} must be set"))?;
        let mut config = Self::new(&api_url)?;

        if let Ok(path) = env::var(CHAT_PATH_VAR) {
            config.chat_path = path.trim_matches('/').to_owned();
        }
        if let Ok(size) = env::var(CHUNK_SIZE_VAR) {
            config.chunk_size = size
                .parse()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| anyhow!("{CHUNK_SIZE_VAR} must be a positive integer, got `{size}`"))?;
        }

        Ok(config)
    }

    pub fn new(api_url: &str) -> anyhow::Result<Self> {
        let mut api_url =
            Url::parse(api_url).with_context(|| format!("invalid API url `{api_url}`"))?;

        match api_url.scheme() {
            "http" | "https" => {}
            scheme => bail!("API url must be http or https, got `{scheme}`"),
        }

        // joins resolve against the last path segment unless the base ends with a slash
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        Ok(Self {
            api_url,
            chat_path: DEFAULT_CHAT_PATH.to_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// WebSocket url of the chat channel, on the same host as the API.
    ///
    /// The scheme follows the API: `https` gives `wss`, plain `http` gives `ws` so a local
    /// playground without TLS is reachable. Deployed playgrounds are served over `https` and
    /// therefore always chat over `wss`.
    pub fn chat_url(&self) -> anyhow::Result<Url> {
        let mut url = self.api_url.join(&self.chat_path)?;
        let scheme = if self.api_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive a websocket url from {}", self.api_url))?;
        Ok(url)
    }

    /// The demos that take uploads, keyed by demo id.
    pub fn endpoints(&self) -> anyhow::Result<Endpoints> {
        let demos = [
            (
                "face-recognition",
                "Face Recognition",
                vec!["image/*", "video/*"],
            ),
            ("ocr", "Optical Character Recognition", vec!["image/*"]),
        ];

        let endpoints = demos
            .into_iter()
            .map(|(id, title, accepted)| {
                Ok(DemoEndpoint {
                    id: id.to_owned(),
                    title: title.to_owned(),
                    url: self.api_url.join(id)?,
                    accepted_types: accepted.into_iter().map(str::to_owned).collect(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Endpoints::new(endpoints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_url_follows_api_scheme() {
        let config = PlaygroundConfig::new("https://api.example.com").unwrap();
        assert_eq!(config.chat_url().unwrap().as_str(), "wss://api.example.com/chat");

        let config = PlaygroundConfig::new("http://localhost:8000").unwrap();
        assert_eq!(config.chat_url().unwrap().as_str(), "ws://localhost:8000/chat");
    }

    #[test]
    fn test_api_path_prefix_is_kept() {
        let config = PlaygroundConfig::new("https://example.com/playground").unwrap();
        assert_eq!(
            config.chat_url().unwrap().as_str(),
            "wss://example.com/playground/chat"
        );

        let endpoints = config.endpoints().unwrap();
        assert_eq!(
            endpoints.resolve("ocr").unwrap().url.as_str(),
            "https://example.com/playground/ocr"
        );
    }

    #[test]
    fn test_endpoints() {
        let config = PlaygroundConfig::new("http://localhost:8000/").unwrap();
        let endpoints = config.endpoints().unwrap();

        let face = endpoints.resolve("Face Recognition").unwrap();
        assert_eq!(face.url.as_str(), "http://localhost:8000/face-recognition");
        assert!(face.accepts("video/webm"));

        assert!(endpoints.resolve("chatbot").is_none());
        assert_eq!(endpoints.iter().count(), 2);
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(PlaygroundConfig::new("not a url").is_err());
        assert!(PlaygroundConfig::new("ftp://example.com").is_err());
    }
}
