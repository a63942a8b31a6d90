use reqwest::Proxy;

use crate::DownloadError;

/// Which traffic the proxy applies to
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum ProxyType {
    /// Proxy plain `http://` requests only
    Http,
    /// Proxy `https://` requests only
    Https,
    /// SOCKS5 proxy for every request
    Socks5,
    /// Proxy every request through an HTTP proxy
    All,
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>, proxy_type: ProxyType) -> Self {
        Self {
            url: url.into(),
            proxy_type,
            auth: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// The proxy URL with the scheme reqwest expects for this proxy type.
    fn normalized_url(&self) -> String {
        match self.proxy_type {
            ProxyType::Socks5 if !self.url.starts_with("socks5://") => {
                format!("socks5://{}", self.url)
            }
            _ => self.url.clone(),
        }
    }
}

/// Build a reqwest Proxy from the configuration
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy, DownloadError> {
    let url = config.normalized_url();

    let proxy = match config.proxy_type {
        ProxyType::Http => Proxy::http(&url),
        ProxyType::Https => Proxy::https(&url),
        ProxyType::Socks5 | ProxyType::All => Proxy::all(&url),
    }
    .map_err(|e| DownloadError::ProxyError(format!("{url}: {e}")))?;

    Ok(match &config.auth {
        Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
        None => proxy,
    })
}
