use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info};

use crate::proxy::build_proxy_from_config;
use crate::{DownloadError, DownloaderConfig};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let provider = Arc::new(ring::default_provider());

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DownloadError::TlsError(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| DownloadError::TlsError(e.to_string()))?
        .with_no_client_auth();

    // ALPN decides what the origin is allowed to upgrade us to.
    tls_config.alpn_protocols = if config.http1_only {
        vec![b"http/1.1".to_vec()]
    } else {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    };

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.max_idle_connections_per_host)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if config.http1_only {
        client_builder = client_builder.http1_only();
    }

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        client_builder = client_builder.proxy(build_proxy_from_config(proxy_config)?);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for downloads");
    } else if config.use_system_proxy {
        // reqwest picks up the system proxy unless no_proxy() is called
        debug!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    debug!(
        http1_only = config.http1_only,
        max_idle_per_host = config.max_idle_connections_per_host,
        "HTTP client configured"
    );

    client_builder.build().map_err(DownloadError::from)
}

/// Turn caller-supplied headers into the per-request header set.
///
/// Every manifest and segment request carries these headers; origins
/// commonly check Referer/Origin for hotlink protection. A User-Agent is
/// filled in from `default_user_agent` when the caller did not set one.
pub fn request_headers(
    headers: &HashMap<String, String>,
    default_user_agent: &str,
) -> Result<HeaderMap, DownloadError> {
    let mut map = HeaderMap::with_capacity(headers.len() + 1);

    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
                DownloadError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
        let header_value =
            HeaderValue::from_str(value.trim()).map_err(|e| DownloadError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        map.insert(header_name, header_value);
    }

    if !map.contains_key(USER_AGENT) {
        let ua = HeaderValue::from_str(default_user_agent).map_err(|e| {
            DownloadError::InvalidHeader {
                name: USER_AGENT.to_string(),
                reason: e.to_string(),
            }
        })?;
        map.insert(USER_AGENT, ua);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;

    #[test]
    fn default_user_agent_is_added() {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://example.com/".to_string());

        let map = request_headers(&headers, DEFAULT_USER_AGENT).unwrap();
        assert_eq!(map.get("referer").unwrap(), "https://example.com/");
        assert_eq!(map.get(USER_AGENT).unwrap(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn caller_user_agent_wins() {
        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), "Player/2.0".to_string());

        let map = request_headers(&headers, DEFAULT_USER_AGENT).unwrap();
        assert_eq!(map.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(map.get(USER_AGENT).unwrap(), "Player/2.0");
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("Bad Header".to_string(), "x".to_string());

        let err = request_headers(&headers, DEFAULT_USER_AGENT).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidHeader { .. }));
    }

    #[test]
    fn client_builds_with_http1_only_and_without() {
        let config = DownloaderConfig::builder().with_system_proxy(false).build();
        assert!(create_client(&config).is_ok());

        let config = DownloaderConfig::builder()
            .with_system_proxy(false)
            .with_http1_only(false)
            .build();
        assert!(create_client(&config).is_ok());
    }
}
