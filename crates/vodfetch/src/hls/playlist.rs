// HLS Playlist Engine: fetches manifests and resolves them into a media playlist.

use std::sync::Arc;

use m3u8_rs::{MediaPlaylistType, parse_media_playlist_res};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::DownloadError;
use crate::hls::config::HlsConfig;
use crate::hls::error::ManifestError;
use crate::hls::variant::{parse_variants, select_variant};

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";

/// One media segment, in manifest order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub url: Url,
    /// 0-based position in the media playlist
    pub index: usize,
    pub duration: f32,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

/// A parsed media playlist. Segment indices are exactly `0..segments.len()`.
#[derive(Debug, Clone)]
pub struct Playlist {
    /// Where the media playlist was fetched from
    pub url: Url,
    pub version: Option<usize>,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    pub end_list: bool,
    pub playlist_type: Option<PlaylistType>,
}

impl Playlist {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| f64::from(s.duration)).sum()
    }
}

/// Resolves a URI found in a manifest against the manifest's own URL.
/// Relative paths replace the last path component of `base`.
pub fn resolve_uri(base: &Url, uri: &str) -> Result<Url, url::ParseError> {
    base.join(uri.trim())
}

/// True when any line announces a variant stream.
pub fn is_master_playlist(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.trim_start().starts_with(STREAM_INF_TAG))
}

/// Parses a media playlist body fetched from `url`.
pub fn parse_media_playlist(content: &[u8], url: &Url) -> Result<Playlist, ManifestError> {
    let media = parse_media_playlist_res(content).map_err(|e| ManifestError::Parse {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let segments = media
        .segments
        .into_iter()
        .enumerate()
        .map(|(index, segment)| {
            let segment_url = resolve_uri(url, &segment.uri).map_err(|e| ManifestError::Parse {
                url: url.to_string(),
                reason: format!("invalid segment URI '{}': {e}", segment.uri),
            })?;
            Ok(Segment {
                url: segment_url,
                index,
                duration: segment.duration,
                title: segment.title.filter(|t| !t.is_empty()),
            })
        })
        .collect::<Result<Vec<_>, ManifestError>>()?;

    if segments.is_empty() {
        return Err(ManifestError::NoSegments {
            url: url.to_string(),
        });
    }

    let playlist_type = match media.playlist_type {
        Some(MediaPlaylistType::Vod) => Some(PlaylistType::Vod),
        Some(MediaPlaylistType::Event) => Some(PlaylistType::Event),
        _ => None,
    };

    Ok(Playlist {
        url: url.clone(),
        version: media.version,
        target_duration: media.target_duration,
        media_sequence: media.media_sequence,
        segments,
        end_list: media.end_list,
        playlist_type,
    })
}

/// Fetches a manifest and, for master playlists, follows the selected
/// variant until a media playlist is reached.
pub struct ManifestFetcher {
    http_client: Client,
    config: Arc<HlsConfig>,
}

impl ManifestFetcher {
    pub fn new(http_client: Client, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }

    pub async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        token: &CancellationToken,
    ) -> Result<Playlist, DownloadError> {
        let mut current = Url::parse(url).map_err(|e| ManifestError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let max_depth = self.config.playlist_config.max_master_depth;
        let mut depth = 0;

        loop {
            let content = self.fetch_text(&current, headers, token).await?;

            if !is_master_playlist(&content) {
                let playlist = parse_media_playlist(content.as_bytes(), &current)?;
                info!(
                    url = %playlist.url,
                    segments = playlist.segments.len(),
                    duration_secs = playlist.total_duration(),
                    end_list = playlist.end_list,
                    "Media playlist loaded"
                );
                return Ok(playlist);
            }

            if depth >= max_depth {
                return Err(ManifestError::TooManyRedirections {
                    url: current.to_string(),
                    depth: max_depth,
                }
                .into());
            }

            let variants = parse_variants(&content, &current);
            debug!(url = %current, variants = variants.len(), "Master playlist found");
            let selected = select_variant(
                &variants,
                &self.config.playlist_config.variant_selection_policy,
            )
            .ok_or_else(|| ManifestError::NoSuitableStream {
                url: current.to_string(),
            })?;

            info!(
                url = %selected.url,
                bandwidth = selected.bandwidth,
                "Following variant stream"
            );
            current = selected.url.clone();
            depth += 1;
        }
    }

    async fn fetch_text(
        &self,
        url: &Url,
        headers: &HeaderMap,
        token: &CancellationToken,
    ) -> Result<String, DownloadError> {
        debug!(url = %url, "Fetching playlist");
        let request = self
            .http_client
            .get(url.clone())
            .headers(headers.clone())
            .timeout(self.config.playlist_config.fetch_timeout)
            .send();

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            response = request => response.map_err(|e| ManifestError::network(url.as_str(), e))?,
        };

        if response.status() != StatusCode::OK {
            return Err(ManifestError::Status {
                url: url.to_string(),
                status: response.status(),
            }
            .into());
        }

        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            body = response.bytes() => body.map_err(|e| ManifestError::network(url.as_str(), e))?,
        };

        String::from_utf8(body.to_vec()).map_err(|_| {
            ManifestError::Encoding {
                url: url.to_string(),
            }
            .into()
        })
    }
}
