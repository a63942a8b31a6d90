// HLS Variant Selection: picks one media playlist out of a master playlist.
//
// Master playlists are scanned line by line instead of going through a
// strict parser: a missing or malformed BANDWIDTH must not make the whole
// manifest unusable, it just ranks that variant at 0.

use tracing::{debug, warn};
use url::Url;

use crate::hls::playlist::resolve_uri;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";

/// One alternate-quality stream referenced from a master playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub url: Url,
    pub bandwidth: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VariantSelectionPolicy {
    #[default]
    HighestBandwidth,
    LowestBandwidth,
    /// The variant whose bandwidth is nearest to the target
    ClosestToBandwidth(u64),
}

/// Extracts every `#EXT-X-STREAM-INF` entry, in manifest order.
///
/// Each tag is paired with the next non-empty, non-comment line as its URI,
/// resolved against `base_url` when relative.
pub fn parse_variants(master: &str, base_url: &Url) -> Vec<Variant> {
    let mut variants = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;

    for line in master.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(STREAM_INF_TAG) {
            let attributes = rest.strip_prefix(':').unwrap_or(rest);
            pending_bandwidth = Some(bandwidth_of(attributes));
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let Some(bandwidth) = pending_bandwidth.take() else {
            continue;
        };

        match resolve_uri(base_url, line) {
            Ok(url) => variants.push(Variant { url, bandwidth }),
            Err(e) => warn!(uri = line, error = %e, "Skipping variant with unresolvable URI"),
        }
    }

    variants
}

/// Picks a variant according to `policy`. Ties go to the first one listed.
pub fn select_variant<'a>(
    variants: &'a [Variant],
    policy: &VariantSelectionPolicy,
) -> Option<&'a Variant> {
    let better = |candidate: &Variant, current: &Variant| -> bool {
        match policy {
            VariantSelectionPolicy::HighestBandwidth => candidate.bandwidth > current.bandwidth,
            VariantSelectionPolicy::LowestBandwidth => candidate.bandwidth < current.bandwidth,
            VariantSelectionPolicy::ClosestToBandwidth(target) => {
                candidate.bandwidth.abs_diff(*target) < current.bandwidth.abs_diff(*target)
            }
        }
    };

    let selected = variants.iter().fold(None::<&Variant>, |best, v| match best {
        Some(current) if !better(v, current) => Some(current),
        _ => Some(v),
    });

    if let Some(v) = selected {
        debug!(url = %v.url, bandwidth = v.bandwidth, ?policy, "Selected variant");
    }
    selected
}

/// BANDWIDTH attribute value; 0 when absent or not a number.
fn bandwidth_of(attributes: &str) -> u64 {
    parse_attributes(attributes)
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("BANDWIDTH"))
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0)
}

/// Splits an attribute list (`KEY=VALUE,KEY="A,B"`) into pairs, honoring quotes.
fn parse_attributes(input: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                push_attribute(&input[start..i], &mut pairs);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_attribute(&input[start..], &mut pairs);
    pairs
}

fn push_attribute<'a>(raw: &'a str, pairs: &mut Vec<(&'a str, &'a str)>) {
    if let Some((key, value)) = raw.split_once('=') {
        pairs.push((key.trim(), value.trim().trim_matches('"')));
    }
}
