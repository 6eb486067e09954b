//! UTM parsing and traffic classification.
//!
//! Manager comments carry a free-form tracking block:
//!
//! ```text
//! UTM: utm_source: tiktok; utm_medium: paid; utm_campaign: TOF | SS | v1
//! ```
//!
//! Classification is a pure function of the parsed block plus pixel markers
//! found anywhere in the comment, so the same comment always yields the same
//! `(TrafficType, Platform)` pair.

use crate::models::{Platform, TrafficType};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtmData {
    pub fields: HashMap<String, String>,
    pub has_fbp: bool,
    pub has_fbc: bool,
    pub has_ttp: bool,
    pub has_fbclid: bool,
}

impl UtmData {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.has_fbp && !self.has_fbc && !self.has_ttp && !self.has_fbclid
    }

    fn get(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }
}

/// True when `token` appears in `text` delimited by non-word characters.
/// Keeps `ttp` from matching inside `https`.
fn contains_token(text: &str, token: &str) -> bool {
    let bytes = text.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut start = 0;
    while let Some(pos) = text[start..].find(token) {
        let at = start + pos;
        let before_ok = at == 0 || !is_word(bytes[at - 1]);
        let after = at + token.len();
        let after_ok = after >= bytes.len() || !is_word(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

/// Extract the first `UTM:` block from a manager comment.
///
/// The block runs until a blank line, a new line starting with an uppercase
/// letter (a new comment section) or end of text. Pairs are `key: value`
/// joined by `;`; keys are lowercased.
pub fn parse_utm_comment(comment: &str) -> UtmData {
    let mut data = UtmData {
        has_fbp: contains_token(comment, "_fbp"),
        has_fbc: contains_token(comment, "_fbc"),
        has_ttp: contains_token(comment, "ttp"),
        has_fbclid: contains_token(comment, "fbclid"),
        ..Default::default()
    };

    let Some(start) = comment.find("UTM:") else {
        return data;
    };
    let rest = &comment[start + 4..];

    let mut end = rest.len();
    if let Some(pos) = rest.find("\n\n") {
        end = end.min(pos);
    }
    // A newline followed by an uppercase letter terminates the block.
    let mut search_from = 0;
    while let Some(pos) = rest[search_from..].find('\n') {
        let at = search_from + pos;
        if rest[at + 1..]
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
        {
            end = end.min(at);
            break;
        }
        search_from = at + 1;
    }

    for pair in rest[..end].split(';') {
        let Some(colon) = pair.find(':') else { continue };
        let raw_key = pair[..colon].trim();
        // Mirror a `(\w+)` capture: take the trailing word token of the key.
        let key: String = raw_key
            .rsplit(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        let value = pair[colon + 1..].trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        data.fields.insert(key, value.to_string());
    }

    // Pixel values may ride inside the kvlist as well.
    if data.fields.contains_key("_fbp") {
        data.has_fbp = true;
    }
    if data.fields.contains_key("_fbc") {
        data.has_fbc = true;
    }
    if data.fields.contains_key("ttp") {
        data.has_ttp = true;
    }
    if data.fields.contains_key("fbclid") {
        data.has_fbclid = true;
    }

    data
}

const TIKTOK_CAMPAIGN_MARKERS: &[&str] = &["tof", "mof", "bof", "| ss |", "| retarget", "| dynamic"];

/// Deterministic priority cascade; the first matching rule wins.
pub fn classify_traffic(data: &UtmData) -> (TrafficType, Platform) {
    let source = data.get("utm_source").to_ascii_lowercase();
    let medium = data.get("utm_medium").to_ascii_lowercase();
    let campaign = data.get("utm_campaign").to_ascii_lowercase();
    let content = data.get("utm_content").to_ascii_lowercase();

    // Facebook ads, explicit naming convention.
    if source.starts_with("fbads")
        || medium.starts_with("fbads")
        || campaign.starts_with("fbads")
        || content.contains("facebook_ua")
    {
        return (TrafficType::PaidConfirmed, Platform::Facebook);
    }

    // _fbc is click tracking: only set after an actual ad click.
    if data.has_fbc {
        return (TrafficType::PaidConfirmed, Platform::Facebook);
    }

    if data.has_fbclid && matches!(medium.as_str(), "paid" | "cpc") {
        return (TrafficType::PaidConfirmed, Platform::Facebook);
    }

    // TikTok funnel-stage campaign names (TOF/MOF/BOF).
    if TIKTOK_CAMPAIGN_MARKERS.iter().any(|m| campaign.contains(m)) {
        return (TrafficType::PaidConfirmed, Platform::Tiktok);
    }

    if source == "tiktok" && matches!(medium.as_str(), "paid" | "cpc") {
        return (TrafficType::PaidConfirmed, Platform::Tiktok);
    }

    if source == "google"
        && (medium == "cpc" || (!campaign.is_empty() && campaign.chars().all(|c| c.is_ascii_digit())))
    {
        return (TrafficType::PaidConfirmed, Platform::Google);
    }

    if matches!(source.as_str(), "ig" | "instagram")
        && matches!(medium.as_str(), "social" | "organic" | "")
    {
        return (TrafficType::Organic, Platform::Instagram);
    }

    if source == "facebook" && matches!(medium.as_str(), "social" | "organic") {
        return (TrafficType::Organic, Platform::Facebook);
    }

    if source == "tiktok" && matches!(medium.as_str(), "social" | "organic" | "") {
        return (TrafficType::Organic, Platform::Tiktok);
    }

    if matches!(source.as_str(), "klaviyo" | "email")
        || matches!(medium.as_str(), "email" | "klaviyo")
    {
        return (TrafficType::Organic, Platform::Email);
    }

    if source.is_empty() && medium.is_empty() {
        if data.has_fbp || data.has_fbc {
            return (TrafficType::PixelOnly, Platform::Facebook);
        }
        if data.has_ttp {
            return (TrafficType::PixelOnly, Platform::Tiktok);
        }
        return (TrafficType::Unknown, Platform::Other);
    }

    // Some UTM present but no known pattern: infer from medium class + source.
    let traffic_type = if matches!(medium.as_str(), "cpc" | "paid" | "ppc") {
        TrafficType::PaidLikely
    } else if matches!(medium.as_str(), "social" | "organic" | "referral") {
        TrafficType::Organic
    } else {
        TrafficType::Unknown
    };

    let platform = if source.contains("facebook") || source.contains("fb") {
        Platform::Facebook
    } else if source.contains("tiktok") || source.contains("tt") {
        Platform::Tiktok
    } else if source.contains("google") {
        Platform::Google
    } else if source.contains("insta") || source.contains("ig") {
        Platform::Instagram
    } else {
        Platform::Other
    };

    (traffic_type, platform)
}

/// Evidence list explaining WHY an order was classified, priority-ordered to
/// match the cascade. Shown on the traffic transactions view.
#[allow(clippy::too_many_arguments)]
pub fn build_evidence(
    utm_source: Option<&str>,
    utm_medium: Option<&str>,
    utm_campaign: Option<&str>,
    utm_content: Option<&str>,
    fbp: Option<&str>,
    fbc: Option<&str>,
    ttp: Option<&str>,
    fbclid: Option<&str>,
) -> Vec<Value> {
    let mut evidence = Vec::new();

    // Ad click trackers first, they are the strongest signal.
    if let Some(v) = fbc.filter(|v| !v.is_empty()) {
        evidence.push(json!({"field": "_fbc", "value": v, "reason": "Ad click tracked"}));
    }
    if let Some(v) = fbclid.filter(|v| !v.is_empty()) {
        evidence.push(json!({"field": "fbclid", "value": v, "reason": "Facebook click ID"}));
    }

    for (field, value) in [
        ("utm_source", utm_source),
        ("utm_medium", utm_medium),
        ("utm_campaign", utm_campaign),
        ("utm_content", utm_content),
    ] {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            evidence.push(json!({"field": field, "value": v}));
        }
    }

    match (fbp.filter(|v| !v.is_empty()), fbc.filter(|v| !v.is_empty())) {
        (Some(v), None) if utm_source.map(|s| s.is_empty()).unwrap_or(true) => {
            evidence.push(json!({"field": "_fbp", "value": v, "reason": "Browser pixel only"}));
        }
        (Some(v), Some(_)) => {
            evidence.push(json!({"field": "_fbp", "value": v}));
        }
        (Some(v), None) => {
            evidence.push(json!({"field": "_fbp", "value": v}));
        }
        _ => {}
    }
    if let Some(v) = ttp.filter(|v| !v.is_empty()) {
        evidence.push(json!({"field": "ttp", "value": v, "reason": "TikTok pixel"}));
    }

    evidence
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(comment: &str) -> (TrafficType, Platform) {
        classify_traffic(&parse_utm_comment(comment))
    }

    #[test]
    fn parses_kvlist() {
        let data =
            parse_utm_comment("UTM: utm_source: tiktok; utm_medium: paid; utm_campaign: TOF | SS | v1");
        assert_eq!(data.get("utm_source"), "tiktok");
        assert_eq!(data.get("utm_medium"), "paid");
        assert_eq!(data.get("utm_campaign"), "TOF | SS | v1");
    }

    #[test]
    fn block_ends_at_new_section() {
        let data = parse_utm_comment(
            "UTM: utm_source: ig; utm_medium: social\nNote from manager: call back tomorrow",
        );
        assert_eq!(data.get("utm_source"), "ig");
        assert_eq!(data.get("utm_medium"), "social");
        assert!(!data.fields.contains_key("note"));
    }

    #[test]
    fn tof_campaign_beats_tiktok_paid_rule() {
        // Rule 4 (campaign markers) fires before rule 5 (source+medium).
        assert_eq!(
            classify("UTM: utm_source: tiktok; utm_medium: paid; utm_campaign: TOF | SS | v1"),
            (TrafficType::PaidConfirmed, Platform::Tiktok)
        );
    }

    #[test]
    fn instagram_social_is_organic() {
        assert_eq!(
            classify("UTM: utm_source: ig; utm_medium: social"),
            (TrafficType::Organic, Platform::Instagram)
        );
    }

    #[test]
    fn pixel_only_facebook() {
        assert_eq!(
            classify("customer came back, _fbp=abc123"),
            (TrafficType::PixelOnly, Platform::Facebook)
        );
    }

    #[test]
    fn fbc_confirms_paid_even_with_social_medium() {
        assert_eq!(
            classify("UTM: utm_source: facebook; utm_medium: social; _fbc: fb.1.123.abc"),
            (TrafficType::PaidConfirmed, Platform::Facebook)
        );
    }

    #[test]
    fn fbads_prefix_wins() {
        assert_eq!(
            classify("UTM: utm_source: fbads_ua; utm_medium: whatever"),
            (TrafficType::PaidConfirmed, Platform::Facebook)
        );
    }

    #[test]
    fn google_numeric_campaign_is_paid() {
        assert_eq!(
            classify("UTM: utm_source: google; utm_medium: unknown-thing; utm_campaign: 20843516"),
            (TrafficType::PaidConfirmed, Platform::Google)
        );
    }

    #[test]
    fn klaviyo_is_email() {
        assert_eq!(
            classify("UTM: utm_source: klaviyo; utm_medium: email"),
            (TrafficType::Organic, Platform::Email)
        );
    }

    #[test]
    fn ttp_does_not_match_inside_https() {
        let data = parse_utm_comment("see https://example.com for details");
        assert!(!data.has_ttp);
        assert_eq!(
            classify_traffic(&data),
            (TrafficType::Unknown, Platform::Other)
        );
    }

    #[test]
    fn unknown_source_with_cpc_is_paid_likely() {
        assert_eq!(
            classify("UTM: utm_source: newsletter-partner; utm_medium: cpc"),
            (TrafficType::PaidLikely, Platform::Other)
        );
    }

    #[test]
    fn no_tracking_at_all_is_unknown() {
        assert_eq!(
            classify("plain manager note"),
            (TrafficType::Unknown, Platform::Other)
        );
    }

    #[test]
    fn classifier_is_pure() {
        let comment = "UTM: utm_source: tiktok; utm_medium: paid";
        let first = classify(comment);
        for _ in 0..10 {
            assert_eq!(classify(comment), first);
        }
    }
}
