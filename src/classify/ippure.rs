//! ippure.com purity report client.
//!
//! The endpoint is a URL template containing `{ip}`. It may return either
//! the rendered report page (HTML or plain text) or the extracted JSON
//! object `{"purity","purityLevel","ipType","native"}` produced by a
//! rendering proxy. Both shapes are accepted.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::classify::{
    Classification, Classifier, ORIGIN_BROADCAST, ORIGIN_NATIVE, ORIGIN_NON_NATIVE, UNKNOWN,
};
use crate::config::ClassifierConfig;
use crate::error::ClassifierError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]*>").expect("valid pattern"));
static PURITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:IPPure系数|IPPure Score)\s*(\d+)\s*%[ \t]*([^\n]*)").expect("valid pattern")
});
static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:IP属性|IP Type)\s*(机房IP|住宅IP|Data Center|Residential)").expect("valid pattern")
});
static ORIGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:IP来源|IP Source)\s*(原生IP|非原生IP|广播IP|Native IP|Broadcast)").expect("valid pattern")
});

/// HTTP client for the purity report.
pub struct IppureClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl IppureClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        Self::with_endpoint(&config.endpoint, config.timeout)
    }

    pub fn with_endpoint(endpoint: &str, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    fn report_url(&self, address: &str) -> String {
        self.endpoint
            .replace("{ip}", &urlencoding::encode(address))
    }
}

#[async_trait]
impl Classifier for IppureClassifier {
    async fn classify(&self, address: &str) -> Result<Classification, ClassifierError> {
        let url = self.report_url(address);
        tracing::debug!(%url, "Requesting purity report");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        parse_report(address, &body)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExtractedReport {
    #[serde(default)]
    purity: String,
    #[serde(default, rename = "purityLevel")]
    purity_level: String,
    #[serde(default, rename = "ipType")]
    ip_type: String,
    #[serde(default)]
    native: String,
}

/// Parse a report body into a classification.
///
/// Fields that cannot be found are reported as `unknown`; a body with no
/// recognizable field at all is an error.
pub fn parse_report(address: &str, body: &str) -> Result<Classification, ClassifierError> {
    let report = match serde_json::from_str::<ExtractedReport>(body.trim()) {
        Ok(report) => report,
        Err(_) => scrape_text(&TAG_RE.replace_all(body, "\n")),
    };

    if report.purity.is_empty() && report.ip_type.is_empty() && report.native.is_empty() {
        return Err(ClassifierError::InvalidReport(format!(
            "no purity fields found for {address}"
        )));
    }

    Ok(Classification {
        address: address.to_string(),
        score: parse_score(&report.purity),
        level: non_empty_or_unknown(report.purity_level.trim()),
        category: normalize_category(&report.ip_type),
        origin: normalize_origin(&report.native),
    })
}

fn scrape_text(text: &str) -> ExtractedReport {
    let mut report = ExtractedReport::default();
    if let Some(caps) = PURITY_RE.captures(text) {
        report.purity = format!("{}%", &caps[1]);
        report.purity_level = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
    }
    if let Some(caps) = CATEGORY_RE.captures(text) {
        report.ip_type = caps[1].to_string();
    }
    if let Some(caps) = ORIGIN_RE.captures(text) {
        report.native = caps[1].to_string();
    }
    report
}

/// `"7%"` → `Some(7)`; anything non-numeric → `None`.
fn parse_score(raw: &str) -> Option<u32> {
    raw.trim().trim_end_matches('%').trim().parse().ok()
}

fn normalize_category(raw: &str) -> String {
    match raw.trim() {
        "机房IP" | "Data Center" => "datacenter".to_string(),
        "住宅IP" | "Residential" => "residential".to_string(),
        other => non_empty_or_unknown(other),
    }
}

fn normalize_origin(raw: &str) -> String {
    match raw.trim() {
        "原生IP" | "Native IP" => ORIGIN_NATIVE.to_string(),
        "非原生IP" => ORIGIN_NON_NATIVE.to_string(),
        "广播IP" | "Broadcast" => ORIGIN_BROADCAST.to_string(),
        other => non_empty_or_unknown(other),
    }
}

fn non_empty_or_unknown(value: &str) -> String {
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrapes_rendered_page_text() {
        let body = "<html><body><div>IPPure系数</div>\n<div>7% 极度纯净</div>\
                    <div>IP属性</div><div>机房IP</div>\
                    <div>IP来源</div><div>原生IP</div></body></html>";
        let c = parse_report("203.0.113.9", body).unwrap();
        assert_eq!(c.score, Some(7));
        assert_eq!(c.level, "极度纯净");
        assert_eq!(c.category, "datacenter");
        assert_eq!(c.origin, ORIGIN_NATIVE);
    }

    #[test]
    fn accepts_extracted_json() {
        let body = r#"{"purity":"42%","purityLevel":"moderate","ipType":"Residential","native":"广播IP"}"#;
        let c = parse_report("203.0.113.9", body).unwrap();
        assert_eq!(c.score, Some(42));
        assert_eq!(c.category, "residential");
        assert_eq!(c.origin, ORIGIN_BROADCAST);
    }

    #[test]
    fn non_numeric_score_becomes_none() {
        let body = r#"{"purity":"未知","ipType":"机房IP","native":"非原生IP"}"#;
        let c = parse_report("203.0.113.9", body).unwrap();
        assert_eq!(c.score, None);
        assert_eq!(c.level, UNKNOWN);
        assert_eq!(c.origin, ORIGIN_NON_NATIVE);
    }

    #[test]
    fn empty_report_is_an_error() {
        let err = parse_report("203.0.113.9", "<html><body>loading…</body></html>").unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidReport(_)));
    }

    #[test]
    fn endpoint_template_substitutes_address() {
        let classifier =
            IppureClassifier::with_endpoint("https://ippure.com/?ip={ip}", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            classifier.report_url("203.0.113.9"),
            "https://ippure.com/?ip=203.0.113.9"
        );
    }
}
