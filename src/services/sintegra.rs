//! SINTEGRA/GO public registry client
//!
//! Posts the consult form of the Goiás state tax registry and scrapes the
//! registration fields from the returned HTML.
//!
//! Official Source: <https://appasp.sefaz.go.gov.br/sintegra/consulta/default.html>

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::registry::RegistryRecord;
use crate::services::cnpj::mask_cnpj;
use crate::services::extractor::{ExtractError, Extractor};

/// Field keys and the label variants the portal prints for them. More
/// specific variants come first.
const FIELD_LABELS: &[(&str, &[&str])] = &[
    ("cnpj", &["CNPJ"]),
    ("state_registration", &["Inscrição Estadual"]),
    ("legal_name", &["Nome Empresarial", "Razão Social"]),
    ("taxpayer", &["Contribuinte?", "Contribuinte"]),
    ("trade_name", &["Nome Fantasia"]),
    ("address", &["Endereço Estabelecimento", "Endereço"]),
    ("main_activity", &["Atividade Principal"]),
    ("auxiliary_unit", &["Unidade Auxiliar"]),
    ("usage_condition", &["Condição de Uso"]),
    ("contract_end_date", &["Data Final de Contrato"]),
    ("tax_regime", &["Regime de Apuração"]),
    (
        "registration_status",
        &["Situação Cadastral Vigente", "Situação Cadastral"],
    ),
    ("registration_status_date", &["Data desta Situação Cadastral"]),
    ("registration_date", &["Data de Cadastramento"]),
    ("nfe_operations", &["Operações com NF-E"]),
    ("notes", &["Observações"]),
    ("updated_on", &["Cadastro Atualizado em"]),
    ("consulted_on", &["Data da Consulta"]),
];

const MAX_BACKOFF: Duration = Duration::from_secs(6);

/// Client for the SINTEGRA/GO consult endpoint.
pub struct SintegraClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    attempts: u32,
}

impl SintegraClient {
    pub fn new(config: &AppConfig) -> Result<Self, SintegraError> {
        let timeout = config.request_timeout();
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .build()?;

        let mut base = config.sintegra_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| SintegraError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            timeout,
            attempts: config.extract_attempts.max(1),
        })
    }

    /// One POST of the consult form, without retries.
    async fn fetch(&self, cnpj: &str) -> Result<RegistryRecord, ExtractError> {
        let masked = mask_cnpj(cnpj);
        let consult_url = self
            .base_url
            .join("consultar.asp")
            .map_err(|e| ExtractError::Network(e.to_string()))?;
        let referer = self
            .base_url
            .join("default.html")
            .map_err(|e| ExtractError::Network(e.to_string()))?;

        let form = [
            ("rTipoDoc", "2"),
            ("tDoc", masked.as_str()),
            ("tCCE", ""),
            ("tCNPJ", masked.as_str()),
            ("tCPF", ""),
            ("btCGC", "Consultar"),
            ("zion.SystemAction", "consultarSintegra()"),
            ("zion.OnSubmited", ""),
            ("zion.FormElementPosted", "zionFormID_1"),
            ("zionPostMethod", ""),
            ("zionRichValidator", "true"),
        ];

        let response = self
            .http
            .post(consult_url)
            .header("Origin", self.base_url.origin().ascii_serialization())
            .header("Referer", referer.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .error_for_status()
            .map_err(|e| self.classify(e))?;

        let html = response.text().await.map_err(|e| self.classify(e))?;
        parse_result_html(&html)
    }

    fn classify(&self, err: reqwest::Error) -> ExtractError {
        if err.is_timeout() {
            ExtractError::Timeout(self.timeout.as_secs())
        } else if err.is_decode() {
            ExtractError::Parse(err.to_string())
        } else {
            ExtractError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Extractor for SintegraClient {
    async fn extract(&self, subject: &str) -> Result<RegistryRecord, ExtractError> {
        let mut attempt = 1;
        loop {
            match self.fetch(subject).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = backoff(attempt);
                    tracing::warn!(
                        subject = %subject,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "SINTEGRA lookup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff: 1s, 2s, 4s, capped at 6s.
fn backoff(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Parse the SINTEGRA/GO result page.
///
/// Labels are matched case- and accent-insensitively. The value is taken
/// from the next sibling element, or from the next cell of the label's table
/// row. A page without any known label yields an empty record.
pub fn parse_result_html(html: &str) -> Result<RegistryRecord, ExtractError> {
    if html.trim().is_empty() {
        return Err(ExtractError::Parse("empty response body".to_string()));
    }

    let document = Html::parse_document(html);
    let candidate_sel =
        Selector::parse("td, th, span, label, b, strong, font, div, p, dt").expect("valid selector");

    let candidates: Vec<(ElementRef, String)> = document
        .select(&candidate_sel)
        .map(|el| (el, normalize_label(&element_text(el))))
        .filter(|(_, text)| !text.is_empty() && text.len() <= 80)
        .collect();

    let mut record = RegistryRecord::default();
    for (key, variants) in FIELD_LABELS {
        if let Some(value) = find_value(&candidates, variants) {
            record.set_field(key, value);
        }
    }

    if record.cnpj.is_none() {
        let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
        if let Some(m) = masked_cnpj_regex().find(&text) {
            record.cnpj = Some(m.as_str().to_string());
        }
    }

    Ok(record)
}

fn find_value(candidates: &[(ElementRef, String)], variants: &[&str]) -> Option<String> {
    for variant in variants {
        let wanted = normalize_label(variant);
        for (el, text) in candidates {
            if *text != wanted {
                continue;
            }
            if let Some(value) = value_after(*el, &wanted) {
                return Some(value);
            }
        }
    }
    None
}

fn value_after(label: ElementRef, wanted: &str) -> Option<String> {
    let accept = |text: String| -> Option<String> {
        (!text.is_empty() && normalize_label(&text) != wanted).then_some(text)
    };

    if let Some(value) = label
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .next()
        .and_then(|sib| accept(element_text(sib)))
    {
        return Some(value);
    }

    // Label sits in a table cell: use the cell to its right.
    let cell = label
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| matches!(a.value().name(), "td" | "th"))
        .or_else(|| matches!(label.value().name(), "td" | "th").then_some(label))?;
    cell.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sib| matches!(sib.value().name(), "td" | "th"))
        .and_then(|sib| accept(element_text(sib)))
}

fn element_text(el: ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, strip Portuguese accents and trailing colons.
fn normalize_label(s: &str) -> String {
    let folded: String = collapse_whitespace(s)
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .collect();
    folded.trim_end_matches([':', ' ']).to_string()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        other => other,
    }
}

fn masked_cnpj_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}").expect("valid regex"))
}

/// Error type for building the SINTEGRA client.
#[derive(Debug, thiserror::Error)]
pub enum SintegraError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid SINTEGRA configuration: {0}")]
    Config(String),
}
