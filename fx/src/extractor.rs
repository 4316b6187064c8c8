//! Pulls reference values out of the source document.
//!
//! The document is untrusted: each anchor is located and parsed on its own,
//! so a renamed or missing anchor only loses that one value.

use ratekeeper_common::Currency;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExtractionFailure, FxError};

/// A named location in the source document and the currency it yields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Value of the `id` attribute of the container element.
    pub element_id: String,
    /// Identifier of the produced currency.
    pub currency_id: String,
    /// Display name of the produced currency.
    pub name: String,
}

impl Anchor {
    /// Create a new anchor.
    pub fn new(
        element_id: impl Into<String>,
        currency_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            element_id: element_id.into(),
            currency_id: currency_id.into(),
            name: name.into(),
        }
    }

    /// Anchors published by the central bank front page.
    pub fn defaults() -> Vec<Anchor> {
        vec![
            Anchor::new("euro", "EUR", "Euro"),
            Anchor::new("dolar", "USD", "Dólar Americano"),
        ]
    }

    fn selector(&self) -> Result<Selector, ExtractionFailure> {
        let escaped = self.element_id.replace('\\', "\\\\").replace('"', "\\\"");
        Selector::parse(&format!("[id=\"{}\"]", escaped))
            .map_err(|e| ExtractionFailure::InvalidAnchor(format!("{:?}", e)))
    }
}

/// A value successfully read from one anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedValue {
    pub anchor: Anchor,
    pub value: f64,
}

impl ExtractedValue {
    /// Build a fresh currency snapshot tagged with `source`.
    pub fn to_currency(&self, source: &str) -> Currency {
        Currency::new(
            self.anchor.currency_id.clone(),
            self.anchor.name.clone(),
            self.value,
            source,
        )
    }
}

/// Outcome of extracting a set of anchors from one document.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Successful anchors, in the order they were requested.
    pub values: Vec<ExtractedValue>,
    /// One `FxError::Extraction` per failed anchor.
    pub failures: Vec<FxError>,
}

impl Extraction {
    /// True when no anchor produced a value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of anchors attempted.
    pub fn attempted(&self) -> usize {
        self.values.len() + self.failures.len()
    }

    /// Convert the extracted values into currency snapshots.
    pub fn to_currencies(&self, source: &str) -> Vec<Currency> {
        self.values.iter().map(|v| v.to_currency(source)).collect()
    }
}

/// Extract every anchor from `document`.
///
/// Never fails as a whole: per-anchor failures are collected in
/// `Extraction::failures`.
pub fn extract(document: &str, anchors: &[Anchor]) -> Extraction {
    let html = Html::parse_document(document);
    let mut extraction = Extraction::default();

    for anchor in anchors {
        match extract_anchor(&html, anchor) {
            Ok(value) => {
                debug!(anchor = %anchor.element_id, value, "Extracted value");
                extraction.values.push(ExtractedValue {
                    anchor: anchor.clone(),
                    value,
                });
            }
            Err(reason) => {
                warn!(anchor = %anchor.element_id, reason = %reason, "Anchor extraction failed");
                extraction.failures.push(FxError::Extraction {
                    anchor: anchor.element_id.clone(),
                    reason,
                });
            }
        }
    }

    extraction
}

/// Locate one anchor in a parsed document and read its value.
pub fn extract_anchor(html: &Html, anchor: &Anchor) -> Result<f64, ExtractionFailure> {
    let container_selector = anchor.selector()?;
    let strong_selector = Selector::parse("strong")
        .map_err(|e| ExtractionFailure::InvalidAnchor(format!("{:?}", e)))?;

    let container = html
        .select(&container_selector)
        .next()
        .ok_or(ExtractionFailure::AnchorNotFound)?;

    let text = first_numeric_text(container, &strong_selector)
        .ok_or(ExtractionFailure::MissingNumericText)?;

    parse_localized_number(text)
}

fn first_numeric_text<'a>(container: ElementRef<'a>, strong: &Selector) -> Option<&'a str> {
    container
        .select(strong)
        .next()?
        .text()
        .find(|t| !t.trim().is_empty())
}

/// Parse a number that uses a comma as decimal separator (`144,37320000`).
pub fn parse_localized_number(text: &str) -> Result<f64, ExtractionFailure> {
    let cleaned = text.trim().replace(',', ".");

    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(ExtractionFailure::InvalidNumber(cleaned)),
    }
}
