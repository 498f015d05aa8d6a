use regex::Regex;
use std::sync::OnceLock;

use super::document::{DocumentError, PermitDocument};
use super::record::{PermitField, PermitRecord, PermitTimestamp};

const RECEIPT_DATE: &str = r"[A-Z][a-z]+\.?\s+\d{1,2},?\s+\d{4}(?:\s*:\s*\d{1,2}:\d{2}|\s+at\s+\d{1,2}:\d{2}\s*[AP]M|\s+\d{1,2}:\d{2})?";

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("required field {field} not found in permit document")]
    MissingField { field: PermitField },
    #[error("{field} value '{value}' is not a valid permit date")]
    InvalidTimestamp { field: PermitField, value: String },
    #[error(transparent)]
    Document(#[from] DocumentError),
}

struct ReceiptPatterns {
    permit_number: Vec<Regex>,
    plate_number: Vec<Regex>,
    valid_from: Regex,
    valid_to: Regex,
    barcode_label: Regex,
    barcode_value: Regex,
    amount_paid: Vec<Regex>,
}

impl ReceiptPatterns {
    fn get() -> &'static Self {
        static PATTERNS: OnceLock<ReceiptPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            permit_number: vec![
                compile(r"(?i)Permit\s+no\.?\s*:\s*([A-Z0-9]+)"),
                compile(r"(?i)Permit\s+number\s*:\s*([A-Z0-9]+)"),
            ],
            plate_number: vec![
                compile(r"(?i)Plate\s+no\.?\s*:\s*([A-Z0-9]+)"),
                compile(r"(?i)Licen[cs]e\s+plate\s*:\s*([A-Z0-9]+)"),
            ],
            valid_from: compile(&format!(r"(?i)Valid\s+from\s*:\s*({RECEIPT_DATE})")),
            valid_to: compile(&format!(r"(?i)Valid\s+to\s*:\s*({RECEIPT_DATE})")),
            barcode_label: compile(r"(?m)^\s*(\d{5})\s*$"),
            barcode_value: compile(r"(?i)Barcode(?:\s+(?:value|no\.?))?\s*:\s*(\d+)"),
            // Strongest label first; `\b` keeps `Subtotal` from reading as `Total`.
            amount_paid: [r"Amount\s+paid", r"Total\s+amount", r"Total", r"Fee"]
                .into_iter()
                .map(|label| {
                    compile(&format!(r"(?i)\b{label}\s*:?\s*(\$\s?\d+(?:\.\d{{2}})?)"))
                })
                .collect(),
        })
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("receipt pattern compiles")
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| capture(pattern, text))
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|found| found.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads permit records out of City of Toronto temporary parking permit
/// receipts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitExtractor;

impl PermitExtractor {
    pub fn extract(&self, document: &PermitDocument) -> Result<PermitRecord, ExtractionError> {
        self.extract_text(document.text())
    }

    pub fn extract_text(&self, text: &str) -> Result<PermitRecord, ExtractionError> {
        let patterns = ReceiptPatterns::get();

        let permit_number = first_capture(&patterns.permit_number, text)
            .map(|value| value.to_ascii_uppercase())
            .ok_or(ExtractionError::MissingField {
                field: PermitField::PermitNumber,
            })?;
        let plate_number = first_capture(&patterns.plate_number, text)
            .map(|value| value.to_ascii_uppercase())
            .ok_or(ExtractionError::MissingField {
                field: PermitField::PlateNumber,
            })?;
        let valid_from = timestamp(&patterns.valid_from, text, PermitField::ValidFrom)?;
        let valid_to = timestamp(&patterns.valid_to, text, PermitField::ValidTo)?;

        let barcode_value = capture(&patterns.barcode_value, text)
            .or_else(|| barcode_from_permit_number(&permit_number));
        let barcode_label = capture(&patterns.barcode_label, text);
        let amount_paid = first_capture(&patterns.amount_paid, text)
            .map(|amount| amount.split_whitespace().collect::<String>());

        Ok(PermitRecord {
            permit_number,
            plate_number,
            valid_from,
            valid_to,
            barcode_value,
            barcode_label,
            amount_paid,
        })
    }

    /// Every required field the text lacks, in record order. Used to explain
    /// a failed extraction in one pass.
    pub fn missing_fields(&self, text: &str) -> Vec<PermitField> {
        let patterns = ReceiptPatterns::get();
        PermitField::required()
            .into_iter()
            .filter(|field| {
                let found = match field {
                    PermitField::PermitNumber => first_capture(&patterns.permit_number, text),
                    PermitField::PlateNumber => first_capture(&patterns.plate_number, text),
                    PermitField::ValidFrom => capture(&patterns.valid_from, text),
                    PermitField::ValidTo => capture(&patterns.valid_to, text),
                };
                found.is_none()
            })
            .collect()
    }
}

fn timestamp(
    pattern: &Regex,
    text: &str,
    field: PermitField,
) -> Result<PermitTimestamp, ExtractionError> {
    let raw = capture(pattern, text).ok_or(ExtractionError::MissingField { field })?;
    PermitTimestamp::parse(&raw).map_err(|_| ExtractionError::InvalidTimestamp { field, value: raw })
}

/// The printed barcode encodes the permit number without its series letter.
fn barcode_from_permit_number(permit_number: &str) -> Option<String> {
    let mut chars = permit_number.chars();
    let series = chars.next()?;
    let digits = chars.as_str();
    let encodable = series.is_ascii_alphabetic()
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit());
    encodable.then(|| digits.to_string())
}
