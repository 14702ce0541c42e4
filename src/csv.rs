//! CSV export of the asset list
//!
//! Output is meant to open cleanly in spreadsheet software on French
//! locales: UTF-8 BOM, every field quoted, CRLF line endings.

use crate::error::{ExportError, Result, ValidationError};
use crate::models::{format_decimal, parse_date_flexible, ReportDataset};
use chrono::{DateTime, Local};
use std::io::Write;

pub const CSV_MIME: &str = "text/csv;charset=utf-8;";

const BOM: &str = "\u{feff}";
const LINE_END: &str = "\r\n";

const HEADER: [&str; 7] = [
    "Nom",
    "Type",
    "Valeur",
    "Devise",
    "Date de valorisation",
    "Statut",
    "Propriétaires",
];

#[derive(Debug, Clone)]
pub struct CsvSerializer {
    /// Used when the dataset filters carry no currency
    currency_fallback: String,
}

impl Default for CsvSerializer {
    fn default() -> Self {
        Self::new("EUR")
    }
}

impl CsvSerializer {
    pub fn new(currency_fallback: impl Into<String>) -> Self {
        Self {
            currency_fallback: currency_fallback.into(),
        }
    }

    pub fn serialize(&self, dataset: &ReportDataset) -> Result<Vec<u8>> {
        self.serialize_at(dataset, Local::now())
    }

    pub fn serialize_at(&self, dataset: &ReportDataset, generated_at: DateTime<Local>) -> Result<Vec<u8>> {
        if dataset.assets.is_empty() {
            return Err(ValidationError::EmptyDataset.into());
        }

        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(BOM.as_bytes());
        write_record(&mut out, HEADER)?;

        for asset in &dataset.assets {
            let latest = asset.latest_valuation();
            let (value, currency, date) = match latest {
                Some(v) => (format_decimal(v.value), v.currency.clone(), format_date(&v.date)),
                None => (String::new(), String::new(), String::new()),
            };
            let status = if latest.is_some() { "Valorisé" } else { "Non valorisé" };

            write_record(
                &mut out,
                [
                    asset.name.as_str(),
                    asset.asset_type.name.as_str(),
                    value.as_str(),
                    currency.as_str(),
                    date.as_str(),
                    status,
                    asset.ownership_summary().as_str(),
                ],
            )?;
        }

        // Blank separator, then the summary block
        write_line(&mut out, "")?;
        let total = format_decimal(dataset.total_value);
        let asset_count = dataset.assets.len().to_string();
        let type_count = dataset.distinct_type_count().to_string();
        let generated = generated_at.format("%d/%m/%Y %H:%M").to_string();

        write_record(
            &mut out,
            ["Patrimoine total", total.as_str(), dataset.currency_or(&self.currency_fallback)],
        )?;
        write_record(&mut out, ["Nombre d'actifs", asset_count.as_str()])?;
        write_record(&mut out, ["Types d'actifs", type_count.as_str()])?;
        write_record(&mut out, ["Date de génération", generated.as_str()])?;

        Ok(out)
    }
}

/// Quote-wrap a field, doubling embedded quotes
pub fn escape_field(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn write_record<'a>(out: &mut Vec<u8>, fields: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let line = fields
        .into_iter()
        .map(escape_field)
        .collect::<Vec<_>>()
        .join(",");
    write_line(out, &line)
}

fn write_line(out: &mut Vec<u8>, line: &str) -> Result<()> {
    write!(out, "{}{}", line, LINE_END).map_err(|e| ExportError::serialization("csv", e))
}

/// dd/mm/yyyy when the date parses, the raw string otherwise
fn format_date(raw: &str) -> String {
    parse_date_flexible(raw)
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_dataset;
    use chrono::TimeZone;

    /// Minimal RFC 4180 reader: line breaks inside quotes stay in the field,
    /// blank records are dropped
    fn parse_csv(text: &str) -> Vec<Vec<String>> {
        let mut records = Vec::new();
        let mut record = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, in_quotes) {
                ('"', true) if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                ('"', _) => in_quotes = !in_quotes,
                (',', false) => record.push(std::mem::take(&mut field)),
                ('\r', false) if chars.peek() == Some(&'\n') => {
                    chars.next();
                    record.push(std::mem::take(&mut field));
                    let done = std::mem::take(&mut record);
                    if !(done.len() == 1 && done[0].is_empty()) {
                        records.push(done);
                    }
                }
                _ => field.push(c),
            }
        }
        if !field.is_empty() || !record.is_empty() {
            record.push(field);
            records.push(record);
        }
        records
    }

    fn generated_at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 10, 5, 14, 30, 0).unwrap()
    }

    fn output() -> String {
        let bytes = CsvSerializer::default()
            .serialize_at(&sample_dataset(), generated_at())
            .unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_bom_and_crlf() {
        let text = output();
        assert!(text.starts_with('\u{feff}'));
        assert!(text.ends_with("\r\n"));
        assert!(!text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_rows_and_summary() {
        let text = output();
        let rows = parse_csv(text.trim_start_matches('\u{feff}'));
        assert_eq!(rows[0], HEADER);
        assert_eq!(
            rows[1],
            [
                "Appartement, Lyon",
                "Immobilier",
                "100000",
                "EUR",
                "30/06/2024",
                "Valorisé",
                "Alice Martin (50%); SCI \"Les Tilleuls\" (50%)",
            ]
        );
        assert_eq!(rows[2][4], "01/09/2024");
        assert_eq!(rows[3], ["Patrimoine total", "125000", "EUR"]);
        assert_eq!(rows[4], ["Nombre d'actifs", "2"]);
        assert_eq!(rows[5], ["Types d'actifs", "2"]);
        assert_eq!(rows[6], ["Date de génération", "05/10/2024 14:30"]);
    }

    #[test]
    fn test_blank_separator_before_summary() {
        let text = output();
        assert!(text.contains("\r\n\r\n\"Patrimoine total\""));
    }

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(escape_field("SCI \"A\""), "\"SCI \"\"A\"\"\"");
        assert!(output().contains("SCI \"\"Les Tilleuls\"\""));
    }

    #[test]
    fn test_line_breaks_stay_inside_quoted_field() {
        let mut dataset = sample_dataset();
        dataset.assets[0].name = "Appartement\r\nLyon".to_string();
        dataset.assets[1].name = "Livret A\nsecondaire".to_string();
        let bytes = CsvSerializer::default().serialize_at(&dataset, generated_at()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Appartement\r\nLyon\""));

        let rows = parse_csv(text.trim_start_matches('\u{feff}'));
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[1][0], "Appartement\r\nLyon");
        assert_eq!(rows[1].len(), HEADER.len());
        assert_eq!(rows[2][0], "Livret A\nsecondaire");
        assert_eq!(rows[2].len(), HEADER.len());
        assert_eq!(rows[3][0], "Patrimoine total");
    }

    #[test]
    fn test_unvalued_asset() {
        let mut dataset = sample_dataset();
        dataset.assets[1].valuations.clear();
        let bytes = CsvSerializer::default().serialize_at(&dataset, generated_at()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let rows = parse_csv(text.trim_start_matches('\u{feff}'));
        assert_eq!(rows[2][2], "");
        assert_eq!(rows[2][5], "Non valorisé");
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let mut dataset = sample_dataset();
        dataset.assets.clear();
        let err = CsvSerializer::default().serialize(&dataset).unwrap_err();
        assert!(matches!(err, ExportError::Validation(ValidationError::EmptyDataset)));
    }
}
