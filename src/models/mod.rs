//! Report data types
//!
//! `ReportDataset` is what the front-end hands to the CSV and spreadsheet
//! exports; `WorkbookSpec` describes a multi-sheet spreadsheet.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Report dataset
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDataset {
    pub total_value: f64,
    #[serde(default)]
    pub assets_by_type: BTreeMap<String, AssetTypeSummary>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub filters: ReportFilters,
}

/// Aggregated value of one asset type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTypeSummary {
    pub value: f64,
    pub count: u32,
    #[serde(default)]
    pub color: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub asset_type: AssetTypeRef,
    #[serde(default)]
    pub valuations: Vec<Valuation>,
    #[serde(default)]
    pub ownerships: Vec<Ownership>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTypeRef {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuation {
    pub value: f64,
    /// ISO date (`YYYY-MM-DD`) or RFC 3339 timestamp
    pub date: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ownership {
    pub percentage: f64,
    pub owner_entity: Entity,
}

/// Owner of assets (person, company, trust...)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportFilters {
    pub report_type: String,
    pub period: String,
    pub currency: Option<String>,
    pub entity_ids: Vec<String>,
}

/// Parse date string flexibly - handles "YYYY-MM-DD", "YYYY-MM-DD HH:MM:SS" and RFC 3339
pub fn parse_date_flexible(date_str: &str) -> Option<NaiveDateTime> {
    let date_str = date_str.trim();
    DateTime::parse_from_rfc3339(date_str)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(date_str, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Format an amount without a trailing ".00" for whole values
pub fn format_decimal(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

impl Asset {
    /// Most recent valuation; ties go to the later entry, unparsable dates sort first.
    pub fn latest_valuation(&self) -> Option<&Valuation> {
        let mut latest: Option<(Option<NaiveDateTime>, &Valuation)> = None;
        for valuation in &self.valuations {
            let date = parse_date_flexible(&valuation.date);
            match latest {
                Some((best, _)) if date < best => {}
                _ => latest = Some((date, valuation)),
            }
        }
        latest.map(|(_, v)| v)
    }

    /// "Name (50%); Other (50%)"
    pub fn ownership_summary(&self) -> String {
        self.ownerships
            .iter()
            .map(|o| format!("{} ({}%)", o.owner_entity.name, format_decimal(o.percentage)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl ReportDataset {
    pub fn currency_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.filters
            .currency
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(fallback)
    }

    /// Number of distinct asset type codes among the assets
    pub fn distinct_type_count(&self) -> usize {
        self.assets
            .iter()
            .map(|a| a.asset_type.code.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Distance of the populated type percentages from 100.
    ///
    /// Percentages are exported as received; this is only reported in logs.
    pub fn allocation_drift(&self) -> f64 {
        let sum: f64 = self
            .assets_by_type
            .values()
            .filter(|t| t.count > 0 || t.value != 0.0)
            .map(|t| t.percentage)
            .sum();
        if self.assets_by_type.is_empty() {
            0.0
        } else {
            sum - 100.0
        }
    }
}

// ============================================================================
// Workbook description
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Number(n) => format_decimal(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Empty => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            CellValue::Number(_) => false,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<usize> for CellValue {
    fn from(value: usize) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<u32> for CellValue {
    fn from(value: u32) -> Self {
        CellValue::Number(value as f64)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Empty)
    }
}

/// One data row, keyed by column key
pub type Row = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub header: String,
    pub key: String,
    #[serde(default)]
    pub width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl SheetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn column(mut self, header: impl Into<String>, key: impl Into<String>) -> Self {
        self.columns.push(ColumnSpec {
            header: header.into(),
            key: key.into(),
            width: None,
        });
        self
    }

    pub fn row<I, K, V>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CellValue>,
    {
        self.push_row(cells);
        self
    }

    pub fn push_row<I, K, V>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CellValue>,
    {
        self.rows
            .push(cells.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
    }

    /// Cell for `key` in `row`; a missing key is an empty cell.
    pub fn cell<'a>(row: &'a Row, key: &str) -> &'a CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        row.get(key).unwrap_or(EMPTY)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookSpec {
    pub sheets: Vec<SheetSpec>,
}

impl WorkbookSpec {
    /// Standard report workbook: summary, assets, allocation and entities.
    pub fn from_dataset(dataset: &ReportDataset, currency: &str, generated_at: DateTime<Local>) -> Self {
        let currency = dataset.currency_or(currency);

        let summary = SheetSpec::new("Synthèse")
            .column("Indicateur", "label")
            .column("Valeur", "value")
            .row([("label", CellValue::from("Patrimoine total")), ("value", dataset.total_value.into())])
            .row([("label", CellValue::from("Devise")), ("value", currency.into())])
            .row([("label", CellValue::from("Nombre d'actifs")), ("value", dataset.assets.len().into())])
            .row([("label", CellValue::from("Types d'actifs")), ("value", dataset.distinct_type_count().into())])
            .row([("label", CellValue::from("Type de rapport")), ("value", dataset.filters.report_type.as_str().into())])
            .row([("label", CellValue::from("Période")), ("value", dataset.filters.period.as_str().into())])
            .row([
                ("label", CellValue::from("Date de génération")),
                ("value", generated_at.format("%d/%m/%Y %H:%M").to_string().into()),
            ]);

        let mut assets = SheetSpec::new("Actifs")
            .column("Nom", "name")
            .column("Type", "type")
            .column("Valeur", "value")
            .column("Devise", "currency")
            .column("Date de valorisation", "date")
            .column("Propriétaires", "owners");
        for asset in &dataset.assets {
            let latest = asset.latest_valuation();
            assets.push_row([
                ("name", CellValue::from(asset.name.as_str())),
                ("type", asset.asset_type.name.as_str().into()),
                ("value", latest.map(|v| v.value).into()),
                ("currency", latest.map(|v| v.currency.as_str()).into()),
                ("date", latest.map(|v| v.date.as_str()).into()),
                ("owners", asset.ownership_summary().into()),
            ]);
        }

        let mut allocation = SheetSpec::new("Répartition")
            .column("Type", "type")
            .column("Valeur", "value")
            .column("Nombre", "count")
            .column("Pourcentage", "percentage");
        for (type_key, summary) in &dataset.assets_by_type {
            allocation.push_row([
                ("type", CellValue::from(type_key.as_str())),
                ("value", summary.value.into()),
                ("count", summary.count.into()),
                ("percentage", summary.percentage.into()),
            ]);
        }

        let mut entities = SheetSpec::new("Entités")
            .column("Nom", "name")
            .column("Type", "type")
            .column("Identifiant", "id");
        for entity in &dataset.entities {
            entities.push_row([
                ("name", entity.name.as_str()),
                ("type", entity.entity_type.as_str()),
                ("id", entity.id.as_str()),
            ]);
        }

        Self {
            sheets: vec![summary, assets, allocation, entities],
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_dataset;
    use super::*;

    #[test]
    fn test_latest_valuation_by_date() {
        let dataset = sample_dataset();
        let latest = dataset.assets[0].latest_valuation().unwrap();
        assert_eq!(latest.value, 100_000.0);
    }

    #[test]
    fn test_latest_valuation_ignores_input_order() {
        let mut asset = sample_dataset().assets[0].clone();
        asset.valuations.reverse();
        assert_eq!(asset.latest_valuation().unwrap().date, "2024-06-30");
        asset.valuations.clear();
        assert!(asset.latest_valuation().is_none());
    }

    #[test]
    fn test_ownership_summary() {
        let dataset = sample_dataset();
        assert_eq!(
            dataset.assets[0].ownership_summary(),
            "Alice Martin (50%); SCI \"Les Tilleuls\" (50%)"
        );
    }

    #[test]
    fn test_parse_date_flexible() {
        assert!(parse_date_flexible("2024-01-31").is_some());
        assert!(parse_date_flexible("2024-01-31 12:30:00").is_some());
        assert!(parse_date_flexible("2024-01-31T12:30:00.123").is_some());
        assert!(parse_date_flexible("2024-01-31T12:30:00+02:00").is_some());
        assert!(parse_date_flexible("31/01/2024").is_none());
    }

    #[test]
    fn test_allocation_drift() {
        let mut dataset = sample_dataset();
        assert!(dataset.allocation_drift().abs() < 1e-9);
        dataset.assets_by_type.get_mut("bank_account").unwrap().percentage = 19.5;
        assert!((dataset.allocation_drift() + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_dataset_from_front_end_json() {
        let json = r##"{
            "totalValue": 1000,
            "assetsByType": { "stock": { "value": 1000, "count": 1, "color": "#fff", "percentage": 100 } },
            "assets": [{
                "id": "x", "name": "ETF", "assetType": { "code": "stock", "name": "Actions" },
                "valuations": [{ "value": 1000, "date": "2024-01-01", "currency": "EUR" }],
                "ownerships": [{ "percentage": 100, "ownerEntity": { "id": "e", "name": "Bob", "type": "person" } }]
            }],
            "entities": [],
            "filters": { "reportType": "summary", "period": "ytd", "currency": null, "entityIds": [] }
        }"##;
        let dataset: ReportDataset = serde_json::from_str(json).unwrap();
        assert_eq!(dataset.assets[0].ownerships[0].owner_entity.entity_type, "person");
        assert_eq!(dataset.currency_or("EUR"), "EUR");
    }

    #[test]
    fn test_missing_key_is_empty_cell() {
        let sheet = SheetSpec::new("S").column("A", "a").row([("b", "x")]);
        assert_eq!(SheetSpec::cell(&sheet.rows[0], "a"), &CellValue::Empty);
    }

    #[test]
    fn test_workbook_from_dataset() {
        let dataset = sample_dataset();
        let spec = WorkbookSpec::from_dataset(&dataset, "EUR", Local::now());
        let names: Vec<_> = spec.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Synthèse", "Actifs", "Répartition", "Entités"]);
        assert_eq!(spec.sheets[1].rows.len(), 2);
        assert_eq!(
            SheetSpec::cell(&spec.sheets[1].rows[0], "value"),
            &CellValue::Number(100_000.0)
        );
        assert_eq!(spec.sheets[2].rows.len(), 2);
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(125000.0), "125000");
        assert_eq!(format_decimal(12.5), "12.50");
    }
}
