use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ValuationError, ValuationResult},
    ports::FeatureVector,
    property::{Property, PropertyType},
};

/// Dataset column names for each model input. Defaults match the listing export format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    /// Assessed value column.
    pub assessed_value: String,
    /// Floor area column; values may carry a unit suffix such as `m2`.
    pub area: String,
    /// Months-on-market column.
    pub months_on_market: String,
    /// Room count column.
    pub rooms: String,
    /// Floor count column.
    pub floors: String,
    /// Categorical property-type column.
    pub property_type: String,
    /// Sale price target column.
    pub sale_amount: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            assessed_value: "Assessed Value".into(),
            area: "area_m2".into(),
            months_on_market: "meses_en_venta".into(),
            rooms: "nro_habitaciones".into(),
            floors: "nro_pisos".into(),
            property_type: "Property Type".into(),
            sale_amount: "Sale Amount".into(),
        }
    }
}

impl ColumnMapping {
    /// One-hot column name for a type tag, e.g. `Property Type_Residential`.
    #[must_use]
    pub fn indicator(&self, kind: PropertyType) -> String {
        format!("{}_{}", self.property_type, kind.label())
    }
}

/// Raw tabular data: a header plus rows of optional text cells.
///
/// Every row is as wide as the header, including after deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Deserialize)]
struct RawDataset {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = ValuationError;

    fn try_from(raw: RawDataset) -> ValuationResult<Self> {
        Self::new(raw.columns, raw.rows)
    }
}

/// Summary statistics of one numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    /// Parsed values.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Minimum.
    pub min: f64,
    /// Maximum.
    pub max: f64,
}

/// Shape and quality overview of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    /// Row count.
    pub rows: usize,
    /// Column count.
    pub columns: usize,
    /// Missing cells across the whole table.
    pub null_cells: usize,
    /// Summaries for columns where every present cell parses as a number.
    pub numeric: IndexMap<String, ColumnSummary>,
}

impl Dataset {
    /// Builds a dataset, rejecting rows whose width differs from the header.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> ValuationResult<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(ValuationError::DataAccess(format!(
                "row {} has {} cells, expected {}",
                idx + 1,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Convenience constructor from string literals; empty strings become missing cells.
    pub fn from_records(columns: &[&str], records: &[Vec<&str>]) -> ValuationResult<Self> {
        let rows = records
            .iter()
            .map(|record| record.iter().map(|cell| normalize_cell(cell)).collect())
            .collect();
        Self::new(columns.iter().map(ToString::to_string).collect(), rows)
    }

    /// Header names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column count.
    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// First candidate present in the header.
    #[must_use]
    pub fn find_column<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates
            .iter()
            .copied()
            .find(|candidate| self.column_index(candidate).is_some())
    }

    /// Cell text, `None` when missing.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    /// Parsed values of a column; unparsable or missing cells are `None`.
    #[must_use]
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row[idx].as_deref().and_then(parse_number))
                .collect(),
        )
    }

    /// Copy without rows that have any missing cell.
    #[must_use]
    pub fn drop_incomplete(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row.iter().all(Option::is_some))
                .cloned()
                .collect(),
        }
    }

    /// One indicator column per distinct value of `column`, named `{column}_{value}`, sorted by value.
    #[must_use]
    pub fn one_hot(&self, column: &str) -> IndexMap<String, Vec<f64>> {
        let Some(idx) = self.column_index(column) else {
            return IndexMap::new();
        };
        let mut values: Vec<&str> = self.rows.iter().filter_map(|row| row[idx].as_deref()).collect();
        values.sort_unstable();
        values.dedup();
        values
            .into_iter()
            .map(|value| {
                let encoded: Vec<f64> = self
                    .rows
                    .iter()
                    .map(|row| if row[idx].as_deref() == Some(value) { 1.0 } else { 0.0 })
                    .collect();
                (format!("{column}_{value}"), encoded)
            })
            .collect()
    }

    /// Shape, null count, and numeric column statistics.
    #[must_use]
    pub fn profile(&self) -> DatasetProfile {
        let null_cells = self
            .rows
            .iter()
            .map(|row| row.iter().filter(|cell| cell.is_none()).count())
            .sum();
        let numeric = self
            .columns
            .iter()
            .filter_map(|name| {
                let values = self.numeric_column(name)?;
                let idx = self.column_index(name)?;
                let present = self.rows.iter().filter(|row| row[idx].is_some()).count();
                let parsed: Vec<f64> = values.into_iter().flatten().collect();
                if parsed.is_empty() || parsed.len() != present {
                    return None;
                }
                Some((name.clone(), summarize(&parsed)))
            })
            .collect();
        DatasetProfile {
            rows: self.len(),
            columns: self.n_columns(),
            null_cells,
            numeric,
        }
    }

    /// Drops incomplete rows, cleans the area field, one-hot encodes the type column,
    /// and returns features in model order plus the sale-price target.
    pub fn preprocess(
        &self,
        mapping: &ColumnMapping,
    ) -> ValuationResult<(Vec<FeatureVector>, Vec<f64>)> {
        let required = [
            &mapping.assessed_value,
            &mapping.area,
            &mapping.months_on_market,
            &mapping.rooms,
            &mapping.floors,
            &mapping.sale_amount,
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|name| self.column_index(name).is_none())
            .map(|name| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ValuationError::DataAccess(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }

        let clean = self.drop_incomplete();
        let mut encoded = clean.one_hot(&mapping.property_type);
        for kind in [PropertyType::Residential, PropertyType::SingleFamily] {
            encoded
                .entry(mapping.indicator(kind))
                .or_insert_with(|| vec![0.0; clean.len()]);
        }
        let residential = &encoded[&mapping.indicator(PropertyType::Residential)];
        let single_family = &encoded[&mapping.indicator(PropertyType::SingleFamily)];

        let numeric = |name: &String, row: usize| -> ValuationResult<f64> {
            let idx = clean.column_index(name).unwrap_or_default();
            let raw = clean.cell(row, idx).unwrap_or_default();
            let parsed = if name == &mapping.area {
                parse_area(raw)
            } else {
                parse_number(raw)
            };
            parsed.ok_or_else(|| {
                ValuationError::DataAccess(format!(
                    "column '{name}' row {}: '{raw}' is not numeric",
                    row + 1
                ))
            })
        };

        let mut features = Vec::with_capacity(clean.len());
        let mut target = Vec::with_capacity(clean.len());
        for row in 0..clean.len() {
            features.push([
                numeric(&mapping.assessed_value, row)?,
                numeric(&mapping.area, row)?,
                numeric(&mapping.months_on_market, row)?,
                numeric(&mapping.rooms, row)?,
                numeric(&mapping.floors, row)?,
                residential[row],
                single_family[row],
            ]);
            target.push(numeric(&mapping.sale_amount, row)?);
        }
        Ok((features, target))
    }

    /// Training records hydrated as domain entities.
    pub fn to_properties(&self, mapping: &ColumnMapping) -> ValuationResult<Vec<Property>> {
        let (features, target) = self.preprocess(mapping)?;
        Ok(features
            .iter()
            .zip(target)
            .map(|(row, sale)| Property::from_features(row, Some(sale)))
            .collect())
    }
}

/// Trims a raw cell; blank and `NA`-style markers become missing.
#[must_use]
pub fn normalize_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    match trimmed {
        "" | "NA" | "NaN" | "nan" | "null" | "NULL" => None,
        value => Some(value.to_string()),
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Parses an area value, stripping unit suffixes (`150m2`, `150 m²`, `98.5 sqm`).
#[must_use]
pub fn parse_area(raw: &str) -> Option<f64> {
    let lowered = raw.trim().to_lowercase();
    let mut value = lowered.as_str();
    for suffix in ["m²", "m2", "sqm"] {
        if let Some(stripped) = value.strip_suffix(suffix) {
            value = stripped;
            break;
        }
    }
    let numeric = value.trim_end_matches(|c: char| !(c.is_ascii_digit() || c == '.'));
    parse_number(numeric)
}

#[allow(clippy::cast_precision_loss)]
fn summarize(values: &[f64]) -> ColumnSummary {
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    ColumnSummary {
        count,
        mean,
        std: variance.sqrt(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [&str; 7] = [
        "Assessed Value",
        "area_m2",
        "meses_en_venta",
        "nro_habitaciones",
        "nro_pisos",
        "Property Type",
        "Sale Amount",
    ];

    fn sample() -> Dataset {
        Dataset::from_records(
            &HEADER,
            &[
                vec!["300000", "150m2", "6", "3", "2", "Single Family", "320000"],
                vec!["200000", "90 m2", "2", "2", "1", "Condo", "210000"],
                vec!["", "80m2", "1", "2", "1", "Residential", "150000"],
                vec!["250000", "120m2", "4", "3", "2", "Residential", "260000"],
            ],
        )
        .unwrap()
    }

    #[test]
    fn preprocess_drops_incomplete_rows_and_encodes_types() {
        let (features, target) = sample().preprocess(&ColumnMapping::default()).unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(target, vec![320_000.0, 210_000.0, 260_000.0]);
        assert_eq!(features[0], [300_000.0, 150.0, 6.0, 3.0, 2.0, 0.0, 1.0]);
        assert_eq!(features[1][5..], [0.0, 0.0]);
        assert_eq!(features[2][5..], [1.0, 0.0]);
    }

    #[test]
    fn missing_indicator_columns_are_synthesized() {
        let dataset = Dataset::from_records(
            &HEADER,
            &[vec!["100000", "70m2", "1", "2", "1", "Condo", "110000"]],
        )
        .unwrap();
        let (features, _) = dataset.preprocess(&ColumnMapping::default()).unwrap();
        assert_eq!(features[0][5..], [0.0, 0.0]);
    }

    #[test]
    fn missing_required_column_is_reported() {
        let dataset = Dataset::from_records(&["Assessed Value", "area_m2"], &[vec!["1", "2"]]).unwrap();
        let err = dataset.preprocess(&ColumnMapping::default()).unwrap_err();
        assert!(err.to_string().contains("Sale Amount"), "{err}");
    }

    #[test]
    fn non_numeric_cell_fails_with_location() {
        let dataset = Dataset::from_records(
            &HEADER,
            &[vec!["abc", "70m2", "1", "2", "1", "Condo", "110000"]],
        )
        .unwrap();
        let err = dataset.preprocess(&ColumnMapping::default()).unwrap_err();
        assert!(err.to_string().contains("row 1"), "{err}");
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Dataset::from_records(&["a", "b"], &[vec!["1"]]).unwrap_err();
        assert!(matches!(err, ValuationError::DataAccess(_)));
    }

    #[test]
    fn deserialized_datasets_keep_the_width_check() {
        let err = serde_json::from_str::<Dataset>(r#"{"columns":["a","b"],"rows":[["1"]]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("row 1 has 1 cells"), "{err}");

        let dataset = sample();
        let restored: Dataset =
            serde_json::from_str(&serde_json::to_string(&dataset).unwrap()).unwrap();
        assert_eq!(restored.profile(), dataset.profile());
    }

    #[test]
    fn area_suffixes_are_stripped() {
        assert_eq!(parse_area("150m2"), Some(150.0));
        assert_eq!(parse_area(" 98.5 sqm"), Some(98.5));
        assert_eq!(parse_area("75 m²"), Some(75.0));
        assert_eq!(parse_area("m2"), None);
    }

    #[test]
    fn one_hot_sorts_distinct_values() {
        let encoded = sample().one_hot("Property Type");
        let names: Vec<_> = encoded.keys().cloned().collect();
        assert_eq!(
            names,
            [
                "Property Type_Condo",
                "Property Type_Residential",
                "Property Type_Single Family"
            ]
        );
        assert_eq!(encoded["Property Type_Residential"], vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn profile_counts_nulls_and_numeric_columns() {
        let profile = sample().profile();
        assert_eq!((profile.rows, profile.columns, profile.null_cells), (4, 7, 1));
        assert!(profile.numeric.contains_key("Sale Amount"));
        assert!(!profile.numeric.contains_key("area_m2"));
        let sale = profile.numeric["Sale Amount"];
        assert_eq!(sale.count, 4);
        assert_eq!(sale.max, 320_000.0);
    }

    #[test]
    fn properties_carry_sale_amounts() {
        let properties = sample().to_properties(&ColumnMapping::default()).unwrap();
        assert_eq!(properties[0].sale_amount, Some(320_000.0));
        assert_eq!(properties[0].is_single_family, 1.0);
    }
}
