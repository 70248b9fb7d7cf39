use std::{fs::File, path::Path};

use anyhow::{bail, Context};
use csv::ReaderBuilder;

use crate::{
    config::ValuationConfig,
    dataset::{normalize_cell, ColumnMapping, Dataset},
    error::{ValuationError, ValuationResult},
    ports::{DataRepository, FeatureVector},
};

/// Reads listings from delimited text with a header row. Semicolon-separated by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDataRepository {
    delimiter: u8,
    columns: ColumnMapping,
}

impl Default for CsvDataRepository {
    fn default() -> Self {
        Self::new(b';', ColumnMapping::default())
    }
}

impl CsvDataRepository {
    /// Loader with an explicit delimiter and column mapping.
    #[must_use]
    pub const fn new(delimiter: u8, columns: ColumnMapping) -> Self {
        Self { delimiter, columns }
    }

    /// Semicolon loader with the `[columns]` mapping of `config`.
    #[must_use]
    pub fn from_config(config: &ValuationConfig) -> Self {
        Self::new(b';', config.columns.clone())
    }

    /// Same mapping, different delimiter.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Column names used by preprocessing.
    #[must_use]
    pub const fn columns(&self) -> &ColumnMapping {
        &self.columns
    }

    fn read_table(&self, path: &Path) -> anyhow::Result<Dataset> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .from_reader(file);
        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("reading header of {}", path.display()))?
            .iter()
            .map(|name| name.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        if columns.iter().all(String::is_empty) {
            bail!("{} has no header row", path.display());
        }
        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record =
                record.with_context(|| format!("parsing record {} of {}", line + 1, path.display()))?;
            rows.push(record.iter().map(normalize_cell).collect());
        }
        Ok(Dataset::new(columns, rows)?)
    }
}

impl DataRepository for CsvDataRepository {
    fn load_data(&self, path: &Path) -> ValuationResult<Dataset> {
        let dataset = self
            .read_table(path)
            .map_err(|err| ValuationError::DataAccess(format!("{err:#}")))?;
        tracing::debug!(
            path = %path.display(),
            rows = dataset.len(),
            columns = dataset.n_columns(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    fn preprocess_data(
        &self,
        dataset: &Dataset,
    ) -> ValuationResult<(Vec<FeatureVector>, Vec<f64>)> {
        dataset.preprocess(&self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const LISTINGS: &str = "\u{feff}Assessed Value;area_m2;meses_en_venta;nro_habitaciones;nro_pisos;Property Type;Sale Amount
250000;120m2;3;3;2;Residential;310000
410000;180 m2;7;4;2;Single Family;455000
150000;;2;2;1;Condo;170000
";

    #[test]
    fn loads_semicolon_listings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.csv");
        fs::write(&path, LISTINGS).unwrap();
        let repository = CsvDataRepository::default();
        let dataset = repository.load_data(&path).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.columns()[0], "Assessed Value");
        assert_eq!(dataset.cell(2, 1), None);

        let (features, target) = repository.preprocess_data(&dataset).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[1][1], 180.0);
        assert_eq!(features[1][6], 1.0);
        assert_eq!(target, vec![310_000.0, 455_000.0]);
    }

    #[test]
    fn comma_delimiter_is_configurable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.csv");
        fs::write(&path, "price,area_m2\n1,2\n").unwrap();
        let dataset = CsvDataRepository::default()
            .with_delimiter(b',')
            .load_data(&path)
            .unwrap();
        assert_eq!(dataset.columns(), ["price", "area_m2"]);
    }

    #[test]
    fn ragged_and_missing_files_are_data_access_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "a;b\n1;2;3\n").unwrap();
        let err = CsvDataRepository::default().load_data(&path).unwrap_err();
        assert!(matches!(err, ValuationError::DataAccess(_)), "{err}");

        let err = CsvDataRepository::default()
            .load_data(&dir.path().join("absent.csv"))
            .unwrap_err();
        assert!(err.to_string().contains("absent.csv"), "{err}");
    }

    #[test]
    fn configured_columns_drive_preprocessing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.csv");
        fs::write(
            &path,
            "valor;area;meses;quartos;pisos;tipo;preco\n250000;120;3;3;2;Condo;310000\n",
        )
        .unwrap();
        let config = crate::config::ValuationConfig::from_toml_str(
            r#"
[columns]
assessed_value = "valor"
area = "area"
months_on_market = "meses"
rooms = "quartos"
floors = "pisos"
property_type = "tipo"
sale_amount = "preco"
"#,
        )
        .unwrap();
        let repository = CsvDataRepository::from_config(&config);
        assert_eq!(repository.columns().sale_amount, "preco");
        let dataset = repository.load_data(&path).unwrap();
        let (features, target) = repository.preprocess_data(&dataset).unwrap();
        assert_eq!(features[0][0], 250_000.0);
        assert_eq!(target, vec![310_000.0]);
        assert!(CsvDataRepository::default().preprocess_data(&dataset).is_err());
    }

    #[test]
    fn missing_required_columns_fail_preprocessing() {
        let dataset = Dataset::from_records(&["Assessed Value"], &[vec!["1"]]).unwrap();
        assert!(CsvDataRepository::default().preprocess_data(&dataset).is_err());
    }
}
