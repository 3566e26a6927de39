use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use tracing::{debug, info};

use crate::error::{Result, ServiceError};
use crate::models::{CustomerRecord, FeatureColumn, FeatureTable};

pub const PUBLIC_ID_COLUMN: &str = "public_id";

/// The customer CSV, kept as raw text and typed on the way out.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: Vec<String>,
    records: Vec<csv::StringRecord>,
}

impl Dataset {
    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = csv::Reader::from_path(path)?;
        let dataset = Self::from_csv(reader)?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            columns = dataset.headers.len(),
            "loaded customer dataset"
        );
        Ok(dataset)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        Self::from_csv(csv::Reader::from_reader(reader))
    }

    fn from_csv<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        let records = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { headers, records })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All rows as JSON objects, columns in file order.
    pub fn rows(&self) -> Vec<Map<String, Value>> {
        self.records.iter().map(|record| self.to_row(record)).collect()
    }

    /// First row whose `public_id` equals `public_id` exactly.
    pub fn find(&self, public_id: &str) -> Result<Option<Map<String, Value>>> {
        Ok(self
            .find_record(public_id)?
            .map(|(_, record)| self.to_row(record)))
    }

    /// The matching row plus its features, ready for the classifier.
    pub fn find_with_features(
        &self,
        public_id: &str,
    ) -> Result<Option<(Map<String, Value>, CustomerRecord)>> {
        let Some((index, record)) = self.find_record(public_id)? else {
            return Ok(None);
        };
        let columns = self.feature_indices()?;
        let features = parse_features(index, record, &columns)?.normalized();
        Ok(Some((self.to_row(record), features)))
    }

    /// Every row projected onto the feature columns and normalized.
    pub fn feature_table(&self) -> Result<FeatureTable> {
        let columns = self.feature_indices()?;
        let rows = self
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| parse_features(index, record, &columns))
            .collect::<Result<Vec<_>>>()?;

        debug!(rows = rows.len(), "built feature table");
        Ok(FeatureTable::new(rows).normalized())
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| ServiceError::MissingColumn(name.to_string()))
    }

    fn feature_indices(&self) -> Result<[usize; 8]> {
        let mut indices = [0; 8];
        for (slot, column) in indices.iter_mut().zip(FeatureColumn::ALL) {
            *slot = self.column_index(column.name())?;
        }
        Ok(indices)
    }

    fn find_record(&self, public_id: &str) -> Result<Option<(usize, &csv::StringRecord)>> {
        let id_column = self.column_index(PUBLIC_ID_COLUMN)?;
        Ok(self
            .records
            .iter()
            .enumerate()
            .find(|(_, record)| record.get(id_column) == Some(public_id)))
    }

    fn to_row(&self, record: &csv::StringRecord) -> Map<String, Value> {
        self.headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.clone(), infer_cell(cell)))
            .collect()
    }
}

/// Type a raw cell: empty is null, then bool, integer, float, else string.
fn infer_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }

    match trimmed {
        "True" | "true" => return Value::Bool(true),
        "False" | "false" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(integer) = trimmed.parse::<i64>() {
        return Value::Number(integer.into());
    }

    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }

    Value::String(raw.to_string())
}

fn parse_features(
    index: usize,
    record: &csv::StringRecord,
    columns: &[usize; 8],
) -> Result<CustomerRecord> {
    let cell = |column: FeatureColumn| record.get(columns[column as usize]).unwrap_or_default();
    let row = index + 1;

    Ok(CustomerRecord {
        age: parse_integer(row, FeatureColumn::Age, cell(FeatureColumn::Age))?,
        gender: cell(FeatureColumn::Gender).to_string(),
        subscription_type: cell(FeatureColumn::SubscriptionType).to_string(),
        watch_hours: parse_float(row, FeatureColumn::WatchHours, cell(FeatureColumn::WatchHours))?,
        region: cell(FeatureColumn::Region).to_string(),
        number_of_profiles: parse_integer(
            row,
            FeatureColumn::NumberOfProfiles,
            cell(FeatureColumn::NumberOfProfiles),
        )?,
        payment_method: cell(FeatureColumn::PaymentMethod).to_string(),
        device: cell(FeatureColumn::Device).to_string(),
    })
}

fn invalid(row: usize, column: FeatureColumn, reason: String) -> ServiceError {
    ServiceError::InvalidField {
        row,
        column: column.name().to_string(),
        reason,
    }
}

/// Accepts `30` and `30.0`; rejects `30.5`.
fn parse_integer(row: usize, column: FeatureColumn, raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }

    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 => Ok(value as i64),
        _ => Err(invalid(row, column, format!("expected an integer, got '{raw}'"))),
    }
}

fn parse_float(row: usize, column: FeatureColumn, raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(invalid(row, column, format!("expected a number, got '{raw}'"))),
    }
}

/// Where handlers get the dataset from.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// Loaded once at startup.
    Cached(Arc<Dataset>),
    /// Re-read from disk on every request.
    Reload(PathBuf),
}

impl DatasetSource {
    /// Reads the file once either way so a bad path fails at startup.
    pub fn open(path: PathBuf, reload: bool) -> Result<Self> {
        let dataset = Dataset::from_path(&path)?;
        if reload {
            Ok(DatasetSource::Reload(path))
        } else {
            Ok(DatasetSource::Cached(Arc::new(dataset)))
        }
    }

    pub async fn load(&self) -> Result<Arc<Dataset>> {
        match self {
            DatasetSource::Cached(dataset) => Ok(Arc::clone(dataset)),
            DatasetSource::Reload(path) => {
                let path = path.clone();
                let dataset = tokio::task::spawn_blocking(move || Dataset::from_path(&path))
                    .await
                    .map_err(|err| ServiceError::Io(io::Error::other(err)))??;
                Ok(Arc::new(dataset))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub const CUSTOMERS_CSV: &str = "\
public_id,age,gender,subscription_type,watch_hours,last_login_days,region,device,monthly_fee,churned,payment_method,number_of_profiles,avg_watch_time_per_day,favorite_genre
a1,30,Male,Basic,20.0,5,Europe,TV,8.99,0,Credit Card,1,0.66,Drama
b2,45,Female,Premium,40.5,12,Asia,Mobile,17.99,1,PayPal,3,1.35,Action
c3,30, male ,basic,60,40,europe,Laptop,8.99,1,Crypto,2,2.0,Comedy
";

    pub fn customers() -> Dataset {
        Dataset::from_reader(CUSTOMERS_CSV.as_bytes()).expect("fixture csv")
    }
}
