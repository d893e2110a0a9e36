use crate::error::{AppError, Result};
use crate::models::{Gender, Geography, RawRecord};
use std::collections::HashMap;
use std::fmt;

/// Columns every batch upload must carry, with no missing values
pub const CRITICAL_COLUMNS: [&str; 11] = [
    "id",
    "CreditScore",
    "Age",
    "Tenure",
    "Balance",
    "NumOfProducts",
    "HasCrCard",
    "IsActiveMember",
    "EstimatedSalary",
    "Geography",
    "Gender",
];

/// Raw model inputs (the critical set without the request id)
pub const FEATURE_COLUMNS: [&str; 10] = [
    "CreditScore",
    "Age",
    "Tenure",
    "Balance",
    "NumOfProducts",
    "HasCrCard",
    "IsActiveMember",
    "EstimatedSalary",
    "Geography",
    "Gender",
];

/// Cell values treated as missing
pub const MISSING_MARKERS: [&str; 3] = ["", "NA", "N/A"];

/// Why a batch was rejected before scoring
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchRejection {
    pub missing_columns: Vec<String>,
    pub null_columns: Vec<String>,
    pub invalid_columns: Vec<String>,
    pub empty: bool,
    pub too_many_rows: Option<usize>,
}

impl BatchRejection {
    pub fn is_empty(&self) -> bool {
        self.missing_columns.is_empty()
            && self.null_columns.is_empty()
            && self.invalid_columns.is_empty()
            && !self.empty
            && self.too_many_rows.is_none()
    }

    /// Metric label for the dominant rejection cause
    pub fn reason(&self) -> &'static str {
        if !self.missing_columns.is_empty() {
            "missing_columns"
        } else if !self.null_columns.is_empty() {
            "null_values"
        } else if !self.invalid_columns.is_empty() {
            "invalid_values"
        } else if self.empty {
            "empty"
        } else {
            "too_many_rows"
        }
    }
}

impl fmt::Display for BatchRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing_columns.is_empty() {
            parts.push(format!(
                "missing required columns: {}",
                self.missing_columns.join(", ")
            ));
        }
        if !self.null_columns.is_empty() {
            parts.push(format!(
                "missing values in columns: {}",
                self.null_columns.join(", ")
            ));
        }
        if !self.invalid_columns.is_empty() {
            parts.push(format!(
                "unparseable values in columns: {}",
                self.invalid_columns.join(", ")
            ));
        }
        if self.empty {
            parts.push("the file contains no data rows".to_string());
        }
        if let Some(limit) = self.too_many_rows {
            parts.push(format!("the file exceeds the {} row limit", limit));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// CSV contents as header names and string cells
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<Vec<Vec<String>>, csv::Error>>()?;

        Ok(Self { headers, rows })
    }

    fn index(&self) -> HashMap<&str, usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell)
}

/// Decoded rows plus the requested label column, if any
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    pub records: Vec<RawRecord>,
    pub labels: Option<Vec<f64>>,
}

/// Column layout and limits for decoding a CSV into [`RawRecord`]s
#[derive(Debug, Clone)]
pub struct BatchReader {
    required: Vec<String>,
    label: Option<String>,
    max_rows: Option<usize>,
}

impl BatchReader {
    /// Reader for scoring uploads: all critical columns are mandatory
    pub fn scoring(max_rows: usize) -> Self {
        Self {
            required: CRITICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            label: None,
            max_rows: Some(max_rows),
        }
    }

    /// Reader for training data: raw features plus a 0/1 label column;
    /// `id` is optional and defaults to the 1-based row number
    pub fn labelled(label: &str) -> Self {
        let mut required: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
        required.push(label.to_string());
        Self {
            required,
            label: Some(label.to_string()),
            max_rows: None,
        }
    }

    /// Reader for unlabelled hold-out data with an `id` column
    pub fn unlabelled() -> Self {
        Self {
            required: CRITICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            label: None,
            max_rows: None,
        }
    }

    pub fn read(&self, bytes: &[u8]) -> Result<DecodedBatch> {
        let table = CsvTable::parse(bytes)?;
        self.decode(&table)
    }

    /// Validate the whole table, then decode it. Any problem rejects the
    /// batch as a whole before a single row is returned.
    pub fn decode(&self, table: &CsvTable) -> Result<DecodedBatch> {
        let index = table.index();
        let mut rejection = BatchRejection {
            missing_columns: self
                .required
                .iter()
                .filter(|c| !index.contains_key(c.as_str()))
                .cloned()
                .collect(),
            ..Default::default()
        };
        if !rejection.missing_columns.is_empty() {
            return Err(reject(rejection));
        }

        if table.is_empty() {
            rejection.empty = true;
            return Err(reject(rejection));
        }
        if let Some(limit) = self.max_rows {
            if table.len() > limit {
                rejection.too_many_rows = Some(limit);
                return Err(reject(rejection));
            }
        }

        rejection.null_columns = self
            .required
            .iter()
            .filter(|c| {
                let col = index[c.as_str()];
                table
                    .rows
                    .iter()
                    .any(|row| row.get(col).map_or(true, |cell| is_missing(cell)))
            })
            .cloned()
            .collect();
        if !rejection.null_columns.is_empty() {
            return Err(reject(rejection));
        }

        let mut invalid: Vec<String> = Vec::new();
        let mut mark_invalid = |column: &str| {
            if !invalid.iter().any(|c| c == column) {
                invalid.push(column.to_string());
            }
        };

        let cell = |row: &Vec<String>, column: &str| -> Option<String> {
            index
                .get(column)
                .and_then(|&i| row.get(i))
                .filter(|c| !is_missing(c))
                .cloned()
        };

        let mut records = Vec::with_capacity(table.len());
        let mut labels = self.label.as_ref().map(|_| Vec::with_capacity(table.len()));

        for (i, row) in table.rows.iter().enumerate() {
            let row_number = i as i64 + 1;
            let mut number = |column: &str| -> f64 {
                match cell(row, column).and_then(|c| c.parse::<f64>().ok()) {
                    Some(v) if v.is_finite() => v,
                    _ => {
                        mark_invalid(column);
                        0.0
                    }
                }
            };

            let credit_score = number("CreditScore");
            let age = number("Age");
            let tenure = number("Tenure");
            let balance = number("Balance");
            let num_of_products = number("NumOfProducts");
            let has_cr_card = number("HasCrCard");
            let is_active_member = number("IsActiveMember");
            let estimated_salary = number("EstimatedSalary");

            let id = match cell(row, "id") {
                Some(raw) => parse_integer(&raw).unwrap_or_else(|| {
                    mark_invalid("id");
                    0
                }),
                None => row_number,
            };

            let geography = cell(row, "Geography")
                .and_then(|raw| Geography::parse_field(&raw))
                .unwrap_or_else(|| {
                    mark_invalid("Geography");
                    Geography::France
                });
            let gender = cell(row, "Gender")
                .and_then(|raw| Gender::parse_field(&raw))
                .unwrap_or_else(|| {
                    mark_invalid("Gender");
                    Gender::Male
                });

            if let (Some(label_column), Some(labels)) = (&self.label, labels.as_mut()) {
                match cell(row, label_column).and_then(|raw| parse_integer(&raw)) {
                    Some(y @ (0 | 1)) => labels.push(y as f64),
                    _ => {
                        mark_invalid(label_column);
                        labels.push(0.0);
                    }
                }
            }

            records.push(RawRecord {
                id,
                customer_id: cell(row, "CustomerId")
                    .and_then(|raw| parse_integer(&raw))
                    .unwrap_or(row_number),
                surname: cell(row, "Surname").unwrap_or_default(),
                row_number: cell(row, "RowNumber")
                    .and_then(|raw| parse_integer(&raw))
                    .unwrap_or(row_number),
                credit_score,
                age,
                tenure,
                balance,
                num_of_products,
                has_cr_card,
                is_active_member,
                estimated_salary,
                geography,
                gender,
            });
        }

        if !invalid.is_empty() {
            rejection.invalid_columns = invalid;
            return Err(reject(rejection));
        }

        Ok(DecodedBatch { records, labels })
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let v: f64 = raw.parse().ok()?;
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

fn reject(rejection: BatchRejection) -> AppError {
    crate::metrics::BATCH_REJECTIONS_TOTAL
        .with_label_values(&[rejection.reason()])
        .inc();
    tracing::warn!(reason = rejection.reason(), detail = %rejection, "Batch rejected");
    AppError::BatchRejected(rejection.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "id,CreditScore,Geography,Gender,Age,Tenure,Balance,NumOfProducts,HasCrCard,IsActiveMember,EstimatedSalary";

    fn csv(rows: &[&str]) -> Vec<u8> {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text.into_bytes()
    }

    #[test]
    fn test_decodes_valid_batch_and_fills_auxiliary_columns() {
        let bytes = csv(&[
            "15,600,2,1,45,3,1000.5,2,1,0,50000",
            "16,700,France,Male,30,1,0,1,0,1,80000",
        ]);
        let batch = BatchReader::scoring(100).read(&bytes).unwrap();

        assert_eq!(batch.records.len(), 2);
        let first = &batch.records[0];
        assert_eq!(first.id, 15);
        assert_eq!(first.geography, Geography::Germany);
        assert_eq!(first.gender, Gender::Female);
        assert_eq!(first.customer_id, 1);
        assert_eq!(first.row_number, 1);
        assert_eq!(first.surname, "");
        assert_eq!(batch.records[1].row_number, 2);
        assert_eq!(batch.records[1].geography, Geography::France);
        assert!(batch.labels.is_none());
    }

    #[test]
    fn test_missing_columns_are_enumerated() {
        let bytes = b"id,CreditScore,Age\n1,600,40\n".to_vec();
        let err = BatchReader::scoring(100).read(&bytes).unwrap_err();
        let message = err.to_string();

        assert_eq!(err.error_code(), "BATCH_REJECTED");
        for column in ["Tenure", "Balance", "Geography", "Gender", "EstimatedSalary"] {
            assert!(message.contains(column), "{} not listed in {}", column, message);
        }
        assert!(!message.contains("CreditScore,"));
    }

    #[test]
    fn test_null_markers_reject_whole_batch() {
        for marker in ["", "NA", "N/A"] {
            let bad_row = format!("2,650,0,0,{},5,0,1,1,1,100000", marker);
            let bytes = csv(&["1,650,0,0,40,5,0,1,1,1,100000", &bad_row]);
            let err = BatchReader::scoring(100).read(&bytes).unwrap_err();
            assert!(err.to_string().contains("missing values in columns: Age"));
        }
    }

    #[test]
    fn test_invalid_codes_and_numbers_reject() {
        let bytes = csv(&["1,abc,7,0,40,5,0,1,1,1,100000"]);
        let err = BatchReader::scoring(100).read(&bytes).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("CreditScore"));
        assert!(message.contains("Geography"));
    }

    #[test]
    fn test_empty_and_oversized_batches() {
        let err = BatchReader::scoring(100).read(&csv(&[])).unwrap_err();
        assert!(err.to_string().contains("no data rows"));

        let bytes = csv(&[
            "1,650,0,0,40,5,0,1,1,1,100000",
            "2,650,0,0,40,5,0,1,1,1,100000",
        ]);
        let err = BatchReader::scoring(1).read(&bytes).unwrap_err();
        assert!(err.to_string().contains("row limit"));
    }

    #[test]
    fn test_labelled_reader() {
        let bytes = b"CustomerId,Surname,CreditScore,Geography,Gender,Age,Tenure,Balance,NumOfProducts,HasCrCard,IsActiveMember,EstimatedSalary,Exited\n\
15634602,Hargrave,619,France,Female,42,2,0,1,1,1,101348.88,1\n\
15647311,Hill,608,Spain,Female,41,1,83807.86,1,0,1,112542.58,0\n"
            .to_vec();
        let batch = BatchReader::labelled("Exited").read(&bytes).unwrap();

        assert_eq!(batch.labels, Some(vec![1.0, 0.0]));
        assert_eq!(batch.records[0].id, 1);
        assert_eq!(batch.records[0].customer_id, 15634602);
        assert_eq!(batch.records[1].surname, "Hill");

        let bad = String::from_utf8(bytes).unwrap().replace(",1\n", ",2\n");
        assert!(BatchReader::labelled("Exited").read(bad.as_bytes()).is_err());
    }

    #[test]
    fn test_rejection_reason() {
        let rejection = BatchRejection {
            null_columns: vec!["Age".to_string()],
            ..Default::default()
        };
        assert_eq!(rejection.reason(), "null_values");
        assert!(!rejection.is_empty());
        assert!(BatchRejection::default().is_empty());
    }
}
