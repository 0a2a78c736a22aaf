use parquet::{
    file::{reader::FileReader, serialized_reader::SerializedFileReader},
    record::Field,
};
use std::{fs::File, path::Path};
use tracing::info;

use crate::error::{Error, Result};

pub const TEXT_COLUMN: &str = "text";
pub const TARGET_COLUMN: &str = "target";

/// Ad texts with their "political" labels, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    texts: Vec<String>,
    labels: Vec<bool>,
}

impl Dataset {
    pub fn new(texts: Vec<String>, labels: Vec<bool>) -> Result<Self> {
        if texts.len() != labels.len() {
            return Err(Error::LengthMismatch {
                samples: texts.len(),
                labels: labels.len(),
            });
        }
        Ok(Self { texts, labels })
    }

    /// Loads a `.parquet` file, or any other file as CSV with a header row.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let dataset = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => Self::load_parquet(path)?,
            _ => Self::load_csv(path)?,
        };
        info!(
            path = %path.display(),
            rows = dataset.len(),
            positives = dataset.positives(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let column = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| Error::MissingColumn {
                    path: path.to_path_buf(),
                    column: name,
                })
        };
        let text_idx = column(TEXT_COLUMN)?;
        let target_idx = column(TARGET_COLUMN)?;

        let mut dataset = Self::default();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let value = record.get(target_idx).unwrap_or_default();
            dataset.labels.push(parse_label(value, row)?);
            dataset
                .texts
                .push(record.get(text_idx).unwrap_or_default().to_owned());
        }
        Ok(dataset)
    }

    pub fn load_parquet(path: &Path) -> Result<Self> {
        let reader = SerializedFileReader::new(File::open(path)?)?;

        let schema = reader.metadata().file_metadata().schema_descr();
        for column in [TEXT_COLUMN, TARGET_COLUMN] {
            if !schema.columns().iter().any(|c| c.name() == column) {
                return Err(Error::MissingColumn {
                    path: path.to_path_buf(),
                    column,
                });
            }
        }

        let mut dataset = Self::default();
        for (row_idx, row) in reader.get_row_iter(None)?.enumerate() {
            let row = row?;
            let mut text = String::new();
            let mut label = None;
            for (name, field) in row.get_column_iter() {
                match name.as_str() {
                    TEXT_COLUMN => {
                        if let Field::Str(s) = field {
                            text = s.clone();
                        }
                    }
                    TARGET_COLUMN => label = Some(field_label(field, row_idx)?),
                    _ => {}
                }
            }
            dataset.texts.push(text);
            dataset.labels.push(label.ok_or(Error::InvalidLabel {
                row: row_idx,
                value: String::new(),
            })?);
        }
        Ok(dataset)
    }

    #[inline]
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    #[inline]
    pub fn labels(&self) -> &[bool] {
        &self.labels
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Number of documents labelled political.
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }
}

/// Accepts `1`/`0`, `1.0`/`0.0` and any casing of `true`/`false`.
pub fn parse_label(value: &str, row: usize) -> Result<bool> {
    let trimmed = value.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Ok(true),
        "0" | "0.0" | "false" => Ok(false),
        _ => Err(Error::InvalidLabel {
            row,
            value: trimmed.to_owned(),
        }),
    }
}

fn field_label(field: &Field, row: usize) -> Result<bool> {
    match field {
        Field::Bool(b) => Ok(*b),
        Field::Byte(v) => parse_label(&v.to_string(), row),
        Field::Short(v) => parse_label(&v.to_string(), row),
        Field::Int(v) => parse_label(&v.to_string(), row),
        Field::Long(v) => parse_label(&v.to_string(), row),
        Field::Double(v) => parse_label(&v.to_string(), row),
        Field::Str(s) => parse_label(s, row),
        other => Err(Error::InvalidLabel {
            row,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_csv_by_header_name() {
        let file = write_csv(
            "id,target,text\n\
             1,True,\"Vote for change, today!\"\n\
             2,False,Buy our amazing shoes\n\
             3,1,\"multi\nline\"\n",
        );
        let dataset = Dataset::load(file.path()).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.labels(), &[true, false, true]);
        assert_eq!(dataset.texts()[0], "Vote for change, today!");
        assert_eq!(dataset.texts()[2], "multi\nline");
        assert_eq!(dataset.positives(), 2);
    }

    #[test]
    fn missing_column_is_fatal() {
        let file = write_csv("text,label\nhello,1\n");
        match Dataset::load(file.path()) {
            Err(Error::MissingColumn { column, .. }) => assert_eq!(column, TARGET_COLUMN),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_label_is_fatal() {
        let file = write_csv("text,target\nhello,maybe\n");
        assert!(matches!(
            Dataset::load(file.path()),
            Err(Error::InvalidLabel { row: 0, .. })
        ));
    }

    #[test]
    fn ragged_rows_are_fatal() {
        let long = write_csv("text,target\nhello,1,stray,fields\nbye,0\n");
        assert!(matches!(Dataset::load(long.path()), Err(Error::Csv(_))));

        let short = write_csv("id,text,target\n1,hello,1\n2,bye\n");
        assert!(matches!(Dataset::load(short.path()), Err(Error::Csv(_))));
    }

    #[test]
    fn label_spellings() {
        for (value, expected) in [("1", true), ("TRUE", true), (" 0.0 ", false), ("False", false)] {
            assert_eq!(parse_label(value, 0).unwrap(), expected, "{value}");
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(Dataset::new(vec!["a".into()], vec![]).is_err());
    }
}
