//! Partition path derivation.
//!
//! The partition path of a row is a pure function of the configured
//! partition fields: values are rendered, sanitised and joined with `/`.
//! Hive style renders each segment as `field=value`, sanitising the field
//! name as well. A null or empty value maps to the `default` partition.

use snafu::prelude::*;

use crate::row::Row;
use crate::schema::{MissingFieldSnafu, SchemaResult};
use crate::transaction_log::PartitionPath;

/// Partition segment used for null or empty values.
pub const DEFAULT_PARTITION: &str = "default";

/// Derives partition paths from rows.
#[derive(Debug, Clone)]
pub struct Partitioner {
    fields: Vec<String>,
    hive_style: bool,
}

impl Partitioner {
    /// Partitioner over `fields`; an empty list means non-partitioned.
    pub fn new(fields: Vec<String>, hive_style: bool) -> Self {
        Self { fields, hive_style }
    }

    /// Derive the partition path of `row` (batch position `index`).
    pub fn derive(&self, index: usize, row: &Row) -> SchemaResult<PartitionPath> {
        if self.fields.is_empty() {
            return Ok(PartitionPath::unpartitioned());
        }

        let mut segments = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = row.get(field).context(MissingFieldSnafu {
                row: index,
                field: field.clone(),
            })?;
            let rendered = if value.is_null() {
                DEFAULT_PARTITION.to_string()
            } else {
                sanitize_segment(&value.to_string())
            };
            segments.push(if self.hive_style {
                format!("{}={rendered}", sanitize_segment(field))
            } else {
                rendered
            });
        }
        Ok(PartitionPath::new(segments.join("/")))
    }
}

/// Make a rendered value safe to use as one directory name.
///
/// Path separators and the special names `.`/`..` can never escape the
/// table root.
fn sanitize_segment(value: &str) -> String {
    if value.is_empty() {
        return DEFAULT_PARTITION.to_string();
    }
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;
    use crate::schema::SchemaError;
    use chrono::NaiveDate;

    #[test]
    fn derives_plain_and_hive_paths() {
        let row = Row::new()
            .with("region", "americas")
            .with("country", "brazil")
            .with("day", NaiveDate::from_ymd_opt(2000, 1, 1).expect("date"));

        let plain = Partitioner::new(vec!["region".into(), "country".into()], false);
        assert_eq!(plain.derive(0, &row).expect("path").as_str(), "americas/brazil");

        let hive = Partitioner::new(vec!["day".into()], true);
        assert_eq!(hive.derive(0, &row).expect("path").as_str(), "day=2000-01-01");
    }

    #[test]
    fn non_partitioned_tables_use_the_empty_path() {
        let p = Partitioner::new(vec![], false);
        assert!(p.derive(0, &Row::new()).expect("path").is_empty());
    }

    #[test]
    fn null_values_go_to_default_and_values_are_sanitised() {
        let p = Partitioner::new(vec!["a".into()], false);
        let null_row = Row::new().with("a", Value::Null);
        assert_eq!(p.derive(0, &null_row).expect("path").as_str(), "default");

        let sneaky = Row::new().with("a", "../../etc");
        assert_eq!(p.derive(0, &sneaky).expect("path").as_str(), ".._.._etc");

        let dots = Row::new().with("a", "..");
        assert_eq!(p.derive(0, &dots).expect("path").as_str(), "__");
    }

    #[test]
    fn hive_field_names_stay_one_segment() {
        let field = "a/../../x";
        let p = Partitioner::new(vec![field.into()], true);
        let row = Row::new().with(field, "v");

        let path = p.derive(0, &row).expect("path");
        assert_eq!(path.as_str(), "a_.._.._x=v");
        assert!(!path.as_str().contains('/'));
        assert_eq!(
            crate::storage::layout::partition_rel_dir(&path)
                .components()
                .count(),
            1
        );

        let backslash = Partitioner::new(vec!["b\\c".into()], true);
        let row = Row::new().with("b\\c", 1_i64);
        assert_eq!(backslash.derive(0, &row).expect("path").as_str(), "b_c=1");
    }

    #[test]
    fn missing_field_is_a_schema_error() {
        let p = Partitioner::new(vec!["a".into()], false);
        assert!(matches!(
            p.derive(4, &Row::new()),
            Err(SchemaError::MissingField { row: 4, .. })
        ));
    }
}
