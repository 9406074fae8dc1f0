//! Document schema inference.
//!
//! Document collections have no declared structure, so columns are inferred
//! from a small sample. Fields present only in unsampled documents are
//! missed; that approximation is accepted.

use mongodb::bson::{Bson, Document};

use common::models::ColumnDescriptor;

/// Documents sampled per collection.
pub const SAMPLE_SIZE: i64 = 10;

/// Coarse value-kind label used in inferred type unions.
pub fn value_label(value: &Bson) -> &'static str {
    match value {
        Bson::String(_) | Bson::Symbol(_) => "string",
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => "number",
        Bson::Boolean(_) => "boolean",
        Bson::Null | Bson::Undefined => "null",
        Bson::Array(_) => "array",
        Bson::DateTime(_) | Bson::Timestamp(_) => "date",
        Bson::ObjectId(_) => "objectid",
        _ => "object",
    }
}

struct FieldStats<'a> {
    name: &'a str,
    labels: Vec<&'static str>,
    seen_in: usize,
}

/// Infers one descriptor per field seen in `samples`.
///
/// Fields keep first-seen order, and so do the labels of each union. A field
/// is nullable when some sample lacks it or holds `null`. `_id` is the
/// primary key. No samples means no columns.
pub fn infer_columns(samples: &[Document]) -> Vec<ColumnDescriptor> {
    let mut fields: Vec<FieldStats<'_>> = Vec::new();
    for doc in samples {
        for (key, value) in doc {
            let index = match fields.iter().position(|f| f.name == key) {
                Some(i) => i,
                None => {
                    fields.push(FieldStats {
                        name: key,
                        labels: Vec::new(),
                        seen_in: 0,
                    });
                    fields.len() - 1
                }
            };
            let stats = &mut fields[index];
            stats.seen_in += 1;
            let label = value_label(value);
            if !stats.labels.contains(&label) {
                stats.labels.push(label);
            }
        }
    }

    fields
        .into_iter()
        .map(|f| {
            let mut column = ColumnDescriptor::new(f.name, f.labels.join(" | "));
            column.nullable = f.seen_in < samples.len() || f.labels.contains(&"null");
            column.is_primary_key = f.name == "_id";
            column
        })
        .collect()
}
