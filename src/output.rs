//! Result types: the model's invoice, flattened rows, and per-document /
//! per-batch summaries.

use crate::error::DocumentFailure;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// The JSON object returned by the model.
///
/// Deliberately untyped: the model is asked for the schema in
/// [`crate::prompts::invoice_schema`] but nothing guarantees it complies, and
/// the flattener treats every missing key as unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredInvoice(Map<String, Value>);

impl StructuredInvoice {
    /// Wrap a JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// A named group (`invoiceHeader`, `summary`, …) if present and an object.
    pub fn group(&self, name: &str) -> Option<&Map<String, Value>> {
        self.0.get(name).and_then(Value::as_object)
    }

    /// The `lineItems` entries that are objects. A lone object counts as a
    /// one-item list; anything else ⇒ empty.
    pub fn line_items(&self) -> Vec<&Map<String, Value>> {
        match self.0.get("lineItems") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            Some(Value::Object(item)) => vec![item],
            _ => Vec::new(),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// One output row: invoice-level columns followed by line-item columns, in
/// mapping-table order. `None` means the model did not supply the field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatRow {
    cells: Vec<(&'static str, Option<Value>)>,
}

impl FlatRow {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            cells: Vec::with_capacity(n),
        }
    }

    pub(crate) fn push(&mut self, column: &'static str, value: Option<Value>) {
        self.cells.push((column, value));
    }

    /// The value for `column`, or `None` when unset or not a column of this row.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(c, _)| *c == column)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Whether `column` is part of this row at all (set or not).
    pub fn has_column(&self, column: &str) -> bool {
        self.cells.iter().any(|(c, _)| *c == column)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cells.iter().map(|(c, _)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&Value>)> + '_ {
        self.cells.iter().map(|(c, v)| (*c, v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for FlatRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Which extraction path produced the text sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Embedded,
    Ocr,
}

/// Text obtained from one document by exactly one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub source: TextSource,
}

/// Result of processing a single document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutput {
    /// Input file.
    pub path: PathBuf,
    /// Where the text came from.
    pub text_source: TextSource,
    /// Character count of the text sent to the model.
    pub text_chars: usize,
    /// Line items the model reported (0 when a synthetic row was emitted).
    pub line_items: usize,
    /// Flattened rows, one per line item.
    pub rows: Vec<FlatRow>,
    /// Wall-clock time for this document in milliseconds.
    pub duration_ms: u64,
}

/// Result of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutput {
    /// Successfully processed documents, in input order.
    pub documents: Vec<DocumentOutput>,
    /// Failed documents, in input order.
    pub failures: Vec<DocumentFailure>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// All rows of all successful documents, in input order.
    pub fn rows(&self) -> impl Iterator<Item = &FlatRow> + '_ {
        self.documents.iter().flat_map(|d| d.rows.iter())
    }

    /// `true` when the batch stopped before attempting every document.
    pub fn halted(&self) -> bool {
        self.stats.attempted < self.stats.total_documents
    }
}

/// Aggregate batch counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub ocr_documents: usize,
    pub total_rows: usize,
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_invoice_requires_object() {
        assert!(StructuredInvoice::from_value(json!([1, 2])).is_none());
        assert!(StructuredInvoice::from_value(json!("text")).is_none());
        assert!(StructuredInvoice::from_value(json!({})).is_some());
    }

    #[test]
    fn line_items_tolerates_wrong_shapes() {
        let inv = StructuredInvoice::from_value(json!({"lineItems": "none"})).unwrap();
        assert!(inv.line_items().is_empty());

        let inv = StructuredInvoice::from_value(json!({"lineItems": [{"qty": 1}, 7, null]}))
            .unwrap();
        assert_eq!(inv.line_items().len(), 1);
    }

    #[test]
    fn lone_line_item_object_counts_as_one_item() {
        let inv = StructuredInvoice::from_value(json!({
            "lineItems": {"itemName": "Paracetamol 500", "qty": 10}
        }))
        .unwrap();
        let items = inv.line_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].get("itemName"), Some(&json!("Paracetamol 500")));
    }

    #[test]
    fn flat_row_serialises_in_column_order() {
        let mut row = FlatRow::with_capacity(2);
        row.push("Invoice No", Some(json!("INV-7")));
        row.push("QTY", None);
        let s = serde_json::to_string(&row).unwrap();
        assert_eq!(s, r#"{"Invoice No":"INV-7","QTY":null}"#);
        assert!(row.has_column("QTY"));
        assert!(row.get("QTY").is_none());
    }
}
