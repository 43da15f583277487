//! Extraction prompt and the target JSON schema.
//!
//! The schema doubles as the default-value contract: every leaf shows the value
//! the model must emit when the invoice does not mention it (`"NA"` for text,
//! `0`/`0.0` for numbers, and a few ledger names the accounting import expects).
//! Keys and nesting here must stay in lock-step with the mapping table in
//! [`crate::pipeline::flatten`].

use serde_json::{json, Value};

/// Instruction block placed before the schema.
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are an expert AI data extractor for invoices. Your task is to analyze the raw text from an Indian invoice and extract all specified information into a structured JSON format.

Instructions:
1.  Thoroughly analyze the provided invoice text.
2.  Populate all fields in the JSON schema below.
3.  If information for a field is not found, you MUST use the default value ("NA" for text, 0 for numbers). Do not leave any field blank.
4.  'lineItems' must be a JSON array. Create one object in the array for each distinct product or service line item found in the invoice table.
5.  The final output must be ONLY the valid JSON object, with no additional text, explanations, or formatting."#;

/// Separator between the schema and the raw invoice text.
pub const TEXT_SEPARATOR: &str = "Now, here is the invoice text:\n---\n";

/// The target schema with its default values.
pub fn invoice_schema() -> Value {
    json!({
        "invoiceHeader": {
            "invoiceDate": "NA", "invoiceNo": "NA", "supplierInvoiceNo": "NA", "supplierInvoiceDate": "NA",
            "voucherType": "Purchase", "orderNo": "NA", "orderDate": "NA", "orderDueDate": "NA",
            "documentType": "Invoice", "subType": "NA", "receiptNoteNo": "NA", "receiptNoteDate": "NA"
        },
        "supplierDetails": {
            "name": "NA", "address1": "NA", "address2": "NA", "address3": "NA", "pincode": "NA",
            "state": "NA", "placeOfSupply": "NA", "country": "INDIA", "gstin": "NA",
            "gstRegistrationType": "Regular"
        },
        "buyerDetails": {
            "name": "NA", "address1": "NA", "address2": "NA", "address3": "NA", "pincode": "NA",
            "state": "NA", "place": "NA", "gstin": "NA"
        },
        "logisticsDetails": {
            "lrNo": "NA", "despatchThrough": "NA", "destination": "NA", "transportMode": "NA",
            "distance": "NA", "transporterName": "NA", "vehicleNumber": "NA", "vehicleType": "NA",
            "docAirWayBillNo": "NA", "docDate": "NA", "transporterID": "NA"
        },
        "eWayBillDetails": {
            "eWayBillNo": "NA", "eWayBillDate": "NA", "consolidatedEWayBillNo": "NA",
            "consolidatedEWayDate": "NA", "statusOfEWayBill": "NA"
        },
        "lineItems": [{
            "itemName": "NA", "hsnCode": "NA", "itemDescription": "NA", "taxRate": 0.0,
            "batchNo": "NA", "mfgDate": "NA", "expDate": "NA", "qty": 0, "uom": "NA",
            "rate": 0.0, "discount": 0.0, "amount": 0.0
        }],
        "summary": {
            "totalAmount": 0.0, "cgstLedger": "CGST", "cgstAmount": 0.0, "sgstLedger": "SGST",
            "sgstAmount": 0.0, "igstLedger": "IGST", "igstAmount": 0.0, "cessLedger": "Cess",
            "cessAmount": 0.0, "roundOffLedger": "Round-Off", "roundOffAmount": 0.0,
            "narration": "NA", "termsOfPayment": "NA", "otherReference": "NA",
            "termsOfDelivery": "NA", "purchaseLedger": "Purchase Account",
            "costCenterGodown": "Main Location"
        }
    })
}

/// Render the full prompt: instructions, schema, separator, then the raw text
/// verbatim.
///
/// `instructions` replaces [`DEFAULT_INSTRUCTIONS`] when given.
pub fn build_prompt(invoice_text: &str, instructions: Option<&str>) -> String {
    let schema = serde_json::to_string_pretty(&invoice_schema()).unwrap_or_default();
    format!(
        "{}\n\nJSON Schema to populate:\n{}\n\n{}{}",
        instructions.unwrap_or(DEFAULT_INSTRUCTIONS),
        schema,
        TEXT_SEPARATOR,
        invoice_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_leaves(v: &Value) -> usize {
        match v {
            Value::Object(map) => map.values().map(count_leaves).sum(),
            Value::Array(items) => items.first().map(count_leaves).unwrap_or(0),
            _ => 1,
        }
    }

    #[test]
    fn schema_has_six_groups_and_line_items() {
        let schema = invoice_schema();
        let obj = schema.as_object().unwrap();
        for key in [
            "invoiceHeader",
            "supplierDetails",
            "buyerDetails",
            "logisticsDetails",
            "eWayBillDetails",
            "lineItems",
            "summary",
        ] {
            assert!(obj.contains_key(key), "missing group {key}");
        }
        assert!(obj["lineItems"].is_array());
    }

    #[test]
    fn schema_group_sizes() {
        let schema = invoice_schema();
        let size = |k: &str| schema[k].as_object().unwrap().len();
        assert_eq!(size("invoiceHeader"), 12);
        assert_eq!(size("supplierDetails"), 10);
        assert_eq!(size("buyerDetails"), 8);
        assert_eq!(size("logisticsDetails"), 11);
        assert_eq!(size("eWayBillDetails"), 5);
        assert_eq!(size("summary"), 17);
        assert_eq!(schema["lineItems"][0].as_object().unwrap().len(), 12);
        assert_eq!(count_leaves(&schema), 75);
    }

    #[test]
    fn prompt_ends_with_text_verbatim() {
        let text = "TAX INVOICE\nInvoice No: 42/2024\n  Qty 3  ";
        let prompt = build_prompt(text, None);
        assert!(prompt.starts_with("You are an expert AI data extractor"));
        assert!(prompt.ends_with(&format!("---\n{text}")));
        assert!(prompt.contains("\"voucherType\": \"Purchase\""));
    }

    #[test]
    fn prompt_keeps_schema_key_order() {
        let prompt = build_prompt("", None);
        let header = prompt.find("\"invoiceHeader\"").unwrap();
        let summary = prompt.find("\"summary\"").unwrap();
        assert!(header < summary);
    }

    #[test]
    fn instruction_override_keeps_schema_and_text() {
        let prompt = build_prompt("body", Some("Extract this invoice."));
        assert!(prompt.starts_with("Extract this invoice."));
        assert!(prompt.contains("\"lineItems\""));
        assert!(prompt.ends_with("---\nbody"));
    }
}
