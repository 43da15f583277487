//! Row flattening: one nested invoice → one flat row per line item.
//!
//! The mapping tables below are the compatibility contract with downstream
//! spreadsheets. Column headers, including their spellings, must not change.

use crate::config::RowPolicy;
use crate::output::{FlatRow, StructuredInvoice};
use serde_json::{Map, Value};

/// `(group, key, column)` for every invoice-level field, in output order.
pub const INVOICE_FIELDS: &[(&str, &str, &str)] = &[
    ("invoiceHeader", "invoiceDate", "Invoice Date"),
    ("invoiceHeader", "invoiceNo", "Invoice No"),
    ("invoiceHeader", "supplierInvoiceNo", "Supplier Invoice No"),
    ("invoiceHeader", "supplierInvoiceDate", "Supplier Invoice Date"),
    ("invoiceHeader", "voucherType", "Voucher Type"),
    ("supplierDetails", "name", "Supplier Name"),
    ("supplierDetails", "address1", "Address 1"),
    ("supplierDetails", "address2", "Address 2"),
    ("supplierDetails", "address3", "Address 3"),
    ("supplierDetails", "pincode", "Supplier Pincode"),
    ("supplierDetails", "state", "State"),
    ("supplierDetails", "placeOfSupply", "Place of Supply"),
    ("supplierDetails", "country", "Country"),
    ("supplierDetails", "gstin", "GSTIN/UIN"),
    ("buyerDetails", "name", "Consignor From Name"),
    ("buyerDetails", "address1", "Consignor From Add 1"),
    ("buyerDetails", "address2", "Consignor From Add 2"),
    ("buyerDetails", "address3", "Consignor From Add 3"),
    ("buyerDetails", "state", "Consignor From State"),
    ("buyerDetails", "place", "Consignor From Place"),
    ("buyerDetails", "pincode", "Consignor From Pincode"),
    ("buyerDetails", "gstin", "Consignor From GSTIN"),
    ("supplierDetails", "gstRegistrationType", "GST Registration Type"),
    ("invoiceHeader", "receiptNoteNo", "Receipt Note No"),
    ("invoiceHeader", "receiptNoteDate", "Receipt Note Date"),
    ("invoiceHeader", "orderNo", "Order No"),
    ("invoiceHeader", "orderDate", "Order Date"),
    ("invoiceHeader", "orderDueDate", "Order Due Date"),
    ("logisticsDetails", "lrNo", "LR No"),
    ("logisticsDetails", "despatchThrough", "Despatch Through"),
    ("logisticsDetails", "destination", "Destination"),
    ("summary", "termsOfPayment", "Term of Payment"),
    ("summary", "otherReference", "Other Reference"),
    ("summary", "termsOfDelivery", "Terms of Delivery"),
    ("summary", "purchaseLedger", "Purchase Ledger"),
    ("summary", "cgstLedger", "CGST Ledger"),
    ("summary", "cgstAmount", "CGST Amount"),
    ("summary", "sgstLedger", "SGST Ledger"),
    ("summary", "sgstAmount", "SGST Amount"),
    ("summary", "igstLedger", "IGST Ledger"),
    ("summary", "igstAmount", "IGST Amount"),
    ("summary", "cessLedger", "Cess Ledger"),
    ("summary", "cessAmount", "Cess Amount"),
    ("summary", "roundOffLedger", "Round off Ledger"),
    ("summary", "roundOffAmount", "Round off Amount"),
    ("summary", "costCenterGodown", "Cost Center Godown"),
    ("summary", "narration", "Narration"),
    ("summary", "totalAmount", "Total Amount"),
    ("eWayBillDetails", "eWayBillNo", "e-Way Bill No"),
    ("eWayBillDetails", "eWayBillDate", "e-Way Bill Date"),
    ("eWayBillDetails", "consolidatedEWayBillNo", "Consolidated e-Way Bill No"),
    ("eWayBillDetails", "consolidatedEWayDate", "Consolidated e-Way Date"),
    ("invoiceHeader", "subType", "Sub Type"),
    ("invoiceHeader", "documentType", "Document Type"),
    ("eWayBillDetails", "statusOfEWayBill", "Status of e-Way Bill"),
    ("logisticsDetails", "transportMode", "Transport Mode"),
    ("logisticsDetails", "distance", "Distance"),
    ("logisticsDetails", "transporterName", "Transporter Name"),
    ("logisticsDetails", "vehicleNumber", "Vehical Number"),
    ("logisticsDetails", "vehicleType", "Vehical Type"),
    ("logisticsDetails", "docAirWayBillNo", "Doc/AirWay Bill No"),
    ("logisticsDetails", "docDate", "Doc Date"),
    ("logisticsDetails", "transporterID", "Transporter ID"),
];

/// `(key, column)` for every line-item field, in output order.
pub const LINE_ITEM_FIELDS: &[(&str, &str)] = &[
    ("itemName", "Item Name"),
    ("hsnCode", "HSN Code"),
    ("itemDescription", "Item Description"),
    ("taxRate", "Tax Rate"),
    ("batchNo", "Batch No"),
    ("mfgDate", "Mfg Date"),
    ("expDate", "Exp Date"),
    ("qty", "QTY"),
    ("uom", "UOM"),
    ("rate", "Rate"),
    ("discount", "Discount"),
    ("amount", "Amount"),
];

/// Flatten an invoice into rows.
///
/// Every row repeats the same invoice-level cells. With no usable line items,
/// [`RowPolicy::SynthesizeEmpty`] yields a single row whose line-item cells are
/// all unset.
pub fn flatten(invoice: &StructuredInvoice, policy: RowPolicy) -> Vec<FlatRow> {
    let base = base_cells(invoice);
    let items = invoice.line_items();

    if items.is_empty() {
        return match policy {
            RowPolicy::SynthesizeEmpty => {
                let empty = Map::new();
                vec![build_row(&base, &empty)]
            }
            RowPolicy::SkipDocument => Vec::new(),
        };
    }

    items.into_iter().map(|item| build_row(&base, item)).collect()
}

fn base_cells(invoice: &StructuredInvoice) -> Vec<(&'static str, Option<Value>)> {
    INVOICE_FIELDS
        .iter()
        .map(|&(group, key, column)| {
            let value = invoice
                .group(group)
                .and_then(|g| g.get(key))
                .filter(|v| !v.is_null())
                .cloned();
            (column, value)
        })
        .collect()
}

fn build_row(base: &[(&'static str, Option<Value>)], item: &Map<String, Value>) -> FlatRow {
    let mut row = FlatRow::with_capacity(base.len() + LINE_ITEM_FIELDS.len());
    for (column, value) in base {
        row.push(*column, value.clone());
    }
    for &(key, column) in LINE_ITEM_FIELDS {
        row.push(column, item.get(key).filter(|v| !v.is_null()).cloned());
    }
    row
}
