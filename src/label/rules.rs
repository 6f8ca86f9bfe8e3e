// src/label/rules.rs

use super::Field;
use regex::Regex;

/// A single field heuristic. `None` means the field was not found.
pub(super) type Rule = fn(&str) -> Option<String>;

/// Evaluated in order. The variant column only exists next to a product column.
pub(super) const RULES: &[(Field, Rule)] = &[
    (Field::OrderId, extract_order_id),
    (Field::TrackingNumber, extract_tracking_number),
    (Field::Courier, detect_courier),
    (Field::ProductName, extract_product_name),
    (Field::Variant, extract_variant),
];

/// Known carriers, checked in this order.
pub const COURIERS: &[&str] = &[
    "J&T",
    "SiCepat",
    "Shopee Xpress",
    "JNE",
    "Anteraja",
    "GoSend",
    "GrabExpress",
];

const PRODUCT_MARKERS: &[&str] = &["Nama Produk", "Product Name"];
const VARIANT_MARKERS: &[&str] = &["Variasi", "Variant"];

// ---------------------------------------------------------------------------
// Identifier rules
// ---------------------------------------------------------------------------

fn extract_order_id(text: &str) -> Option<String> {
    // Marketplace order ids: two digits, then 10+ uppercase alphanumerics
    let re = Regex::new(r"[0-9]{2}[0-9A-Z]{10,}").ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}

fn extract_tracking_number(text: &str) -> Option<String> {
    // Most specific carrier formats first; the generic prefix form must not
    // shadow them at the same position.
    let re = Regex::new(r"JP[0-9]{10}|SPXID[0-9]{10}|[A-Z]{3,}[0-9]{10}").ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}

fn detect_courier(text: &str) -> Option<String> {
    let haystack = text.to_lowercase();
    COURIERS
        .iter()
        .find(|courier| haystack.contains(&courier.to_lowercase()))
        .map(|courier| courier.to_string())
}

// ---------------------------------------------------------------------------
// Column rules
// ---------------------------------------------------------------------------

fn extract_product_name(text: &str) -> Option<String> {
    column_after(text, PRODUCT_MARKERS)
}

fn extract_variant(text: &str) -> Option<String> {
    // Searched only after the product marker; no product column, no variant.
    let after_product = &text[marker_end(text, PRODUCT_MARKERS)?..];
    column_after(after_product, VARIANT_MARKERS)
}

/// Byte offset just past the first marker found.
fn marker_end(text: &str, markers: &[&str]) -> Option<usize> {
    markers
        .iter()
        .find_map(|marker| text.find(marker).map(|pos| pos + marker.len()))
}

/// Text following the first marker found, up to the next run of three or
/// more spaces. Extracted text carries no layout, so the wide gap stands in
/// for a column boundary.
fn column_after(text: &str, markers: &[&str]) -> Option<String> {
    let rest = text[marker_end(text, markers)?..].trim_start();

    let gap = Regex::new(r" {3,}").ok()?;
    let cell = match gap.find(rest) {
        Some(m) => &rest[..m.start()],
        None => rest,
    };

    let cell = cell.trim();
    (!cell.is_empty()).then(|| cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_formats_returned_verbatim() {
        let cases = [
            ("Kode Booking JP0012345678 Berat 1kg", "JP0012345678"),
            ("Resi: SPXID0987654321 ", "SPXID0987654321"),
            ("AWB SCPT4455667788 dari gudang", "SCPT4455667788"),
            ("no resi JNEJKT1122334455", "JNEJKT1122334455"),
        ];
        for (text, expected) in cases {
            assert_eq!(extract_tracking_number(text).as_deref(), Some(expected), "{text}");
        }
    }

    #[test]
    fn test_specific_prefix_beats_generic() {
        // Both `SPXID` and the generic form start here; the SPXID branch is
        // listed first so it is the one reported.
        assert_eq!(
            extract_tracking_number("SPXID12345678901234").as_deref(),
            Some("SPXID1234567890")
        );
    }

    #[test]
    fn test_tracking_needs_ten_digits() {
        assert_eq!(extract_tracking_number("JP123456789 XY1234567890"), None);
    }

    #[test]
    fn test_order_id() {
        assert_eq!(
            extract_order_id("Order 240215ABCD12EF xyz").as_deref(),
            Some("240215ABCD12EF")
        );
        assert_eq!(extract_order_id("12ABCDEFGHI"), None);
        assert_eq!(extract_order_id("no order here"), None);
    }

    #[test]
    fn test_every_courier_detected_case_insensitively() {
        for courier in COURIERS {
            let text = format!("alamat: jl. mawar 3\nkurir {} reguler", courier.to_uppercase());
            assert_eq!(detect_courier(&text).as_deref(), Some(*courier));

            let text = format!("berat 1kg {} ongkir", courier.to_lowercase());
            assert_eq!(detect_courier(&text).as_deref(), Some(*courier));
        }
    }

    #[test]
    fn test_courier_list_order_wins() {
        // JNE appears first in the text but J&T is earlier in the list.
        assert_eq!(detect_courier("JNE ... J&T").as_deref(), Some("J&T"));
    }

    #[test]
    fn test_no_courier() {
        assert_eq!(detect_courier("pos indonesia kilat"), None);
    }

    #[test]
    fn test_product_column() {
        assert_eq!(
            extract_product_name("Nama Produk   Kaos Polos   Rp 45000").as_deref(),
            Some("Kaos Polos")
        );
        assert_eq!(
            extract_product_name("Product Name Tote Bag Kanvas    SKU 9").as_deref(),
            Some("Tote Bag Kanvas")
        );
        assert_eq!(
            extract_product_name("Nama Produk Sandal Jepit").as_deref(),
            Some("Sandal Jepit")
        );
    }

    #[test]
    fn test_product_marker_without_value() {
        assert_eq!(extract_product_name("Nama Produk      "), None);
        assert_eq!(extract_product_name("Kaos Polos Rp 45000"), None);
    }

    #[test]
    fn test_variant_column() {
        assert_eq!(
            extract_variant("Nama Produk   Kaos   Variasi   Hitam, L   Qty 2").as_deref(),
            Some("Hitam, L")
        );
        assert_eq!(extract_variant("Nama Produk   Kaos"), None);
    }

    #[test]
    fn test_variant_needs_product_marker() {
        assert_eq!(extract_variant("Variasi   Merah, XL   Qty 1"), None);
        // A variant printed before the product column belongs to something else.
        assert_eq!(extract_variant("Variasi Merah   Nama Produk   Kaos"), None);
    }
}
