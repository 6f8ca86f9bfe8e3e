// src/orders.rs

use crate::label::ParsedLabel;
use crate::record_store::{
    Collection, PersistenceError, Record, RecordFilter, RecordStore, SqliteRecordStore,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::info;

const SECS_PER_DAY: i64 = 24 * 60 * 60;
pub const RECENT_DAYS: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub code: String,
    pub name: String,
    /// Whole rupiah.
    pub price: i64,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    #[serde(default)]
    pub code: String,
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Printed,
}

/// What the dropshipper submits once a product has been picked. The label
/// fields arrive as the user left them, corrected or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub product_id: String,
    #[serde(default)]
    pub label: Option<ParsedLabel>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Creation payload handed to the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub product_id: String,
    pub status: OrderStatus,
    pub original_price: i64,
    pub order_id: Option<String>,
    pub tracking_number: Option<String>,
    pub courier: Option<String>,
    pub product_name: Option<String>,
    pub variant: Option<String>,
    pub pdf_url: Option<String>,
    pub image_url: Option<String>,
}

impl NewOrder {
    /// Price is always the catalogue price at the time of ordering.
    pub fn new(
        product: &Product,
        label: Option<&ParsedLabel>,
        pdf_url: Option<String>,
        image_url: Option<String>,
    ) -> Self {
        Self {
            product_id: product.id.clone(),
            status: OrderStatus::Pending,
            original_price: product.price,
            order_id: label.map(|l| l.order_id.clone()),
            tracking_number: label.map(|l| l.tracking_number.clone()),
            courier: label.map(|l| l.courier.clone()),
            product_name: label.map(|l| l.product_name.clone()),
            variant: label.map(|l| l.variant.clone()),
            pdf_url,
            image_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub created_at: i64,
    #[serde(flatten)]
    pub details: NewOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupplierStats {
    pub total_price: i64,
    pub pending_count: usize,
    /// Percent of orders no longer pending, rounded.
    pub fulfilment_rate: u32,
}

impl SupplierStats {
    pub fn from_orders(orders: &[Order]) -> Self {
        if orders.is_empty() {
            return Self::default();
        }
        let total_price = orders.iter().map(|o| o.details.original_price).sum();
        let pending_count = orders
            .iter()
            .filter(|o| o.details.status == OrderStatus::Pending)
            .count();
        let done = (orders.len() - pending_count) as f64;
        let fulfilment_rate = (done / orders.len() as f64 * 100.0).round() as u32;
        Self {
            total_price,
            pending_count,
            fulfilment_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplierBoard {
    pub orders: Vec<Order>,
    pub stats: SupplierStats,
}

fn decode_all<T: serde::de::DeserializeOwned>(records: &[Record]) -> Result<Vec<T>, PersistenceError> {
    records.iter().map(Record::decode).collect()
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: OffsetDateTime) -> i64 {
    let ts = now.unix_timestamp();
    ts - ts.rem_euclid(SECS_PER_DAY)
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub async fn list_products(store: &dyn RecordStore) -> Result<Vec<Product>, PersistenceError> {
    let records = store.list(Collection::Products, &RecordFilter::all()).await?;
    decode_all(&records)
}

pub async fn add_product(
    store: &dyn RecordStore,
    product: NewProduct,
) -> Result<Product, PersistenceError> {
    if product.name.trim().is_empty() {
        return Err(PersistenceError::Rejected("product name is required".into()));
    }
    if product.price < 0 {
        return Err(PersistenceError::Rejected("price cannot be negative".into()));
    }
    let record = store
        .insert(Collection::Products, serde_json::to_value(&product)?)
        .await?;
    info!(id = %record.id, name = %product.name, "Product added");
    record.decode()
}

pub async fn delete_product(store: &dyn RecordStore, id: &str) -> Result<(), PersistenceError> {
    store.delete(Collection::Products, id).await
}

async fn find_product(store: &dyn RecordStore, id: &str) -> Result<Product, PersistenceError> {
    list_products(store)
        .await?
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| PersistenceError::NotFound {
            collection: Collection::Products,
            id: id.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub async fn create_order(
    store: &dyn RecordStore,
    request: OrderRequest,
) -> Result<Order, PersistenceError> {
    let product = find_product(store, &request.product_id).await?;
    let order = NewOrder::new(
        &product,
        request.label.as_ref(),
        request.pdf_url,
        request.image_url,
    );
    let record = store
        .insert(Collection::Orders, serde_json::to_value(&order)?)
        .await?;
    info!(
        id = %record.id,
        product = %product.name,
        tracking = order.tracking_number.as_deref().unwrap_or("-"),
        "Order created"
    );
    record.decode()
}

/// The dropshipper's orders from the last `days` days, newest first.
pub async fn recent_orders(
    store: &dyn RecordStore,
    now: OffsetDateTime,
    days: i64,
) -> Result<Vec<Order>, PersistenceError> {
    let since = (now - Duration::days(days)).unix_timestamp();
    let records = store
        .list(Collection::Orders, &RecordFilter::all().created_after(since))
        .await?;
    decode_all(&records)
}

/// Today's orders for the supplier, with totals.
pub async fn supplier_board(
    store: &dyn RecordStore,
    now: OffsetDateTime,
) -> Result<SupplierBoard, PersistenceError> {
    let records = store
        .list(
            Collection::Orders,
            &RecordFilter::all().created_after(start_of_day(now)),
        )
        .await?;
    let orders: Vec<Order> = decode_all(&records)?;
    let stats = SupplierStats::from_orders(&orders);
    Ok(SupplierBoard { orders, stats })
}

/// Mark every pending order from today as printed. Returns how many changed.
pub async fn print_all(store: &dyn RecordStore, now: OffsetDateTime) -> Result<usize, PersistenceError> {
    let pending = store
        .list(
            Collection::Orders,
            &RecordFilter::all()
                .created_after(start_of_day(now))
                .field_eq("status", "pending"),
        )
        .await?;

    for record in &pending {
        store
            .update(Collection::Orders, &record.id, json!({ "status": OrderStatus::Printed }))
            .await?;
    }
    info!(count = pending.len(), "Pending orders marked printed");
    Ok(pending.len())
}

/// Delete orders older than `retention_days`.
pub fn cleanup(
    store: &SqliteRecordStore,
    now: OffsetDateTime,
    retention_days: i64,
) -> Result<usize, PersistenceError> {
    let cutoff = (now - Duration::days(retention_days)).unix_timestamp();
    store.purge_created_before(Collection::Orders, cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::extract_label;

    fn kaos() -> NewProduct {
        NewProduct {
            code: "KP-01".into(),
            name: "Kaos Polos".into(),
            price: 45000,
            image_url: None,
        }
    }

    fn order_body(status: &str, price: i64) -> serde_json::Value {
        json!({ "product_id": "p", "status": status, "original_price": price })
    }

    #[tokio::test]
    async fn test_create_order_copies_price_and_label() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let product = add_product(&store, kaos()).await.unwrap();
        let label = extract_label(
            "SPXID1234567890 dikirim oleh J&T Nama Produk   Kaos Polos   Rp 45000",
        );

        let order = create_order(
            &store,
            OrderRequest {
                product_id: product.id.clone(),
                label: Some(label),
                pdf_url: Some("http://x/resi.pdf".into()),
                image_url: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(order.details.status, OrderStatus::Pending);
        assert_eq!(order.details.original_price, 45000);
        assert_eq!(order.details.product_id, product.id);
        assert_eq!(order.details.tracking_number.as_deref(), Some("SPXID1234567890"));
        assert_eq!(order.details.courier.as_deref(), Some("J&T"));
        assert_eq!(order.details.order_id.as_deref(), Some("Unknown"));
        assert_eq!(order.details.pdf_url.as_deref(), Some("http://x/resi.pdf"));
    }

    #[tokio::test]
    async fn test_create_order_unknown_product() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let err = create_order(
            &store,
            OrderRequest {
                product_id: "missing".into(),
                ..OrderRequest::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));
        assert_eq!(store.count(Collection::Orders).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_catalog_round() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let p = add_product(&store, kaos()).await.unwrap();
        assert_eq!(list_products(&store).await.unwrap(), vec![p.clone()]);

        delete_product(&store, &p.id).await.unwrap();
        assert!(list_products(&store).await.unwrap().is_empty());

        let err = add_product(
            &store,
            NewProduct {
                name: "  ".into(),
                ..kaos()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PersistenceError::Rejected(_)));
    }

    #[test]
    fn test_status_serialises_lowercase() {
        assert_eq!(serde_json::to_value(OrderStatus::Printed).unwrap(), json!("printed"));
    }

    #[test]
    fn test_stats() {
        assert_eq!(SupplierStats::from_orders(&[]), SupplierStats::default());

        let order = |status, price| Order {
            id: "x".into(),
            created_at: 0,
            details: NewOrder {
                status,
                original_price: price,
                ..NewOrder::new(
                    &Product {
                        id: "p".into(),
                        code: String::new(),
                        name: "n".into(),
                        price: 0,
                        image_url: None,
                    },
                    None,
                    None,
                    None,
                )
            },
        };
        let stats = SupplierStats::from_orders(&[
            order(OrderStatus::Pending, 10_000),
            order(OrderStatus::Printed, 20_000),
            order(OrderStatus::Printed, 30_000),
        ]);
        assert_eq!(stats.total_price, 60_000);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.fulfilment_rate, 67);
    }

    #[tokio::test]
    async fn test_supplier_window_and_print_all() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let now = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
        let today = start_of_day(now);

        store
            .insert_at(Collection::Orders, order_body("pending", 10_000), today - 60)
            .unwrap();
        store
            .insert_at(Collection::Orders, order_body("pending", 20_000), today + 60)
            .unwrap();
        store
            .insert_at(Collection::Orders, order_body("printed", 30_000), today + 120)
            .unwrap();

        let board = supplier_board(&store, now).await.unwrap();
        assert_eq!(board.orders.len(), 2);
        assert_eq!(board.stats.total_price, 50_000);
        assert_eq!(board.stats.pending_count, 1);
        assert_eq!(board.stats.fulfilment_rate, 50);

        assert_eq!(print_all(&store, now).await.unwrap(), 1);
        let board = supplier_board(&store, now).await.unwrap();
        assert_eq!(board.stats.pending_count, 0);
        assert_eq!(board.stats.fulfilment_rate, 100);

        // Yesterday's pending order is outside the window and stays pending.
        let yesterday = store
            .list(Collection::Orders, &RecordFilter::all().field_eq("status", "pending"))
            .await
            .unwrap();
        assert_eq!(yesterday.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_and_cleanup() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let now = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
        let ts = now.unix_timestamp();
        for days_ago in [0, 2, 5, 8] {
            store
                .insert_at(
                    Collection::Orders,
                    order_body("pending", 1),
                    ts - days_ago * SECS_PER_DAY,
                )
                .unwrap();
        }

        assert_eq!(recent_orders(&store, now, RECENT_DAYS).await.unwrap().len(), 2);
        assert_eq!(cleanup(&store, now, 7).unwrap(), 1);
        assert_eq!(store.count(Collection::Orders).unwrap(), 3);
    }
}
