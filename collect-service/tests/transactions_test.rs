mod common;

use common::{webhook, TestApp, SCHOOL_ID};
use serde_json::Value;

fn collect_ids(listing: &Value) -> Vec<String> {
    listing["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["collect_id"].as_str().unwrap().to_string())
        .collect()
}

/// Three orders: two paid in January, one still pending.
async fn seeded_app() -> TestApp {
    let app = TestApp::spawn().await;
    app.create_order("order-a", 100.0, Some("INV-A")).await;
    app.create_order("order-b", 300.0, Some("INV-B")).await;
    app.create_order("order-c", 200.0, None).await;

    app.deliver(&webhook("order-a", "SUCCESS", "2024-01-10T10:00:00Z"))
        .await;
    app.deliver(&webhook("order-b", "FAILED", "2024-01-20T10:00:00Z"))
        .await;
    app
}

#[tokio::test]
async fn out_of_range_page_keeps_totals() {
    let app = TestApp::spawn().await;
    app.create_order("only", 100.0, None).await;

    let listing = app.get_json("/payments/transactions?page=2&limit=1").await;
    assert_eq!(listing["data"].as_array().unwrap().len(), 0);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["totalPages"], 1);
    assert_eq!(listing["page"], 2);
    assert_eq!(listing["limit"], 1);
}

#[tokio::test]
async fn defaults_and_lenient_paging() {
    let app = seeded_app().await;

    let listing = app.get_json("/payments/transactions").await;
    assert_eq!(listing["page"], 1);
    assert_eq!(listing["limit"], 10);
    assert_eq!(listing["total"], 3);

    let clamped = app.get_json("/payments/transactions?page=-3&limit=abc").await;
    assert_eq!(clamped["page"], 1);
    assert_eq!(clamped["limit"], 1);
    assert_eq!(clamped["totalPages"], 3);
}

#[tokio::test]
async fn filters_by_status_and_date() {
    let app = seeded_app().await;

    let listing = app
        .get_json("/payments/transactions?status=SUCCESS,FAILED&dateFrom=2024-01-15&dateTo=2024-01-31")
        .await;
    assert_eq!(collect_ids(&listing), vec!["order-b"]);

    let repeated = app
        .get_json("/payments/transactions?status=SUCCESS&status=FAILED")
        .await;
    assert_eq!(repeated["total"], 2);
}

#[tokio::test]
async fn search_matches_custom_order_id_or_collect_id() {
    let app = seeded_app().await;

    let by_custom = app.get_json("/payments/transactions?search=INV-B").await;
    assert_eq!(collect_ids(&by_custom), vec!["order-b"]);

    let by_id = app.get_json("/payments/transactions?search=order-c").await;
    assert_eq!(collect_ids(&by_id), vec!["order-c"]);
}

#[tokio::test]
async fn sorts_by_requested_field() {
    let app = seeded_app().await;

    let ascending = app
        .get_json("/payments/transactions?sortField=order_amount&sortOrder=asc")
        .await;
    // Paid orders carry the amount reported by the gateway; ties fall back to collect_id.
    assert_eq!(collect_ids(&ascending), vec!["order-c", "order-a", "order-b"]);

    let descending = app
        .get_json("/payments/transactions?sortField=status_info.order_amount")
        .await;
    assert_eq!(collect_ids(&descending), vec!["order-a", "order-b", "order-c"]);
}

#[tokio::test]
async fn unknown_sort_field_is_a_bad_request() {
    let app = seeded_app().await;

    let response = app.get("/payments/transactions?sortField=password").await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn school_listing_is_scoped_to_tenant() {
    let app = seeded_app().await;

    let upper = SCHOOL_ID.to_uppercase();
    let listing = app
        .get_json(&format!("/api/payments/transactions/school/{}", upper))
        .await;
    assert_eq!(listing["total"], 3);

    let other = app
        .get_json("/api/payments/transactions/school/65b0e6293e9f76a9694d0000")
        .await;
    assert_eq!(other["total"], 0);
    assert_eq!(other["totalPages"], 1);
}

#[tokio::test]
async fn default_sort_is_latest_payment_time_first() {
    let app = seeded_app().await;

    // The pending seed is stamped with its creation time.
    let listing = app.get_json("/payments/transactions").await;
    assert_eq!(collect_ids(&listing), vec!["order-c", "order-b", "order-a"]);
    assert_eq!(listing["data"][0]["status"], "PENDING");
}
