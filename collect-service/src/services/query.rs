//! Transaction query engine.
//!
//! Request parameters are parsed into a typed [`TransactionQuery`]: a list of
//! [`Predicate`]s, a [`SortSpec`] and a [`PageRequest`]. The query is validated
//! before it runs and is then either compiled into a MongoDB aggregation
//! pipeline ([`TransactionQuery::to_pipeline`]) or evaluated directly over
//! in-memory records ([`TransactionQuery::evaluate`]). Both paths implement the
//! same semantics:
//!
//! 1. left join every order with at most one status on canonical id equality,
//! 2. project the flat row, nulls where no status exists,
//! 3. keep rows satisfying every predicate,
//! 4. sort by the requested key, then by `collect_id` ascending,
//! 5. count the matching rows and cut out the requested page.

use crate::error::{PaymentError, Result};
use crate::models::{CanonicalId, Order, OrderStatus, PaymentStatus};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use mongodb::bson::{doc, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Page and limit are at least 1.
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// Only the literal `asc` sorts ascending.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }

    fn as_i32(&self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    PaymentTime,
    CollectId,
    SchoolId,
    Gateway,
    OrderAmount,
    TransactionAmount,
    Status,
    PaymentMode,
}

impl SortKey {
    pub fn parse(field: &str) -> Result<Self> {
        let key = match field {
            "payment_time" | "status_info.payment_time" => Self::PaymentTime,
            "collect_id" | "_id" => Self::CollectId,
            "school_id" => Self::SchoolId,
            "gateway" | "gateway_name" => Self::Gateway,
            "order_amount" | "status_info.order_amount" => Self::OrderAmount,
            "transaction_amount" | "status_info.transaction_amount" => Self::TransactionAmount,
            "status" | "status_info.status" => Self::Status,
            "payment_mode" | "status_info.payment_mode" => Self::PaymentMode,
            other => {
                return Err(PaymentError::validation(format!(
                    "unsupported sortField '{}'",
                    other
                )))
            }
        };
        Ok(key)
    }

    /// Field path in the projected row.
    pub fn path(&self) -> &'static str {
        match self {
            Self::PaymentTime => "status_info.payment_time",
            Self::CollectId => "collect_id",
            Self::SchoolId => "school_id",
            Self::Gateway => "gateway",
            Self::OrderAmount => "order_amount",
            Self::TransactionAmount => "transaction_amount",
            Self::Status => "status",
            Self::PaymentMode => "status_info.payment_mode",
        }
    }

    fn compare(&self, a: &TransactionRow, b: &TransactionRow) -> Ordering {
        match self {
            Self::PaymentTime => a.payment_time.cmp(&b.payment_time),
            Self::CollectId => a.collect_id.cmp(&b.collect_id),
            Self::SchoolId => a.school_id.cmp(&b.school_id),
            Self::Gateway => a.gateway.cmp(&b.gateway),
            Self::OrderAmount => compare_amounts(a.order_amount, b.order_amount),
            Self::TransactionAmount => {
                compare_amounts(a.transaction_amount, b.transaction_amount)
            }
            // Statuses are stored as text, so they sort alphabetically.
            Self::Status => a
                .status
                .map(|s| s.as_str())
                .cmp(&b.status.map(|s| s.as_str())),
            Self::PaymentMode => payment_mode(a).cmp(&payment_mode(b)),
        }
    }
}

fn compare_amounts(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

fn payment_mode(row: &TransactionRow) -> Option<&str> {
    row.status_info.as_ref().map(|s| s.payment_mode.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortSpec {
    fn to_document(self) -> Document {
        let mut sort = Document::new();
        sort.insert(self.key.path(), self.direction.as_i32());
        if self.key != SortKey::CollectId {
            sort.insert(SortKey::CollectId.path(), 1);
        }
        sort
    }

    fn compare(&self, a: &TransactionRow, b: &TransactionRow) -> Ordering {
        let primary = match self.direction {
            SortDirection::Asc => self.key.compare(a, b),
            SortDirection::Desc => self.key.compare(b, a),
        };
        primary.then_with(|| a.collect_id.cmp(&b.collect_id))
    }
}

/// Free-text search: the client-facing custom order id, or the order id itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub raw: String,
    pub id: CanonicalId,
}

impl SearchTerm {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self {
            raw: raw.to_string(),
            id: CanonicalId::parse(raw)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Order belongs to the tenant.
    SchoolIs(CanonicalId),
    Search(SearchTerm),
    StatusIn(Vec<PaymentStatus>),
    /// Inclusive bounds on the joined payment time.
    PaymentTimeBetween {
        from: Option<DateTime>,
        to: Option<DateTime>,
    },
}

impl Predicate {
    /// Order-level predicates run before the join so they can use order indexes.
    pub fn applies_before_join(&self) -> bool {
        matches!(self, Self::SchoolIs(_) | Self::Search(_))
    }

    pub fn to_filter(&self) -> Document {
        match self {
            Self::SchoolIs(id) => doc! { "school_id": { "$in": id.lookup_candidates() } },
            Self::Search(term) => doc! {
                "$or": [
                    { "custom_order_id": term.raw.as_str() },
                    { "_id": { "$in": term.id.lookup_candidates() } },
                ]
            },
            Self::StatusIn(statuses) => {
                let values: Vec<Bson> = statuses
                    .iter()
                    .flat_map(PaymentStatus::stored_forms)
                    .map(Bson::from)
                    .collect();
                doc! { "status": { "$in": values } }
            }
            Self::PaymentTimeBetween { from, to } => {
                let mut range = Document::new();
                if let Some(from) = from {
                    range.insert("$gte", *from);
                }
                if let Some(to) = to {
                    range.insert("$lte", *to);
                }
                doc! { "payment_time": range }
            }
        }
    }

    pub fn matches(&self, order: &Order, status: Option<&OrderStatus>) -> bool {
        match self {
            Self::SchoolIs(id) => &order.school_id == id,
            Self::Search(term) => {
                order.custom_order_id.as_deref() == Some(term.raw.as_str()) || order.id == term.id
            }
            Self::StatusIn(statuses) => status.is_some_and(|s| statuses.contains(&s.status)),
            Self::PaymentTimeBetween { from, to } => status.is_some_and(|s| {
                from.is_none_or(|from| s.payment_time >= from)
                    && to.is_none_or(|to| s.payment_time <= to)
            }),
        }
    }
}

/// One row of the joined view. Status-derived fields are `None` when the order
/// has not been seeded or notified yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub collect_id: CanonicalId,
    #[serde(default)]
    pub school_id: Option<CanonicalId>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub order_amount: Option<f64>,
    #[serde(default)]
    pub transaction_amount: Option<f64>,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default)]
    pub payment_time: Option<DateTime>,
    #[serde(default)]
    pub status_info: Option<OrderStatus>,
}

impl TransactionRow {
    pub fn project(order: &Order, status: Option<&OrderStatus>) -> Self {
        Self {
            collect_id: order.id.clone(),
            school_id: Some(order.school_id.clone()),
            gateway: Some(order.gateway_name.clone()),
            order_amount: status.map(|s| s.order_amount),
            transaction_amount: status.map(|s| s.transaction_amount),
            status: status.map(|s| s.status),
            payment_time: status.map(|s| s.payment_time),
            status_info: status.cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPage {
    pub page: u64,
    pub limit: u64,
    /// Rows matching the filters, across all pages.
    pub total: u64,
    pub total_pages: u64,
    pub data: Vec<TransactionRow>,
}

impl TransactionPage {
    pub fn new(request: PageRequest, total: u64, data: Vec<TransactionRow>) -> Self {
        Self {
            page: request.page,
            limit: request.limit,
            total,
            total_pages: total_pages(total, request.limit),
            data,
        }
    }
}

pub fn total_pages(total: u64, limit: u64) -> u64 {
    total.div_ceil(limit.max(1)).max(1)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionQuery {
    pub predicates: Vec<Predicate>,
    pub sort: SortSpec,
    pub page: PageRequest,
}

impl TransactionQuery {
    /// Aggregation over the orders collection producing a single document
    /// `{ data: [row..], total: n }`.
    pub fn to_pipeline(&self, status_collection: &str) -> Vec<Document> {
        let mut pipeline = Vec::new();

        if let Some(filter) = conjunction(self.predicates.iter().filter(|p| p.applies_before_join()))
        {
            pipeline.push(doc! { "$match": filter });
        }

        pipeline.push(doc! {
            "$lookup": {
                "from": status_collection,
                "let": { "orderIdStr": { "$toString": "$_id" } },
                "pipeline": [
                    { "$match": { "$expr": { "$eq": [{ "$toString": "$collect_id" }, "$$orderIdStr"] } } },
                    { "$sort": { "updatedAt": -1 } },
                    { "$limit": 1 },
                ],
                "as": "status_info",
            }
        });
        pipeline.push(doc! {
            "$unwind": { "path": "$status_info", "preserveNullAndEmptyArrays": true }
        });
        pipeline.push(doc! {
            "$project": {
                "_id": 0,
                "collect_id": { "$toString": "$_id" },
                "school_id": 1,
                "gateway": "$gateway_name",
                "order_amount": { "$ifNull": ["$status_info.order_amount", null] },
                "transaction_amount": { "$ifNull": ["$status_info.transaction_amount", null] },
                "status": { "$ifNull": ["$status_info.status", null] },
                "payment_time": { "$ifNull": ["$status_info.payment_time", null] },
                "status_info": 1,
            }
        });

        if let Some(filter) =
            conjunction(self.predicates.iter().filter(|p| !p.applies_before_join()))
        {
            pipeline.push(doc! { "$match": filter });
        }

        pipeline.push(doc! { "$sort": self.sort.to_document() });
        pipeline.push(doc! {
            "$facet": {
                "data": [
                    { "$skip": bson_count(self.page.skip()) },
                    { "$limit": bson_count(self.page.limit) },
                ],
                "totalCount": [{ "$count": "count" }],
            }
        });
        pipeline.push(doc! {
            "$unwind": { "path": "$totalCount", "preserveNullAndEmptyArrays": true }
        });
        pipeline.push(doc! {
            "$project": { "data": 1, "total": { "$ifNull": ["$totalCount.count", 0] } }
        });

        pipeline
    }

    /// Decode the single document produced by [`to_pipeline`](Self::to_pipeline).
    pub fn read_page(&self, result: Option<Document>) -> Result<TransactionPage> {
        let Some(result) = result else {
            return Ok(TransactionPage::new(self.page, 0, Vec::new()));
        };

        let total = match result.get("total") {
            Some(Bson::Int32(n)) => *n as u64,
            Some(Bson::Int64(n)) => *n as u64,
            _ => 0,
        };

        let data = match result.get("data") {
            Some(Bson::Array(rows)) => rows
                .iter()
                .map(|row| match row {
                    Bson::Document(doc) => {
                        Ok(mongodb::bson::from_document::<TransactionRow>(doc.clone())?)
                    }
                    other => Err(PaymentError::Persistence(format!(
                        "unexpected transaction row: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        Ok(TransactionPage::new(self.page, total, data))
    }

    /// Run the query over in-memory records.
    pub fn evaluate(&self, orders: &[Order], statuses: &[OrderStatus]) -> TransactionPage {
        let mut latest: HashMap<&CanonicalId, &OrderStatus> = HashMap::new();
        for status in statuses {
            latest
                .entry(&status.collect_id)
                .and_modify(|current| {
                    if status.updated_at > current.updated_at {
                        *current = status;
                    }
                })
                .or_insert(status);
        }

        let mut rows: Vec<TransactionRow> = orders
            .iter()
            .filter_map(|order| {
                let status = latest.get(&order.id).copied();
                self.predicates
                    .iter()
                    .all(|p| p.matches(order, status))
                    .then(|| TransactionRow::project(order, status))
            })
            .collect();

        rows.sort_by(|a, b| self.sort.compare(a, b));

        let total = rows.len() as u64;
        let data = rows
            .into_iter()
            .skip(usize::try_from(self.page.skip()).unwrap_or(usize::MAX))
            .take(usize::try_from(self.page.limit).unwrap_or(usize::MAX))
            .collect();

        TransactionPage::new(self.page, total, data)
    }
}

/// Stage arguments are signed 64-bit in BSON; larger counts clamp to the maximum.
fn bson_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn conjunction<'a>(predicates: impl Iterator<Item = &'a Predicate>) -> Option<Document> {
    let filters: Vec<Document> = predicates.map(Predicate::to_filter).collect();
    match filters.len() {
        0 => None,
        1 => filters.into_iter().next(),
        _ => Some(doc! { "$and": filters }),
    }
}

/// Raw listing parameters as they arrive on the query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionQueryParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,
    pub search: Option<String>,
    pub status: Vec<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl TransactionQueryParams {
    /// Collect parameters from decoded query pairs. `status` may repeat and may
    /// hold a comma separated list; other repeated keys keep the last value.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "page" => params.page = Some(value),
                "limit" => params.limit = Some(value),
                "sortField" => params.sort_field = Some(value),
                "sortOrder" => params.sort_order = Some(value),
                "search" => params.search = Some(value),
                "status" => params.status.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                "dateFrom" => params.date_from = Some(value),
                "dateTo" => params.date_to = Some(value),
                _ => {}
            }
        }
        params
    }

    pub fn from_query_string(query: Option<&str>) -> Result<Self> {
        let pairs: Vec<(String, String)> = match query {
            Some(q) if !q.is_empty() => serde_urlencoded::from_str(q)
                .map_err(|e| PaymentError::validation(format!("invalid query string: {}", e)))?,
            _ => Vec::new(),
        };
        Ok(Self::from_pairs(pairs))
    }

    /// Validate and type the parameters. `school` adds the mandatory tenant filter.
    pub fn into_query(self, school: Option<CanonicalId>) -> Result<TransactionQuery> {
        let page = PageRequest::new(
            lenient_positive(self.page.as_deref(), DEFAULT_PAGE),
            lenient_positive(self.limit.as_deref(), DEFAULT_LIMIT),
        );

        let key = match non_blank(self.sort_field.as_deref()) {
            Some(field) => SortKey::parse(field)?,
            None => SortKey::default(),
        };
        let sort = SortSpec {
            key,
            direction: SortDirection::parse(self.sort_order.as_deref()),
        };

        let mut predicates = Vec::new();
        if let Some(school) = school {
            predicates.push(Predicate::SchoolIs(school));
        }
        if let Some(search) = non_blank(self.search.as_deref()) {
            predicates.push(Predicate::Search(SearchTerm::parse(search)?));
        }
        if !self.status.is_empty() {
            let mut statuses = self
                .status
                .iter()
                .map(|s| s.parse::<PaymentStatus>())
                .collect::<Result<Vec<_>>>()?;
            statuses.sort();
            statuses.dedup();
            predicates.push(Predicate::StatusIn(statuses));
        }

        let from = non_blank(self.date_from.as_deref())
            .map(|v| parse_date_bound(v, "dateFrom", false))
            .transpose()?;
        let to = non_blank(self.date_to.as_deref())
            .map(|v| parse_date_bound(v, "dateTo", true))
            .transpose()?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(PaymentError::validation("dateFrom must not be after dateTo"));
            }
        }
        if from.is_some() || to.is_some() {
            predicates.push(Predicate::PaymentTimeBetween { from, to });
        }

        Ok(TransactionQuery {
            predicates,
            sort,
            page,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Absent values take the default; zero, negative or unparsable values become 1.
fn lenient_positive(raw: Option<&str>, default: u64) -> u64 {
    match raw {
        None => default,
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 1)
            .map(|n| n as u64)
            .unwrap_or(1),
    }
}

/// RFC 3339 timestamps are taken as-is. A bare date covers the whole day, so an
/// upper bound moves to its last millisecond.
fn parse_date_bound(raw: &str, name: &str, end_of_day: bool) -> Result<DateTime> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(DateTime::from_chrono(ts.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::from_chrono(Utc.from_utc_datetime(&naive)));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        PaymentError::validation(format!(
            "{} must be an RFC 3339 timestamp or YYYY-MM-DD date",
            name
        ))
    })?;
    let naive = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| PaymentError::validation(format!("{} is out of range", name)))?;
    Ok(DateTime::from_chrono(Utc.from_utc_datetime(&naive)))
}
