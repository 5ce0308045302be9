//! Price domain types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shipping disposition reported by a seller page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    Free,
    Paid,
    /// The site does not charge shipping separately
    NotApplicable,
    /// Shipping could not be determined (failed fetch, sold out, ...)
    Unavailable,
}

/// Price observed for one seller of one work item
///
/// `total` is always `price + shipping_fee` (fee defaulting to 0) when a
/// price is known and `None` otherwise. Fields are private so the only way
/// to build one is through the constructors, and deserialization recomputes
/// the total from its parts. A total that does not fit an `i64` turns the
/// result into an error result, or a deserialization error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriceRecord")]
pub struct PriceResult {
    seller: String,
    url: String,
    price: Option<i64>,
    shipping_fee: Option<i64>,
    shipping: ShippingStatus,
    total: Option<i64>,
    extracted_at: chrono::DateTime<chrono::Utc>,
    error: Option<String>,
}

impl PriceResult {
    pub fn new(
        seller: impl Into<String>,
        url: impl Into<String>,
        price: Option<i64>,
        shipping_fee: Option<i64>,
        shipping: ShippingStatus,
    ) -> Self {
        let (seller, url) = (seller.into(), url.into());
        match compute_total(price, shipping_fee) {
            Ok(total) => Self {
                seller,
                url,
                price,
                shipping_fee,
                shipping,
                total,
                extracted_at: chrono::Utc::now(),
                error: None,
            },
            Err(e) => Self::failed(seller, url, e.to_string()),
        }
    }

    /// A seller whose page could not be fetched or parsed
    pub fn failed(
        seller: impl Into<String>,
        url: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            seller: seller.into(),
            url: url.into(),
            price: None,
            shipping_fee: None,
            shipping: ShippingStatus::Unavailable,
            total: None,
            extracted_at: chrono::Utc::now(),
            error: Some(error.into()),
        }
    }

    /// Relabels the result for the seller it was crawled for
    pub fn with_seller(mut self, seller: impl Into<String>) -> Self {
        self.seller = seller.into();
        self
    }

    pub fn seller(&self) -> &str {
        &self.seller
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn price(&self) -> Option<i64> {
        self.price
    }

    pub fn shipping_fee(&self) -> Option<i64> {
        self.shipping_fee
    }

    pub fn shipping(&self) -> ShippingStatus {
        self.shipping
    }

    pub fn total(&self) -> Option<i64> {
        self.total
    }

    pub fn extracted_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.extracted_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.price.is_some()
    }
}

/// Price plus shipping fee does not fit the amount type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("price total out of range: {price} + {shipping_fee}")]
pub struct TotalOverflow {
    pub price: i64,
    pub shipping_fee: i64,
}

fn compute_total(
    price: Option<i64>,
    shipping_fee: Option<i64>,
) -> Result<Option<i64>, TotalOverflow> {
    let Some(price) = price else {
        return Ok(None);
    };
    let shipping_fee = shipping_fee.unwrap_or(0);
    price
        .checked_add(shipping_fee)
        .map(Some)
        .ok_or(TotalOverflow {
            price,
            shipping_fee,
        })
}

/// Wire shape of [`PriceResult`]; any serialized `total` is ignored
#[derive(Deserialize)]
struct PriceRecord {
    seller: String,
    url: String,
    price: Option<i64>,
    #[serde(default)]
    shipping_fee: Option<i64>,
    shipping: ShippingStatus,
    extracted_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    error: Option<String>,
}

impl TryFrom<PriceRecord> for PriceResult {
    type Error = TotalOverflow;

    fn try_from(record: PriceRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            total: compute_total(record.price, record.shipping_fee)?,
            seller: record.seller,
            url: record.url,
            price: record.price,
            shipping_fee: record.shipping_fee,
            shipping: record.shipping,
            extracted_at: record.extracted_at,
            error: record.error,
        })
    }
}
