use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("descriptor storage i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored descriptor is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model asset {name} is missing: {reason}")]
    Missing { name: String, reason: String },
    #[error("model asset {name} is invalid: {reason}")]
    Invalid { name: String, reason: String },
    #[error("face inference unavailable: {0}")]
    Unavailable(String),
    #[error("face inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor must have {expected} values, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("descriptor contains non-finite values")]
    NonFinite,
}

#[derive(Debug, Error, PartialEq)]
pub enum FormError {
    #[error("delivery address is required")]
    MissingAddress,
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("price must not be negative, got {0}")]
    NegativePrice(Decimal),
    #[error("delivery date {delivery_date} is before today ({today})")]
    DeliveryDateInPast {
        delivery_date: NaiveDate,
        today: NaiveDate,
    },
}
