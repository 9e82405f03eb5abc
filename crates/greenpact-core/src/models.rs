use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DescriptorError, FormError};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContractId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Pending,
    Active,
    Completed,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: ContractId,
    pub crop: String,
    pub farmer: String,
    pub buyer: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub delivery_date: Option<NaiveDate>,
    pub status: ContractStatus,
    pub terms: Vec<String>,
    #[serde(rename = "delivery_address")]
    pub delivery_address: String,
    pub created_at: Option<DateTime<Utc>>,
    pub qr_code: Option<String>,
    pub pdf_url: Option<String>,
    pub raw: Value,
}

impl Contract {
    pub fn to_form(&self) -> ContractForm {
        ContractForm {
            delivery_address: self.delivery_address.clone(),
            quantity: self.quantity,
            nego_price: self.price,
            terms: self.terms.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractForm {
    pub delivery_address: String,
    pub quantity: Decimal,
    pub nego_price: Decimal,
    pub terms: Vec<String>,
}

impl ContractForm {
    pub fn validate(&self, delivery_date: NaiveDate, today: NaiveDate) -> Result<(), FormError> {
        if self.delivery_address.trim().is_empty() {
            return Err(FormError::MissingAddress);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(FormError::NonPositiveQuantity(self.quantity));
        }
        if self.nego_price < Decimal::ZERO {
            return Err(FormError::NegativePrice(self.nego_price));
        }
        if delivery_date < today {
            return Err(FormError::DeliveryDateInPast {
                delivery_date,
                today,
            });
        }
        Ok(())
    }

    pub fn add_term(&mut self, term: impl Into<String>) {
        self.terms.push(term.into());
    }

    pub fn remove_term(&mut self, index: usize) -> Option<String> {
        (index < self.terms.len()).then(|| self.terms.remove(index))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractUpdate {
    pub delivery_address: String,
    pub delivery_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub nego_price: Decimal,
    pub terms: Vec<String>,
    pub status: bool,
}

impl ContractUpdate {
    pub fn compose(
        form: &ContractForm,
        delivery_date: NaiveDate,
        current_status: ContractStatus,
    ) -> Self {
        Self {
            delivery_address: form.delivery_address.clone(),
            delivery_date,
            quantity: form.quantity,
            nego_price: form.nego_price,
            terms: form.terms.clone(),
            status: current_status.is_active(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub qr_code_image: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn has_qr_code(&self) -> bool {
        self.qr_code_image
            .as_deref()
            .is_some_and(|image| !image.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub fields: Vec<(String, String)>,
    pub qr_code_image: Option<ImageFile>,
}

impl ProfileUpdate {
    pub fn qr_code(image: ImageFile) -> Self {
        Self {
            fields: Vec::new(),
            qr_code_image: Some(image),
        }
    }
}

pub type CapturedImage = ImageFile;

pub const DESCRIPTOR_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn euclidean_distance(&self, other: &FaceDescriptor) -> f32 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for FaceDescriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        if values.len() != DESCRIPTOR_LEN {
            return Err(DescriptorError::Length {
                expected: DESCRIPTOR_LEN,
                actual: values.len(),
            });
        }
        if values.iter().any(|value| !value.is_finite()) {
            return Err(DescriptorError::NonFinite);
        }
        Ok(Self(values))
    }
}

impl From<FaceDescriptor> for Vec<f32> {
    fn from(descriptor: FaceDescriptor) -> Self {
        descriptor.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Unknown,
    Matched,
    Rejected,
}

impl VerificationStatus {
    pub fn is_matched(self) -> bool {
        self == Self::Matched
    }
}
