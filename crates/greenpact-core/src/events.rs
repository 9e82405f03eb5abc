use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{Contract, ContractId, ContractStatus, ContractUpdate};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChannelRequest {
    FetchContracts,
    UpdateContract {
        contract_id: ContractId,
        data: ContractUpdate,
    },
    DeleteContract {
        contract_id: ContractId,
    },
    #[serde(rename = "approve_contracts")]
    ApproveContract {
        contract_id: ContractId,
    },
}

impl ChannelRequest {
    pub fn action(&self) -> &'static str {
        match self {
            Self::FetchContracts => "fetch_contracts",
            Self::UpdateContract { .. } => "update_contract",
            Self::DeleteContract { .. } => "delete_contract",
            Self::ApproveContract { .. } => "approve_contracts",
        }
    }

    pub fn contract_id(&self) -> Option<&ContractId> {
        match self {
            Self::FetchContracts => None,
            Self::UpdateContract { contract_id, .. }
            | Self::DeleteContract { contract_id }
            | Self::ApproveContract { contract_id } => Some(contract_id),
        }
    }

    pub fn to_envelope(&self, token: &str) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            token: &'a str,
            #[serde(flatten)]
            request: &'a ChannelRequest,
        }

        serde_json::to_string(&Envelope {
            token,
            request: self,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Snapshot {
        contracts: Vec<Contract>,
        version: Option<u64>,
    },
    Acknowledged,
    Rejected {
        message: String,
    },
    Unknown,
}

impl InboundMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::dispatch(&value))
    }

    pub fn dispatch(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Unknown;
        };

        if let Some(data) = object.get("data").filter(|data| is_truthy(data)) {
            return Self::Snapshot {
                contracts: project_snapshot(data),
                version: object.get("version").and_then(Value::as_u64),
            };
        }

        if let Some(error) = object.get("error") {
            let message = match error {
                Value::String(message) => message.clone(),
                other => other.to_string(),
            };
            return Self::Rejected { message };
        }

        match object.get("success") {
            Some(success) if is_truthy(success) => Self::Acknowledged,
            Some(_) => Self::Rejected {
                message: "request was not successful".to_string(),
            },
            None => {
                debug!(keys = ?object.keys().collect::<Vec<_>>(), "ignoring unknown channel message");
                Self::Unknown
            }
        }
    }
}

/// Contract record as the server serializes it. Each field is read on its
/// own, a mistyped one falls back to its default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerContract {
    pub contract_id: Option<Value>,
    pub crop_name: Option<Value>,
    pub farmer_name: Option<Value>,
    pub buyer_name: Option<Value>,
    pub quantity: Option<Value>,
    pub nego_price: Option<Value>,
    pub delivery_date: Option<Value>,
    pub delivery_address: Option<Value>,
    pub created_at: Option<Value>,
    pub terms: Option<Value>,
    pub status: Option<Value>,
    pub completed: Option<Value>,
    pub qr_code: Option<Value>,
    pub pdf_url: Option<Value>,
}

impl ServerContract {
    pub fn into_contract(self, raw: Value) -> Contract {
        let status = if self.completed.as_ref().is_some_and(is_truthy) {
            ContractStatus::Completed
        } else if self.status.as_ref().is_some_and(is_truthy) {
            ContractStatus::Active
        } else {
            ContractStatus::Pending
        };

        Contract {
            id: ContractId::new(self.contract_id.as_ref().map(id_text).unwrap_or_default()),
            crop: text(self.crop_name.as_ref()),
            farmer: text(self.farmer_name.as_ref()),
            buyer: text(self.buyer_name.as_ref()),
            quantity: self.quantity.as_ref().map(decimal_from).unwrap_or_default(),
            price: self.nego_price.as_ref().map(decimal_from).unwrap_or_default(),
            delivery_date: string(self.delivery_date.as_ref()).and_then(parse_date),
            status,
            terms: self.terms.as_ref().map(terms_from).unwrap_or_default(),
            delivery_address: text(self.delivery_address.as_ref()),
            created_at: string(self.created_at.as_ref()).and_then(parse_timestamp),
            qr_code: string(self.qr_code.as_ref()).map(str::to_string),
            pdf_url: string(self.pdf_url.as_ref()).map(str::to_string),
            raw,
        }
    }
}

/// Projects a snapshot payload into the client list.
///
/// Anything other than an array of objects yields an empty list. Duplicate
/// ids collapse onto the first position, keeping the later record.
pub fn project_snapshot(data: &Value) -> Vec<Contract> {
    let Some(records) = data.as_array() else {
        warn!("snapshot data is not an array, treating as empty");
        return Vec::new();
    };
    if records.iter().any(|record| !record.is_object()) {
        warn!("snapshot holds a non-object record, treating as empty");
        return Vec::new();
    }

    let mut contracts: Vec<Contract> = Vec::with_capacity(records.len());
    let mut positions: HashMap<ContractId, usize> = HashMap::with_capacity(records.len());

    for record in records {
        let server: ServerContract = match serde_json::from_value(record.clone()) {
            Ok(server) => server,
            Err(err) => {
                warn!("skipping unreadable contract record: {err}");
                continue;
            }
        };
        let contract = server.into_contract(record.clone());
        match positions.get(&contract.id) {
            Some(&index) => contracts[index] = contract,
            None => {
                positions.insert(contract.id.clone(), contracts.len());
                contracts.push(contract);
            }
        }
    }

    contracts
}

fn string(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(scalar @ (Value::Number(_) | Value::Bool(_))) => scalar.to_string(),
        _ => String::new(),
    }
}

fn terms_from(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| text(Some(item)))
        .filter(|term| !term.is_empty())
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn decimal_from(value: &Value) -> Decimal {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        _ => return Decimal::ZERO,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .unwrap_or_default()
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(text).map(|ts| ts.date_naive()))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, status: Value) -> Value {
        json!({
            "contract_id": id,
            "crop_name": "Wheat",
            "farmer_name": "Asha",
            "buyer_name": "AgroCorp",
            "quantity": 100,
            "nego_price": 2400,
            "delivery_date": "2026-12-01",
            "delivery_address": "Pune mandi",
            "created_at": "2026-10-01T09:30:00.123456Z",
            "terms": ["Grade A"],
            "status": status,
        })
    }

    #[test]
    fn envelope_carries_token_and_action() {
        let request = ChannelRequest::ApproveContract {
            contract_id: ContractId::from("c-1"),
        };
        let value: Value = serde_json::from_str(&request.to_envelope("tok").unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"token": "tok", "action": "approve_contracts", "contract_id": "c-1"})
        );
    }

    #[test]
    fn fetch_envelope_has_only_token_and_action() {
        let value: Value =
            serde_json::from_str(&ChannelRequest::FetchContracts.to_envelope("tok").unwrap())
                .unwrap();
        assert_eq!(value, json!({"token": "tok", "action": "fetch_contracts"}));
    }

    #[test]
    fn status_projection_follows_server_boolean() {
        let contracts = project_snapshot(&json!([
            record("a", json!(true)),
            record("b", json!(false)),
            record("c", Value::Null),
        ]));
        let statuses: Vec<_> = contracts.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                ContractStatus::Active,
                ContractStatus::Pending,
                ContractStatus::Pending
            ]
        );
    }

    #[test]
    fn absent_status_and_terms_default() {
        let contracts = project_snapshot(&json!([{ "contract_id": "x" }]));
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].status, ContractStatus::Pending);
        assert!(contracts[0].terms.is_empty());
        assert_eq!(contracts[0].quantity, Decimal::ZERO);
    }

    #[test]
    fn completed_signal_overrides_status() {
        let mut completed = record("a", json!(true));
        completed["completed"] = json!(true);
        let contracts = project_snapshot(&json!([completed]));
        assert_eq!(contracts[0].status, ContractStatus::Completed);
    }

    #[test]
    fn fields_are_renamed_and_parsed() {
        let contracts = project_snapshot(&json!([record("a", json!(true))]));
        let contract = &contracts[0];
        assert_eq!(contract.id.as_str(), "a");
        assert_eq!(contract.crop, "Wheat");
        assert_eq!(contract.farmer, "Asha");
        assert_eq!(contract.buyer, "AgroCorp");
        assert_eq!(contract.price, Decimal::new(2400, 0));
        assert_eq!(
            contract.delivery_date,
            NaiveDate::from_ymd_opt(2026, 12, 1)
        );
        assert!(contract.created_at.is_some());
        assert_eq!(contract.raw["crop_name"], "Wheat");
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let mut naive = record("a", json!(true));
        naive["created_at"] = json!("2026-10-01T09:30:00");
        let contracts = project_snapshot(&json!([naive]));
        assert_eq!(
            contracts[0].created_at.map(|ts| ts.to_rfc3339()),
            Some("2026-10-01T09:30:00+00:00".to_string())
        );
    }

    #[test]
    fn non_array_data_degrades_to_empty() {
        assert!(project_snapshot(&json!({"contract_id": "a"})).is_empty());
        assert!(project_snapshot(&json!("oops")).is_empty());
        assert!(project_snapshot(&json!([record("a", json!(true)), 7])).is_empty());
    }

    #[test]
    fn mistyped_fields_fall_back_per_field() {
        let mut odd = record("b", json!(true));
        odd["delivery_date"] = json!(20261201);
        odd["crop_name"] = json!(42);
        odd["completed"] = json!(1);
        odd["terms"] = json!(["Grade A", null, 7, {"x": 1}]);
        odd["quantity"] = json!("lots");
        odd["created_at"] = json!(false);
        odd["qr_code"] = json!(3);

        let contracts = project_snapshot(&json!([record("a", json!(false)), odd]));
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts[0].crop, "Wheat");

        let contract = &contracts[1];
        assert_eq!(contract.id.as_str(), "b");
        assert_eq!(contract.delivery_date, None);
        assert_eq!(contract.crop, "42");
        assert_eq!(contract.status, ContractStatus::Completed);
        assert_eq!(contract.terms, vec!["Grade A", "7"]);
        assert_eq!(contract.quantity, Decimal::ZERO);
        assert_eq!(contract.price, Decimal::new(2400, 0));
        assert_eq!(contract.created_at, None);
        assert_eq!(contract.qr_code, None);
        assert_eq!(contract.farmer, "Asha");
    }

    #[test]
    fn non_list_terms_and_null_names_default() {
        let mut odd = record("a", json!(true));
        odd["terms"] = json!("Grade A");
        odd["farmer_name"] = Value::Null;
        odd["completed"] = json!(0);

        let contracts = project_snapshot(&json!([odd]));
        assert_eq!(contracts.len(), 1);
        assert!(contracts[0].terms.is_empty());
        assert_eq!(contracts[0].farmer, "");
        assert_eq!(contracts[0].status, ContractStatus::Active);
    }

    #[test]
    fn duplicate_ids_collapse_to_one() {
        let contracts = project_snapshot(&json!([
            record("a", json!(false)),
            record("b", json!(false)),
            record("a", json!(true)),
        ]));
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts[0].id.as_str(), "a");
        assert_eq!(contracts[0].status, ContractStatus::Active);
    }

    #[test]
    fn dispatch_table() {
        assert!(matches!(
            InboundMessage::parse(r#"{"data": [], "version": 4}"#).unwrap(),
            InboundMessage::Snapshot { version: Some(4), .. }
        ));
        assert_eq!(
            InboundMessage::parse(r#"{"success": true}"#).unwrap(),
            InboundMessage::Acknowledged
        );
        assert_eq!(
            InboundMessage::parse(r#"{"error": "Authentication failed"}"#).unwrap(),
            InboundMessage::Rejected {
                message: "Authentication failed".to_string()
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type": "chat"}"#).unwrap(),
            InboundMessage::Unknown
        );
        assert_eq!(InboundMessage::parse("[1]").unwrap(), InboundMessage::Unknown);
        assert_eq!(
            InboundMessage::parse(r#"{"data": null}"#).unwrap(),
            InboundMessage::Unknown
        );
        assert_eq!(
            InboundMessage::parse(r#"{"data": null, "success": true}"#).unwrap(),
            InboundMessage::Acknowledged
        );
        assert!(matches!(
            InboundMessage::parse(r#"{"data": "not a list"}"#).unwrap(),
            InboundMessage::Snapshot { ref contracts, .. } if contracts.is_empty()
        ));
        assert!(InboundMessage::parse("not json").is_err());
    }
}
