use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use greenpact_core::{ContractForm, ContractId};
use rust_decimal::Decimal;

pub const HELP: &str = "\
commands:
  list                         show all contracts
  show <id>                    show one contract
  update <id> [quantity=N] [price=N] [date=YYYY-MM-DD]
              [address=TEXT] [term+=TEXT] [term-=INDEX]
  delete <id>                  delete a contract (asks for confirmation)
  capture <image-path>         capture a face image
  verify                       verify the captured face
  retry                        start a new verification attempt
  reset-face                   forget the enrolled face
  upload-qr <image-path>       upload a payment QR code
  approve <id>                 approve a contract
  status                       show session state
  help                         show this text
  quit                         exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Show(ContractId),
    Update {
        contract_id: ContractId,
        edits: Vec<FormEdit>,
    },
    Delete(ContractId),
    Capture(PathBuf),
    Verify,
    Retry,
    ResetFace,
    UploadQr(PathBuf),
    Approve(ContractId),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEdit {
    Quantity(Decimal),
    Price(Decimal),
    Date(NaiveDate),
    Address(String),
    AddTerm(String),
    RemoveTerm(usize),
}

impl FormEdit {
    pub fn apply(self, form: &mut ContractForm, delivery_date: &mut Option<NaiveDate>) -> Result<()> {
        match self {
            Self::Quantity(quantity) => form.quantity = quantity,
            Self::Price(price) => form.nego_price = price,
            Self::Date(date) => *delivery_date = Some(date),
            Self::Address(address) => form.delivery_address = address,
            Self::AddTerm(term) => form.add_term(term),
            Self::RemoveTerm(index) => {
                form.remove_term(index)
                    .with_context(|| format!("no term at index {index}"))?;
            }
        }
        Ok(())
    }

    fn push_text(&mut self, word: &str) -> bool {
        match self {
            Self::Address(text) | Self::AddTerm(text) => {
                text.push(' ');
                text.push_str(word);
                true
            }
            _ => false,
        }
    }
}

pub fn parse(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match name {
        "list" => Command::List,
        "show" => Command::Show(contract_id(&rest)?),
        "update" => {
            let contract_id = contract_id(&rest)?;
            Command::Update {
                contract_id,
                edits: parse_edits(&rest[1..])?,
            }
        }
        "delete" => Command::Delete(contract_id(&rest)?),
        "capture" => Command::Capture(path(&rest, "capture")?),
        "verify" => Command::Verify,
        "retry" => Command::Retry,
        "reset-face" => Command::ResetFace,
        "upload-qr" => Command::UploadQr(path(&rest, "upload-qr")?),
        "approve" => Command::Approve(contract_id(&rest)?),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command {other:?}, type `help` for a list"),
    };
    Ok(Some(command))
}

fn contract_id(rest: &[&str]) -> Result<ContractId> {
    rest.first()
        .map(|id| ContractId::from(*id))
        .context("missing contract id")
}

fn path(rest: &[&str], command: &str) -> Result<PathBuf> {
    if rest.is_empty() {
        bail!("{command} needs an image path");
    }
    Ok(PathBuf::from(rest.join(" ")))
}

fn parse_edits(words: &[&str]) -> Result<Vec<FormEdit>> {
    let mut edits: Vec<FormEdit> = Vec::new();
    for word in words {
        let Some((key, value)) = word.split_once('=') else {
            if !edits.last_mut().is_some_and(|edit| edit.push_text(word)) {
                bail!("expected key=value, got {word:?}");
            }
            continue;
        };
        let edit = match key {
            "quantity" => FormEdit::Quantity(number(key, value)?),
            "price" => FormEdit::Price(number(key, value)?),
            "date" => FormEdit::Date(
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .with_context(|| format!("date must be YYYY-MM-DD, got {value:?}"))?,
            ),
            "address" => FormEdit::Address(value.to_string()),
            "term+" => FormEdit::AddTerm(value.to_string()),
            "term-" => FormEdit::RemoveTerm(
                value
                    .parse()
                    .with_context(|| format!("term index must be a number, got {value:?}"))?,
            ),
            other => bail!("unknown field {other:?}"),
        };
        edits.push(edit);
    }
    Ok(edits)
}

fn number(key: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("{key} must be a number, got {value:?}"))
}
