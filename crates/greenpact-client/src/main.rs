mod commands;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use greenpact_core::{Confirmer, ContractId, ImageFile, Notifier, TracingNotifier};
use greenpact_face::{FaceConfig, FaceVerifier};
use greenpact_ops::{ContractOperations, OpsConfig};
use greenpact_platform::{ClientConfig, FileDescriptorStore, HttpBackend, RemoteFaceModel};
use greenpact_realtime::{ChannelConfig, ChannelHandle, ContractChannel, ReconnectPolicy};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::commands::{Command, FormEdit, HELP};

const DEFAULT_LOG_FILTER: &str = "greenpact_client=info,greenpact_realtime=info,greenpact_ops=info";

type InputLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

struct StdinConfirmer {
    lines: InputLines,
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        println!("{prompt} [y/N]");
        match self.lines.lock().await.next_line().await {
            Ok(Some(answer)) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

struct Session {
    channel: ContractChannel,
    ops: ContractOperations<ChannelHandle>,
    verifier: FaceVerifier<RemoteFaceModel, FileDescriptorStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    if config.access_token.is_none() {
        warn!("GREENPACT_ACCESS_TOKEN is not set, live contract updates are disabled");
    }

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let lines: InputLines = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));

    let channel = ContractChannel::connect(
        ChannelConfig::contracts(&config.websocket_url).with_reconnect(
            ReconnectPolicy::default().with_max_attempts(config.reconnect_max_attempts),
        ),
        config.access_token.clone(),
    );
    let backend = Arc::new(
        HttpBackend::new(
            &config.backend_url,
            config.access_token.clone(),
            config.request_timeout,
        )
        .context("failed to build backend client")?,
    );
    let ops = ContractOperations::new(
        channel.handle(),
        backend.clone(),
        backend,
        notifier.clone(),
        Arc::new(StdinConfirmer {
            lines: lines.clone(),
        }),
        OpsConfig {
            approval_ack_timeout: config.approval_ack_timeout,
        },
    );

    let model = RemoteFaceModel::new(config.face_inference_url.clone(), config.request_timeout)
        .context("failed to build face model client")?;
    let mut verifier = FaceVerifier::new(
        model,
        FileDescriptorStore::new(config.descriptor_path.clone()),
        notifier,
        FaceConfig {
            model_location: config.model_url.clone(),
            ..FaceConfig::default()
        },
    );
    if let Err(err) = verifier.load_models().await {
        warn!("face verification unavailable: {err}");
    }
    if let Some(username) = &config.username {
        ops.refresh_profile(username).await;
    }

    let mut snapshots = channel.snapshot();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            if !snapshot.loading {
                info!(
                    sequence = snapshot.sequence,
                    contracts = snapshot.contracts.len(),
                    "contract list updated"
                );
            }
        }
    });

    info!("client ready, type `help` for commands");
    let mut session = Session {
        channel,
        ops,
        verifier,
    };

    loop {
        let line = lines.lock().await.next_line().await?;
        let Some(line) = line else {
            break;
        };
        match commands::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(err) = session.run(command).await {
                    println!("error: {err:#}");
                }
            }
            Err(err) => println!("{err:#}"),
        }
    }

    session.channel.close().await;
    info!("client stopped");
    Ok(())
}

impl Session {
    async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::List => self.list(),
            Command::Show(contract_id) => self.show(&contract_id)?,
            Command::Update { contract_id, edits } => self.update(&contract_id, edits).await?,
            Command::Delete(contract_id) => {
                let outcome = self.ops.delete(&contract_id).await;
                println!("delete {contract_id}: {outcome:?}");
            }
            Command::Capture(path) => {
                let image = read_image(&path).await?;
                self.verifier.capture(image);
                println!("image captured, run `verify`");
            }
            Command::Verify => match self.verifier.verify().await {
                Ok(status) => println!("verification: {status:?}"),
                Err(err) => println!("verification failed: {err}"),
            },
            Command::Retry => {
                self.verifier.retry();
                println!("new verification session {}", self.verifier.session_id());
            }
            Command::ResetFace => self.verifier.reset_enrollment().await?,
            Command::UploadQr(path) => {
                let image = read_image(&path).await?;
                self.ops.upload_qr_code(image).await;
            }
            Command::Approve(contract_id) => self.approve(&contract_id).await,
            Command::Status => self.status().await,
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn list(&self) {
        if self.channel.is_loading() {
            println!("contracts are still loading ({:?})", self.channel.state());
            return;
        }
        let contracts = self.channel.contracts();
        if contracts.is_empty() {
            println!("no contracts");
        }
        for contract in contracts.iter() {
            println!(
                "{:<8} {:<10} {:<12} {:>8} @ {:<8} {:<16} {}",
                contract.id.as_str(),
                contract.status.as_str(),
                contract.crop,
                contract.quantity,
                contract.price,
                contract.farmer,
                contract.buyer,
            );
        }
    }

    fn show(&self, contract_id: &ContractId) -> Result<()> {
        let contracts = self.channel.contracts();
        let contract = contracts
            .iter()
            .find(|contract| &contract.id == contract_id)
            .with_context(|| format!("contract {contract_id} not found"))?;

        println!("contract {}", contract.id);
        println!("  status:    {}", contract.status);
        println!("  crop:      {}", contract.crop);
        println!("  farmer:    {}", contract.farmer);
        println!("  buyer:     {}", contract.buyer);
        println!("  quantity:  {}", contract.quantity);
        println!("  price:     {}", contract.price);
        if let Some(date) = contract.delivery_date {
            println!("  delivery:  {date}");
        }
        println!("  address:   {}", contract.delivery_address);
        for (index, term) in contract.terms.iter().enumerate() {
            println!("  term {index}:    {term}");
        }
        if let Some(pdf) = &contract.pdf_url {
            println!("  pdf:       {pdf}");
        }
        Ok(())
    }

    async fn update(&self, contract_id: &ContractId, edits: Vec<FormEdit>) -> Result<()> {
        let contract = self
            .channel
            .contracts()
            .iter()
            .find(|contract| &contract.id == contract_id)
            .cloned()
            .with_context(|| format!("contract {contract_id} not found"))?;

        let mut form = contract.to_form();
        let mut delivery_date = contract.delivery_date;
        for edit in edits {
            edit.apply(&mut form, &mut delivery_date)?;
        }
        let delivery_date =
            delivery_date.context("contract has no delivery date, pass date=YYYY-MM-DD")?;
        form.validate(delivery_date, Utc::now().date_naive())?;

        self.ops
            .update(contract_id, &form, delivery_date, contract.status)
            .await;
        Ok(())
    }

    async fn approve(&mut self, contract_id: &ContractId) {
        let mut close_dialog = false;
        let result = self
            .ops
            .approve(
                contract_id,
                self.verifier.status(),
                self.ops.qr_code_uploaded().await,
                || close_dialog = true,
            )
            .await;

        match result {
            Ok(()) if close_dialog => {
                self.verifier.retry();
                self.ops.reset_qr_code().await;
                println!("approval sent for {contract_id}");
            }
            Ok(()) => {}
            Err(err) => println!("cannot approve {contract_id}: {err}"),
        }
    }

    async fn status(&self) {
        println!("channel:       {:?}", self.channel.state());
        println!("contracts:     {}", self.channel.contracts().len());
        println!("models:        {:?}", self.verifier.model_phase());
        println!("face enrolled: {}", self.verifier.is_enrolled());
        println!("verification:  {:?}", self.verifier.session_phase());
        if let Some(distance) = self.verifier.last_distance() {
            println!("distance:      {distance:.2}");
        }
        println!("qr on file:    {}", self.ops.has_existing_qr_code().await);
        println!("qr uploaded:   {}", self.ops.qr_code_uploaded().await);
        println!("approving:     {:?}", self.ops.approving_ids().await);
        println!("deleting:      {:?}", self.ops.deleting_ids().await);
    }
}

async fn read_image(path: &Path) -> Result<ImageFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(ImageFile::new(file_name, bytes))
}
