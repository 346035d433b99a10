//! Recovery demo binary.
//!
//! Runs the full recovery flow against the in-memory ledger and reference
//! proving backend, with friends verifying concurrently.
//!
//! Run with:
//!   cargo run --bin recovery-demo -- keygen --count 6 --out allkeys.json
//!   cargo run --bin recovery-demo -- run --config recovery.toml

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use tracing::info;

use social_recovery::adapters::json_keystore::JsonKeyStore;
use social_recovery::adapters::memory_ledger::InMemoryLedger;
use social_recovery::adapters::proof_adapter::ProofAdapter;
use social_recovery::adapters::reference_backend::ReferenceBackend;
use social_recovery::config::{ConfigError, RecoveryConfig};
use social_recovery::domain::encoding::bits_to_bytes;
use social_recovery::orchestrator::{
    audit_verification_proofs, verified_slots, verify_as_friend, PrepareTarget, ProtocolError,
    RecoveryPlan, RecoverySession,
};
use social_recovery::ports::keystore::KeyStoreError;
use social_recovery::ports::ledger::LedgerPort as _;

#[derive(Parser)]
#[command(name = "recovery-demo", about = "Social-recovery key migration demo")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a key-store file of fresh accounts.
    Keygen {
        #[arg(long, default_value_t = 6)]
        count: usize,
        #[arg(long, default_value = "./allkeys.json")]
        out: PathBuf,
    },
    /// Run the full recovery scenario.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "./recovery.toml")]
        config: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("friend task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("no account at key-store position {0}")]
    MissingAccount(usize),
}

/// Print a step header, called at the start of each named phase.
fn step(n: u8, total: u8, msg: &str) {
    info!("");
    info!("┌─[{n}/{total}] {msg}");
}

fn account_at(keys: &JsonKeyStore, position: usize) -> Result<Address, DemoError> {
    keys.nth(position)
        .map(|account| account.address)
        .ok_or(DemoError::MissingAccount(position))
}

/// Key-store paths are relative to the config file.
fn resolve(config_path: &Path, keystore: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if keystore.is_relative() => dir.join(keystore),
        _ => keystore.to_path_buf(),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), DemoError> {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_level(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Args::parse().command {
        Command::Keygen { count, out } => {
            JsonKeyStore::generate(count).save(&out)?;
            info!("wrote {count} accounts to {}", out.display());
            Ok(())
        }
        Command::Run { config } => run(&config).await,
    }
}

async fn run(config_path: &Path) -> Result<(), DemoError> {
    const TOTAL: u8 = 8;

    // ── Step 1: Config and accounts ──
    step(1, TOTAL, &format!("Loading config from {}", config_path.display()));
    let config = RecoveryConfig::load(config_path)?;
    let scenario = &config.scenario;
    let keys = Arc::new(JsonKeyStore::load(resolve(config_path, &scenario.keystore))?);
    let old = account_at(&keys, scenario.old_account)?;
    let new = account_at(&keys, scenario.new_account)?;
    let friends = scenario
        .friends
        .iter()
        .map(|&position| account_at(&keys, position))
        .collect::<Result<Vec<_>, _>>()?;
    info!("old account {old}, new account {new}, {} friends", friends.len());

    let params = config.protocol;
    let prover = Arc::new(
        ProofAdapter::new(ReferenceBackend::new(params, config.prover.setup_seed), params)
            .with_timeout(config.prover.timeout),
    );
    let ledger = Arc::new(InMemoryLedger::new(prover.clone()));
    ledger.fund(old, U256::from(scenario.funding)).await;

    let plan = RecoveryPlan {
        friends: friends.clone(),
        passphrase: scenario.passphrase.clone(),
        threshold: scenario.threshold,
    };

    // ── Step 2: Commit ──
    step(2, TOTAL, "Committing friend set from the old account...");
    let mut holder = RecoverySession::new(ledger.clone(), prover.clone(), keys.clone(), plan.clone())?;
    let committed = holder
        .commit(old, U256::from(scenario.limit), scenario.note.clone())
        .await?;
    info!("commit #{} root {}", committed.commit_index, committed.commit_root);

    // ── Step 3: Pre-transfer ──
    step(3, TOTAL, "Claiming from the new account...");
    let mut claimant = RecoverySession::resume(
        ledger.clone(),
        prover.clone(),
        keys.clone(),
        plan,
        committed.commit_index,
    )
    .await?;
    let notes = vec![scenario.note.clone(); friends.len()];
    let pre = claimant.pre_transfer(new, &notes).await?;
    info!(
        "pre-transfer #{} published {} invitations",
        pre.pre_transfer_index,
        pre.invitations.len()
    );

    // ── Step 4: Friends verify concurrently ──
    step(4, TOTAL, "Friends scanning invitations and verifying...");
    let mut tasks = Vec::with_capacity(friends.len());
    for friend in friends.iter().copied() {
        let ledger = ledger.clone();
        let keys = keys.clone();
        let pre_transfer_index = pre.pre_transfer_index;
        tasks.push(tokio::spawn(async move {
            verify_as_friend(ledger.as_ref(), keys.as_ref(), &params, friend, pre_transfer_index).await
        }));
    }
    let mut verification_indices = Vec::with_capacity(tasks.len());
    for task in tasks {
        let verified = task.await??;
        if let Some(invitation) = &verified.invitation {
            info!("  invitation for {} says: {:?}", invitation.claimed_address, invitation.note);
        }
        verification_indices.push(verified.verification_index);
    }

    // ── Step 5: Collect receipts ──
    step(5, TOTAL, "Collecting verification receipts...");
    let notices = ledger.verification_notices(0).await;
    let batch = claimant.collect_verifications(&notices).await?;
    info!(
        "{} receipts collected, {} skipped",
        batch.collected.len(),
        batch.failures.len()
    );
    audit_verification_proofs(ledger.as_ref(), &verification_indices).await?;

    // ── Step 6: Genuine and decoy preparations ──
    step(6, TOTAL, "Preparing verified slots...");
    for collected in &batch.collected {
        claimant.prepare(PrepareTarget::Genuine(collected)).await?;
    }
    for decoy in 0..scenario.decoys {
        claimant.prepare(PrepareTarget::Decoy(decoy)).await?;
    }
    let record = ledger.pre_transfer(pre.pre_transfer_index).await.map_err(ProtocolError::from)?;
    info!(
        "bitmap {} slots {:?}",
        hex::encode(bits_to_bytes(record.verified.bits())),
        verified_slots(&record)
    );

    // ── Step 7: Transfer ──
    step(7, TOTAL, "Transferring...");
    let transferred = claimant.transfer().await?;
    info!("moved {} from {} to {}", transferred.amount, transferred.from, transferred.to);

    // ── Step 8: Balances ──
    step(8, TOTAL, "Final balances");
    info!("old {old}: {}", ledger.balance(old).await);
    info!("new {new}: {}", ledger.balance(new).await);
    Ok(())
}
