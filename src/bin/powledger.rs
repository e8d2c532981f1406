#![forbid(unsafe_code)]
//! Seed a ledger with synthetic accounts and transfers, then mine until the
//! pending pool is empty.

use clap::Parser;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use powledger::blockchain::{Ledger, SolvencyPolicy};
use powledger::config::load_config;
use powledger::events::{ChainEvent, ChainObserver};
use powledger::generator::Generator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "powledger", version, about = "Single-node proof-of-work ledger simulator")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Required leading hex characters of every block hash
    #[arg(short, long)]
    difficulty: Option<String>,

    /// Number of accounts to generate
    #[arg(short, long)]
    accounts: Option<usize>,

    /// Number of transfers to generate
    #[arg(short, long)]
    transactions: Option<usize>,

    /// Transactions per block
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Mining threads (0 = all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// RNG seed for repeatable runs
    #[arg(long)]
    seed: Option<u64>,

    /// Reject blocks that would overdraw an account
    #[arg(long)]
    strict: bool,
}

/// Prints mining narration to the terminal.
struct ConsoleObserver;

impl ChainObserver for ConsoleObserver {
    fn notify(&self, event: &ChainEvent) {
        match event {
            ChainEvent::GenesisCreated { hash } => {
                println!("{} Genesis block created", "[INIT]".bright_cyan().bold());
                println!("       Hash: {}\n", hash.bright_white());
            }
            ChainEvent::MiningStarted {
                index,
                transactions,
                prev_hash,
                prefix,
            } => {
                println!("{}", "=".repeat(60).dimmed());
                println!("{} Mining block #{}", "[MINING]".yellow().bold(), index);
                println!("         Previous hash: {}...", &prev_hash[..prev_hash.len().min(16)]);
                println!("         Transactions:  {}", transactions);
                println!("         Target:        hash starts with '{}'", prefix);
            }
            ChainEvent::MiningProgress { attempts, nonce, .. } => {
                println!("{} attempts: {}, nonce={}", "[MINING]".yellow(), attempts, nonce);
            }
            ChainEvent::BlockMined {
                hash,
                nonce,
                attempts,
                elapsed,
                ..
            } => {
                println!("{} Proof of work found", "[FOUND]".bright_green().bold());
                println!("        nonce    = {}", nonce);
                println!("        hash     = {}", hash);
                println!("        attempts = {} in {:.3}s", attempts, elapsed.as_secs_f64());
            }
            ChainEvent::BlockCommitted {
                index,
                chain_length,
                pending,
                ..
            } => {
                println!(
                    "{} Block #{} added; chain length {}, {} pending\n",
                    "[CHAIN]".bright_magenta().bold(),
                    index,
                    chain_length,
                    pending
                );
            }
            ChainEvent::RunFinished { .. } => {
                println!("{}", "=== Pending pool drained ===".bright_green().bold());
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let started = Instant::now();

    let mut config = load_config(&cli.config)?;
    if let Some(difficulty) = cli.difficulty {
        config.chain.difficulty_prefix = difficulty;
    }
    if let Some(accounts) = cli.accounts {
        config.generator.accounts = accounts;
    }
    if let Some(transactions) = cli.transactions {
        config.generator.transactions = transactions;
    }
    if let Some(batch_size) = cli.batch_size {
        config.chain.batch_size = batch_size;
    }
    if let Some(threads) = cli.threads {
        config.miner.threads = threads;
    }
    if cli.seed.is_some() {
        config.generator.seed = cli.seed;
    }
    if cli.strict {
        config.chain.solvency = SolvencyPolicy::Strict;
    }
    config.validate()?;

    println!("{}\n", "===== powledger demo start =====".bright_cyan().bold());

    // Generate everything up front so generation errors surface before any mining.
    let mut generator = Generator::new(config.generator.clone());
    let accounts = generator.accounts()?;
    let keys: Vec<String> = accounts.iter().map(|a| a.public_key().to_string()).collect();
    let transfers = generator.transfers(&keys)?;
    println!("{} Generated {} accounts", "[INFO]".bright_blue(), accounts.len());
    println!("{} Generated {} transactions\n", "[INFO]".bright_blue(), transfers.len());

    let mut ledger = Ledger::from_config(&config, Arc::new(ConsoleObserver))?;
    ledger.seed_accounts(accounts)?;
    ledger.submit_transactions(transfers);

    let report = ledger.run_until_pool_empty(config.chain.batch_size)?;
    ledger.verify_chain()?;

    let summary = ledger.summary();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Metric").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);
    table.add_row(vec!["Chain length".to_string(), summary.chain_length.to_string()]);
    table.add_row(vec!["Accounts".to_string(), summary.account_count.to_string()]);
    table.add_row(vec!["Pending transactions".to_string(), summary.pending_count.to_string()]);
    table.add_row(vec!["Blocks mined".to_string(), report.blocks.to_string()]);
    table.add_row(vec!["Hash attempts".to_string(), report.attempts.to_string()]);
    table.add_row(vec!["Total balance".to_string(), ledger.accounts().total_balance().to_string()]);
    table.add_row(vec!["Last block hash".to_string(), summary.tip_hash.clone()]);

    println!("\n{}", "===== SUMMARY =====".bright_cyan().bold());
    println!("{table}");
    println!(
        "Total run time: {:.2} s",
        started.elapsed().as_secs_f64()
    );

    Ok(())
}
