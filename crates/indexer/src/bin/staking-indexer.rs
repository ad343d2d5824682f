// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use dpos_staking_indexer::{
    archive::JsonArchive,
    staking::{StakingIndexerService, StakingIndexerServiceConfig},
};

/// Arguments for the staking indexer.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct StakingIndexerArgs {
    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// Path to the JSON archive export to index.
    #[clap(long, env)]
    archive: PathBuf,

    /// Number of blocks processed per batch.
    #[clap(long, default_value = "100")]
    batch_size: u64,

    /// Starting block number (defaults to the block after the last indexed one).
    #[clap(long)]
    start_block: Option<u64>,

    /// Ending block number. When set the indexer runs once and exits.
    #[clap(long)]
    end_block: Option<u64>,

    /// Interval in seconds between checking for new blocks.
    #[clap(long, default_value = "600")]
    interval: u64,

    /// Number of retries before quitting after an error.
    #[clap(long, default_value = "3")]
    retries: u32,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = StakingIndexerArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let config = StakingIndexerServiceConfig {
        batch_size: args.batch_size,
        interval: Duration::from_secs(args.interval),
        retries: args.retries,
        start_block: args.start_block,
        end_block: args.end_block,
    };

    let archive = JsonArchive::open(&args.archive).await?;
    let service = StakingIndexerService::new(archive, &args.db, config).await?;

    if args.end_block.is_some() {
        tracing::info!("Running indexer once (end-block specified)");
        service.run().await?;
        tracing::info!("Indexer completed successfully");
        return Ok(());
    }

    // Otherwise, run in a loop
    let mut failures = 0u32;
    loop {
        match service.run().await {
            Ok(_) => {
                failures = 0;
                tracing::info!("Sleeping for {} seconds", args.interval);
                tokio::time::sleep(Duration::from_secs(args.interval)).await;
            }
            Err(e) => {
                failures += 1;
                tracing::error!("Error running staking indexer: {:?}", e);
                if failures >= args.retries {
                    bail!("Maximum retries reached");
                }
                tracing::info!("Retrying in {} seconds", args.interval);
                tokio::time::sleep(Duration::from_secs(args.interval)).await;
            }
        }
    }
}
