use clap::{Args, Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tessera_core::{
    Block, BlockAcceptance, ChainManager, ChainParams, MemoryKv, ValidationError,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera - UTXO blockchain node with Equihash and ticket-vote consensus")]
#[command(version = "0.1.0")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Network to operate on
    #[arg(long, value_enum, default_value = "mainnet", global = true)]
    network: NetworkArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NetworkArg {
    Mainnet,
    Testnet3,
    Simnet,
    Regnet,
}

impl NetworkArg {
    fn params(self) -> &'static ChainParams {
        match self {
            Self::Mainnet => ChainParams::mainnet(),
            Self::Testnet3 => ChainParams::testnet3(),
            Self::Simnet => ChainParams::simnet(),
            Self::Regnet => ChainParams::regnet(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the genesis block of the selected network
    Genesis,
    /// Print the consensus parameters of the selected network
    Info,
    /// Decode a serialized block file and run context-free validation
    CheckBlock(CheckBlockArgs),
}

#[derive(Args)]
struct CheckBlockArgs {
    /// Path to a file with the hex-encoded block
    path: std::path::PathBuf,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let params = cli.network.params();
    let exit = match cli.command {
        Commands::Genesis => cmd_genesis(params),
        Commands::Info => cmd_info(params),
        Commands::CheckBlock(args) => cmd_check_block(params, &args),
    };
    std::process::exit(exit);
}

fn cmd_genesis(params: &ChainParams) -> i32 {
    let block = &params.genesis_block;
    println!("network:   {:?}", params.network);
    println!("hash:      {}", params.genesis_hash);
    println!("timestamp: {}", block.header.timestamp);
    println!("bits:      {:#010x}", block.header.bits);
    println!("header:    {}", hex::encode(block.header.encode()));
    0
}

fn cmd_info(params: &ChainParams) -> i32 {
    println!("network:                 {:?}", params.network);
    println!("net magic:               {:#010x}", params.net_magic);
    println!("p2p/rpc ports:           {}/{}", params.default_p2p_port, params.default_rpc_port);
    println!("target block time:       {}s", params.target_time_per_block);
    println!("subsidy halving:         x{}/{} every {} blocks", params.subsidy.mul, params.subsidy.div, params.subsidy.reduction_interval);
    println!("tickets per block:       {}", params.tickets_per_block);
    println!("ticket maturity/expiry:  {}/{}", params.ticket_maturity, params.ticket_expiry);
    println!("stake validation height: {}", params.subsidy.stake_validation_height);
    println!("equihash:                ({}, {}) from height {}", params.equihash_n, params.equihash_k, params.equihash_activation_height);
    println!("genesis:                 {}", params.genesis_hash);
    0
}

fn cmd_check_block(params: &'static ChainParams, args: &CheckBlockArgs) -> i32 {
    let raw = match std::fs::read_to_string(&args.path) {
        Ok(contents) => contents,
        Err(err) => {
            error!("cannot read {}: {err}", args.path.display());
            return 1;
        }
    };
    let bytes = match hex::decode(raw.trim()) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("invalid hex: {err}");
            return 1;
        }
    };
    let mut cursor = tessera_core::wire::Cursor::new(&bytes);
    let block = match Block::decode(&mut cursor, params) {
        Ok(block) => block,
        Err(err) => {
            error!("malformed block: {err}");
            return 1;
        }
    };

    info!("block {} at height {}", block.hash(), block.header.height);

    // Monta uma cadeia em memória a partir da gênese e submete o bloco;
    // um bloco fora de contexto aparece como órfão.
    let manager = match ChainManager::new(Arc::new(params.clone()), Arc::new(MemoryKv::new())) {
        Ok(manager) => manager,
        Err(err) => {
            error!("cannot initialize chain: {err}");
            return 1;
        }
    };
    let (handle, worker) = manager.start();
    let result = handle.submit_block(block);
    handle.shutdown();
    let _ = worker.join();

    match result {
        Ok(BlockAcceptance::Orphan) => {
            info!("block is structurally valid; parent unknown to a fresh chain (orphan)");
            0
        }
        Ok(acceptance) => {
            info!("block accepted: {acceptance:?}");
            0
        }
        Err(err @ ValidationError::Pow(_)) => {
            error!("proof of work failed: {err}");
            1
        }
        Err(err) => {
            error!("block rejected: {err}");
            1
        }
    }
}
