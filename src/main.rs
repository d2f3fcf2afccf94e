//! transfer-txn demo - simulated fluid transfers between tanks

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use transfer_txn::participant::{Snapshot, SnapshotParticipant};
use transfer_txn::transaction::{TransactionContext, TransactionManager};

/// Moves fluid between tanks inside nested transactions, with random failures.
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of tanks
    #[arg(short, long, default_value = "4")]
    tanks: usize,

    /// Tank capacity in millibuckets
    #[arg(short, long, default_value = "8000")]
    capacity: u64,

    /// Number of transfer batches to run
    #[arg(short = 'n', long, default_value = "20")]
    transfers: usize,

    /// Probability that a batch is aborted after its transfers
    #[arg(short, long, default_value = "0.25")]
    failure_rate: f64,

    /// Random seed
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

struct Tank {
    name: String,
    amount: u64,
    capacity: u64,
}

impl Snapshot for Tank {
    type State = u64;

    fn create_snapshot(&self) -> u64 {
        self.amount
    }

    fn read_snapshot(&mut self, snapshot: u64) {
        self.amount = snapshot;
    }

    fn on_final_commit(&mut self) {
        debug!("{} settled at {} mB", self.name, self.amount);
    }
}

fn insert(tank: &SnapshotParticipant<Tank>, tx: &TransactionContext, amount: u64) -> Result<u64> {
    let space = tank.read(|t| t.capacity - t.amount);
    let inserted = amount.min(space);
    if inserted > 0 {
        tank.modify(tx, |t| t.amount += inserted)?;
    }
    Ok(inserted)
}

fn extract(tank: &SnapshotParticipant<Tank>, tx: &TransactionContext, amount: u64) -> Result<u64> {
    let extracted = amount.min(tank.read(|t| t.amount));
    if extracted > 0 {
        tank.modify(tx, |t| t.amount -= extracted)?;
    }
    Ok(extracted)
}

/// Moves up to `amount` from `from` to `to`, all or nothing.
fn transfer(
    tx: &TransactionContext,
    from: &SnapshotParticipant<Tank>,
    to: &SnapshotParticipant<Tank>,
    amount: u64,
) -> Result<u64> {
    let nested = tx.open_nested()?;
    let extracted = extract(from, &nested, amount)?;
    let inserted = insert(to, &nested, extracted)?;
    if inserted == extracted {
        nested.commit()?;
        Ok(inserted)
    } else {
        nested.abort()?;
        Ok(0)
    }
}

fn total(tanks: &[SnapshotParticipant<Tank>]) -> u64 {
    tanks.iter().map(|tank| tank.read(|t| t.amount)).sum()
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.tanks < 2 {
        bail!("At least two tanks are needed, got {}", args.tanks);
    }
    if args.capacity < 2 {
        bail!("Tank capacity must be at least 2 mB, got {}", args.capacity);
    }
    if !(0.0..=1.0).contains(&args.failure_rate) {
        bail!("Failure rate must be between 0 and 1, got {}", args.failure_rate);
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let manager = TransactionManager::new();
    let tanks: Vec<_> = (0..args.tanks)
        .map(|i| {
            SnapshotParticipant::new(Tank {
                name: format!("tank-{}", i),
                amount: rng.gen_range(0..=args.capacity),
                capacity: args.capacity,
            })
        })
        .collect();

    let initial_total = total(&tanks);
    info!("Starting with {} tanks holding {} mB", tanks.len(), initial_total);

    let mut committed = 0;
    let mut aborted = 0;
    for batch in 0..args.transfers {
        let tx = manager.open_outer().context("Failed to open batch transaction")?;
        let moves = rng.gen_range(1..=3);
        let mut moved = 0;
        for _ in 0..moves {
            let from = rng.gen_range(0..tanks.len());
            let to = (from + rng.gen_range(1..tanks.len())) % tanks.len();
            let amount = rng.gen_range(1..=args.capacity / 2);
            moved += transfer(&tx, &tanks[from], &tanks[to], amount)
                .with_context(|| format!("Transfer in batch {} failed", batch))?;
        }

        if rng.gen_bool(args.failure_rate) {
            tx.abort()?;
            aborted += 1;
            info!("Batch {}: aborted {} mB over {} move(s)", batch, moved, moves);
        } else {
            tx.commit()?;
            committed += 1;
            info!("Batch {}: committed {} mB over {} move(s)", batch, moved, moves);
        }

        let now = total(&tanks);
        if now != initial_total {
            bail!("Fluid was created or destroyed: {} mB became {} mB", initial_total, now);
        }
    }

    println!("Batches committed: {}", committed);
    println!("Batches aborted:   {}", aborted);
    for tank in &tanks {
        tank.read(|t| println!("  {}: {} / {} mB", t.name, t.amount, t.capacity));
    }

    Ok(())
}
