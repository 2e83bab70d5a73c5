use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use cmms_stock::{bootstrap, config, db, AppState, UnitOfWork};
use serde::Serialize;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(&config.log_level, config.log_json);
    let (state, _events) = bootstrap(config)
        .await
        .context("failed to initialize stock services")?;

    match cli.command {
        Commands::Health => {
            db::check_connection(&state.db)
                .await
                .context("database is unreachable")?;
            if cli.json {
                print_json(&json!({ "database": "ok" }))?;
            } else {
                println!("Database connection OK");
            }
        }
        Commands::Migrate => {
            db::run_migrations(&state.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::BackfillBatches { user_id } => backfill(&state, user_id, cli.json).await?,
        Commands::Validate { part_id } => validate(&state, part_id, cli.json).await?,
        Commands::Fix { part_id, user_id } => fix(&state, part_id, user_id, cli.json).await?,
        Commands::FifoCost { part_id, quantity } => {
            let cost = state
                .services
                .stock
                .get_fifo_cost(part_id, quantity)
                .await
                .context("failed to compute FIFO cost")?;
            if cli.json {
                print_json(&json!({ "part_id": part_id, "quantity": quantity, "unit_cost": cost }))?;
            } else {
                println!("Part {}: {} units at {} per unit", part_id, quantity, cost);
            }
        }
        Commands::Batches {
            part_id,
            include_empty,
        } => {
            let batches = state
                .services
                .stock
                .list_stock_batches(part_id, include_empty)
                .await
                .context("failed to list stock batches")?;
            if cli.json {
                print_json(&batches)?;
            } else if batches.is_empty() {
                println!("Part {} has no batches", part_id);
            } else {
                for batch in &batches {
                    println!(
                        "- Batch {} • received {} • {}/{} left • {} each",
                        batch.id,
                        batch.received_date.format("%Y-%m-%d %H:%M"),
                        batch.quantity_remaining,
                        batch.quantity,
                        batch.unit_price
                    );
                }
            }
        }
    }

    db::close_pool(&state.db)
        .await
        .context("failed to close database pool")?;
    Ok(())
}

#[derive(Parser)]
#[command(name = "stock-admin", about = "Maintenance tasks for the spare-parts stock", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the database answers
    Health,
    /// Apply pending schema migrations
    Migrate,
    /// Open FIFO batches for stock recorded before batch tracking
    BackfillBatches {
        #[arg(long)]
        user_id: Option<i32>,
    },
    /// Compare inventory levels with per-location totals
    Validate {
        #[arg(long)]
        part_id: Option<i32>,
    },
    /// Reset a part's inventory level to its location total
    Fix {
        #[arg(long)]
        part_id: i32,
        #[arg(long)]
        user_id: Option<i32>,
    },
    /// Preview the FIFO unit cost of the next units issued
    FifoCost {
        #[arg(long)]
        part_id: i32,
        #[arg(long)]
        quantity: i32,
    },
    /// List a part's batches in FIFO order
    Batches {
        #[arg(long)]
        part_id: i32,
        #[arg(long, action = ArgAction::SetTrue)]
        include_empty: bool,
    },
}

async fn backfill(state: &AppState, user_id: Option<i32>, json: bool) -> Result<()> {
    let report = state
        .services
        .stock
        .migrate_existing_stock_to_batches(user_id, UnitOfWork::Owned)
        .await
        .context("batch backfill failed")?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Backfilled {} parts ({} already tracked, {} without a catalogue entry)",
            report.parts_migrated, report.skipped_with_batches, report.skipped_missing_part
        );
    }
    Ok(())
}

async fn validate(state: &AppState, part_id: Option<i32>, json: bool) -> Result<()> {
    let found = state
        .services
        .reconciliation
        .validate_inventory_levels(part_id)
        .await
        .context("inventory validation failed")?;

    if json {
        print_json(&found)?;
    } else if found.is_empty() {
        println!("Inventory levels match location totals");
    } else {
        for d in &found {
            println!(
                "- Part {} ({}) • level {} • locations {} • difference {}",
                d.part_id, d.part_name, d.inventory_level, d.total_in_locations, d.difference
            );
        }
    }
    Ok(())
}

async fn fix(state: &AppState, part_id: i32, user_id: Option<i32>, json: bool) -> Result<()> {
    let repaired = state
        .services
        .reconciliation
        .fix_inventory_level_discrepancy(part_id, user_id, UnitOfWork::Owned)
        .await
        .with_context(|| format!("failed to repair part {}", part_id))?;

    if json {
        print_json(&json!({ "part_id": part_id, "repaired": repaired }))?;
    } else if repaired {
        println!("Part {} inventory level reset to its location total", part_id);
    } else {
        println!("Part {} has no inventory level", part_id);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
