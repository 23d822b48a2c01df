use anyhow::Result;
use clap::{Parser, Subcommand};
use storage::{Storage, StoredAutoCycle, AUTO_CYCLE_NAMESPACE};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/panel.db")]
    database_url: String,
    #[arg(long, default_value = AUTO_CYCLE_NAMESPACE)]
    namespace: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every stored preference in the namespace.
    Show,
    /// Delete the namespace so the panel starts from defaults.
    Reset,
    SetAutoCycle {
        #[arg(long)]
        enabled: bool,
        #[arg(long, default_value_t = 0)]
        cycle_count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Show => {
            let prefs = storage.list_preferences(&cli.namespace).await?;
            if prefs.is_empty() {
                println!("no preferences stored under {}", cli.namespace);
            }
            for pref in prefs {
                println!(
                    "{}.{} = {} (updated {})",
                    pref.namespace,
                    pref.key,
                    pref.value,
                    pref.updated_at.to_rfc3339()
                );
            }
            let auto_cycle = storage.load_auto_cycle(&cli.namespace).await?;
            println!(
                "auto-cycle: enabled={} cycle_count={}",
                auto_cycle.enabled, auto_cycle.cycle_count
            );
        }
        Command::Reset => {
            let removed = storage.clear_namespace(&cli.namespace).await?;
            println!("removed {removed} preference(s) from {}", cli.namespace);
        }
        Command::SetAutoCycle {
            enabled,
            cycle_count,
        } => {
            storage
                .save_auto_cycle(
                    &cli.namespace,
                    StoredAutoCycle {
                        enabled,
                        cycle_count,
                    },
                )
                .await?;
            println!("saved auto-cycle enabled={enabled} cycle_count={cycle_count}");
        }
    }

    Ok(())
}
