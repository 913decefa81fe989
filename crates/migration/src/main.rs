//! `cargo run -p migration -- [up|down|fresh|status]`
//!
//! The database is `DATABASE_URL` when set, otherwise the sqlite file the
//! `ledgerctl` configuration points at through `LEDGER__DATABASE__SQLITE`,
//! otherwise `./ledger.db`.

use sea_orm::Database;
use sea_orm_migration::prelude::*;

const DEFAULT_SQLITE_PATH: &str = "./ledger.db";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Up,
    Down,
    Fresh,
    Status,
}

impl Command {
    fn parse(arg: Option<&str>) -> Option<Self> {
        match arg.unwrap_or("up") {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "fresh" => Some(Self::Fresh),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

fn database_url(lookup: impl Fn(&str) -> Option<String>) -> String {
    if let Some(url) = lookup("DATABASE_URL") {
        return url;
    }
    let path = lookup("LEDGER__DATABASE__SQLITE").unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
    format!("sqlite:{path}?mode=rwc")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let arg = std::env::args().nth(1);
    let Some(command) = Command::parse(arg.as_deref()) else {
        eprintln!("Usage: cargo run -p migration -- [up|down|fresh|status]");
        std::process::exit(2);
    };

    let db_url = database_url(|key| std::env::var(key).ok());
    let db = Database::connect(&db_url).await?;

    match command {
        Command::Up => migration::Migrator::up(&db, None).await?,
        Command::Down => migration::Migrator::down(&db, None).await?,
        Command::Fresh => migration::Migrator::fresh(&db).await?,
        Command::Status => migration::Migrator::status(&db).await?,
    }

    Ok(())
}
