use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::records::{CsvStore, PersonDraft, Roster, store};

#[derive(Args)]
pub struct AddArgs {
    #[arg(long)]
    pub first_name: String,
    #[arg(long)]
    pub last_name: String,
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub department: String,
    #[arg(long, default_value = "")]
    pub title: String,
    #[arg(long)]
    pub phone: Option<String>,
    /// Hire date as YYYY-MM-DD (defaults to today)
    #[arg(long)]
    pub hired_on: Option<String>,
}

fn open_roster(config: &Config) -> Result<Roster> {
    Roster::open(CsvStore::new(config.data_path()?))
}

/// Print the roster, optionally fuzzy-filtered
pub async fn list_command(config: &Config, filter: Option<String>) -> Result<()> {
    let roster = open_roster(config)?;
    let people = roster.filter(filter.as_deref().unwrap_or_default());

    if people.is_empty() {
        println!("{}", "No records found".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!("{:<28} {:<18} {:<24} {}", "NAME", "DEPARTMENT", "TITLE", "EMAIL").bold()
    );
    for person in &people {
        println!(
            "{} {} {:<24} {}",
            format!("{:<28}", person.full_name()).green(),
            format!("{:<18}", person.department).cyan(),
            person.title,
            person.email.dimmed()
        );
    }
    println!("\n{} record(s)", people.len().to_string().bold());
    Ok(())
}

/// Copy the roster to `path`; Ctrl-C stops the export between rows
pub async fn export_command(config: &Config, path: PathBuf) -> Result<()> {
    let people = open_roster(config)?.all();

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let target = path.clone();
    let written = tokio::task::spawn_blocking(move || store::export(&people, &target, &token))
        .await
        .context("Export task failed")??;

    println!("{}", format!("✓ Exported {} record(s) to {}", written, path.display()).green());
    Ok(())
}

/// Validate and append one person
pub async fn add_command(config: &Config, args: AddArgs) -> Result<()> {
    let roster = open_roster(config)?;

    let draft = PersonDraft {
        id: None,
        first_name: args.first_name,
        last_name: args.last_name,
        email: args.email,
        department: args.department,
        title: args.title,
        phone: args.phone.unwrap_or_default(),
        hired_on: args
            .hired_on
            .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string()),
    };

    let person = match draft.into_person() {
        Ok(person) => person,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            return Err(e.context("Record not added"));
        }
    };

    roster.upsert(person.clone());
    roster.persist()?;

    println!(
        "{}",
        format!("✓ Added {} ({})", person.full_name(), person.id).green()
    );
    log::info!(target: "roster::records", "Added {} via CLI", person.id);
    Ok(())
}
