//! Batch command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use tessera_client::TesseraClient;
use tessera_core::dto::batch::SubmitBatch;
use tessera_core::dto::page::PageQuery;

use super::job::{colorize_status, print_job_details};
use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::{IdOrPrefix, read_json_arg};

/// Batch subcommands
#[derive(Subcommand)]
pub enum BatchCommands {
    /// Submit a batch
    Submit {
        /// `{"shared_params": {...}, "items": [...]}` inline or as @file.json
        batch: String,

        /// Maximum number of items running at once
        #[arg(long)]
        max_concurrent: Option<u32>,
    },
    /// Show a batch with its progress
    Get {
        /// Batch ID or unambiguous prefix
        id: String,
    },
    /// List the items of a batch in submission order
    Children {
        /// Batch ID or unambiguous prefix
        id: String,

        /// Fetch every page
        #[arg(long)]
        all: bool,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long)]
        page_token: Option<String>,
    },
}

/// Routes batch subcommands to their respective handlers
pub async fn handle_batch_command(command: BatchCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        BatchCommands::Submit {
            batch,
            max_concurrent,
        } => submit_batch(&client, &batch, max_concurrent).await,
        BatchCommands::Get { id } => {
            let uuid = resolve_job_id(&client, &IdOrPrefix::parse(&id)).await?;
            print_job_details(&client.get_job(uuid).await?);
            Ok(())
        }
        BatchCommands::Children {
            id,
            all,
            limit,
            page_token,
        } => list_children(&client, &id, all, PageQuery { page_token, limit }).await,
    }
}

async fn submit_batch(
    client: &TesseraClient,
    batch: &str,
    max_concurrent: Option<u32>,
) -> Result<()> {
    let mut req: SubmitBatch =
        serde_json::from_value(read_json_arg(batch)?).context("Invalid batch definition")?;
    if max_concurrent.is_some() {
        req.max_concurrent = max_concurrent;
    }

    let receipt = client.submit_batch(req).await?;

    println!("{}", "✓ Batch submitted".green());
    println!("  ID:    {}", receipt.batch_id.to_string().cyan());
    println!("  Items: {}", receipt.child_ids.len());

    Ok(())
}

async fn list_children(
    client: &TesseraClient,
    id: &str,
    all: bool,
    query: PageQuery,
) -> Result<()> {
    let batch_id = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;

    let (children, next_page_token) = if all {
        (client.all_batch_children(batch_id).await?, None)
    } else {
        let page = client.list_batch_children(batch_id, &query).await?;
        (page.items, page.next_page_token)
    };

    if children.is_empty() {
        println!("{}", "No items found.".yellow());
    }

    for child in &children {
        let index = child
            .batch_index
            .map(|i| format!("#{:<4}", i))
            .unwrap_or_default();
        let mut line = format!(
            "  {} {} {}",
            index.dimmed(),
            child.id,
            colorize_status(child.status)
        );
        if let Some(error) = &child.error {
            line.push_str(&format!(" {}", error.code.red()));
        }
        println!("{}", line);
    }

    if let Some(token) = next_page_token {
        println!("{} --page-token {}", "More results:".dimmed(), token);
    }

    Ok(())
}
