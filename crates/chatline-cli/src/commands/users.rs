//! User directory handler

use anyhow::{Context, Result};

use chatline_core::{Config, Session};

use super::authorized_client;
use crate::output::Output;

/// List the user directory one page at a time, or search it
pub async fn list(
    config: &Config,
    session: &Session,
    page: u32,
    search: Option<String>,
    output: &Output,
) -> Result<()> {
    let client = authorized_client(config, session)?;

    if let Some(query) = search {
        let users = client
            .search_users(&query)
            .await
            .with_context(|| format!("Failed to search users for '{}'", query))?;
        output.print_users(&users);
        return Ok(());
    }

    let page_data = client
        .fetch_users(page)
        .await
        .context("Failed to load users")?;
    output.print_users(&page_data.users);

    if !output.is_quiet() && !output.is_json() {
        if let Some(total) = page_data.total {
            println!("\n{} user(s) in total", total);
        }
        if page_data.has_more {
            println!("More on page {}: chatline users --page {}", page + 1, page + 1);
        }
    }

    Ok(())
}
