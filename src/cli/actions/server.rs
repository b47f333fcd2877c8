use crate::cli::{actions::Action, globals::GlobalArgs};
use crate::gateman::new;
use anyhow::Result;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server { port, dsn } => {
            // Fail early on an unparseable DSN instead of at pool connect
            let dsn = Url::parse(&dsn)?;

            new(port, dsn.to_string(), globals).await?;
        }
    }

    Ok(())
}
