//! `login` — obtain and persist an OAuth session

use std::io::{BufRead, Write};

use clap::Args;
use galaxy_client::{ApiClient, Config};

use crate::auth;

#[derive(Args)]
pub struct LoginArgs {
    /// Login code from the browser flow; prompted for when omitted
    #[arg(long)]
    pub code: Option<String>,
}

pub async fn handle(args: LoginArgs) -> anyhow::Result<()> {
    let api = ApiClient::new(Config::default())?;

    let code = match args.code {
        Some(code) => code,
        None => {
            println!("Open this URL, log in, and paste the code parameter:");
            println!("  {}", auth::login_url(&api.config().auth_url));
            print!("code: ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line.trim().to_string()
        }
    };

    if code.is_empty() {
        anyhow::bail!(galaxy_client::Error::auth("no login code provided"));
    }

    let stored = auth::login_with_code(&api, &code).await?;
    println!("logged in as user {}", stored.user_id);
    Ok(())
}
