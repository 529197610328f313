use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared_types::{
    DiscoveredSender, IngestedNewsletter, Subscription, SyncResponse, ToggleSubscriptionRequest,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "newsletter-cli")]
#[command(about = "CLI for syncing and reading newsletters via the backend API")]
#[command(
    long_about = "A command-line interface for interacting with the newsletter backend server.\n\n\
    Supports discovering newsletter senders, managing subscriptions, triggering a\n\
    mailbox sync and reading the stored newsletters."
)]
struct Cli {
    /// Backend server URL to connect to.
    ///
    /// The CLI will make HTTP requests to this server's API endpoints.
    /// Use this to connect to a remote server or a different port.
    #[arg(
        short,
        long,
        default_value = "http://localhost:3000",
        env = "NEWSLETTER_API_URL"
    )]
    base_url: String,

    /// Session token sent as a bearer token.
    ///
    /// This is the JWT issued by the login flow (the value of the auth cookie).
    #[arg(short, long, env = "NEWSLETTER_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull new mail from subscribed senders and show the stored newsletters
    Sync {
        /// Maximum number of newsletters to show after the sync.
        #[arg(short, long)]
        limit: Option<i64>,

        /// Number of newsletters to skip, newest first.
        #[arg(short, long)]
        offset: Option<i64>,
    },

    /// List stored newsletters, newest first, without contacting the mailbox
    List {
        #[arg(short, long)]
        limit: Option<i64>,

        #[arg(short, long)]
        offset: Option<i64>,
    },

    /// Scan recent mail for newsletter senders
    Senders {
        /// How many recent messages to inspect.
        #[arg(short, long, value_name = "COUNT")]
        max_scan: Option<u32>,
    },

    /// Show every sender subscription, active or not
    Subscriptions,

    /// Start syncing newsletters from a sender
    Subscribe { email: String },

    /// Stop syncing newsletters from a sender
    ///
    /// Newsletters already stored from this sender are kept.
    Unsubscribe { email: String },

    /// Mark a stored newsletter as read
    Read {
        /// The UUID of the newsletter, as shown by 'list'.
        id: Uuid,
    },
}

struct Api {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl Api {
    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api{}", self.base_url.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> anyhow::Result<T> {
        let response = builder.send().await.context("Request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Server returned {}: {}", status, body);
        }
        response.json().await.context("Failed to parse response")
    }
}

fn page_params(limit: Option<i64>, offset: Option<i64>) -> Vec<(&'static str, i64)> {
    let mut params = Vec::new();
    if let Some(limit) = limit {
        params.push(("limit", limit));
    }
    if let Some(offset) = offset {
        params.push(("offset", offset));
    }
    params
}

fn print_newsletters(newsletters: &[IngestedNewsletter]) {
    if newsletters.is_empty() {
        println!("No newsletters found.");
        return;
    }
    for newsletter in newsletters {
        let status = if newsletter.is_read { " " } else { "*" };
        println!(
            "{} [{}] {}",
            status,
            &newsletter.id.to_string()[..8],
            newsletter.subject
        );
        println!("    From: {}", newsletter.from_display);
        println!("    Date: {}", newsletter.date);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        base_url: cli.base_url,
        token: cli.token,
    };

    match cli.command {
        Commands::Sync { limit, offset } => {
            let response: SyncResponse = api
                .send(
                    api.request(reqwest::Method::POST, "/newsletters/sync")
                        .query(&page_params(limit, offset)),
                )
                .await?;
            println!(
                "Stored {} new newsletter(s), {} total.",
                response.stored, response.total
            );
            print_newsletters(&response.newsletters);
        }
        Commands::List { limit, offset } => {
            let newsletters: Vec<IngestedNewsletter> = api
                .send(
                    api.request(reqwest::Method::GET, "/newsletters")
                        .query(&page_params(limit, offset)),
                )
                .await?;
            print_newsletters(&newsletters);
        }
        Commands::Senders { max_scan } => {
            let mut builder = api.request(reqwest::Method::GET, "/senders");
            if let Some(max_scan) = max_scan {
                builder = builder.query(&[("max_scan", max_scan)]);
            }
            let senders: Vec<DiscoveredSender> = api.send(builder).await?;
            if senders.is_empty() {
                println!("No newsletter senders found.");
            }
            for sender in senders {
                println!("{} <{}> ({})", sender.name, sender.email, sender.domain);
            }
        }
        Commands::Subscriptions => {
            let subscriptions: Vec<Subscription> = api
                .send(api.request(reqwest::Method::GET, "/subscriptions"))
                .await?;
            if subscriptions.is_empty() {
                println!("No subscriptions found.");
            }
            for sub in subscriptions {
                let status = if sub.subscribed { "✓" } else { "○" };
                println!("{} {}", status, sub.sender_email);
            }
        }
        Commands::Subscribe { email } => {
            let sub = set_subscription(&api, email, true).await?;
            println!("Subscribed to {}", sub.sender_email);
        }
        Commands::Unsubscribe { email } => {
            let sub = set_subscription(&api, email, false).await?;
            println!("Unsubscribed from {}", sub.sender_email);
        }
        Commands::Read { id } => {
            let newsletter: IngestedNewsletter = api
                .send(api.request(reqwest::Method::POST, &format!("/newsletters/{}/read", id)))
                .await?;
            println!(
                "Marked as read: [{}] {}",
                &newsletter.id.to_string()[..8],
                newsletter.subject
            );
        }
    }

    Ok(())
}

async fn set_subscription(api: &Api, email: String, subscribed: bool) -> anyhow::Result<Subscription> {
    let req = ToggleSubscriptionRequest {
        sender_email: email,
        subscribed,
    };
    api.send(api.request(reqwest::Method::PUT, "/subscriptions").json(&req))
        .await
}
