use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use redwire_client::{Client, ClientConfig, Decoding, PubSub, Value};

#[derive(Parser)]
#[command(version, about = "Command-line client for Redis-protocol servers", long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Connect over a unix domain socket instead of TCP
    #[arg(long, conflicts_with_all = ["host", "port"])]
    unix: Option<PathBuf>,

    /// ACL username, used together with --password
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Password sent with AUTH on connect
    #[arg(short = 'a', long)]
    password: Option<String>,

    /// Logical database to select
    #[arg(short = 'n', long, default_value_t = 0)]
    db: i64,

    /// How byte payloads are rendered
    #[arg(long, value_enum, default_value_t = DecodeMode::Str)]
    decode: DecodeMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one command and print its result as JSON
    Call {
        name: String,
        args: Vec<String>,
    },
    /// Listen on channels and print each message as a JSON line
    Subscribe {
        #[arg(required = true)]
        channels: Vec<String>,
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
    /// Listen on channel patterns and print each message as a JSON line
    Psubscribe {
        #[arg(required = true)]
        patterns: Vec<String>,
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecodeMode {
    Raw,
    Str,
    Auto,
}

impl From<DecodeMode> for Decoding {
    fn from(mode: DecodeMode) -> Self {
        match mode {
            DecodeMode::Raw => Decoding::Raw,
            DecodeMode::Str => Decoding::Str,
            DecodeMode::Auto => Decoding::Auto,
        }
    }
}

impl Cli {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.unix {
            #[cfg(unix)]
            Some(path) => ClientConfig::unix(path.clone()),
            #[cfg(not(unix))]
            Some(_) => bail!("unix sockets are not supported on this platform"),
            None => ClientConfig::tcp(format!("{}:{}", self.host, self.port)),
        };
        if let Some(password) = &self.password {
            config = config.password(password.clone());
        }
        if let Some(username) = &self.username {
            config = config.username(username.clone());
        }
        Ok(config.database(self.db).pool_max(1))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::with_config(cli.config()?);
    let decoding = Decoding::from(cli.decode);

    match cli.command {
        Command::Call { name, args } => {
            let value = client
                .db()
                .call(&name, &args)
                .decoding(decoding)
                .execute()
                .await
                .with_context(|| format!("{} failed", name))?;
            if let Value::Error(err) = &value {
                bail!("server error: {}", err);
            }
            println!("{}", serde_json::Value::from(value));
        }
        Command::Subscribe { channels, count } => {
            let mut pubsub = client.pubsub(&channels);
            pubsub.decoding(decoding);
            listen(pubsub, count).await?;
        }
        Command::Psubscribe { patterns, count } => {
            let mut pubsub = client.pubsub(Vec::<String>::new());
            pubsub.psubscribe(&patterns).decoding(decoding);
            listen(pubsub, count).await?;
        }
    }
    Ok(())
}

async fn listen(mut pubsub: PubSub, count: Option<usize>) -> anyhow::Result<()> {
    pubsub.connect().await.context("subscribe failed")?;
    info!(subscriptions = pubsub.subscription_count(), "listening");

    let mut received = 0;
    while count.map_or(true, |count| received < count) {
        let message = pubsub.next_message().await.context("receive failed")?;
        let line = json!({
            "pattern": message.pattern.as_ref().map(|p| String::from_utf8_lossy(p).into_owned()),
            "channel": String::from_utf8_lossy(&message.channel),
            "payload": serde_json::Value::from(message.payload),
        });
        println!("{}", line);
        received += 1;
    }
    pubsub.close().await;
    Ok(())
}
