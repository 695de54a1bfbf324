use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use postbox::config::DEFAULT_PREFIX;
use postbox::{
    Dispatcher, Mailer, MailerConfig, MemoryTransport, Message, SmtpTransport, Transport,
};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

#[derive(Parser)]
#[command(name = "postbox", about = "Send outbound mail through the configured SMTP relay")]
struct Cli {
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Environment prefix for mailer settings
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message
    Send(SendArgs),
    /// Connect to the SMTP server and verify it answers
    Check,
}

#[derive(Args)]
struct SendArgs {
    #[arg(long = "to", required = true)]
    to: Vec<String>,

    #[arg(long)]
    from: String,

    #[arg(long)]
    subject: String,

    #[arg(long)]
    body: String,

    #[arg(long, default_value = "")]
    sender_name: String,

    /// Send the body as text/html
    #[arg(long, default_value_t = false)]
    html: bool,

    /// One transmission per recipient
    #[arg(long, default_value_t = false)]
    massive: bool,

    /// Annotation for the delivery logs
    #[arg(long)]
    info: Option<String>,

    /// Deliver through the background queue instead of directly
    #[arg(long, default_value_t = false)]
    queue: bool,

    /// Print the transmissions instead of sending them
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

impl SendArgs {
    fn message(&self) -> Message {
        let builder = Message::builder()
            .to_many(self.to.iter().cloned())
            .from(&self.from)
            .subject(&self.subject)
            .sender_name(&self.sender_name)
            .massive(self.massive);

        let builder = if self.html {
            builder.html(&self.body)
        } else {
            builder.text(&self.body)
        };

        match &self.info {
            Some(info) => builder.info(info).build(),
            None => builder.build(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("initializing logger")?;

    match &cli.command {
        Commands::Send(args) if args.dry_run => {
            let transport = MemoryTransport::new();
            deliver(Mailer::new(transport.clone()), args, None).await?;
            for mail in transport.sent().await {
                println!("# envelope to: {}", mail.to.join(", "));
                println!("{}\n", mail.raw);
            }
        }
        Commands::Send(args) => {
            let config = load_config(&cli.prefix)?;
            let mailer = Mailer::from_config(&config).context("building SMTP transport")?;
            deliver(mailer, args, Some(&config)).await?;
        }
        Commands::Check => {
            let config = load_config(&cli.prefix)?;
            let transport =
                SmtpTransport::from_config(&config).context("building SMTP transport")?;
            if !transport.test_connection().await? {
                bail!("{} did not accept the connection", config.host);
            }
            log::info!("{} is reachable", config.host);
        }
    }
    Ok(())
}

fn load_config(prefix: &str) -> Result<MailerConfig> {
    MailerConfig::load_with_prefix(prefix)
        .with_context(|| format!("loading {prefix}_* mailer settings"))
}

async fn deliver<T: Transport>(
    mailer: Mailer<T>,
    args: &SendArgs,
    config: Option<&MailerConfig>,
) -> Result<()> {
    let message = args.message();

    if !args.queue {
        let delivered = mailer.send(&message).await?;
        log::info!("Sent {} transmission(s) to {}", delivered, message.recipients());
        return Ok(());
    }

    let mut dispatcher = Dispatcher::new(mailer);
    if let Some(config) = config {
        dispatcher = dispatcher.with_config(config);
    }
    let queue = dispatcher.start()?;
    queue
        .try_enqueue(message)
        .context("queueing message")?;
    queue.stop().await;
    log::info!("Queue {}", queue.state());
    Ok(())
}
