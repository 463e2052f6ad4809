//! CLI entry point for `inbound`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};

use inbound::aws::Credentials;
use inbound::config::{self, CloudWatchConfig, Config, ConfigSource, ObjectConfig};
use inbound::metrics::cloudwatch::CloudWatchObserver;
use inbound::metrics::{Observer, ObserverSet, TracingObserver};
use inbound::session::Pipeline;
use inbound::sink::local::LocalSink;
use inbound::sink::log::LogSink;
use inbound::sink::object::ObjectSink;
use inbound::sink::{Dispatcher, Sink};
use inbound::smtp::Server;

#[derive(Parser)]
#[command(
    name = "inbound",
    version,
    about = "Receive mail over SMTP and store it as structured records and attachments"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (overrides $INBOUND_CONFIG and the default location)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SMTP server (default)
    Serve(ServeArgs),
    /// Decompose a single .eml file through the configured sinks
    Parse {
        /// Raw message file
        file: PathBuf,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
        /// Envelope sender to record
        #[arg(long, default_value = "")]
        from: String,
        /// Envelope recipient to record
        #[arg(long, default_value = "")]
        to: String,
        #[command(flatten)]
        sinks: SinkArgs,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "INBOUND_LISTEN", value_name = "ADDR")]
    listen: Option<String>,

    /// Server domain announced to clients
    #[arg(long, env = "INBOUND_DOMAIN")]
    domain: Option<String>,

    /// Maximum message size in megabytes
    #[arg(long, value_name = "MB")]
    max_size: Option<usize>,

    /// PEM certificate chain for STARTTLS
    #[arg(long, value_name = "PATH", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for STARTTLS
    #[arg(long, value_name = "PATH", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Publish receive metrics to CloudWatch under this namespace
    #[arg(long, env = "INBOUND_CLOUDWATCH_NAMESPACE", value_name = "NAMESPACE")]
    cloudwatch_namespace: Option<String>,

    #[command(flatten)]
    sinks: SinkArgs,
}

#[derive(Args, Default)]
struct SinkArgs {
    /// Store messages and attachments under this directory
    #[arg(long, value_name = "DIR")]
    local_dir: Option<PathBuf>,

    /// Store messages and attachments in this S3 bucket
    #[arg(long, env = "INBOUND_S3_BUCKET", value_name = "BUCKET")]
    s3_bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, value_name = "PREFIX")]
    s3_prefix: Option<String>,

    /// Custom S3-compatible endpoint URL
    #[arg(long, value_name = "URL")]
    s3_endpoint: Option<String>,
}

impl ServeArgs {
    fn apply(self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(domain) = self.domain {
            config.server.domain = domain;
        }
        if let Some(mb) = self.max_size {
            config.server.max_message_size_mb = mb;
        }
        if let Some(cert) = self.tls_cert {
            config.server.tls_cert = Some(cert);
        }
        if let Some(key) = self.tls_key {
            config.server.tls_key = Some(key);
        }
        if let Some(namespace) = self.cloudwatch_namespace {
            config
                .metrics
                .cloudwatch
                .get_or_insert_with(CloudWatchConfig::default)
                .namespace = namespace;
        }
        self.sinks.apply(config);
    }
}

impl SinkArgs {
    fn apply(self, config: &mut Config) {
        if let Some(dir) = self.local_dir {
            config.sinks.local_dir = Some(dir);
        }
        if self.s3_bucket.is_some() || self.s3_prefix.is_some() || self.s3_endpoint.is_some() {
            let object = config.sinks.object.get_or_insert_with(ObjectConfig::default);
            if let Some(bucket) = self.s3_bucket {
                object.bucket = bucket;
            }
            if let Some(prefix) = self.s3_prefix {
                object.prefix = prefix;
            }
            if let Some(endpoint) = self.s3_endpoint {
                object.endpoint = Some(endpoint);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, source) =
        config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config)?;
    report_config_source(&source);

    match cli.command {
        None => cmd_serve(ServeArgs::default(), config),
        Some(Commands::Serve(args)) => cmd_serve(args, config),
        Some(Commands::Parse {
            file,
            json,
            from,
            to,
            sinks,
        }) => {
            sinks.apply(&mut config);
            cmd_parse(&file, json, &from, &to, &config)
        }
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.general.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create log directory {}", dir.display()))?;

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
    Ok(())
}

/// Log where the configuration came from, once logging is up.
fn report_config_source(source: &ConfigSource) {
    match source {
        ConfigSource::File(path) => tracing::info!(path = %path.display(), "Loaded config"),
        ConfigSource::Defaults => tracing::debug!("No config file found, using defaults"),
        ConfigSource::Fallback { path, error } => tracing::warn!(
            path = %path.display(),
            error = %error,
            "Failed to load config, using defaults"
        ),
    }
}

/// Build the sinks in dispatch order: log, local, object.
fn build_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    if config.sinks.log {
        sinks.push(Box::new(LogSink));
    }
    if let Some(dir) = &config.sinks.local_dir {
        let sink = LocalSink::new(dir)
            .with_context(|| format!("Cannot use local sink directory {}", dir.display()))?;
        sinks.push(Box::new(sink));
    }
    if let Some(object) = &config.sinks.object {
        let credentials = Credentials::from_env().context("Object storage sink")?;
        let sink = ObjectSink::new(object, credentials)
            .with_context(|| format!("Cannot use bucket '{}'", object.bucket))?;
        sinks.push(Box::new(sink));
    }

    if sinks.is_empty() {
        tracing::warn!("No sinks configured, received mail will be discarded");
    }
    Ok(Dispatcher::new(sinks))
}

/// Tracing observer, plus CloudWatch when configured.
fn build_observer(config: &Config) -> anyhow::Result<ObserverSet> {
    let mut observers: Vec<Box<dyn Observer>> = vec![Box::new(TracingObserver::default())];
    if let Some(cloudwatch) = &config.metrics.cloudwatch {
        let credentials = Credentials::from_env().context("CloudWatch metrics")?;
        let observer = CloudWatchObserver::new(cloudwatch, credentials)
            .with_context(|| format!("Cannot use CloudWatch namespace '{}'", cloudwatch.namespace))?;
        tracing::info!(
            namespace = %cloudwatch.namespace,
            region = %cloudwatch.region,
            "CloudWatch metrics enabled"
        );
        observers.push(Box::new(observer));
    }
    Ok(ObserverSet::new(observers))
}

/// Run the SMTP server until the listener fails.
fn cmd_serve(args: ServeArgs, mut config: Config) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    args.apply(&mut config);

    let settings = config
        .server_settings()
        .context("Invalid server settings")?;
    if settings.tls.is_some() {
        tracing::info!("STARTTLS support enabled");
    } else {
        tracing::warn!("No TLS certificate configured, STARTTLS is not offered");
    }

    let dispatcher = build_dispatcher(&config)?;
    let observer = Arc::new(build_observer(&config)?);
    let pipeline = Arc::new(Pipeline::new(dispatcher, observer, config.walk_options()));

    tracing::info!(
        max_message_size = %format_size(settings.max_message_size as u64, BINARY),
        max_recipients = settings.max_recipients,
        "Starting server"
    );

    let server = Server::new(pipeline, settings);
    server.listen_and_serve()?;
    Ok(())
}

/// Decompose one message file and print the result.
fn cmd_parse(path: &Path, json: bool, from: &str, to: &str, config: &Config) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let raw = std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;

    let dispatcher = build_dispatcher(config)?;
    let pipeline = Pipeline::new(
        dispatcher,
        Arc::new(TracingObserver::default()),
        config.walk_options(),
    );
    let message = pipeline
        .process(from, to, &raw)
        .with_context(|| format!("Cannot decompose {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&message)?);
        return Ok(());
    }

    println!();
    println!("  {:<14} {}", "File:", path.display());
    println!("  {:<14} {}", "Size:", format_size(raw.len() as u64, BINARY));
    println!("  {:<14} {}", "Inbound ID:", message.id);
    if let Some(message_id) = &message.message_id {
        println!("  {:<14} {}", "Message-ID:", message_id);
    }
    println!("  {:<14} {}", "Subject:", message.subject);
    println!("  {:<14} {}", "References:", message.references.len());
    println!("  {:<14} {}", "Alternatives:", message.alternatives.len());
    for alternative in &message.alternatives {
        let quoted = alternative
            .quoted_thread
            .as_ref()
            .filter(|q| !q.is_empty())
            .map(|q| format!(", quoted {}", format_size(q.len() as u64, BINARY)))
            .unwrap_or_default();
        println!(
            "    {:<20} {}{}",
            alternative.content_type,
            format_size(alternative.text.len() as u64, BINARY),
            quoted
        );
    }
    println!("  {:<14} {}", "Attachments:", message.attachments.len());
    for attachment in &message.attachments {
        println!("    {}  {}", attachment.id, attachment.original_filename);
    }
    println!();
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "inbound", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
