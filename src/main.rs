use anyhow::{Context, Result};
use apiverify::cli::{parse_key_value, CallArgs, Cli, Commands, EncryptArgs};
use apiverify::{
    ComparisonSpec, Configuration, ConfigurationManager, ContentKind, CryptoProcessor, RestClient, NAME, VERSION,
};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

const DEFAULT_CONFIG_FILE: &str = "apiverify.yaml";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    log::debug!("{} v{}", NAME, VERSION);

    if let Err(e) = run(cli).await {
        eprintln!("❌ {:#}", e);
        process::exit(1);
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let log_level = if verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level)).init();
}

async fn load_configuration(paths: &[PathBuf]) -> Result<Configuration> {
    let mut manager = ConfigurationManager::new();
    if paths.is_empty() {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default.exists() {
            manager.add_config_path(default);
        }
    }
    for path in paths {
        manager.add_config_path(path);
    }
    manager
        .load_configuration()
        .await
        .context("Failed to load configuration")?;
    Ok(manager.into_configuration())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_configuration(&cli.config).await?;

    match cli.command {
        Commands::Call(args) => call(&config, args).await,
        Commands::Methods => {
            for name in config.methods.names() {
                if let Some(descriptor) = config.methods.get(name) {
                    println!("{:<24} {:<7} {}", name, descriptor.method, descriptor.url);
                }
            }
            Ok(())
        }
        Commands::Encrypt(args) => encrypt(&config, args),
    }
}

fn encrypt(config: &Configuration, args: EncryptArgs) -> Result<()> {
    let crypto = CryptoProcessor::from_env(&config.crypto_key_env)?;
    println!("{}", crypto.encrypt(&args.value)?);
    Ok(())
}

async fn call(config: &Configuration, args: CallArgs) -> Result<()> {
    let client = RestClient::with_config(config.rest_client_config())?;
    let mut method = config.method(&args.method, Arc::new(client))?.build();

    for entry in &args.properties {
        let (key, value) = parse_key_value(entry).map_err(anyhow::Error::msg)?;
        method.add_property(key, value)?;
    }
    for entry in &args.url_params {
        let (name, value) = parse_key_value(entry).map_err(anyhow::Error::msg)?;
        method.replace_url_placeholder(&name, value);
    }
    if let Some(session) = &args.session {
        method.set_auth(session);
    }

    let response = if args.polls() {
        let spec = args.poll_spec(config.poll_spec(), || method.successful_status())?;
        apiverify::poll(&mut method, spec).await?
    } else if args.expect_success {
        method.call_expecting_success().await?
    } else {
        method.call().await?
    };

    println!("HTTP {} ({:?})", response.status_code, response.duration);
    println!("{}", response.body_text());

    if args.validate {
        let mut spec = match method.content_kind() {
            ContentKind::Json => ComparisonSpec::json(args.mode.unwrap_or_default()),
            ContentKind::Xml => ComparisonSpec::xml(args.xml_mode.unwrap_or_default()),
        };
        spec = spec.with_flags(args.flags.iter().cloned());
        method.validate(&spec)?;
        println!("✅ Response matches {}", method.response_template().map(|t| t.as_str()).unwrap_or("template"));
    }

    if let Some(schema) = &args.schema {
        method.validate_against_schema(schema.as_str())?;
        println!("✅ Response conforms to {}", schema);
    }

    Ok(())
}
