mod cli;
mod error;

use std::io::Write;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use c8y_api::notification2::{
    AckMode, ApiFilter, ChannelSubscription, HandlerResult, Listener, ListenerConfig, Message,
    MessageSink, Subscription, SubscriptionContext, SubscriptionQuery, Subscriptions, Tokens,
};
use c8y_api::RestClient;
use c8y_config::ConfigError;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries the messages; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.clone().unwrap_or_else(c8y_config::config_path);
    let cfg = c8y_config::load_config_from(&config_path)?;
    let (profile_name, profile) = cfg.profile(cli.profile.as_deref()).map_err(|err| match err {
        ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
            name: profile,
            path: config_path.display().to_string(),
        },
        other => other.into(),
    })?;
    let client = c8y_config::profile_to_rest_client(profile, profile_name)?;
    let config = listener_config(&cli, &cfg.listener)?;

    if cli.create {
        let subscription = subscription_to_create(&cli)?;
        ensure_subscription(&client, &cli, &subscription)
            .await
            .map_err(|err| CliError::from_api(err, profile_name, &cli.subscription))?;
    }

    let channel = channel(&cli, profile.tenant.as_deref());
    tracing::info!(
        subscription = channel.name(),
        subscriber = channel.subscriber(),
        ack_mode = %config.ack_mode,
        "listening"
    );

    let manual_ack = config.ack_mode == AckMode::Manual;
    let listener = Listener::new(Tokens::new(client), channel, config)
        .on_state_change(|state| tracing::info!(%state, "listener state changed"));

    let stop = listener.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            stop.stop();
        }
    });

    let sink = MessageSink::callback(move |message: &Message| print_message(message, manual_ack));
    listener
        .listen(sink)
        .await
        .map_err(|err| CliError::from_api(err, profile_name, &cli.subscription))
}

/// Config-file listener settings with command-line overrides applied.
fn listener_config(
    cli: &Cli,
    settings: &c8y_config::ListenerSettings,
) -> Result<ListenerConfig, CliError> {
    let mut config = settings.to_listener_config()?;
    if let Some(ack_mode) = cli.ack {
        config.ack_mode = ack_mode;
    }
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }
    config.non_persistent |= cli.non_persistent;
    config.unsubscribe_on_stop |= cli.unsubscribe_on_stop;
    Ok(config)
}

fn channel(cli: &Cli, tenant: Option<&str>) -> ChannelSubscription {
    let mut channel = ChannelSubscription::new(&cli.subscription)
        .with_context(cli.context)
        .with_shared(cli.shared);
    if let Some(tenant) = tenant {
        channel = channel.with_tenant(tenant);
    }
    if let Some(ref subscriber) = cli.subscriber {
        channel = channel.with_subscriber(subscriber);
    }
    if let Some(ref consumer) = cli.consumer {
        channel = channel.with_consumer(consumer);
    }
    channel
}

/// The subscription `--create` asks for.
fn subscription_to_create(cli: &Cli) -> Result<Subscription, CliError> {
    let subscription = match (cli.context, cli.source.as_deref()) {
        (SubscriptionContext::ManagedObject, Some(source)) => {
            Subscription::managed_object(&cli.subscription, source)
        }
        (SubscriptionContext::ManagedObject, None) => {
            return Err(CliError::Validation {
                field: "source".into(),
                reason: "--create with context 'mo' needs --source".into(),
            });
        }
        (SubscriptionContext::Tenant, _) => Subscription::tenant(&cli.subscription),
    };
    let apis = if cli.apis.is_empty() {
        vec![ApiFilter::All]
    } else {
        cli.apis.clone()
    };
    Ok(subscription.with_apis(apis))
}

/// Create the subscription unless one with the same name and scope exists.
async fn ensure_subscription(
    client: &RestClient,
    cli: &Cli,
    subscription: &Subscription,
) -> Result<(), c8y_api::Error> {
    let subscriptions = Subscriptions::new(client);
    let existing = subscriptions
        .count(&SubscriptionQuery {
            context: Some(cli.context),
            source: cli.source.clone(),
            subscription: Some(cli.subscription.clone()),
            type_filter: None,
        })
        .await?;
    if existing > 0 {
        tracing::debug!(subscription = %cli.subscription, "subscription already exists");
        return Ok(());
    }

    let created = subscriptions.create(subscription).await?;
    tracing::info!(
        subscription = %cli.subscription,
        id = created.id.as_deref().unwrap_or_default(),
        "subscription created"
    );
    Ok(())
}

/// Write one message as a JSON line. In manual mode the ack follows a
/// successful write, so a closed stdout leaves the message unacknowledged.
fn print_message(message: &Message, manual_ack: bool) -> HandlerResult {
    let body = message
        .json::<serde_json::Value>()
        .unwrap_or_else(|_| serde_json::Value::String(message.body().to_owned()));
    let line = json!({
        "id": message.id(),
        "source": message.source(),
        "action": message.action(),
        "headers": message.headers(),
        "body": body,
    });

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;

    if manual_ack {
        message.ack();
    }
    Ok(())
}
