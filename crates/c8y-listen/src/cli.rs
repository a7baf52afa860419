//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use c8y_api::notification2::{AckMode, ApiFilter, SubscriptionContext};

/// Stream Cumulocity Notification 2.0 messages to stdout as JSON lines.
///
/// Connects to the named subscription, prints one JSON object per message
/// and keeps the connection alive across drops. Ctrl-C stops gracefully.
#[derive(Debug, Parser)]
#[allow(clippy::struct_excessive_bools)]
#[command(name = "c8y-listen", version, about)]
pub struct Cli {
    /// Subscription to listen on
    pub subscription: String,

    /// Config profile to use
    #[arg(short, long, env = "C8Y_PROFILE")]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "C8Y_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subscriber name (defaults to the alphanumeric subscription name)
    #[arg(long)]
    pub subscriber: Option<String>,

    /// Consumer name, for shared subscribers
    #[arg(long)]
    pub consumer: Option<String>,

    /// Share the subscriber between several consumers
    #[arg(long)]
    pub shared: bool,

    /// Subscription context
    #[arg(long, default_value = "mo", value_parser = parse_context)]
    pub context: SubscriptionContext,

    /// Create the subscription before listening if it does not exist
    #[arg(long)]
    pub create: bool,

    /// Managed object id to subscribe to (with --create, mo context)
    #[arg(long)]
    pub source: Option<String>,

    /// APIs to subscribe to (with --create; repeatable)
    #[arg(long = "api", value_parser = parse_api)]
    pub apis: Vec<ApiFilter>,

    /// Acknowledgment mode: auto, or manual (ack once the line is written)
    #[arg(long, value_parser = parse_ack_mode)]
    pub ack: Option<AckMode>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Request non-persistent tokens
    #[arg(long)]
    pub non_persistent: bool,

    /// Unsubscribe the subscriber on exit
    #[arg(long)]
    pub unsubscribe_on_stop: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_context(s: &str) -> Result<SubscriptionContext, String> {
    s.parse()
        .map_err(|_| format!("expected 'mo' or 'tenant', got '{s}'"))
}

fn parse_api(s: &str) -> Result<ApiFilter, String> {
    s.parse().map_err(|_| format!("unknown API '{s}'"))
}

fn parse_ack_mode(s: &str) -> Result<AckMode, String> {
    s.parse()
        .map_err(|_| format!("expected 'auto' or 'manual', got '{s}'"))
}
