use clap::{Parser, Subcommand};

/// Approval Relay: human-in-the-loop access approvals over Telegram
#[derive(Debug, Parser)]
#[command(name = "approval-relay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the relay server and the expiry job
    Serve {
        /// Port to bind (defaults to RELAY_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Register PUBLIC_WEBHOOK_URL with Telegram (run once per deployment)
    SetWebhook,

    /// Show the current status of a request
    Status { request_id: String },

    /// Run one expiry sweep now
    Sweep,

    /// Approve or decline a pending request from the shell
    Decide {
        request_id: String,
        #[arg(value_parser = ["approve", "decline"])]
        action: String,
        /// Name recorded as the responder
        #[arg(long = "as", default_value = "CLI operator")]
        responder: String,
    },
}
