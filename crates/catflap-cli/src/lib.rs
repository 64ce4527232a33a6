use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "catflap", version, about = "gateway client for AI chat agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long)]
    pub config: Option<String>,

    /// Master password for the encrypted keychain fallback.
    #[arg(long, env = "CATFLAP_MASTER")]
    pub master: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a gateway and stream its events to stdout.
    Connect {
        /// Gateway URL (direct mode) or ssh target `user@host[:port]`
        /// (tunneled mode with --tunnel).
        target: String,
        /// Bearer token; falls back to the token stored in the keychain.
        #[arg(long)]
        token: Option<String>,
        /// Treat the target as an SSH host and tunnel to the gateway port.
        #[arg(long)]
        tunnel: bool,
        /// Gateway port on the remote side of the tunnel.
        #[arg(long)]
        remote_port: Option<u16>,
    },
    /// Manage the device identity keypair.
    Identity {
        #[command(subcommand)]
        command: IdentityCommand,
    },
    /// Manage pinned host keys.
    Trust {
        #[command(subcommand)]
        command: TrustCommand,
    },
    Config {
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum IdentityCommand {
    /// Generate a new keypair, replacing any existing one.
    Generate,
    /// Print the device id and the OpenSSH public key line.
    Show,
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum TrustCommand {
    List,
    /// Forget a pinned host key (required before re-trusting a rotated one).
    Forget { hostname: String },
}
