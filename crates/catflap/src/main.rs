use anyhow::Result;
use catflap_cli::{Cli, Command, IdentityCommand, TrustCommand};
use catflap_config::{AppConfig, AppPaths, ConfigManager};
use catflap_core::{
    ConnectTarget, ConnectionSupervisor, Credentials, Event, EventBus, LinkStatus, SshTunnelLink,
    TunnelTarget,
};
use catflap_keychain::{HostKeyTrustStore, IdentityStore, KeychainManager};
use catflap_ssh::SshTunnel;
use catflap_transport::{ConnectOptions, FrameTransport, GatewayClient};
use clap::Parser;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use zeroize::Zeroizing;

const TOKEN_SECRET: &str = "gateway:token";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::new()?;
    let config_manager = ConfigManager::new(paths.clone());
    let config = config_manager.load(std::env::current_dir().ok().as_deref(), None)?;
    let _log_guard = init_logging(&config, &paths)?;

    let keychain = KeychainManager::new(
        "catflap",
        paths.secrets_file.clone(),
        config.keychain.use_encrypted_file_fallback,
    );
    let identities = IdentityStore::new(keychain.clone());
    let master = cli.master.as_deref();

    match cli.command {
        Command::Config { init } => {
            if init {
                config_manager.save_default()?;
                println!("config initialized at {}", paths.config_file.display());
            }
        }
        Command::Identity { command } => {
            handle_identity(command, &identities, master)?;
        }
        Command::Trust { command } => {
            handle_trust(command, &paths)?;
        }
        Command::Connect {
            target,
            token,
            tunnel,
            remote_port,
        } => {
            run_connect(
                &config,
                &paths,
                &keychain,
                &identities,
                master,
                target,
                token,
                tunnel,
                remote_port,
            )
            .await?;
        }
    }

    Ok(())
}

fn init_logging(
    config: &AppConfig,
    paths: &AppPaths,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&paths.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, "catflap.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let file_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if config.logging.stdout {
        let stdout_layer = if config.logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .boxed()
        };
        tracing::subscriber::set_global_default(subscriber.with(stdout_layer))?;
    } else {
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn handle_identity(
    command: IdentityCommand,
    identities: &IdentityStore,
    master: Option<&str>,
) -> Result<()> {
    match command {
        IdentityCommand::Generate => {
            let identity = identities.generate(master)?;
            println!("device id: {}", identity.device_id()?);
            println!("public key: {}", identity.public_key_openssh()?);
            println!("register the public key with your gateway host before connecting");
        }
        IdentityCommand::Show => match identities.load(master)? {
            Some(identity) => {
                println!("device id: {}", identity.device_id()?);
                println!("public key: {}", identity.public_key_openssh()?);
            }
            None => println!("no device identity; run `catflap identity generate`"),
        },
        IdentityCommand::Delete => {
            identities.delete(master)?;
            println!("device identity deleted");
        }
    }
    Ok(())
}

fn handle_trust(command: TrustCommand, paths: &AppPaths) -> Result<()> {
    let mut store = HostKeyTrustStore::load(paths.trust_file.clone())?;
    match command {
        TrustCommand::List => {
            for (host, fingerprint) in store.hosts() {
                println!("{} {}", host, fingerprint);
            }
        }
        TrustCommand::Forget { hostname } => {
            store.delete(&hostname)?;
            println!("forgot host key for {}", hostname);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_connect(
    config: &AppConfig,
    paths: &AppPaths,
    keychain: &KeychainManager,
    identities: &IdentityStore,
    master: Option<&str>,
    target: String,
    token: Option<String>,
    tunnel: bool,
    remote_port: Option<u16>,
) -> Result<()> {
    let identity = identities
        .load(master)?
        .ok_or_else(|| anyhow::anyhow!("no device identity; run `catflap identity generate`"))?;

    let token = match token {
        Some(token) => {
            keychain.store_secret(TOKEN_SECRET, &Zeroizing::new(token.clone()), master)?;
            token
        }
        None => keychain
            .get_secret(TOKEN_SECRET, master)?
            .map(|t| t.to_string())
            .ok_or_else(|| anyhow::anyhow!("no stored token; pass --token once to save it"))?,
    };

    let connect_target = if tunnel {
        let (username, host, port) = parse_ssh_target(&target);
        ConnectTarget::Tunneled(TunnelTarget {
            host,
            port,
            username,
            remote_host: "localhost".to_string(),
            remote_port: remote_port.unwrap_or(config.ssh.remote_gateway_port),
        })
    } else {
        ConnectTarget::Direct {
            url: target.clone(),
        }
    };

    let trust = Arc::new(Mutex::new(HostKeyTrustStore::load(
        paths.trust_file.clone(),
    )?));
    let tunnel_link = Arc::new(SshTunnelLink::new(
        SshTunnel::new(trust),
        config.ssh.connect_timeout_ms,
        config.ssh.keepalive_interval_secs,
    ));
    let transport = FrameTransport::new();
    let bus = EventBus::new(256);
    let supervisor = ConnectionSupervisor::new(
        tunnel_link,
        Arc::new(transport.clone()),
        identity,
        config.gateway.clone(),
        config.reconnect.clone(),
        bus.clone(),
    );

    let mut events = bus.subscribe();
    supervisor
        .connect(Credentials {
            target: connect_target,
            token: token.clone(),
        })
        .await?;

    let client = GatewayClient::from_transport(
        transport,
        ConnectOptions {
            url: target,
            token,
            client_id: config.gateway.client_id.clone(),
            client_mode: config.gateway.client_mode.clone(),
            display_name: config.gateway.display_name.clone(),
            role: config.gateway.role.clone(),
            scopes: config.gateway.scopes.clone(),
            min_protocol: config.gateway.min_protocol,
            max_protocol: config.gateway.max_protocol,
            connect_timeout_ms: config.gateway.connect_timeout_ms,
        },
    );
    if let Ok(agents) = client.list_agents().await {
        println!("agents: {}", serde_json::to_string(&agents)?);
    }

    println!("connected; streaming events, ctrl-c to quit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(Event::Gateway { event, payload, seq }) => {
                    let payload = payload
                        .map(|p| serde_json::to_string(&p).unwrap_or_default())
                        .unwrap_or_default();
                    match seq {
                        Some(seq) => println!("[{}#{}] {}", event, seq, payload),
                        None => println!("[{}] {}", event, payload),
                    }
                }
                Ok(Event::LinkStateChanged { status }) => {
                    println!("link: {}", describe_status(&status));
                    if matches!(status, LinkStatus::Error(_)) {
                        break;
                    }
                }
                Ok(Event::SessionRestored) => {
                    if let Ok(agents) = client.list_agents().await {
                        println!("agents: {}", serde_json::to_string(&agents)?);
                    }
                }
                Ok(Event::Notification { level, message }) => {
                    println!("{}: {}", level, message);
                }
                Err(_) => break,
            }
        }
    }

    supervisor.disconnect().await;
    Ok(())
}

fn describe_status(status: &LinkStatus) -> String {
    match status {
        LinkStatus::Disconnected => "disconnected".to_string(),
        LinkStatus::Connecting => "connecting".to_string(),
        LinkStatus::Connected => "connected".to_string(),
        LinkStatus::Reconnecting { attempt } => format!("reconnecting (attempt {})", attempt),
        LinkStatus::Error(reason) => format!("error: {}", reason),
    }
}

fn parse_ssh_target(target: &str) -> (String, String, u16) {
    let mut user_host = target;
    let mut user = whoami::username();
    let mut port = 22;

    if let Some(at) = target.find('@') {
        user = target[..at].to_string();
        user_host = &target[at + 1..];
    }
    let host = if let Some(colon) = user_host.rfind(':') {
        if let Ok(p) = user_host[colon + 1..].parse::<u16>() {
            port = p;
            &user_host[..colon]
        } else {
            user_host
        }
    } else {
        user_host
    };
    (user, host.to_string(), port)
}
