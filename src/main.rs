//! tunnel-datagram - QUIC datagram test tool
//!
//! Runs a datagram muxer on either end of a QUIC connection so framing,
//! size limits and demultiplexing can be checked against a live peer.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunnel_datagram::{
    BaseDatagramMuxer, DatagramError, DatagramMuxer, DatagramMuxerV2, DatagramVersion,
    FullSinkPolicy, MuxerConfig, SessionDatagram, MAX_DATAGRAM_FRAME_SIZE,
};
use tunnel_datagram_quic::{QuicConfig, QuicConnector, QuicDatagramConnection, QuicListener};
use uuid::Uuid;

/// tunnel-datagram - Send and receive multiplexed QUIC datagrams
#[derive(Parser, Debug)]
#[command(name = "tunnel-datagram")]
#[command(about = "tunnel-datagram - Send and receive multiplexed QUIC datagrams")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Datagram protocol version (1 or 2)
    #[arg(long, global = true, default_value = "2", value_parser = parse_version, env = "TUNNEL_DATAGRAM_VERSION")]
    protocol: DatagramVersion,

    /// Largest datagram frame to produce or accept
    #[arg(long, global = true, default_value_t = MAX_DATAGRAM_FRAME_SIZE, env = "TUNNEL_DATAGRAM_MAX_FRAME_SIZE")]
    max_frame_size: usize,

    /// Drop inbound datagrams instead of waiting when a consumer falls behind
    #[arg(long, global = true)]
    drop_when_full: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept QUIC connections and log every datagram received
    #[command(long_about = r#"
Accept QUIC connections and run a datagram muxer on each one. Every session
datagram and raw packet received is logged; with --echo it is also sent
back to the peer unchanged.

EXAMPLES:
  # Listen with a throwaway self-signed certificate
  tunnel-datagram listen --bind 127.0.0.1:4433 --echo

  # Listen with a real certificate, speaking the v1 wire format
  tunnel-datagram --protocol 1 listen --cert cert.pem --key key.pem

ENVIRONMENT VARIABLES:
  TUNNEL_DATAGRAM_BIND            Address to bind
  TUNNEL_DATAGRAM_CERT            PEM certificate file
  TUNNEL_DATAGRAM_KEY             PEM private key file
  TUNNEL_DATAGRAM_VERSION         Datagram protocol version
  TUNNEL_DATAGRAM_MAX_FRAME_SIZE  Largest datagram frame
    "#)]
    Listen {
        /// Address to bind (e.g., 0.0.0.0:4433)
        #[arg(long, default_value = "0.0.0.0:4433", env = "TUNNEL_DATAGRAM_BIND")]
        bind: SocketAddr,

        /// PEM certificate file (a self-signed one is generated if omitted)
        #[arg(long, env = "TUNNEL_DATAGRAM_CERT", requires = "key")]
        cert: Option<PathBuf>,

        /// PEM private key file
        #[arg(long, env = "TUNNEL_DATAGRAM_KEY", requires = "cert")]
        key: Option<PathBuf>,

        /// Send every received datagram back to its sender
        #[arg(long)]
        echo: bool,
    },

    /// Connect to a listener and send datagrams
    #[command(long_about = r#"
Connect to a listener and send session datagrams, or raw packets with
--packet (v2 only). With --wait-echo the command waits for each datagram to
come back before exiting.

EXAMPLES:
  tunnel-datagram send --server 127.0.0.1:4433 --insecure --message hello
  tunnel-datagram send --server 127.0.0.1:4433 --insecure --packet --count 10 --wait-echo

ENVIRONMENT VARIABLES:
  TUNNEL_DATAGRAM_SERVER       Listener address
  TUNNEL_DATAGRAM_SERVER_NAME  TLS server name
  TUNNEL_DATAGRAM_SESSION_ID   Session identifier to send as
    "#)]
    Send {
        /// Listener address (e.g., 127.0.0.1:4433)
        #[arg(long, env = "TUNNEL_DATAGRAM_SERVER")]
        server: SocketAddr,

        /// TLS server name
        #[arg(long, default_value = "localhost", env = "TUNNEL_DATAGRAM_SERVER_NAME")]
        server_name: String,

        /// Session to send as (random if not specified)
        #[arg(long, env = "TUNNEL_DATAGRAM_SESSION_ID")]
        session_id: Option<Uuid>,

        /// Payload to send
        #[arg(long, default_value = "ping")]
        message: String,

        /// Number of datagrams to send
        #[arg(long, default_value = "1")]
        count: usize,

        /// Send raw packet frames instead of session datagrams (v2 only)
        #[arg(long)]
        packet: bool,

        /// Wait for the listener to echo every datagram back
        #[arg(long)]
        wait_echo: bool,

        /// Seconds to wait for echoes
        #[arg(long, default_value = "5")]
        echo_timeout: u64,

        /// Skip certificate verification (insecure, for development only)
        #[arg(long)]
        insecure: bool,
    },
}

/// How long `send` waits for queued datagrams before closing
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

fn muxer_config(
    quic_config: &QuicConfig,
    version: DatagramVersion,
    policy: FullSinkPolicy,
) -> Result<MuxerConfig> {
    let config = quic_config.muxer_config().with_full_sink_policy(policy);
    config
        .validate(version)
        .context("Invalid muxer configuration")?;
    Ok(config)
}

fn parse_version(s: &str) -> Result<DatagramVersion, String> {
    let raw: u8 = s
        .trim_start_matches(['v', 'V'])
        .parse()
        .map_err(|_| format!("invalid datagram version '{}'", s))?;
    DatagramVersion::try_from(raw).map_err(|e| e.to_string())
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let policy = if cli.drop_when_full {
        FullSinkPolicy::Drop
    } else {
        FullSinkPolicy::Block
    };

    match cli.command {
        Commands::Listen {
            bind,
            cert,
            key,
            echo,
        } => {
            let quic_config = match (cert, key) {
                (Some(cert), Some(key)) => QuicConfig::server_default(cert, key),
                _ => {
                    warn!("No certificate given, generating a self-signed one");
                    QuicConfig::server_ephemeral()?
                }
            }
            .with_max_datagram_frame_size(cli.max_frame_size);

            let listener = QuicListener::new(bind, Arc::new(quic_config))
                .context("Failed to start listener")?;
            let muxer_config = muxer_config(listener.config(), cli.protocol, policy)?;

            info!(
                "Listening on {} ({} datagrams, echo {})",
                listener.local_addr()?,
                cli.protocol,
                if echo { "on" } else { "off" }
            );

            let shutdown = CancellationToken::new();
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            let served = run_listener(&listener, cli.protocol, muxer_config, echo, shutdown.clone());
            tokio::pin!(served);

            let served = tokio::select! {
                result = &mut served => result?,
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, shutting down...");
                    shutdown.cancel();
                    served.await?
                }
            };

            info!("tunnel-datagram stopped after {} connection(s)", served);
            Ok(())
        }

        Commands::Send {
            server,
            server_name,
            session_id,
            message,
            count,
            packet,
            wait_echo,
            echo_timeout,
            insecure,
        } => {
            if packet && cli.protocol == DatagramVersion::V1 {
                bail!("Raw packets require datagram protocol v2");
            }

            let quic_config = if insecure {
                warn!("⚠️  Certificate verification disabled (insecure mode)");
                QuicConfig::client_insecure()
            } else {
                QuicConfig::client_default()
            }
            .with_max_datagram_frame_size(cli.max_frame_size);

            let connector =
                QuicConnector::new(Arc::new(quic_config)).context("Failed to create connector")?;
            let muxer_config = muxer_config(connector.config(), cli.protocol, policy)?;
            let connection = Arc::new(
                connector
                    .connect(server, &server_name)
                    .await
                    .with_context(|| format!("Failed to connect to {}", server))?,
            );

            let session_id = session_id.unwrap_or_else(Uuid::new_v4);
            let payload = message.into_bytes();
            let outcome = send_datagrams(
                connection.clone(),
                cli.protocol,
                muxer_config,
                Outgoing {
                    session_id,
                    payload: &payload,
                    count,
                    packet,
                    wait_echo,
                    echo_timeout: Duration::from_secs(echo_timeout),
                },
            )
            .await;

            let stats = connection.stats();
            info!(
                "Connection stats: {} datagrams sent, {} received, {} packets lost, rtt {}ms",
                stats.datagrams_sent, stats.datagrams_received, stats.lost_packets, stats.rtt_ms
            );

            if !connection.flush_datagrams(FLUSH_TIMEOUT).await {
                warn!("Some datagrams were still queued when the connection closed");
            }
            connection.close(0, "done");
            let _ = tokio::time::timeout(FLUSH_TIMEOUT, connector.wait_idle()).await;

            outcome
        }
    }
}

/// Accept connections until `shutdown` fires
///
/// Returns once every connection task has finished, with the number of
/// connections served.
async fn run_listener(
    listener: &QuicListener,
    version: DatagramVersion,
    muxer_config: MuxerConfig,
    echo: bool,
    shutdown: CancellationToken,
) -> Result<usize> {
    let mut connections = JoinSet::new();
    let mut served = 0;

    let outcome = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            Some(_) = connections.join_next(), if !connections.is_empty() => served += 1,
            accepted = listener.accept() => {
                let (connection, remote) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => break Err(e),
                };
                let config = muxer_config.clone().with_label(remote.to_string());
                let shutdown = shutdown.child_token();

                connections.spawn(async move {
                    if let Err(e) =
                        serve_connection(connection, version, config, echo, shutdown).await
                    {
                        error!("Connection from {} failed: {:#}", remote, e);
                    }
                });
            }
        }
    };

    shutdown.cancel();
    listener.close();
    while connections.join_next().await.is_some() {
        served += 1;
    }

    outcome.context("Listener failed")?;
    Ok(served)
}

/// Run a muxer on an accepted connection until it closes
async fn serve_connection(
    connection: QuicDatagramConnection,
    version: DatagramVersion,
    config: MuxerConfig,
    echo: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let connection = Arc::new(connection);
    let (session_tx, session_rx) = mpsc::channel::<SessionDatagram>(64);

    let result = match version {
        DatagramVersion::V1 => {
            let muxer = Arc::new(DatagramMuxer::new(connection, config)?.with_session_sink(session_tx));
            let sessions = tokio::spawn(relay_sessions(muxer.clone(), session_rx, echo));

            let result = muxer.serve_receive(shutdown).await;
            sessions.abort();
            log_stats(&*muxer);
            result
        }
        DatagramVersion::V2 => {
            let (packet_tx, packet_rx) = mpsc::channel::<Bytes>(64);
            let muxer = Arc::new(
                DatagramMuxerV2::new(connection, config)?
                    .with_session_sink(session_tx)
                    .with_packet_sink(packet_tx),
            );
            let sessions = tokio::spawn(relay_sessions(muxer.clone(), session_rx, echo));
            let packets = tokio::spawn(relay_packets(muxer.clone(), packet_rx, echo));

            let result = muxer.serve_receive(shutdown).await;
            sessions.abort();
            packets.abort();
            log_stats(&*muxer);
            result
        }
    };

    match result {
        Err(DatagramError::Cancelled) => Ok(()),
        Err(DatagramError::Transport(e)) => {
            info!("Connection ended: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
        Ok(()) => Ok(()),
    }
}

async fn relay_sessions<M: BaseDatagramMuxer + ?Sized>(
    muxer: Arc<M>,
    mut rx: mpsc::Receiver<SessionDatagram>,
    echo: bool,
) {
    while let Some(datagram) = rx.recv().await {
        info!(
            "Session {}: {} bytes: {}",
            datagram.id,
            datagram.payload.len(),
            String::from_utf8_lossy(&datagram.payload)
        );

        if echo {
            if let Err(e) = muxer.mux_session(datagram.id, &datagram.payload).await {
                warn!("Failed to echo session {}: {}", datagram.id, e);
            }
        }
    }
}

async fn relay_packets<T>(
    muxer: Arc<DatagramMuxerV2<T>>,
    mut rx: mpsc::Receiver<Bytes>,
    echo: bool,
) where
    T: tunnel_datagram::DatagramTransport + 'static,
{
    while let Some(packet) = rx.recv().await {
        info!("Packet: {} bytes", packet.len());

        if echo {
            if let Err(e) = muxer.mux_packet(&packet).await {
                warn!("Failed to echo packet: {}", e);
            }
        }
    }
}

fn log_stats(muxer: &dyn BaseDatagramMuxer) {
    let stats = muxer.stats();
    info!(
        "Muxer stats: {} sessions / {} packets delivered, {} malformed, {} dropped (full), {} dropped (no sink)",
        stats.sessions_delivered,
        stats.packets_delivered,
        stats.malformed_dropped,
        stats.sink_full_dropped,
        stats.no_sink_dropped
    );
}

struct Outgoing<'a> {
    session_id: Uuid,
    payload: &'a [u8],
    count: usize,
    packet: bool,
    wait_echo: bool,
    echo_timeout: Duration,
}

async fn send_datagrams(
    connection: Arc<QuicDatagramConnection>,
    version: DatagramVersion,
    config: MuxerConfig,
    outgoing: Outgoing<'_>,
) -> Result<()> {
    let (session_tx, mut session_rx) = mpsc::channel::<SessionDatagram>(outgoing.count.max(1));
    let (packet_tx, mut packet_rx) = mpsc::channel::<Bytes>(outgoing.count.max(1));

    let muxer: Arc<dyn BaseDatagramMuxer> = match version {
        DatagramVersion::V1 => {
            Arc::new(DatagramMuxer::new(connection.clone(), config)?.with_session_sink(session_tx))
        }
        DatagramVersion::V2 => {
            let muxer = DatagramMuxerV2::new(connection.clone(), config)?
                .with_session_sink(session_tx)
                .with_packet_sink(packet_tx);

            if outgoing.packet {
                for _ in 0..outgoing.count {
                    muxer
                        .mux_packet(outgoing.payload)
                        .await
                        .context("Failed to send packet")?;
                }
                info!("Sent {} packet(s)", outgoing.count);
            }
            Arc::new(muxer)
        }
    };

    if !outgoing.packet {
        for _ in 0..outgoing.count {
            muxer
                .mux_session(outgoing.session_id, outgoing.payload)
                .await
                .context("Failed to send session datagram")?;
        }
        info!(
            "Sent {} datagram(s) for session {}",
            outgoing.count, outgoing.session_id
        );
    }

    if !outgoing.wait_echo {
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let serve = {
        let muxer = muxer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { muxer.serve_receive(shutdown).await })
    };

    let wait = async {
        for received in 0..outgoing.count {
            if outgoing.packet {
                match packet_rx.recv().await {
                    Some(packet) => debug!("Echo {}: packet of {} bytes", received + 1, packet.len()),
                    None => break,
                }
            } else {
                match session_rx.recv().await {
                    Some(datagram) => debug!(
                        "Echo {}: session {} with {} bytes",
                        received + 1,
                        datagram.id,
                        datagram.payload.len()
                    ),
                    None => break,
                }
            }
        }
    };

    let timed_out = tokio::time::timeout(outgoing.echo_timeout, wait).await.is_err();
    shutdown.cancel();
    let _ = serve.await;

    let stats = muxer.stats();
    let echoed = stats.sessions_delivered + stats.packets_delivered;
    info!("Received {}/{} echo(es)", echoed, outgoing.count);

    if timed_out {
        bail!(
            "Timed out after {:?} waiting for echoes ({} of {} received)",
            outgoing.echo_timeout,
            echoed,
            outgoing.count
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1").unwrap(), DatagramVersion::V1);
        assert_eq!(parse_version("v2").unwrap(), DatagramVersion::V2);
        assert!(parse_version("3").is_err());
        assert!(parse_version("two").is_err());
    }

    #[test]
    fn test_muxer_config_takes_frame_size_from_quic() {
        let quic = QuicConfig::client_insecure().with_max_datagram_frame_size(1200);
        let config = muxer_config(&quic, DatagramVersion::V2, FullSinkPolicy::Drop).unwrap();
        assert_eq!(config.max_frame_size, 1200);
        assert_eq!(config.full_sink_policy, FullSinkPolicy::Drop);

        let quic = QuicConfig::client_insecure().with_max_datagram_frame_size(16);
        assert!(muxer_config(&quic, DatagramVersion::V1, FullSinkPolicy::Block).is_err());
    }

    #[tokio::test]
    async fn test_listener_waits_for_connections_on_shutdown() {
        let quic = QuicConfig::server_ephemeral().unwrap();
        let listener = QuicListener::new("127.0.0.1:0".parse().unwrap(), Arc::new(quic)).unwrap();
        let addr = listener.local_addr().unwrap();
        let config =
            muxer_config(listener.config(), DatagramVersion::V2, FullSinkPolicy::Block).unwrap();

        let shutdown = CancellationToken::new();
        let server = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_listener(&listener, DatagramVersion::V2, config, true, shutdown).await
            })
        };

        let connector = QuicConnector::new(Arc::new(QuicConfig::client_insecure())).unwrap();
        let connection = Arc::new(connector.connect(addr, "localhost").await.unwrap());

        send_datagrams(
            connection.clone(),
            DatagramVersion::V2,
            connector.config().muxer_config(),
            Outgoing {
                session_id: Uuid::new_v4(),
                payload: b"hello",
                count: 1,
                packet: false,
                wait_echo: true,
                echo_timeout: Duration::from_secs(5),
            },
        )
        .await
        .unwrap();

        shutdown.cancel();
        let served = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("listener did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(served, 1);

        connection.close(0, "done");
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from([
            "tunnel-datagram",
            "--protocol",
            "1",
            "send",
            "--server",
            "127.0.0.1:4433",
            "--insecure",
            "--count",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.protocol, DatagramVersion::V1);
        match cli.command {
            Commands::Send {
                server,
                count,
                insecure,
                packet,
                ..
            } => {
                assert_eq!(server, "127.0.0.1:4433".parse::<SocketAddr>().unwrap());
                assert_eq!(count, 3);
                assert!(insecure);
                assert!(!packet);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_listen_cert_requires_key() {
        let result = Cli::try_parse_from(["tunnel-datagram", "listen", "--cert", "cert.pem"]);
        assert!(result.is_err());
    }
}
