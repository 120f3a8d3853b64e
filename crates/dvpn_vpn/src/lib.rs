//! Peer management for the VPN backends served by a node.

use std::io;

use base64::prelude::{BASE64_STANDARD, Engine};
use dvpn_common::config::{NodeConfig, VpnBackendKind};
use paste::paste;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::ip_pool::IpPoolError;

pub mod ip_pool;
pub mod openvpn;
pub mod peers;
pub mod v2ray;
pub mod wireguard;

#[derive(Debug, Error)]
pub enum VpnError {
    #[error("Invalid peer identity: {0}")]
    InvalidIdentity(String),
    #[error("Peer {0} already exists")]
    PeerExists(String),
    #[error(transparent)]
    IpPool(#[from] IpPoolError),
    #[error("Command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("Management interface error: {0}")]
    Management(String),
    #[error("Unexpected backend output: {0}")]
    Parse(String),
    #[error("Invalid backend configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Traffic counters of a connected peer, from the node's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerStats {
    pub identity: Vec<u8>,
    /// Bytes received from the peer.
    pub upload: i64,
    /// Bytes sent to the peer.
    pub download: i64,
}

impl PeerStats {
    /// Base64 encoded identity, used as the session key.
    #[must_use]
    pub fn key(&self) -> String {
        BASE64_STANDARD.encode(&self.identity)
    }
}

/// Peer management capability of a VPN backend.
#[trait_variant::make(Send)]
pub trait VpnService {
    fn kind(&self) -> VpnBackendKind;

    /// Connection details handed to clients along with the peer creation result.
    fn info(&self) -> Vec<u8>;

    /// Creates a peer, returns backend specific connection data for the client.
    async fn add_peer(&self, identity: &[u8]) -> Result<Vec<u8>, VpnError>;

    /// Removes a peer. Removing an unknown peer is not an error.
    async fn remove_peer(&self, identity: &[u8]) -> Result<(), VpnError>;

    /// Lists connected peers with their cumulative traffic counters.
    async fn peers(&self) -> Result<Vec<PeerStats>, VpnError>;

    fn peers_count(&self) -> usize;

    /// Rebuilds peer state of a backend which kept running while the node restarted.
    ///
    /// `known` holds identities of stored sessions, used by backends unable to list their peers.
    /// Returns the number of restored peers.
    async fn restore_peers(&self, known: &[Vec<u8>]) -> Result<usize, VpnError>;
}

/// This macro generates an enum dispatching [`VpnService`] calls to concrete backends,
/// avoiding `Box<dyn VpnService>` and its boxed futures.
///
/// When adding a backend make sure that:
/// - The backend lives in a module named after it in lowercase, e.g. `wireguard.rs`
/// - Its main struct is called `<Backend>Service`, e.g. `WireguardService`
/// - It is constructed in [`VpnBackend::build`]
macro_rules! vpn_backends {
    ($($variant:ident),*) => {
        paste! {
        pub enum VpnBackend {
            $(
                $variant([< $variant:lower >]::[< $variant Service >]),
            )*
        }
        }

        impl VpnService for VpnBackend {
            fn kind(&self) -> VpnBackendKind {
                match self {
                    $(
                        VpnBackend::$variant(service) => service.kind(),
                    )*
                }
            }

            fn info(&self) -> Vec<u8> {
                match self {
                    $(
                        VpnBackend::$variant(service) => service.info(),
                    )*
                }
            }

            async fn add_peer(&self, identity: &[u8]) -> Result<Vec<u8>, VpnError> {
                match self {
                    $(
                        VpnBackend::$variant(service) => service.add_peer(identity).await,
                    )*
                }
            }

            async fn remove_peer(&self, identity: &[u8]) -> Result<(), VpnError> {
                match self {
                    $(
                        VpnBackend::$variant(service) => service.remove_peer(identity).await,
                    )*
                }
            }

            async fn peers(&self) -> Result<Vec<PeerStats>, VpnError> {
                match self {
                    $(
                        VpnBackend::$variant(service) => service.peers().await,
                    )*
                }
            }

            fn peers_count(&self) -> usize {
                match self {
                    $(
                        VpnBackend::$variant(service) => service.peers_count(),
                    )*
                }
            }

            async fn restore_peers(&self, known: &[Vec<u8>]) -> Result<usize, VpnError> {
                match self {
                    $(
                        VpnBackend::$variant(service) => service.restore_peers(known).await,
                    )*
                }
            }
        }
    };
}

vpn_backends!(Wireguard, V2ray, Openvpn);

impl VpnBackend {
    /// Builds the backend selected in configuration.
    pub fn build(config: &NodeConfig) -> Result<Self, VpnError> {
        let backend = match config.vpn_backend {
            VpnBackendKind::Wireguard => {
                Self::Wireguard(wireguard::WireguardService::from_config(config)?)
            }
            VpnBackendKind::V2ray => Self::V2ray(v2ray::V2rayService::from_config(config)),
            VpnBackendKind::Openvpn => Self::Openvpn(openvpn::OpenvpnService::from_config(config)),
        };
        info!("Using {} VPN backend", config.vpn_backend);
        Ok(backend)
    }
}

/// Runs a backend control tool and returns its standard output.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String, VpnError> {
    let command = format!("{program} {}", args.join(" "));
    debug!("Running {command}");
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(VpnError::Command {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
