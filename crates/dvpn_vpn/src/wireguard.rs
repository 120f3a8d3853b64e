use std::{net::IpAddr, str::FromStr};

use base64::prelude::{BASE64_STANDARD, Engine};
use dvpn_common::config::{NodeConfig, VpnBackendKind};
use ipnetwork::IpNetwork;
use tracing::{debug, info, warn};

use crate::{
    PeerStats, VpnError, VpnService,
    ip_pool::{IpLease, IpPool},
    peers::{Peer, PeerRegistry},
    run_command,
};

const KEY_LENGTH: usize = 32;

/// WireGuard interface controlled with the `wg` tool.
pub struct WireguardService {
    bin: String,
    interface: String,
    info: Vec<u8>,
    pool: IpPool,
    peers: PeerRegistry,
}

impl WireguardService {
    /// `public_key` is the base64 encoded key of the node interface.
    pub fn new(
        bin: &str,
        interface: &str,
        public_key: &str,
        port: u16,
        pool: IpPool,
    ) -> Result<Self, VpnError> {
        let key = BASE64_STANDARD
            .decode(public_key)
            .map_err(|err| VpnError::Config(format!("invalid WireGuard public key: {err}")))?;
        if key.len() != KEY_LENGTH {
            return Err(VpnError::Config(format!(
                "WireGuard public key must be {KEY_LENGTH} bytes long"
            )));
        }
        let mut info = key;
        info.extend_from_slice(&port.to_be_bytes());

        Ok(Self {
            bin: bin.into(),
            interface: interface.into(),
            info,
            pool,
            peers: PeerRegistry::new(),
        })
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self, VpnError> {
        Self::new(
            &config.wireguard_bin,
            &config.wireguard_interface,
            &config.wireguard_pubkey,
            config.wireguard_port,
            IpPool::new(config.ipv4_pool, config.ipv6_pool),
        )
    }

    fn public_key(identity: &[u8]) -> Result<String, VpnError> {
        if identity.len() != KEY_LENGTH {
            return Err(VpnError::InvalidIdentity(format!(
                "expected {KEY_LENGTH} byte public key, got {} bytes",
                identity.len()
            )));
        }
        Ok(BASE64_STANDARD.encode(identity))
    }

    /// Registers peers found on the interface and reserves their addresses.
    fn restore(&self, entries: Vec<(Vec<u8>, Option<IpLease>)>) -> usize {
        let mut restored = 0;
        for (identity, mut lease) in entries {
            let key = BASE64_STANDARD.encode(&identity);
            if let Some(address) = lease {
                if let Err(err) = self.pool.reserve(address) {
                    warn!("Restoring WireGuard peer {key} without its addresses: {err}");
                    lease = None;
                }
            }
            if self.peers.insert(Peer::new(&identity, lease)) {
                debug!("Restored WireGuard peer {key}");
                restored += 1;
            } else if let Some(address) = lease {
                self.pool.release(address);
            }
        }
        restored
    }
}

/// Parses output of `wg show <interface> allowed-ips`.
///
/// A lease is only returned for peers routing exactly one IPv4 and one IPv6 host address.
pub(crate) fn parse_allowed_ips(
    output: &str,
) -> Result<Vec<(Vec<u8>, Option<IpLease>)>, VpnError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            let Some(key) = fields.next() else {
                return Err(VpnError::Parse(format!("invalid allowed-ips line: {line}")));
            };
            let identity = BASE64_STANDARD
                .decode(key)
                .map_err(|err| VpnError::Parse(format!("invalid peer key {key}: {err}")))?;

            let (mut ipv4, mut ipv6) = (Vec::new(), Vec::new());
            for field in fields.filter(|field| *field != "(none)") {
                let network = IpNetwork::from_str(field).map_err(|err| {
                    VpnError::Parse(format!("invalid allowed address {field}: {err}"))
                })?;
                match network.ip() {
                    IpAddr::V4(address) => ipv4.push(address),
                    IpAddr::V6(address) => ipv6.push(address),
                }
            }
            let lease = match (ipv4.as_slice(), ipv6.as_slice()) {
                ([ipv4], [ipv6]) => Some(IpLease {
                    ipv4: *ipv4,
                    ipv6: *ipv6,
                }),
                _ => None,
            };
            Ok((identity, lease))
        })
        .collect()
}

/// Parses output of `wg show <interface> transfer`.
pub(crate) fn parse_transfer(output: &str) -> Result<Vec<PeerStats>, VpnError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<_> = line.split_whitespace().collect();
            let [key, received, sent] = fields[..] else {
                return Err(VpnError::Parse(format!("invalid transfer line: {line}")));
            };
            let identity = BASE64_STANDARD
                .decode(key)
                .map_err(|err| VpnError::Parse(format!("invalid peer key {key}: {err}")))?;
            let parse = |value: &str| {
                value
                    .parse::<i64>()
                    .map_err(|err| VpnError::Parse(format!("invalid byte count {value}: {err}")))
            };
            Ok(PeerStats {
                identity,
                upload: parse(received)?,
                download: parse(sent)?,
            })
        })
        .collect()
}

impl VpnService for WireguardService {
    fn kind(&self) -> VpnBackendKind {
        VpnBackendKind::Wireguard
    }

    fn info(&self) -> Vec<u8> {
        self.info.clone()
    }

    async fn add_peer(&self, identity: &[u8]) -> Result<Vec<u8>, VpnError> {
        let key = Self::public_key(identity)?;
        let lease = self.pool.acquire()?;
        if !self.peers.insert(Peer::new(identity, Some(lease))) {
            self.pool.release(lease);
            return Err(VpnError::PeerExists(key));
        }

        let allowed_ips = format!("{}/32,{}/128", lease.ipv4, lease.ipv6);
        let args = [
            "set",
            self.interface.as_str(),
            "peer",
            key.as_str(),
            "allowed-ips",
            allowed_ips.as_str(),
        ];
        if let Err(err) = run_command(&self.bin, &args).await {
            self.peers.remove(identity);
            self.pool.release(lease);
            return Err(err);
        }

        info!("Added WireGuard peer {key} with addresses {allowed_ips}");
        Ok(lease.to_bytes())
    }

    async fn remove_peer(&self, identity: &[u8]) -> Result<(), VpnError> {
        let key = Self::public_key(identity)?;
        run_command(
            &self.bin,
            &["set", self.interface.as_str(), "peer", key.as_str(), "remove"],
        )
        .await?;

        match self.peers.remove(identity) {
            Some(peer) => {
                if let Some(lease) = peer.lease {
                    self.pool.release(lease);
                }
                info!("Removed WireGuard peer {key}");
            }
            None => debug!("Removed WireGuard peer {key} unknown to this node"),
        }
        Ok(())
    }

    async fn peers(&self) -> Result<Vec<PeerStats>, VpnError> {
        let output =
            run_command(&self.bin, &["show", self.interface.as_str(), "transfer"]).await?;
        let stats = parse_transfer(&output)?;
        for peer in &stats {
            self.peers
                .update_usage(&peer.identity, peer.upload, peer.download);
        }
        Ok(stats)
    }

    fn peers_count(&self) -> usize {
        self.peers.len()
    }

    async fn restore_peers(&self, _known: &[Vec<u8>]) -> Result<usize, VpnError> {
        let output =
            run_command(&self.bin, &["show", self.interface.as_str(), "allowed-ips"]).await?;
        let restored = self.restore(parse_allowed_ips(&output)?);
        info!("Restored {restored} peers of WireGuard interface {}", self.interface);
        Ok(restored)
    }
}
