use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use dvpn_common::config::{NodeConfig, VpnBackendKind};
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    PeerStats, VpnError, VpnService,
    ip_pool::{IpLease, IpPool},
    peers::{Peer, PeerRegistry},
};

/// OpenVPN server with a client config directory and a management interface.
///
/// Peers are identified by certificate common name. Addresses are pinned through
/// client config directory entries.
pub struct OpenvpnService {
    management_address: String,
    ccd_dir: PathBuf,
    info: Vec<u8>,
    pool: IpPool,
    peers: PeerRegistry,
}

impl OpenvpnService {
    #[must_use]
    pub fn new(management_address: &str, ccd_dir: &Path, port: u16, pool: IpPool) -> Self {
        Self {
            management_address: management_address.into(),
            ccd_dir: ccd_dir.into(),
            info: port.to_be_bytes().to_vec(),
            pool,
            peers: PeerRegistry::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            &config.openvpn_management_address,
            Path::new(&config.openvpn_ccd_dir),
            config.openvpn_port,
            IpPool::new(config.ipv4_pool, config.ipv6_pool),
        )
    }

    /// Common names end up in file paths, so only a conservative character set is accepted.
    fn common_name(identity: &[u8]) -> Result<&str, VpnError> {
        let name = std::str::from_utf8(identity)
            .map_err(|err| VpnError::InvalidIdentity(err.to_string()))?;
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if valid {
            Ok(name)
        } else {
            Err(VpnError::InvalidIdentity(format!(
                "invalid common name {name:?}"
            )))
        }
    }

    fn client_config(&self, lease: &IpLease) -> String {
        let ipv4_network = self.pool.ipv4_network();
        let ipv6_network = self.pool.ipv6_network();
        format!(
            "ifconfig-push {} {}\nifconfig-ipv6-push {}/{} {}\n",
            lease.ipv4,
            ipv4_network.mask(),
            lease.ipv6,
            ipv6_network.prefix(),
            ipv6_network.ip()
        )
    }

    /// Reads the lease back from a client config directory entry.
    fn parse_client_config(config: &str) -> Option<IpLease> {
        let (mut ipv4, mut ipv6) = (None, None);
        for line in config.lines() {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("ifconfig-push"), Some(address)) => ipv4 = address.parse().ok(),
                (Some("ifconfig-ipv6-push"), Some(address)) => {
                    ipv6 = address.split('/').next().and_then(|ip| ip.parse().ok());
                }
                _ => {}
            }
        }
        Some(IpLease {
            ipv4: ipv4?,
            ipv6: ipv6?,
        })
    }

    /// Sends a command to the management interface and collects response lines.
    ///
    /// Multi-line responses are terminated with `END`, single line responses start
    /// with `SUCCESS:` or `ERROR:`. Real-time notifications (`>...`) are skipped.
    async fn management_command(&self, command: &str) -> Result<Vec<String>, VpnError> {
        debug!("Sending OpenVPN management command: {command}");
        let stream = TcpStream::connect(&self.management_address).await?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(format!("{command}\n").as_bytes()).await?;

        let mut lines = BufReader::new(reader).lines();
        let mut response = Vec::new();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim_end().to_string();
            if line.starts_with('>') {
                continue;
            }
            if line == "END" {
                return Ok(response);
            }
            if line.starts_with("SUCCESS:") || line.starts_with("ERROR:") {
                response.push(line);
                return Ok(response);
            }
            response.push(line);
        }

        Err(VpnError::Management(format!(
            "connection closed before response to `{command}`"
        )))
    }
}

/// Parses `CLIENT_LIST` rows of `status 3` output.
///
/// Columns: common name, real address, virtual address, virtual IPv6 address,
/// bytes received, bytes sent, ...
pub(crate) fn parse_status(lines: &[String]) -> Result<Vec<PeerStats>, VpnError> {
    lines
        .iter()
        .filter(|line| line.starts_with("CLIENT_LIST\t"))
        .map(|line| {
            let fields: Vec<_> = line.split('\t').collect();
            if fields.len() < 7 {
                return Err(VpnError::Parse(format!("invalid client list row: {line}")));
            }
            let parse = |value: &str| {
                value
                    .parse::<i64>()
                    .map_err(|err| VpnError::Parse(format!("invalid byte count {value}: {err}")))
            };
            Ok(PeerStats {
                identity: fields[1].as_bytes().to_vec(),
                upload: parse(fields[5])?,
                download: parse(fields[6])?,
            })
        })
        .collect()
}

impl VpnService for OpenvpnService {
    fn kind(&self) -> VpnBackendKind {
        VpnBackendKind::Openvpn
    }

    fn info(&self) -> Vec<u8> {
        self.info.clone()
    }

    async fn add_peer(&self, identity: &[u8]) -> Result<Vec<u8>, VpnError> {
        let name = Self::common_name(identity)?;
        let lease = self.pool.acquire()?;
        if !self.peers.insert(Peer::new(identity, Some(lease))) {
            self.pool.release(lease);
            return Err(VpnError::PeerExists(name.into()));
        }

        let path = self.ccd_dir.join(name);
        if let Err(err) = fs::write(&path, self.client_config(&lease)).await {
            self.peers.remove(identity);
            self.pool.release(lease);
            return Err(err.into());
        }

        info!(
            "Added OpenVPN client {name} with addresses {} and {}",
            lease.ipv4, lease.ipv6
        );
        Ok(lease.to_bytes())
    }

    async fn remove_peer(&self, identity: &[u8]) -> Result<(), VpnError> {
        let name = Self::common_name(identity)?;
        // addresses stay leased until the client is gone
        let response = self.management_command(&format!("kill {name}")).await?;
        match response.last() {
            Some(line) if line.starts_with("SUCCESS:") => {}
            Some(line) if line.contains("not found") => {
                debug!("OpenVPN client {name} is not connected");
            }
            other => {
                return Err(VpnError::Management(format!(
                    "unexpected response to kill: {other:?}"
                )));
            }
        }

        match fs::remove_file(self.ccd_dir.join(name)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        if let Some(lease) = self.peers.remove(identity).and_then(|peer| peer.lease) {
            self.pool.release(lease);
        }
        info!("Removed OpenVPN client {name}");
        Ok(())
    }

    async fn peers(&self) -> Result<Vec<PeerStats>, VpnError> {
        let lines = self.management_command("status 3").await?;
        let stats = parse_status(&lines)?;
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
        let mut entries = fs::read_dir(&self.ccd_dir).await?;
        let mut restored = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|name| Self::common_name(name.as_bytes()).ok())
            else {
                debug!("Skipping client config entry {file_name:?}");
                continue;
            };
            let Some(lease) = Self::parse_client_config(&fs::read_to_string(entry.path()).await?)
            else {
                warn!("Client config of {name} has no address assignment, skipping it");
                continue;
            };
            if let Err(err) = self.pool.reserve(lease) {
                warn!("Skipping OpenVPN client {name}: {err}");
                continue;
            }
            if self.peers.insert(Peer::new(name.as_bytes(), Some(lease))) {
                debug!("Restored OpenVPN client {name}");
                restored += 1;
            } else {
                self.pool.release(lease);
            }
        }

        info!(
            "Restored {restored} OpenVPN clients from {}",
            self.ccd_dir.display()
        );
        Ok(restored)
    }
}
