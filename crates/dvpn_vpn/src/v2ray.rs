use std::{collections::BTreeMap, env, path::PathBuf};

use dvpn_common::config::{NodeConfig, VpnBackendKind};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    PeerStats, VpnError, VpnService,
    peers::{Peer, PeerRegistry},
    run_command,
};

/// V2Ray users managed through the V2Ray API.
///
/// Users are identified by UUID, which is also used as their e-mail so that
/// traffic statistics can be attributed to them.
pub struct V2rayService {
    bin: String,
    api_address: String,
    inbound_tag: String,
    info: Vec<u8>,
    peers: PeerRegistry,
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(default)]
    stat: Vec<Stat>,
}

#[derive(Deserialize)]
struct Stat {
    name: String,
    // int64 values are rendered as strings by protobuf JSON encoding
    #[serde(default)]
    value: Value,
}

impl V2rayService {
    #[must_use]
    pub fn new(bin: &str, api_address: &str, inbound_tag: &str, transport: u8, port: u16) -> Self {
        let mut info = vec![transport];
        info.extend_from_slice(&port.to_be_bytes());
        Self {
            bin: bin.into(),
            api_address: api_address.into(),
            inbound_tag: inbound_tag.into(),
            info,
            peers: PeerRegistry::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            &config.v2ray_bin,
            &config.v2ray_api_address,
            &config.v2ray_inbound_tag,
            config.v2ray_transport,
            config.v2ray_port,
        )
    }

    fn uuid(identity: &[u8]) -> Result<Uuid, VpnError> {
        Uuid::from_slice(identity).map_err(|err| VpnError::InvalidIdentity(err.to_string()))
    }

    fn server_arg(&self) -> String {
        format!("--server={}", self.api_address)
    }

    async fn add_user(&self, uuid: &Uuid) -> Result<(), VpnError> {
        let user = json!({
            "inbounds": [{
                "tag": self.inbound_tag,
                "protocol": "vmess",
                "settings": {
                    "clients": [{
                        "id": uuid.to_string(),
                        "email": uuid.to_string(),
                    }]
                }
            }]
        });
        let path: PathBuf = env::temp_dir().join(format!("dvpn-v2ray-{uuid}.json"));
        fs::write(&path, user.to_string()).await?;
        let path_arg = path.to_string_lossy().into_owned();
        let result = run_command(&self.bin, &["api", "adu", &self.server_arg(), &path_arg]).await;
        if let Err(err) = fs::remove_file(&path).await {
            warn!("Failed to remove temporary V2Ray user file {path_arg}: {err}");
        }
        result.map(|_| ())
    }

    /// Keeps counters of users added through this node. V2Ray keeps reporting counters of
    /// removed users until it restarts.
    fn known_stats(&self, mut stats: Vec<PeerStats>) -> Vec<PeerStats> {
        stats.retain(|peer| {
            let known = self.peers.contains(&peer.identity);
            if known {
                self.peers
                    .update_usage(&peer.identity, peer.upload, peer.download);
            } else {
                debug!("Ignoring traffic of V2Ray user {}", peer.key());
            }
            known
        });
        stats
    }
}

fn counter(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(string) => string.parse().ok(),
        Value::Null => Some(0),
        _ => None,
    }
}

/// Parses output of `v2ray api stats -json`, grouping `user>>>{uuid}>>>traffic>>>*` counters.
pub(crate) fn parse_stats(output: &str) -> Result<Vec<PeerStats>, VpnError> {
    let response: StatsResponse = serde_json::from_str(output)
        .map_err(|err| VpnError::Parse(format!("invalid V2Ray stats: {err}")))?;

    let mut users: BTreeMap<Uuid, PeerStats> = BTreeMap::new();
    for stat in response.stat {
        let parts: Vec<_> = stat.name.split(">>>").collect();
        let ["user", email, "traffic", direction] = parts[..] else {
            continue;
        };
        let Ok(uuid) = Uuid::parse_str(email) else {
            debug!("Skipping traffic of V2Ray user {email}");
            continue;
        };
        let value = counter(&stat.value)
            .ok_or_else(|| VpnError::Parse(format!("invalid counter {}", stat.value)))?;
        let entry = users.entry(uuid).or_insert_with(|| PeerStats {
            identity: uuid.as_bytes().to_vec(),
            upload: 0,
            download: 0,
        });
        match direction {
            "uplink" => entry.upload = value,
            "downlink" => entry.download = value,
            _ => {}
        }
    }

    Ok(users.into_values().collect())
}

impl VpnService for V2rayService {
    fn kind(&self) -> VpnBackendKind {
        VpnBackendKind::V2ray
    }

    fn info(&self) -> Vec<u8> {
        self.info.clone()
    }

    async fn add_peer(&self, identity: &[u8]) -> Result<Vec<u8>, VpnError> {
        let uuid = Self::uuid(identity)?;
        if !self.peers.insert(Peer::new(identity, None)) {
            return Err(VpnError::PeerExists(uuid.to_string()));
        }
        if let Err(err) = self.add_user(&uuid).await {
            self.peers.remove(identity);
            return Err(err);
        }

        info!("Added V2Ray user {uuid}");
        Ok(Vec::new())
    }

    async fn remove_peer(&self, identity: &[u8]) -> Result<(), VpnError> {
        let uuid = Self::uuid(identity)?;
        let email = uuid.to_string();
        let tag = format!("-tag={}", self.inbound_tag);
        let known = self.peers.contains(identity);
        let result = run_command(&self.bin, &["api", "rmu", &self.server_arg(), &tag, &email]).await;

        match (known, result) {
            (_, Ok(_)) => {
                self.peers.remove(identity);
                info!("Removed V2Ray user {uuid}");
                Ok(())
            }
            // V2Ray rejects removal of users it does not know
            (false, Err(err)) => {
                debug!("V2Ray user {uuid} not removed: {err}");
                Ok(())
            }
            (true, Err(err)) => Err(err),
        }
    }

    async fn peers(&self) -> Result<Vec<PeerStats>, VpnError> {
        let output = run_command(&self.bin, &["api", "stats", &self.server_arg(), "-json"]).await?;
        Ok(self.known_stats(parse_stats(&output)?))
    }

    fn peers_count(&self) -> usize {
        self.peers.len()
    }

    // the API has no way to list users, sessions stored by the node are taken as is
    async fn restore_peers(&self, known: &[Vec<u8>]) -> Result<usize, VpnError> {
        let mut restored = 0;
        for identity in known {
            match Self::uuid(identity) {
                Ok(uuid) => {
                    if self.peers.insert(Peer::new(identity, None)) {
                        debug!("Restored V2Ray user {uuid}");
                        restored += 1;
                    }
                }
                Err(err) => warn!("Skipping V2Ray user: {err}"),
            }
        }
        info!("Restored {restored} V2Ray users");
        Ok(restored)
    }
}
