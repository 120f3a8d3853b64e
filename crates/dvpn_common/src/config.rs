use std::net::IpAddr;

use clap::{Parser, ValueEnum};
use humantime::Duration;
use ipnetwork::{Ipv4Network, Ipv6Network};
use reqwest::Url;
use secrecy::SecretString;
use serde::Serialize;
use strum::Display;

/// VPN backend served by this node.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VpnBackendKind {
    Wireguard,
    V2ray,
    Openvpn,
}

#[derive(Clone, Parser, Serialize, Debug)]
#[command(version)]
#[cfg_attr(test, command(ignore_errors(true)))]
pub struct NodeConfig {
    #[arg(long, env = "DVPN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "DVPN_MONIKER", default_value = "dvpn-node")]
    pub moniker: String,

    #[arg(long, env = "DVPN_HTTP_BIND_ADDRESS")]
    pub http_bind_address: Option<IpAddr>,

    #[arg(long, env = "DVPN_HTTP_PORT", default_value_t = 7777)]
    pub http_port: u16,

    #[arg(long, env = "DVPN_DATABASE_PATH", default_value = "dvpn.db")]
    pub database_path: String,

    /// Price advertised on the status endpoint, e.g. `1000udvpn`.
    #[arg(long, env = "DVPN_PRICE", default_value = "")]
    pub price: String,

    #[arg(long, env = "DVPN_MAX_PEERS", default_value_t = 250)]
    pub max_peers: usize,

    // VPN backend
    #[arg(long, env = "DVPN_VPN_BACKEND", value_enum, default_value_t = VpnBackendKind::Wireguard)]
    pub vpn_backend: VpnBackendKind,

    /// Address space for client IPv4 addresses, the host part is reserved for the node.
    #[arg(long, env = "DVPN_IPV4_POOL", default_value = "10.8.0.1/24")]
    pub ipv4_pool: Ipv4Network,

    /// Address space for client IPv6 addresses, the host part is reserved for the node.
    #[arg(long, env = "DVPN_IPV6_POOL", default_value = "fd86:ea04:1115::1/120")]
    pub ipv6_pool: Ipv6Network,

    #[arg(long, env = "DVPN_WIREGUARD_BIN", default_value = "wg")]
    pub wireguard_bin: String,

    #[arg(long, env = "DVPN_WIREGUARD_INTERFACE", default_value = "wg0")]
    pub wireguard_interface: String,

    #[arg(long, env = "DVPN_WIREGUARD_PORT", default_value_t = 51820)]
    pub wireguard_port: u16,

    /// Base64 encoded public key of the node WireGuard interface.
    #[arg(long, env = "DVPN_WIREGUARD_PUBKEY", default_value = "")]
    pub wireguard_pubkey: String,

    #[arg(long, env = "DVPN_V2RAY_BIN", default_value = "v2ray")]
    pub v2ray_bin: String,

    #[arg(long, env = "DVPN_V2RAY_API_ADDRESS", default_value = "127.0.0.1:23")]
    pub v2ray_api_address: String,

    #[arg(long, env = "DVPN_V2RAY_INBOUND_TAG", default_value = "vmess")]
    pub v2ray_inbound_tag: String,

    /// Transport tag exposed to clients (1 = tcp, 2 = mkcp, 3 = websocket, 4 = http, 5 = domainsocket, 6 = quic, 7 = grpc).
    #[arg(long, env = "DVPN_V2RAY_TRANSPORT", default_value_t = 3)]
    pub v2ray_transport: u8,

    #[arg(long, env = "DVPN_V2RAY_PORT", default_value_t = 8686)]
    pub v2ray_port: u16,

    #[arg(long, env = "DVPN_OPENVPN_MANAGEMENT_ADDRESS", default_value = "127.0.0.1:7505")]
    pub openvpn_management_address: String,

    #[arg(long, env = "DVPN_OPENVPN_CCD_DIR", default_value = "/etc/openvpn/ccd")]
    pub openvpn_ccd_dir: String,

    #[arg(long, env = "DVPN_OPENVPN_PORT", default_value_t = 1194)]
    pub openvpn_port: u16,

    // ledger
    #[arg(
        long = "ledger-rpc-endpoint",
        env = "DVPN_LEDGER_RPC_ENDPOINTS",
        value_parser = Url::parse,
        value_delimiter = ',',
        default_value = "http://127.0.0.1:1317"
    )]
    #[serde(skip_serializing)]
    pub ledger_rpc_endpoints: Vec<Url>,

    #[arg(long, env = "DVPN_LEDGER_CHAIN_ID", default_value = "dvpn-1")]
    pub ledger_chain_id: String,

    #[arg(long, env = "DVPN_LEDGER_QUERY_TIMEOUT", default_value = "5s")]
    #[serde(skip_serializing)]
    pub ledger_query_timeout: Duration,

    /// Base64 encoded 32 byte ed25519 seed used to sign ledger transactions.
    #[arg(long, env = "DVPN_LEDGER_SIGNING_KEY")]
    #[serde(skip_serializing)]
    pub ledger_signing_key: SecretString,

    #[arg(long, env = "DVPN_LEDGER_ADDRESS_PREFIX", default_value = "dvpn")]
    pub ledger_address_prefix: String,

    #[arg(long, env = "DVPN_LEDGER_SIMULATE_GAS")]
    pub ledger_simulate_gas: bool,

    #[arg(long, env = "DVPN_LEDGER_GAS", default_value_t = 200_000)]
    pub ledger_gas: u64,

    #[arg(long, env = "DVPN_LEDGER_GAS_ADJUSTMENT", default_value_t = 1.15)]
    pub ledger_gas_adjustment: f64,

    #[arg(long, env = "DVPN_LEDGER_GAS_PRICE", default_value_t = 0.1)]
    pub ledger_gas_price: f64,

    #[arg(long, env = "DVPN_LEDGER_FEE_DENOM", default_value = "udvpn")]
    pub ledger_fee_denom: String,

    #[arg(long, env = "DVPN_LEDGER_TX_RETRY_ATTEMPTS", default_value_t = 5)]
    pub ledger_tx_retry_attempts: u32,

    #[arg(long, env = "DVPN_LEDGER_TX_RETRY_DELAY", default_value = "1s")]
    #[serde(skip_serializing)]
    pub ledger_tx_retry_delay: Duration,

    // jobs
    #[arg(long, env = "DVPN_QUOTA_CHECK_INTERVAL", default_value = "30s")]
    #[serde(skip_serializing)]
    pub quota_check_interval: Duration,

    #[arg(long, env = "DVPN_SESSION_SYNC_INTERVAL", default_value = "2m")]
    #[serde(skip_serializing)]
    pub session_sync_interval: Duration,

    #[arg(long, env = "DVPN_NODE_STATUS_INTERVAL", default_value = "55m")]
    #[serde(skip_serializing)]
    pub node_status_interval: Duration,
}

impl NodeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::parse()
    }
}
