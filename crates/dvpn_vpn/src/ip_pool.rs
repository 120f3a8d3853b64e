//! Allocation of client data plane addresses.

use std::{
    collections::HashSet,
    fmt,
    hash::Hash,
    net::{Ipv4Addr, Ipv6Addr},
    sync::Mutex,
};

use ipnetwork::{Ipv4Network, Ipv6Network};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpPoolError {
    #[error("No free addresses left in {0}")]
    PoolExhausted(String),
    #[error("Address {0} cannot be reserved")]
    AddressUnavailable(String),
}

/// Address type a sub-pool hands out.
pub trait PoolAddress: Copy + Eq + Hash + fmt::Display {
    fn to_bits(self) -> u128;

    fn from_bits(bits: u128) -> Self;

    /// Addresses which must never be assigned to a client.
    fn is_reserved(self) -> bool;
}

impl PoolAddress for Ipv4Addr {
    fn to_bits(self) -> u128 {
        u128::from(u32::from(self))
    }

    fn from_bits(bits: u128) -> Self {
        Ipv4Addr::from(bits as u32)
    }

    // `x.y.z.0` and `x.y.z.255` are network and broadcast addresses of /24 sub-ranges
    fn is_reserved(self) -> bool {
        matches!(self.octets()[3], 0 | 255)
    }
}

impl PoolAddress for Ipv6Addr {
    fn to_bits(self) -> u128 {
        u128::from(self)
    }

    fn from_bits(bits: u128) -> Self {
        Ipv6Addr::from(bits)
    }

    fn is_reserved(self) -> bool {
        self.segments()[7] == 0
    }
}

struct PoolState<A> {
    cursor: u128,
    free: Vec<A>,
    reserved: HashSet<A>,
}

/// Pool of addresses within a single network.
///
/// Released addresses are reused before the cursor advances into unallocated space.
/// The cursor never wraps, running past the end of the network is a hard failure.
pub struct AddressPool<A> {
    network: String,
    server: A,
    start: u128,
    end: u128,
    state: Mutex<PoolState<A>>,
}

impl<A: PoolAddress> AddressPool<A> {
    /// `server` is the node's own address, `first` and `last` delimit usable addresses.
    fn with_range(network: String, server: A, first: A, last: A) -> Self {
        let start = server.to_bits().max(first.to_bits()).saturating_add(1);
        Self {
            network,
            server,
            start,
            end: last.to_bits().saturating_add(1),
            state: Mutex::new(PoolState {
                cursor: start,
                free: Vec::new(),
                reserved: HashSet::new(),
            }),
        }
    }

    pub fn acquire(&self) -> Result<A, IpPoolError> {
        let mut state = self.state.lock().unwrap();
        if let Some(address) = state.free.pop() {
            state.reserved.insert(address);
            debug!("Reusing released address {address} from {}", self.network);
            return Ok(address);
        }

        while state.cursor < self.end {
            let address = A::from_bits(state.cursor);
            state.cursor += 1;
            // skip addresses restored with `reserve`
            if address == self.server || address.is_reserved() || state.reserved.contains(&address)
            {
                continue;
            }
            state.reserved.insert(address);
            return Ok(address);
        }

        warn!("Address pool {} is exhausted", self.network);
        Err(IpPoolError::PoolExhausted(self.network.clone()))
    }

    /// Returns an address to the pool. Releasing an address which is not reserved does nothing.
    pub fn release(&self, address: A) {
        let mut state = self.state.lock().unwrap();
        if !state.reserved.remove(&address) {
            debug!("Ignoring release of unreserved address {address}");
            return;
        }
        // addresses ahead of the cursor are handed out by the cursor itself
        if address.to_bits() < state.cursor {
            state.free.push(address);
        }
    }

    /// Marks an address assigned before a restart as taken.
    ///
    /// Fails for addresses outside of the usable range and for addresses already reserved.
    pub fn reserve(&self, address: A) -> Result<(), IpPoolError> {
        let bits = address.to_bits();
        let usable = (self.start..self.end).contains(&bits)
            && address != self.server
            && !address.is_reserved();
        let mut state = self.state.lock().unwrap();
        if !usable || !state.reserved.insert(address) {
            return Err(IpPoolError::AddressUnavailable(address.to_string()));
        }
        state.free.retain(|free| *free != address);
        debug!("Reserved address {address} in {}", self.network);
        Ok(())
    }

    #[must_use]
    pub fn is_reserved(&self, address: A) -> bool {
        self.state.lock().unwrap().reserved.contains(&address)
    }

    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.state.lock().unwrap().reserved.len()
    }
}

pub type Ipv4Pool = AddressPool<Ipv4Addr>;
pub type Ipv6Pool = AddressPool<Ipv6Addr>;

impl Ipv4Pool {
    #[must_use]
    pub fn new(network: Ipv4Network) -> Self {
        let last = Ipv4Addr::from(u32::from(network.broadcast()).saturating_sub(1));
        Self::with_range(network.to_string(), network.ip(), network.network(), last)
    }
}

impl Ipv6Pool {
    #[must_use]
    pub fn new(network: Ipv6Network) -> Self {
        let last = Ipv6Addr::from(u128::from(network.network()) | !u128::from(network.mask()));
        Self::with_range(network.to_string(), network.ip(), network.network(), last)
    }
}

/// Pair of addresses assigned to a single peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpLease {
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
}

impl IpLease {
    /// 4 byte IPv4 address followed by 16 byte IPv6 address.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(20);
        bytes.extend_from_slice(&self.ipv4.octets());
        bytes.extend_from_slice(&self.ipv6.octets());
        bytes
    }
}

/// IPv4 and IPv6 pools leasing addresses in pairs.
pub struct IpPool {
    pub v4: Ipv4Pool,
    pub v6: Ipv6Pool,
    ipv4_network: Ipv4Network,
    ipv6_network: Ipv6Network,
}

impl IpPool {
    #[must_use]
    pub fn new(ipv4_network: Ipv4Network, ipv6_network: Ipv6Network) -> Self {
        Self {
            v4: Ipv4Pool::new(ipv4_network),
            v6: Ipv6Pool::new(ipv6_network),
            ipv4_network,
            ipv6_network,
        }
    }

    /// Acquires an IPv4 then an IPv6 address. On failure no address stays reserved.
    pub fn acquire(&self) -> Result<IpLease, IpPoolError> {
        let ipv4 = self.v4.acquire()?;
        let ipv6 = match self.v6.acquire() {
            Ok(ipv6) => ipv6,
            Err(err) => {
                self.v4.release(ipv4);
                return Err(err);
            }
        };

        Ok(IpLease { ipv4, ipv6 })
    }

    pub fn release(&self, lease: IpLease) {
        self.v4.release(lease.ipv4);
        self.v6.release(lease.ipv6);
    }

    /// Reserves both addresses of a lease handed out before a restart, or neither of them.
    pub fn reserve(&self, lease: IpLease) -> Result<(), IpPoolError> {
        self.v4.reserve(lease.ipv4)?;
        if let Err(err) = self.v6.reserve(lease.ipv6) {
            self.v4.release(lease.ipv4);
            return Err(err);
        }
        Ok(())
    }

    #[must_use]
    pub fn ipv4_network(&self) -> Ipv4Network {
        self.ipv4_network
    }

    #[must_use]
    pub fn ipv6_network(&self) -> Ipv6Network {
        self.ipv6_network
    }
}
