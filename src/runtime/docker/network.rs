//! Project network provisioning on the Docker backend.
//!
//! Docker's own default address pools run out after a few dozen networks,
//! so the platform carves its project networks out of a reserved range of
//! its own: `/24`s from 172.33.0.0 up to 172.255.255.0. Computing the next
//! free subnet is a pure function over the currently allocated list; the
//! side-effecting wrapper holds a mutex across its list/decide/create
//! sequence because Docker offers no compare-and-swap for this.

use crate::runtime::error::RuntimeError;
use bollard::models::{Ipam, IpamConfig};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use ipnet::Ipv4Net;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::Mutex;

/// First octet of every platform-allocated subnet.
pub const RESERVED_FIRST_OCTET: u8 = 172;
/// Second octets below this belong to Docker's default pools.
pub const RESERVED_SECOND_OCTET: u8 = 33;

/// Compute the next free `/24` given the subnets currently allocated.
///
/// Only subnets inside the reserved range count; the candidate is the
/// `/24` right after the numerically highest one seen. An empty list
/// yields the bottom of the range.
pub fn next_subnet(existing: &[Ipv4Net]) -> Result<Ipv4Net, RuntimeError> {
    let highest = existing
        .iter()
        .filter(|net| {
            let octets = net.addr().octets();
            octets[0] == RESERVED_FIRST_OCTET && octets[1] >= RESERVED_SECOND_OCTET
        })
        .max_by_key(|net| u32::from(net.addr()));

    let addr = match highest {
        None => Ipv4Addr::new(RESERVED_FIRST_OCTET, RESERVED_SECOND_OCTET, 0, 0),
        Some(net) => {
            let octets = net.addr().octets();
            if octets[2] < 255 {
                Ipv4Addr::new(octets[0], octets[1], octets[2] + 1, 0)
            } else if octets[1] < 255 {
                Ipv4Addr::new(octets[0], octets[1] + 1, 0, 0)
            } else {
                return Err(RuntimeError::CapacityExceeded(
                    "no more networks available in the reserved range".into(),
                ));
            }
        }
    };
    Ipv4Net::new(addr, 24).map_err(|err| RuntimeError::Validation(err.to_string()))
}

/// Serialized scan-and-create over the shared Docker network list.
///
/// The name→id cache is advisory only; every hit is re-verified against
/// the daemon before being trusted.
pub struct NetworkAllocator {
    docker: Docker,
    known: Mutex<HashMap<String, String>>,
}

impl NetworkAllocator {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Return the id of the named network, creating it on a fresh subnet
    /// when it does not exist yet. An existing network with the requested
    /// name is success, not a conflict.
    pub async fn ensure(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<String, RuntimeError> {
        // one allocation at a time: list/decide/create must not interleave
        let mut known = self.known.lock().await;

        if let Some(id) = known.get(name) {
            if self.docker.inspect_network::<String>(id, None).await.is_ok() {
                return Ok(id.clone());
            }
            known.remove(name);
        }

        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;

        let mut allocated = Vec::new();
        for network in &networks {
            if network.name.as_deref() == Some(name) {
                let id = network.id.clone().unwrap_or_else(|| name.to_string());
                tracing::debug!(network = name, "network already exists");
                known.insert(name.to_string(), id.clone());
                return Ok(id);
            }
            let configs = network
                .ipam
                .as_ref()
                .and_then(|ipam| ipam.config.as_ref());
            for config in configs.into_iter().flatten() {
                if let Some(subnet) = config.subnet.as_ref().and_then(|s| s.parse().ok()) {
                    allocated.push(subnet);
                }
            }
        }

        let subnet = next_subnet(&allocated)?;
        tracing::info!(network = name, subnet = %subnet, "creating project network");

        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            ipam: Ipam {
                driver: Some("default".to_string()),
                config: Some(vec![IpamConfig {
                    subnet: Some(subnet.to_string()),
                    ..Default::default()
                }]),
                options: None,
            },
            labels,
            ..Default::default()
        };
        let response = self.docker.create_network(options).await?;
        let id = response.id.unwrap_or_else(|| name.to_string());
        known.insert(name.to_string(), id.clone());
        Ok(id)
    }
}
