//! Iroh endpoint for network connectivity
//!
//! Creates an iroh endpoint from the writer's Ed25519 secret key, so the
//! same identity signs log blocks and authenticates the QUIC transport.
//!
//! Discovery: static provider (direct peer addition), mDNS (local
//! network), DHT and DNS (internet).

use iroh::discovery::dns::DnsDiscovery;
use iroh::discovery::mdns::MdnsDiscovery;
use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::discovery::static_provider::StaticProvider;
use iroh::endpoint::{BindError, ConnectError, Connection};
use iroh::Endpoint;
pub use iroh::PublicKey;

/// ALPN protocol identifier for pearsync replication
pub const PEARSYNC_ALPN: &[u8] = b"pearsync/1";

/// Wrapper around an iroh endpoint bound to the writer identity
#[derive(Clone)]
pub struct PearsyncEndpoint {
    endpoint: Endpoint,
    /// Static provider for adding peer addresses directly (tests, invites)
    static_discovery: StaticProvider,
}

impl PearsyncEndpoint {
    /// Bind a new endpoint from the writer's Ed25519 signing key.
    pub async fn new(signing_key: ed25519_dalek::SigningKey) -> Result<Self, BindError> {
        let secret_key = iroh::SecretKey::from(signing_key.to_bytes());

        let static_discovery = StaticProvider::new();
        let mdns = MdnsDiscovery::builder();
        let dht = DhtDiscovery::builder();
        let dns = DnsDiscovery::n0_dns();

        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![PEARSYNC_ALPN.to_vec(), iroh_gossip::ALPN.to_vec()])
            .discovery(static_discovery.clone())
            .discovery(mdns)
            .discovery(dht)
            .discovery(dns)
            .bind()
            .await?;
        Ok(Self {
            endpoint,
            static_discovery,
        })
    }

    /// The endpoint's public key (equal to the writer key).
    pub fn public_key(&self) -> PublicKey {
        self.endpoint.secret_key().public()
    }

    /// Connect to a peer by public key over the pearsync ALPN.
    pub async fn connect(&self, peer: PublicKey) -> Result<Connection, ConnectError> {
        self.endpoint.connect(peer, PEARSYNC_ALPN).await
    }

    /// The underlying iroh endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// This endpoint's dialable address info.
    pub fn addr(&self) -> iroh::EndpointAddr {
        self.endpoint.addr()
    }

    /// Add a peer address directly, bypassing discovery.
    pub fn add_peer_addr(&self, addr: iroh::EndpointAddr) {
        self.static_discovery.add_endpoint_info(addr);
    }

    /// Close the endpoint, tearing down all connections.
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}
