//! Topic transport - gossip membership for a workspace
//!
//! The topic is derived from the workspace key; joining announces this
//! node and surfaces peers as they appear. New-block announcements ride
//! the same topic so peers that are behind pull promptly instead of
//! waiting for the next poll.

use crate::endpoint::PearsyncEndpoint;
use crate::error::NetError;
use futures_util::StreamExt;
use iroh_gossip::Gossip;
use pearsync_model::PubKey;
use pearsync_proto::gossip::{gossip_message::Payload, BlockAnnounce, GossipMessage};
use prost::Message;
use tokio::sync::mpsc;

/// Generate the deterministic gossip TopicId for a workspace key.
pub fn topic_for_workspace(workspace: &PubKey) -> iroh_gossip::TopicId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"pearsync/");
    hasher.update(workspace.as_bytes());
    iroh_gossip::TopicId::from_bytes(*hasher.finalize().as_bytes())
}

/// Events surfaced from the workspace topic.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    /// A peer became a gossip neighbor; worth dialing for sync.
    PeerUp(iroh::PublicKey),
    /// A neighbor went away.
    PeerDown(iroh::PublicKey),
    /// A peer announced a new block for a writer's log.
    Announce {
        from: iroh::PublicKey,
        writer: PubKey,
        seq: u64,
    },
}

/// A joined workspace topic (the announce half).
pub struct Topic {
    sender: iroh_gossip::api::GossipSender,
}

impl Topic {
    /// Subscribe to the workspace topic. `bootstrap` are peer ids to
    /// seed the swarm with (may be empty; discovery fills in the rest).
    /// Returns the announce handle and the event stream; dropping the
    /// receiver leaves the topic's event loop.
    pub async fn join(
        gossip: &Gossip,
        workspace: &PubKey,
        bootstrap: Vec<iroh::PublicKey>,
    ) -> Result<(Self, mpsc::Receiver<TopicEvent>), NetError> {
        let topic_id = topic_for_workspace(workspace);
        let topic = gossip
            .subscribe(topic_id, bootstrap)
            .await
            .map_err(|e| NetError::Gossip(e.to_string()))?;
        let (sender, receiver) = topic.split();

        let (event_tx, events) = mpsc::channel(64);
        tokio::spawn(run_receiver(receiver, event_tx));

        Ok((Self { sender }, events))
    }

    /// Broadcast a new-block announcement for a writer's log.
    pub async fn announce(&self, writer: &PubKey, seq: u64) -> Result<(), NetError> {
        let msg = GossipMessage {
            payload: Some(Payload::Announce(BlockAnnounce {
                author: writer.to_vec(),
                seq,
            })),
        };
        self.sender
            .broadcast(msg.encode_to_vec().into())
            .await
            .map_err(|e| NetError::Gossip(e.to_string()))
    }
}

async fn run_receiver(
    mut receiver: iroh_gossip::api::GossipReceiver,
    event_tx: mpsc::Sender<TopicEvent>,
) {
    // Initial neighbors joined before we started listening.
    for peer in receiver.neighbors() {
        if event_tx.send(TopicEvent::PeerUp(peer)).await.is_err() {
            return;
        }
    }

    while let Some(event) = receiver.next().await {
        let event = match event {
            Ok(iroh_gossip::api::Event::NeighborUp(peer)) => TopicEvent::PeerUp(peer),
            Ok(iroh_gossip::api::Event::NeighborDown(peer)) => TopicEvent::PeerDown(peer),
            Ok(iroh_gossip::api::Event::Received(msg)) => {
                let Ok(gossip_msg) = GossipMessage::decode(&msg.content[..]) else {
                    tracing::warn!(
                        from = %msg.delivered_from.fmt_short(),
                        "failed to decode gossip message"
                    );
                    continue;
                };
                match gossip_msg.payload {
                    Some(Payload::Announce(announce)) => {
                        let Ok(writer) = PubKey::try_from(announce.author) else {
                            continue;
                        };
                        TopicEvent::Announce {
                            from: msg.delivered_from,
                            writer,
                            seq: announce.seq,
                        }
                    }
                    None => continue,
                }
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "gossip receiver ended");
                break;
            }
        };
        if event_tx.send(event).await.is_err() {
            break;
        }
    }
}

/// Build the gossip instance for an endpoint.
pub fn spawn_gossip(endpoint: &PearsyncEndpoint) -> Gossip {
    Gossip::builder().spawn(endpoint.endpoint().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_deterministic_per_workspace() {
        let a = PubKey([1u8; 32]);
        let b = PubKey([2u8; 32]);

        assert_eq!(topic_for_workspace(&a), topic_for_workspace(&a));
        assert_ne!(topic_for_workspace(&a), topic_for_workspace(&b));
    }

    #[test]
    fn topic_differs_from_raw_key() {
        // The topic is a hash of the key, never the key itself.
        let key = PubKey([5u8; 32]);
        assert_ne!(topic_for_workspace(&key).as_bytes(), key.as_bytes());
    }
}
