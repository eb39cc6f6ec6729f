//! Channel-subscription hub.
//!
//! The wire-level pub/sub command family lives outside the engine; this
//! hub is the collaborator the notification bus fans out through, kept
//! in-process so delivery is observable. Messages land in subscriber
//! reply buffers in the standard three-element `message` frame.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::client::ClientId;
use crate::commands::reply::Reply;
use crate::engine::Engine;

#[derive(Debug, Default)]
pub struct PubSubHub {
    channels: Mutex<HashMap<Vec<u8>, Vec<ClientId>>>,
}

impl PubSubHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: &[u8], client: ClientId) {
        let mut channels = self.channels.lock();
        let subscribers = channels.entry(channel.to_vec()).or_default();
        if !subscribers.contains(&client) {
            subscribers.push(client);
        }
    }

    pub fn unsubscribe(&self, channel: &[u8], client: ClientId) {
        let mut channels = self.channels.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|&id| id != client);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    pub fn drop_client(&self, client: ClientId) {
        let mut channels = self.channels.lock();
        channels.retain(|_, subscribers| {
            subscribers.retain(|&id| id != client);
            !subscribers.is_empty()
        });
    }

    pub fn subscribers(&self, channel: &[u8]) -> Vec<ClientId> {
        self.channels
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

impl Engine {
    /// Register a client on a channel (the SUBSCRIBE surface proper is
    /// external; tests and the notification scenarios use this).
    pub fn subscribe_client(&mut self, client_id: ClientId, channel: &[u8]) {
        self.pubsub.subscribe(channel, client_id);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.subscriptions.insert(channel.to_vec());
        }
    }

    pub fn unsubscribe_client(&mut self, client_id: ClientId, channel: &[u8]) {
        self.pubsub.unsubscribe(channel, client_id);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.subscriptions.remove(channel);
        }
    }

    /// Fan a message out to every subscriber. Best-effort: a vanished
    /// subscriber is skipped, the rest still receive.
    pub fn publish(&mut self, channel: &[u8], payload: &[u8]) -> usize {
        let mut receivers = 0;
        for client_id in self.pubsub.subscribers(channel) {
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.push_reply(Reply::Array(vec![
                    Reply::bulk("message"),
                    Reply::bulk(channel.to_vec()),
                    Reply::bulk(payload.to_vec()),
                ]));
                receivers += 1;
            }
        }
        receivers
    }
}
