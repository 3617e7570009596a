//! Cross-HID bridge: authorized messaging between identity domains.
//!
//! Each bridge keeps two sets: `exported` names the HIDs permitted to send
//! to this node, `imported` the HIDs this node may send to. Listing is the
//! gate; the default policy decides how unlisted peers are treated, and
//! the `auth` policy routes listed peers through the authorizer. Wildcard
//! `"*"` membership works but must be configured explicitly.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use crate::domain::error::{BridgeError, SwarmResult};
use crate::domain::models::config::{BridgePolicy, CrossHidConfig};
use crate::domain::ports::authorizer::Authorizer;
use crate::domain::ports::transport::Transport;
use crate::infrastructure::transport::subjects;

/// A message crossing domain boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub from_hid: String,
    pub to_hid: String,
    pub msg_type: String,
    pub payload: Vec<u8>,
}

/// Mediates sends and receives between HIDs.
pub struct CrossHidBridge {
    transport: Arc<dyn Transport>,
    hid: String,
    sid: String,
    exported: RwLock<HashSet<String>>,
    imported: RwLock<HashSet<String>>,
    export_policy: BridgePolicy,
    import_policy: BridgePolicy,
    authorizer: Option<Arc<dyn Authorizer>>,
    shutdown: watch::Sender<bool>,
}

impl CrossHidBridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        hid: impl Into<String>,
        sid: impl Into<String>,
        config: &CrossHidConfig,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> Self {
        Self {
            transport,
            hid: hid.into(),
            sid: sid.into(),
            exported: RwLock::new(config.exported_hids.iter().cloned().collect()),
            imported: RwLock::new(config.imported_hids.iter().cloned().collect()),
            export_policy: config.default_export_policy,
            import_policy: config.default_import_policy,
            authorizer,
            shutdown: watch::channel(false).0,
        }
    }

    /// Replace the exported set atomically.
    pub async fn set_exported(&self, hids: impl IntoIterator<Item = String>) {
        *self.exported.write().await = hids.into_iter().collect();
    }

    /// Replace the imported set atomically.
    pub async fn set_imported(&self, hids: impl IntoIterator<Item = String>) {
        *self.imported.write().await = hids.into_iter().collect();
    }

    /// Send a message to another domain. Requires `to_hid` to pass the
    /// import gate; authorization denial short-circuits with its reason.
    pub async fn send(&self, to_hid: &str, msg_type: &str, payload: Vec<u8>) -> SwarmResult<()> {
        let listed = {
            let imported = self.imported.read().await;
            imported.contains(to_hid) || imported.contains("*")
        };
        if !listed && self.import_policy != BridgePolicy::Allow {
            return Err(BridgeError::NotImported(to_hid.to_string()).into());
        }
        if listed {
            self.consult_authorizer(self.import_policy, to_hid, "send", msg_type)
                .await?;
        }

        let message = BridgeMessage {
            from_hid: self.hid.clone(),
            to_hid: to_hid.to_string(),
            msg_type: msg_type.to_string(),
            payload,
        };
        let subject = subjects::cross_hid(&self.hid, to_hid, msg_type);
        self.transport
            .publish(&subject, serde_json::to_vec(&message)?)
            .await?;
        debug!(to_hid, msg_type, "bridged message out");
        Ok(())
    }

    /// Start receiving. Authorized inbound messages are delivered on the
    /// returned channel; unauthorized ones are dropped with a warning.
    pub async fn start(self: &Arc<Self>) -> SwarmResult<mpsc::Receiver<BridgeMessage>> {
        let (tx, rx) = mpsc::channel(64);
        let mut sub = self
            .transport
            .subscribe(&subjects::cross_hid_inbound(&self.hid))
            .await?;
        info!(hid = %self.hid, "cross-domain bridge listening");

        let bridge = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = sub.next() => {
                        let Some(msg) = msg else { break };
                        match bridge.admit(&msg.subject, &msg.payload).await {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!(%err, subject = %msg.subject, "rejected cross-domain message"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        Ok(rx)
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Enforce the export gate on one inbound message.
    async fn admit(&self, subject: &str, payload: &[u8]) -> Result<BridgeMessage, BridgeError> {
        let Some((from_hid, to_hid, msg_type)) = subjects::parse_cross_hid(subject) else {
            return Err(BridgeError::Denied(format!("malformed subject {subject}")));
        };
        if to_hid != self.hid {
            return Err(BridgeError::Denied(format!("message addressed to {to_hid}")));
        }

        let listed = {
            let exported = self.exported.read().await;
            exported.contains(&from_hid) || exported.contains("*")
        };
        if !listed && self.export_policy != BridgePolicy::Allow {
            return Err(BridgeError::NotExported(from_hid));
        }
        if listed {
            self.consult_authorizer(self.export_policy, &from_hid, "receive", &msg_type)
                .await?;
        }

        serde_json::from_slice::<BridgeMessage>(payload)
            .map_err(|err| BridgeError::Denied(format!("undecodable bridge payload: {err}")))
    }

    /// Under the `auth` policy, listed peers still pass the authorizer;
    /// a denial carries its reason back to the caller.
    async fn consult_authorizer(
        &self,
        policy: BridgePolicy,
        peer_hid: &str,
        action: &str,
        resource: &str,
    ) -> Result<(), BridgeError> {
        if policy != BridgePolicy::Auth {
            return Ok(());
        }
        if let Some(authorizer) = &self.authorizer {
            let decision = authorizer
                .authorize(peer_hid, &self.sid, action, resource)
                .await;
            if !decision.allowed {
                return Err(BridgeError::Denied(decision.reason));
            }
        }
        Ok(())
    }
}
