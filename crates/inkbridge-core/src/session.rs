//! Collaboration session: the glue between a canvas, the shared document
//! and the relay connection.
//!
//! The session owns everything that outlives a single callback: the bound
//! document, the outbound reconciler's tracked ids, the peer presence table,
//! the throttles and the outgoing message queue. The host drives it from its
//! event loop:
//!
//! ```text
//! relay ──events──▶ handle_event ──▶ import / presence table
//! canvas ──────────▶ on_persist, on_presence_change
//! event loop ──────▶ tick(canvas, now) ──▶ outbound pass, inbound pass, presence pass
//! take_outgoing ───▶ relay
//! ```

use std::time::Instant;

use crate::canvas::CanvasEngine;
use crate::config::SessionConfig;
use crate::crdt::CrdtDocument;
use crate::error::SyncResult;
use crate::presence::{AwarenessBridge, ConnectionId, LocalPresence, PresenceReport, unix_millis};
use crate::protocol::{ClientMessage, ServerMessage, SyncEvent};
use crate::reconcile::{InboundReport, OutboundReconciler, PersistOutcome, reconcile_inbound};
use crate::throttle::Throttle;

/// What one [`CollaborationSession::tick`] did. `None` means the pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickReport {
    pub persisted: Option<PersistOutcome>,
    pub inbound: Option<InboundReport>,
    pub presence: Option<PresenceReport>,
}

/// Binds one canvas to one shared document and one relay room.
pub struct CollaborationSession {
    config: SessionConfig,
    doc: Option<CrdtDocument>,
    outbound: OutboundReconciler,
    awareness: AwarenessBridge,
    document_throttle: Throttle,
    presence_throttle: Throttle,
    persist_throttle: Throttle,
    current_room: Option<String>,
    /// Last local presence, re-sent so idle peers are not pruned.
    last_presence: Option<LocalPresence>,
    last_heartbeat: Option<Instant>,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
}

impl CollaborationSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            outbound: OutboundReconciler::new(config.asset_deletion),
            awareness: AwarenessBridge::new(0, config.peer_pruning),
            document_throttle: Throttle::from_millis(config.document_throttle_ms),
            presence_throttle: Throttle::from_millis(config.presence_throttle_ms),
            persist_throttle: Throttle::from_millis(config.persist_throttle_ms),
            config,
            doc: None,
            current_room: None,
            last_presence: None,
            last_heartbeat: None,
            outgoing: Vec::new(),
        }
    }

    /// Create a session with a document already bound.
    pub fn with_document(config: SessionConfig, doc: CrdtDocument) -> Self {
        let mut session = Self::new(config);
        session.bind_document(doc);
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn document(&self) -> Option<&CrdtDocument> {
        self.doc.as_ref()
    }

    pub fn awareness(&self) -> &AwarenessBridge {
        &self.awareness
    }

    pub fn outbound(&self) -> &OutboundReconciler {
        &self.outbound
    }

    /// Awareness id of this session (the document's peer id, 0 when unbound).
    pub fn local_peer(&self) -> ConnectionId {
        self.awareness.local_peer()
    }

    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    pub fn is_in_room(&self) -> bool {
        self.current_room.is_some()
    }

    /// Bind the shared document. Tracked ids start over and the next tick
    /// loads the document into the canvas.
    pub fn bind_document(&mut self, doc: CrdtDocument) {
        log::info!("Binding shared document (peer {})", doc.peer_id());
        self.awareness.set_local_peer(doc.peer_id());
        self.outbound.reset();
        self.doc = Some(doc);
        self.document_throttle.request();
    }

    // --- Room management ---

    /// Queue a join for the configured room.
    pub fn join(&mut self) {
        let endpoint = &self.config.endpoint;
        log::info!("Joining room {}", endpoint.room);
        let msg = ClientMessage::Join {
            room: endpoint.room.clone(),
            token: endpoint.token.clone(),
        };
        self.queue(msg);
    }

    /// Queue a leave and drop every remote user from the canvas on the next tick.
    pub fn leave(&mut self) {
        if let Some(room) = self.current_room.take() {
            log::info!("Leaving room {}", room);
            self.queue(ClientMessage::Leave);
            self.awareness.clear();
        }
    }

    // --- Canvas callbacks ---

    /// The canvas finished mounting: load the document into it on the next tick.
    pub fn on_mount(&mut self) {
        self.document_throttle.request();
    }

    /// The canvas asks for its state to be persisted.
    pub fn on_persist(&mut self) {
        self.persist_throttle.request();
    }

    /// Publish the local user's presence. Not throttled.
    pub fn on_presence_change(&mut self, local: LocalPresence) {
        self.last_presence = Some(local.clone());
        if self.current_room.is_none() {
            return;
        }
        self.last_heartbeat = None;
        self.publish_presence(local);
    }

    fn publish_presence(&mut self, local: LocalPresence) {
        let msg = ClientMessage::Awareness {
            peer_id: self.awareness.local_peer(),
            presence: Some(self.awareness.publish(local, unix_millis())),
        };
        self.queue(msg);
    }

    /// Re-send the last presence once the heartbeat interval has passed.
    fn heartbeat(&mut self, now: Instant) {
        let Some(interval) = self.awareness.pruning().heartbeat_interval() else {
            return;
        };
        if self.current_room.is_none() {
            return;
        }
        let Some(local) = self.last_presence.clone() else {
            return;
        };
        match self.last_heartbeat {
            Some(last) if now.saturating_duration_since(last) < interval => {}
            Some(_) => {
                self.last_heartbeat = Some(now);
                self.publish_presence(local);
            }
            // The change itself was just sent.
            None => self.last_heartbeat = Some(now),
        }
    }

    // --- Incoming ---

    /// Decode and handle one relay message.
    pub fn handle_message(&mut self, json: &str) -> SyncResult<SyncEvent> {
        let event = SyncEvent::from_server_message(ServerMessage::from_json(json)?)?;
        self.handle_event(event.clone());
        Ok(event)
    }

    pub fn handle_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Connected => {
                log::info!("Connected to relay");
                self.join();
            }
            SyncEvent::Disconnected => {
                log::info!("Disconnected from relay");
                self.current_room = None;
                self.awareness.clear();
            }
            SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync,
            } => {
                log::info!("Joined room {} with {} peers", room, peer_count);
                self.current_room = Some(room);
                if let Some(bytes) = initial_sync {
                    self.import(&bytes);
                }
                // Offline edits reach the room through the full snapshot.
                self.broadcast_snapshot();
            }
            SyncEvent::PeerJoined { peer_id } => {
                log::debug!("Peer joined: {}", peer_id);
            }
            SyncEvent::PeerLeft { peer_id } => {
                self.awareness.peer_left(&peer_id);
            }
            SyncEvent::SyncReceived { from, data } => {
                log::debug!("Received {} bytes from {}", data.len(), from);
                self.import(&data);
            }
            SyncEvent::AwarenessReceived { from, peer_id, presence } => {
                self.awareness.receive(from, peer_id, presence, unix_millis());
                self.presence_throttle.request();
            }
            SyncEvent::Error { message } => {
                log::warn!("Relay error: {}", message);
            }
        }
    }

    fn import(&mut self, bytes: &[u8]) {
        let Some(doc) = &self.doc else {
            log::warn!("Dropping update, no shared document bound");
            return;
        };
        match doc.import(bytes) {
            Ok(()) => self.document_throttle.request(),
            Err(e) => log::error!("Failed to import update: {}", e),
        }
    }

    // --- Outgoing ---

    fn queue(&mut self, msg: ClientMessage) {
        match msg.to_json() {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::error!("Failed to encode message: {}", e),
        }
    }

    fn broadcast_snapshot(&mut self) {
        let Some(doc) = &self.doc else {
            return;
        };
        match doc.export_snapshot() {
            Ok(bytes) => self.queue(ClientMessage::sync(&bytes)),
            Err(e) => log::error!("Failed to export snapshot: {}", e),
        }
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Event loop ---

    /// Run whichever passes are due: outbound, then inbound, then presence.
    ///
    /// A pending persist runs ahead of a due inbound pass even inside its
    /// window, so local edits are in the document before it is applied.
    pub fn tick<C: CanvasEngine + ?Sized>(&mut self, canvas: &mut C, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        if canvas.take_persist_request() {
            self.persist_throttle.request();
        }

        let document_due = self.document_throttle.ready(now);
        let persist_due = self.persist_throttle.ready(now) || (document_due && self.persist_throttle.is_pending());
        if persist_due {
            self.persist_throttle.cancel();
            report.persisted = Some(self.persist(canvas));
        }

        if document_due {
            if let Some(doc) = &self.doc {
                match reconcile_inbound(canvas, doc, self.outbound.asset_deletion()) {
                    Ok(inbound) => {
                        if !inbound.is_empty() {
                            log::debug!("Applied shared document to canvas: {:?}", inbound);
                        }
                        self.outbound.mark_synced(canvas, doc);
                        report.inbound = Some(inbound);
                    }
                    Err(e) => {
                        log::error!("Failed to apply shared document: {}", e);
                        self.document_throttle.request();
                    }
                }
                // Remote changes applied to the canvas are not local edits.
                canvas.take_persist_request();
            }
        }

        self.heartbeat(now);

        // Departures are shown without waiting for the window.
        if self.awareness.has_pending_removals() || self.presence_throttle.ready(now) {
            match self.awareness.apply(canvas, unix_millis()) {
                Ok(presence) => report.presence = Some(presence),
                Err(e) => {
                    log::error!("Failed to apply presence: {}", e);
                    self.presence_throttle.request();
                }
            }
        }

        report
    }

    fn persist<C: CanvasEngine + ?Sized>(&mut self, canvas: &C) -> PersistOutcome {
        let before = self.doc.as_ref().map(CrdtDocument::version);
        let outcome = self.outbound.persist(canvas, self.doc.as_ref());

        if !matches!(outcome, PersistOutcome::Committed(_)) || self.current_room.is_none() {
            return outcome;
        }
        let (Some(doc), Some(before)) = (&self.doc, before) else {
            return outcome;
        };
        // Only this pass's operations go out; peers already have the rest.
        let updates = doc.export_updates(&before);
        match updates {
            Ok(bytes) => self.queue(ClientMessage::sync(&bytes)),
            Err(e) => log::error!("Failed to export updates: {}", e),
        }
        outcome
    }

    /// Connect `ws` to the configured endpoint.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn connect(&self, ws: &mut crate::client::NativeWebSocket) -> SyncResult<()> {
        ws.connect(&self.config.endpoint.url)
    }

    /// Feed transport events in, run due passes and flush outgoing messages.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn pump<C: CanvasEngine + ?Sized>(
        &mut self,
        ws: &mut crate::client::NativeWebSocket,
        canvas: &mut C,
        now: Instant,
    ) -> TickReport {
        for event in ws.poll_events() {
            self.handle_event(event);
        }
        let report = self.tick(canvas, now);
        for msg in self.take_outgoing() {
            if let Err(e) = ws.send(&msg) {
                log::warn!("Failed to send message: {}", e);
            }
        }
        report
    }
}
