//! One live session: a master, its joiners, the shared map, and the event
//! loop multiplexing their sockets.

use std::collections::VecDeque;

use anyhow::{Context, Result, anyhow, bail};
use futures_util::future::select_all;
use serde_json::{Map as JsonMap, Value, json};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::map::SharedMap;
use crate::player::{self, MASTER_COLOR, Player};
use crate::protocol::{Message, MessageHead, MsgType};

/// Upper bound on one multiplexed wait, so pending joiners are adopted
/// promptly even when no socket has traffic.
const TICK: Duration = Duration::from_secs(1);

/// An outstanding non-master file request, answered by the master.
struct FileRequest {
    path: String,
    requester: String,
}

pub struct Room {
    id: String,
    master_id: String,
    /// Master first; every player owns its connection.
    players: Vec<Player>,
    joiners: mpsc::UnboundedReceiver<Player>,
    map: SharedMap,
    file_requests: Vec<FileRequest>,
    player_counter: u32,
    /// Reserved for the authorization layer; consulted through [`Room::may`].
    permissions: JsonMap<String, Value>,
}

impl Room {
    pub fn new(master: Player, id: String, joiners: mpsc::UnboundedReceiver<Player>) -> Self {
        let master_id = master.id.clone();
        Self {
            id,
            master_id,
            players: vec![master],
            joiners,
            map: SharedMap::new(),
            file_requests: Vec::new(),
            player_counter: 1,
            permissions: JsonMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Names and colors the master, then sends the welcome pair. Must run
    /// before the event loop; a failure means the room never opens.
    pub async fn welcome_master(&mut self) -> Result<()> {
        let room_id = self.id.clone();
        let Some(master) = self.players.first_mut() else {
            bail!("room has no master");
        };
        master.nickname = "Master".to_string();
        master.color = MASTER_COLOR;
        let ok = Message::json(MsgType::Ok, &master.identity_in_room(&room_id))?;
        master.send(&ok).await?;
        master.send(&Message::new(MsgType::Synced)).await?;
        Ok(())
    }

    /// Tears the room down before it ever ran (welcome failure).
    pub async fn dispose(mut self) {
        for p in &mut self.players {
            p.hang_up().await;
        }
    }

    /// The event loop. Each iteration adopts pending joiners, then waits up
    /// to [`TICK`] for one socket to produce a header and services it. Ends
    /// when the last player is gone.
    pub async fn run(mut self) {
        info!("room {} open", self.id);
        loop {
            while let Ok(joiner) = self.joiners.try_recv() {
                self.adopt(joiner).await;
            }
            if self.players.is_empty() {
                break;
            }

            let (idx, header) = {
                let reads: Vec<_> = self
                    .players
                    .iter_mut()
                    .enumerate()
                    .map(|(idx, p)| Box::pin(async move { (idx, p.conn.read_header().await) }))
                    .collect();
                match timeout(TICK, select_all(reads)).await {
                    // Nothing readable this tick; go look for joiners again.
                    Err(_) => continue,
                    Ok((result, _, remaining)) => {
                        drop(remaining);
                        result
                    }
                }
            };

            let sender = self.players[idx].id.clone();
            let outcome = match header {
                Ok(raw) => self.receive(idx, &raw).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = outcome {
                debug!("dropping {sender} from room {}: {e:#}", self.id);
                self.remove(&sender).await;
            }
            if self.players.is_empty() {
                break;
            }
        }
        info!("room {} closed", self.id);
    }

    /// Finishes reading one inbound message and dispatches it. Any error
    /// here costs the sender its seat.
    async fn receive(&mut self, idx: usize, raw: &str) -> Result<()> {
        let head = MessageHead::parse(raw)?;
        let body = if head.content_length > 0 {
            self.players[idx].conn.read_exact(head.content_length).await?
        } else {
            Vec::new()
        };
        let sender = self.players[idx].id.clone();
        self.dispatch(&sender, head.into_message(body)).await
    }

    async fn dispatch(&mut self, sender: &str, msg: Message) -> Result<()> {
        match msg.kind {
            MsgType::Map => {
                if !self.may(sender, "map") {
                    return Ok(());
                }
                let patch: JsonMap<String, Value> =
                    serde_json::from_slice(&msg.body).context("map body is not a JSON object")?;
                let delta = self.map.apply(patch)?;
                let out = Message::json(MsgType::Map, &Value::Object(delta))?;
                let dead = self.send_all(&out, None).await;
                self.reap(dead).await;
            }
            MsgType::File => self.mediate_file(sender, &msg).await?,
            MsgType::Msg => {
                if !self.may(sender, "chat") {
                    return Ok(());
                }
                if msg.body.starts_with(b"/") {
                    self.chat_command(sender, &msg.body).await?;
                } else {
                    let out = Message::new(MsgType::Msg)
                        .with_header("userId", sender)
                        .with_header("contentType", "text")
                        .with_body(msg.body);
                    let dead = self.send_all(&out, Some(sender)).await;
                    self.reap(dead).await;
                }
            }
            MsgType::Quit => self.remove(sender).await,
            other => bail!("unexpected {other} message inside a room"),
        }
        Ok(())
    }

    /// Non-master file messages are requests, recorded and forwarded to the
    /// master. Master file messages are responses, fanned out to every
    /// requester of that path.
    async fn mediate_file(&mut self, sender: &str, msg: &Message) -> Result<()> {
        if !self.may(sender, "file") {
            return Ok(());
        }
        let path = msg
            .get_header("path")
            .ok_or_else(|| anyhow!("file message without a path header"))?
            .to_string();
        if sender != self.master_id {
            self.file_requests.push(FileRequest {
                path: path.clone(),
                requester: sender.to_string(),
            });
            let request = Message::new(MsgType::File).with_header("path", &path);
            let master = self.master_id.clone();
            if !self.send_one(&master, &request).await {
                self.reap(vec![master]).await;
            }
        } else {
            let (matching, rest): (Vec<FileRequest>, Vec<FileRequest>) =
                std::mem::take(&mut self.file_requests)
                    .into_iter()
                    .partition(|r| r.path == path);
            self.file_requests = rest;
            let mut dead = Vec::new();
            for req in matching {
                let reply = Message::new(MsgType::File)
                    .with_header("path", &path)
                    .with_header("contentType", "image")
                    .with_body(msg.body.clone());
                if let Some(p) = self.players.iter_mut().find(|p| p.id == req.requester) {
                    if p.send(&reply).await.is_err() {
                        dead.push(req.requester);
                    }
                }
            }
            self.reap(dead).await;
        }
        Ok(())
    }

    async fn chat_command(&mut self, sender: &str, body: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(body).context("chat command is not UTF-8")?;
        let argv: Vec<&str> = text.split_whitespace().collect();
        match argv.split_first() {
            Some((&"/color", args)) => {
                let channels: Result<Vec<u8>, _> = args.iter().map(|a| a.parse()).collect();
                if let (Ok(channels), 3) = (channels, args.len()) {
                    let color = [channels[0], channels[1], channels[2]];
                    if let Some(p) = self.players.iter_mut().find(|p| p.id == sender) {
                        p.color = color;
                    }
                    let out =
                        Message::json(MsgType::Player, &attribute_update(sender, "color", json!(color)))?;
                    let dead = self.send_all(&out, None).await;
                    self.reap(dead).await;
                }
                // Anything malformed is silently dropped.
            }
            Some((&"/nickname", rest)) | Some((&"/nick", rest)) => {
                let nickname = rest.join(" ");
                if !nickname.is_empty() {
                    if let Some(p) = self.players.iter_mut().find(|p| p.id == sender) {
                        p.nickname = nickname.clone();
                    }
                    let out = Message::json(
                        MsgType::Player,
                        &attribute_update(sender, "nickname", json!(nickname)),
                    )?;
                    let dead = self.send_all(&out, None).await;
                    self.reap(dead).await;
                }
            }
            // TODO: route /roll through dice::DiceExpr once clients render roll results
            _ => {}
        }
        Ok(())
    }

    /// Catch a pending joiner up and seat it. A joiner whose catch-up fails
    /// is closed and never enters the room.
    async fn adopt(&mut self, mut joiner: Player) {
        joiner.nickname = format!("Player{}", self.player_counter);
        self.player_counter += 1;
        joiner.color = player::palette_color();
        let announce = match self.catch_up(&mut joiner).await {
            Ok(announce) => announce,
            Err(e) => {
                warn!("joiner {} never made it into room {}: {e:#}", joiner.id, self.id);
                joiner.hang_up().await;
                return;
            }
        };
        let dead = self.send_all(&announce, None).await;
        info!("{} joined room {} as {}", joiner.id, self.id, joiner.nickname);
        self.players.push(joiner);
        self.reap(dead).await;
    }

    /// Sends the joiner its welcome, the roster, the map, and `Synced`.
    /// Returns the announcement the rest of the room gets.
    async fn catch_up(&self, joiner: &mut Player) -> Result<Message> {
        let welcome = Message::json(MsgType::Ok, &joiner.identity())?;
        joiner.send(&welcome).await?;

        let mut roster = JsonMap::new();
        for p in &self.players {
            roster.insert(p.id.clone(), attributes(&p.nickname, p.color));
        }
        joiner
            .send(&Message::json(MsgType::Player, &Value::Object(roster))?)
            .await?;
        joiner
            .send(&Message::json(MsgType::Map, &self.map.snapshot())?)
            .await?;
        joiner.send(&Message::new(MsgType::Synced)).await?;

        let mut update = JsonMap::new();
        update.insert(joiner.id.clone(), attributes(&joiner.nickname, joiner.color));
        Ok(Message::json(MsgType::Player, &Value::Object(update))?)
    }

    /// Fans `msg` out to every player, optionally skipping one id. Returns
    /// the ids whose send failed; the caller reaps them afterwards so the
    /// player set is never mutated mid-iteration.
    async fn send_all(&mut self, msg: &Message, skip: Option<&str>) -> Vec<String> {
        let bytes = msg.encode();
        let mut dead = Vec::new();
        for p in &mut self.players {
            if skip.is_some_and(|s| s == p.id) {
                continue;
            }
            if let Err(e) = p.conn.send_bytes(&bytes).await {
                debug!("send to {} failed: {e}", p.id);
                dead.push(p.id.clone());
            }
        }
        dead
    }

    async fn send_one(&mut self, id: &str, msg: &Message) -> bool {
        match self.players.iter_mut().find(|p| p.id == id) {
            Some(p) => p.send(msg).await.is_ok(),
            None => false,
        }
    }

    async fn remove(&mut self, id: &str) {
        self.reap(vec![id.to_string()]).await;
    }

    /// Removes every listed player, closing each connection and telling the
    /// survivors. A removal broadcast can itself surface more dead sockets;
    /// those are queued and handled in the same pass.
    async fn reap(&mut self, dead: Vec<String>) {
        let mut queue: VecDeque<String> = dead.into();
        while let Some(id) = queue.pop_front() {
            let Some(pos) = self.players.iter().position(|p| p.id == id) else {
                continue;
            };
            let mut gone = self.players.remove(pos);
            gone.hang_up().await;
            self.file_requests.retain(|r| r.requester != gone.id);
            info!("{} left room {}", gone.id, self.id);

            let mut update = JsonMap::new();
            update.insert(gone.id.clone(), json!({}));
            let Ok(farewell) = Message::json(MsgType::Player, &Value::Object(update)) else {
                continue;
            };
            let bytes = farewell.encode();
            for p in &mut self.players {
                if queue.iter().any(|q| q == &p.id) {
                    continue;
                }
                if p.conn.send_bytes(&bytes).await.is_err() {
                    queue.push_back(p.id.clone());
                }
            }
        }
    }

    /// Authorization hook for map edits, chat and file traffic. Nothing is
    /// stored in `permissions` yet, so everything is allowed.
    fn may(&self, _player_id: &str, _action: &str) -> bool {
        debug_assert!(self.permissions.is_empty());
        true
    }
}

fn attributes(nickname: &str, color: [u8; 3]) -> Value {
    let mut attrs = JsonMap::new();
    attrs.insert("nickname".to_string(), json!(nickname));
    attrs.insert("color".to_string(), json!(color));
    Value::Object(attrs)
}

fn attribute_update(id: &str, key: &str, value: Value) -> Value {
    let mut attrs = JsonMap::new();
    attrs.insert(key.to_string(), value);
    let mut update = JsonMap::new();
    update.insert(id.to_string(), Value::Object(attrs));
    Value::Object(update)
}
