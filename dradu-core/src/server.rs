//! The front desk: accepts connections, reads their first message, and
//! either opens a new room or queues the connection onto an existing one.
//! After dispatch the room owns the socket; the front desk never reads from
//! it again.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use transport_tcp::{BoxConn, StreamConn};

use crate::player::{Player, hang_up, random_string};
use crate::protocol::{Message, MessageHead, MsgType};
use crate::room::Room;

/// Everything the front desk keeps about a live room: where to enqueue
/// joiners, and the task handle used to reap the room once it ends.
struct RoomHandle {
    joiners: mpsc::UnboundedSender<Player>,
    task: JoinHandle<()>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    room_id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_cookie: Option<String>,
}

pub struct FrontDesk {
    listener: TcpListener,
    rooms: HashMap<String, RoomHandle>,
}

impl FrontDesk {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            rooms: HashMap::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await.context("accept failed")?;
            info!("connection from {peer}");

            self.rooms.retain(|id, handle| {
                let finished = handle.task.is_finished();
                if finished {
                    debug!("reaped room {id}");
                }
                !finished
            });

            let mut conn: BoxConn = Box::new(StreamConn::new(stream));
            match first_message(&mut conn).await {
                Ok(msg) => self.dispatch(conn, msg).await,
                Err(e) => {
                    debug!("rejecting {peer}: {e:#}");
                    hang_up(&mut conn).await;
                }
            }
        }
    }

    async fn dispatch(&mut self, mut conn: BoxConn, msg: Message) {
        match msg.kind {
            MsgType::Init => self.open_room(conn).await,
            MsgType::Join => match serde_json::from_slice::<JoinRequest>(&msg.body) {
                Ok(req) => self.enqueue_joiner(conn, req).await,
                Err(e) => {
                    debug!("malformed join body: {e}");
                    hang_up(&mut conn).await;
                }
            },
            other => {
                debug!("{other} is not a valid first message");
                hang_up(&mut conn).await;
            }
        }
    }

    async fn open_room(&mut self, conn: BoxConn) {
        let master = Player::new(conn);
        let room_id = random_string(12);
        let (joiners, pending) = mpsc::unbounded_channel();
        let mut room = Room::new(master, room_id.clone(), pending);
        if let Err(e) = room.welcome_master().await {
            debug!("master welcome failed: {e:#}");
            room.dispose().await;
            return;
        }
        info!("room {room_id} opened");
        let task = tokio::spawn(room.run());
        self.rooms.insert(room_id, RoomHandle { joiners, task });
    }

    async fn enqueue_joiner(&mut self, conn: BoxConn, req: JoinRequest) {
        let mut joiner = Player::new(conn);
        if let Some(id) = req.user_id.filter(|s| !s.is_empty()) {
            joiner.id = id;
        }
        if let Some(cookie) = req.user_cookie.filter(|s| !s.is_empty()) {
            // Accepted on faith; re-attach tokens are not verified yet.
            joiner.cookie = cookie;
        }
        match self.rooms.get(&req.room_id) {
            Some(handle) => {
                if let Err(mpsc::error::SendError(mut lost)) = handle.joiners.send(joiner) {
                    debug!("room {} just closed, dropping joiner", req.room_id);
                    lost.hang_up().await;
                }
            }
            None => {
                debug!("no such room {}", req.room_id);
                joiner.hang_up().await;
            }
        }
    }
}

async fn first_message(conn: &mut BoxConn) -> Result<Message> {
    let raw = conn.read_header().await?;
    let head = MessageHead::parse(&raw)?;
    let body = if head.content_length > 0 {
        conn.read_exact(head.content_length).await?
    } else {
        Vec::new()
    };
    Ok(head.into_message(body))
}
