//! One identified participant bound to one connection.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use serde::Serialize;
use transport_tcp::{BoxConn, ConnError};

use crate::protocol::{Message, MsgType};

pub const MASTER_COLOR: [u8; 3] = [255, 20, 20];

/// Colors handed to non-master joiners, picked uniformly at random.
pub const PALETTE: [[u8; 3]; 6] = [
    [200, 200, 10],
    [10, 255, 10],
    [10, 10, 255],
    [10, 200, 200],
    [200, 10, 200],
    [0, 100, 200],
];

pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn palette_color() -> [u8; 3] {
    *PALETTE.choose(&mut rand::thread_rng()).unwrap_or(&PALETTE[0])
}

pub struct Player {
    /// 16-char alphanumeric id; stable across reconnect when the client
    /// presents it on Join.
    pub id: String,
    /// 32-char alphanumeric re-attach token.
    pub cookie: String,
    pub nickname: String,
    pub color: [u8; 3],
    pub conn: BoxConn,
}

impl Player {
    pub fn new(conn: BoxConn) -> Self {
        Self {
            id: random_string(16),
            cookie: random_string(32),
            nickname: String::new(),
            color: [255, 255, 255],
            conn,
        }
    }

    /// The identity payload of a joiner welcome.
    pub fn identity(&self) -> Identity<'_> {
        Identity {
            user_id: &self.id,
            user_cookie: &self.cookie,
            nickname: &self.nickname,
            color: self.color,
            room_id: None,
        }
    }

    /// The identity payload of the master welcome, which also names the room.
    pub fn identity_in_room<'a>(&'a self, room_id: &'a str) -> Identity<'a> {
        Identity {
            room_id: Some(room_id),
            ..self.identity()
        }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), ConnError> {
        self.conn.send_bytes(&msg.encode()).await
    }

    pub async fn hang_up(&mut self) {
        hang_up(&mut self.conn).await;
    }
}

/// Best-effort farewell, then half-close. Every error is swallowed; there
/// is nothing useful to do with a peer that will not even take a `Quit`.
pub async fn hang_up(conn: &mut BoxConn) {
    let _ = conn.send_bytes(&Message::new(MsgType::Quit).encode()).await;
    conn.shutdown().await;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity<'a> {
    pub user_id: &'a str,
    pub user_cookie: &'a str,
    pub nickname: &'a str,
    pub color: [u8; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<&'a str>,
}
