//! End-to-end session scenarios against a real listener.

use std::net::SocketAddr;
use std::time::Duration;

use dradu_core::player::PALETTE;
use dradu_core::protocol::{Message, MessageHead, MsgType};
use dradu_core::server::FrontDesk;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use transport_tcp::{FrameConn, StreamConn};

const WAIT: Duration = Duration::from_secs(5);

struct Client {
    conn: StreamConn<TcpStream>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            conn: StreamConn::new(stream),
        }
    }

    async fn send(&mut self, msg: Message) {
        self.conn.send_bytes(&msg.encode()).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        let raw = timeout(WAIT, self.conn.read_header())
            .await
            .expect("no message within the wait limit")
            .unwrap();
        let head = MessageHead::parse(&raw).unwrap();
        let body = if head.content_length > 0 {
            self.conn.read_exact(head.content_length).await.unwrap()
        } else {
            Vec::new()
        };
        head.into_message(body)
    }

    async fn recv_json(&mut self) -> (MsgType, Value) {
        let msg = self.recv().await;
        let value = serde_json::from_slice(&msg.body).unwrap();
        (msg.kind, value)
    }
}

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = FrontDesk::new(listener).run().await;
    });
    addr
}

/// Init handshake; returns the master client, the room id and the master's
/// user id.
async fn open_room(addr: SocketAddr) -> (Client, String, String) {
    let mut master = Client::connect(addr).await;
    master.send(Message::new(MsgType::Init)).await;
    let (kind, welcome) = master.recv_json().await;
    assert_eq!(kind, MsgType::Ok);
    let room_id = welcome["roomId"].as_str().unwrap().to_string();
    let user_id = welcome["userId"].as_str().unwrap().to_string();
    assert_eq!(master.recv().await.kind, MsgType::Synced);
    (master, room_id, user_id)
}

/// Join handshake through the full catch-up; returns the client and its
/// user id.
async fn join_room(addr: SocketAddr, room_id: &str) -> (Client, String) {
    let mut client = Client::connect(addr).await;
    client
        .send(Message::json(MsgType::Join, &json!({ "roomId": room_id })).unwrap())
        .await;
    let (kind, welcome) = client.recv_json().await;
    assert_eq!(kind, MsgType::Ok);
    let user_id = welcome["userId"].as_str().unwrap().to_string();
    let (kind, _roster) = client.recv_json().await;
    assert_eq!(kind, MsgType::Player);
    let (kind, _map) = client.recv_json().await;
    assert_eq!(kind, MsgType::Map);
    assert_eq!(client.recv().await.kind, MsgType::Synced);
    (client, user_id)
}

#[tokio::test]
async fn init_then_map_broadcast() {
    let addr = start_server().await;
    let mut master = Client::connect(addr).await;
    master.send(Message::new(MsgType::Init)).await;

    let (kind, welcome) = master.recv_json().await;
    assert_eq!(kind, MsgType::Ok);
    assert_eq!(welcome["nickname"], "Master");
    assert_eq!(welcome["color"], json!([255, 20, 20]));
    let room_id = welcome["roomId"].as_str().unwrap();
    assert_eq!(room_id.len(), 12);
    assert!(room_id.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(welcome["userId"].as_str().unwrap().len(), 16);
    assert_eq!(welcome["userCookie"].as_str().unwrap().len(), 32);
    assert_eq!(master.recv().await.kind, MsgType::Synced);

    master
        .send(
            Message::json(MsgType::Map, &json!({"a": {"type": "token", "path": "a.png"}}))
                .unwrap(),
        )
        .await;
    let (kind, delta) = master.recv_json().await;
    assert_eq!(kind, MsgType::Map);
    assert_eq!(
        delta,
        json!({"a": {"type": "token", "path": "a.png", "pos": [0.0, 0.0], "scale": 1.0}})
    );
}

#[tokio::test]
async fn join_and_catch_up() {
    let addr = start_server().await;
    let (mut master, room_id, master_id) = open_room(addr).await;
    master
        .send(
            Message::json(MsgType::Map, &json!({"a": {"type": "token", "path": "a.png"}}))
                .unwrap(),
        )
        .await;
    assert_eq!(master.recv().await.kind, MsgType::Map);

    let mut joiner = Client::connect(addr).await;
    joiner
        .send(Message::json(MsgType::Join, &json!({ "roomId": room_id })).unwrap())
        .await;
    let (kind, welcome) = joiner.recv_json().await;
    assert_eq!(kind, MsgType::Ok);
    assert_eq!(welcome["nickname"], "Player1");
    assert!(welcome.get("roomId").is_none());
    let joiner_id = welcome["userId"].as_str().unwrap().to_string();

    let (kind, roster) = joiner.recv_json().await;
    assert_eq!(kind, MsgType::Player);
    assert_eq!(roster[master_id.as_str()]["nickname"], "Master");
    let (kind, map) = joiner.recv_json().await;
    assert_eq!(kind, MsgType::Map);
    assert!(map.get("a").is_some());
    assert_eq!(joiner.recv().await.kind, MsgType::Synced);

    let (kind, announce) = master.recv_json().await;
    assert_eq!(kind, MsgType::Player);
    assert_eq!(announce[joiner_id.as_str()]["nickname"], "Player1");
    let palette: Vec<Value> = PALETTE.iter().map(|c| json!(c)).collect();
    assert!(palette.contains(&announce[joiner_id.as_str()]["color"]));
}

#[tokio::test]
async fn join_can_present_its_own_identity() {
    let addr = start_server().await;
    let (_master, room_id, _) = open_room(addr).await;

    let mut client = Client::connect(addr).await;
    client
        .send(
            Message::json(
                MsgType::Join,
                &json!({"roomId": room_id, "userId": "customid", "userCookie": "sekrit"}),
            )
            .unwrap(),
        )
        .await;
    let (kind, welcome) = client.recv_json().await;
    assert_eq!(kind, MsgType::Ok);
    assert_eq!(welcome["userId"], "customid");
    assert_eq!(welcome["userCookie"], "sekrit");
}

#[tokio::test]
async fn chat_color_command() {
    let addr = start_server().await;
    let (mut master, room_id, _) = open_room(addr).await;
    let (mut joiner, joiner_id) = join_room(addr, &room_id).await;
    assert_eq!(master.recv().await.kind, MsgType::Player);

    joiner
        .send(Message::new(MsgType::Msg).with_body(b"/color 10 20 30".to_vec()))
        .await;
    for client in [&mut master, &mut joiner] {
        let (kind, update) = client.recv_json().await;
        assert_eq!(kind, MsgType::Player);
        assert_eq!(update[joiner_id.as_str()]["color"], json!([10, 20, 30]));
    }

    // An out-of-range channel causes no broadcast; prove the silence by
    // following up with an ordinary chat line.
    joiner
        .send(Message::new(MsgType::Msg).with_body(b"/color 10 20 999".to_vec()))
        .await;
    joiner
        .send(Message::new(MsgType::Msg).with_body(b"hello".to_vec()))
        .await;
    let msg = master.recv().await;
    assert_eq!(msg.kind, MsgType::Msg);
    assert_eq!(msg.get_header("userId"), Some(joiner_id.as_str()));
    assert_eq!(msg.get_header("contentType"), Some("text"));
    assert_eq!(msg.body, b"hello");
}

#[tokio::test]
async fn nickname_command_renames_and_broadcasts() {
    let addr = start_server().await;
    let (mut master, room_id, _) = open_room(addr).await;
    let (mut joiner, joiner_id) = join_room(addr, &room_id).await;
    assert_eq!(master.recv().await.kind, MsgType::Player);

    joiner
        .send(Message::new(MsgType::Msg).with_body(b"/nick Grey Wanderer".to_vec()))
        .await;
    for client in [&mut master, &mut joiner] {
        let (kind, update) = client.recv_json().await;
        assert_eq!(kind, MsgType::Player);
        assert_eq!(update[joiner_id.as_str()]["nickname"], "Grey Wanderer");
    }
}

#[tokio::test]
async fn file_mediation_reaches_only_the_requester() {
    let addr = start_server().await;
    let (mut master, room_id, _) = open_room(addr).await;
    let (mut bystander, _) = join_room(addr, &room_id).await;
    assert_eq!(master.recv().await.kind, MsgType::Player);
    let (mut requester, _) = join_room(addr, &room_id).await;
    assert_eq!(master.recv().await.kind, MsgType::Player);
    assert_eq!(bystander.recv().await.kind, MsgType::Player);

    requester
        .send(Message::new(MsgType::File).with_header("path", "foo.png"))
        .await;
    let forwarded = master.recv().await;
    assert_eq!(forwarded.kind, MsgType::File);
    assert_eq!(forwarded.get_header("path"), Some("foo.png"));
    assert!(forwarded.body.is_empty());

    let payload = b"0123456789abcdefg".to_vec();
    master
        .send(
            Message::new(MsgType::File)
                .with_header("path", "foo.png")
                .with_body(payload.clone()),
        )
        .await;
    let reply = requester.recv().await;
    assert_eq!(reply.kind, MsgType::File);
    assert_eq!(reply.get_header("path"), Some("foo.png"));
    assert_eq!(reply.get_header("contentType"), Some("image"));
    assert_eq!(reply.body, payload);

    // Only the requester saw the blob: the bystander's next frame is the
    // chat line sent afterwards, not a File.
    master
        .send(Message::new(MsgType::Msg).with_body(b"done".to_vec()))
        .await;
    let msg = bystander.recv().await;
    assert_eq!(msg.kind, MsgType::Msg);
    assert_eq!(msg.body, b"done");
}

#[tokio::test]
async fn map_delete_propagates() {
    let addr = start_server().await;
    let (mut master, room_id, _) = open_room(addr).await;
    master
        .send(
            Message::json(
                MsgType::Map,
                &json!({
                    "a": {"type": "token", "path": "a.png"},
                    "b": {"type": "token", "path": "b.png"},
                }),
            )
            .unwrap(),
        )
        .await;
    assert_eq!(master.recv().await.kind, MsgType::Map);

    let (mut joiner, _) = join_room(addr, &room_id).await;
    assert_eq!(master.recv().await.kind, MsgType::Player);

    joiner
        .send(Message::json(MsgType::Map, &json!({"a": {}})).unwrap())
        .await;
    for client in [&mut master, &mut joiner] {
        let (kind, delta) = client.recv_json().await;
        assert_eq!(kind, MsgType::Map);
        assert_eq!(delta, json!({"a": {}}));
    }

    // A later catch-up ships the map without `a`.
    let mut late = Client::connect(addr).await;
    late.send(Message::json(MsgType::Join, &json!({ "roomId": room_id })).unwrap())
        .await;
    assert_eq!(late.recv().await.kind, MsgType::Ok);
    assert_eq!(late.recv().await.kind, MsgType::Player);
    let (kind, map) = late.recv_json().await;
    assert_eq!(kind, MsgType::Map);
    assert!(map.get("a").is_none());
    assert!(map.get("b").is_some());
}

#[tokio::test]
async fn disconnect_broadcasts_removal() {
    let addr = start_server().await;
    let (mut master, room_id, _) = open_room(addr).await;
    let (joiner, joiner_id) = join_room(addr, &room_id).await;
    assert_eq!(master.recv().await.kind, MsgType::Player);

    // The connection drops without a Quit.
    drop(joiner);
    let (kind, update) = master.recv_json().await;
    assert_eq!(kind, MsgType::Player);
    assert_eq!(update[joiner_id.as_str()], json!({}));
    assert_eq!(update.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn adoption_order_is_preserved() {
    let addr = start_server().await;
    let (mut master, room_id, _) = open_room(addr).await;

    let mut expected = Vec::new();
    let mut clients = Vec::new();
    for n in 1..=4 {
        let (client, user_id) = join_room(addr, &room_id).await;
        expected.push((user_id, format!("Player{n}")));
        clients.push(client);
    }
    for (user_id, nickname) in expected {
        let (kind, announce) = master.recv_json().await;
        assert_eq!(kind, MsgType::Player);
        assert_eq!(announce[user_id.as_str()]["nickname"], nickname.as_str());
    }
}

#[tokio::test]
async fn join_to_unknown_room_is_closed() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;
    client
        .send(Message::json(MsgType::Join, &json!({"roomId": "nosuchroom00"})).unwrap())
        .await;
    assert_eq!(client.recv().await.kind, MsgType::Quit);
}

#[tokio::test]
async fn non_init_first_message_is_rejected() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;
    client.send(Message::new(MsgType::Synced)).await;
    assert_eq!(client.recv().await.kind, MsgType::Quit);
}
