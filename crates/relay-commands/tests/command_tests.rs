//! Built-in command tests.
//!
//! Each test runs a full `RelayServer` loaded with the built-in command set
//! and talks to it through in-memory sockets, exactly as the transport would.

use std::sync::Arc;

use relay_commands::chat::TOO_MUCH_TEXT;
use relay_commands::join::{ALREADY_JOINED, INVALID_NICK, NICK_TAKEN};
use relay_commands::moderation::{SAME_LEVEL, USER_NOT_FOUND};
use relay_commands::PERMISSION_DENIED;
use relay_protocol::levels;
use relay_server::authority::hash_trip;
use relay_server::{PERMISSION_PENALTY, RelayServer, Roster, ServerConfig};
use relay_transport::{ClientSocket, FrameHandler, Outbound};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

const ADMIN_PASS: &str = "root-pass";
const MOD_PASS: &str = "mod-pass";

fn server() -> Arc<RelayServer> {
    let roster = Roster::new(Some(hash_trip(ADMIN_PASS, "")), [hash_trip(MOD_PASS, "")]);
    let server = Arc::new(RelayServer::new(
        ServerConfig::default(),
        Arc::new(roster),
        relay_commands::all,
    ));
    server.reload().unwrap();
    server
}

struct Client {
    id: String,
    rx: UnboundedReceiver<Outbound>,
}

impl Client {
    async fn connect(server: &RelayServer, id: &str, address: &str) -> Self {
        let (socket, rx) = ClientSocket::new(id, address);
        server.on_connect(socket).await;
        Self { id: id.into(), rx }
    }

    /// Connect and join, discarding the join replies.
    async fn joined(server: &RelayServer, id: &str, address: &str, nick: &str, channel: &str) -> Self {
        let mut client = Self::connect(server, id, address).await;
        client
            .send(server, json!({"cmd": "join", "channel": channel, "nick": nick}))
            .await;
        let frames = client.frames();
        assert_eq!(frames.last().unwrap()["cmd"], "session", "join failed: {frames:?}");
        client
    }

    async fn send(&mut self, server: &RelayServer, frame: Value) {
        server.handle_frame(&self.id, &frame.to_string()).await;
    }

    fn outbound(&mut self) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn frames(&mut self) -> Vec<Value> {
        self.outbound()
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Text(text) => Some(serde_json::from_str(&text).unwrap()),
                Outbound::Close => None,
            })
            .collect()
    }
}

fn cmds(frames: &[Value]) -> Vec<&str> {
    frames.iter().filter_map(|f| f["cmd"].as_str()).collect()
}

fn texts(frames: &[Value]) -> Vec<&str> {
    frames.iter().filter_map(|f| f["text"].as_str()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// join
// ─────────────────────────────────────────────────────────────────────────────

mod join {
    use super::*;

    #[tokio::test]
    async fn join_lists_members_and_issues_token() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;

        let mut bob = Client::connect(&server, "b", "10.0.0.2").await;
        bob.send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "bob", "protocol": 2}))
            .await;

        let frames = bob.frames();
        assert_eq!(cmds(&frames), vec!["onlineSet", "session"]);
        assert_eq!(frames[0]["nicks"], json!(["alice", "bob"]));
        assert_eq!(frames[0]["users"].as_array().unwrap().len(), 2);
        assert_eq!(frames[1]["restored"], false);
        assert_eq!(frames[1]["channels"], json!(["lobby"]));
        assert!(frames[1]["token"].is_string());

        let to_alice = alice.frames();
        assert_eq!(cmds(&to_alice), vec!["onlineAdd"]);
        assert_eq!(to_alice[0]["nick"], "bob");
        assert_eq!(to_alice[0]["uType"], "user");
    }

    #[tokio::test]
    async fn legacy_protocol_gets_nicks_only() {
        let server = server();
        let mut alice = Client::connect(&server, "a", "10.0.0.1").await;
        alice
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "alice"}))
            .await;
        let frames = alice.frames();
        assert!(frames[0].get("users").is_none());
    }

    #[tokio::test]
    async fn taken_nick_is_refused() {
        let server = server();
        let _alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;

        let mut other = Client::connect(&server, "b", "10.0.0.2").await;
        other
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "Alice"}))
            .await;
        assert_eq!(texts(&other.frames()), vec![NICK_TAKEN]);
        assert!(!server.connections().get("b").unwrap().is_active());
    }

    #[tokio::test]
    async fn invalid_nick_is_refused() {
        let server = server();
        let mut client = Client::connect(&server, "a", "10.0.0.1").await;
        client
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "no spaces"}))
            .await;
        assert_eq!(texts(&client.frames()), vec![INVALID_NICK]);
    }

    #[tokio::test]
    async fn second_join_is_refused() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        alice
            .send(&server, json!({"cmd": "join", "channel": "dev", "nick": "alice"}))
            .await;
        assert_eq!(texts(&alice.frames()), vec![ALREADY_JOINED]);
    }

    #[tokio::test]
    async fn password_derives_trip_and_level() {
        let server = server();
        let mut admin = Client::connect(&server, "a", "10.0.0.1").await;
        admin
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": format!("root#{ADMIN_PASS}")}))
            .await;

        let conn = server.connections().get("a").unwrap();
        let identity = conn.identity().unwrap();
        assert_eq!(identity.nick, "root");
        assert_eq!(identity.trip, Some(hash_trip(ADMIN_PASS, "")));
        assert_eq!(identity.level, levels::ADMIN);

        let mut moderator = Client::connect(&server, "m", "10.0.0.2").await;
        moderator
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "mod", "pass": MOD_PASS}))
            .await;
        assert_eq!(server.connections().get("m").unwrap().level(), levels::MODERATOR);
    }

    #[tokio::test]
    async fn missing_fields_are_reported() {
        let server = server();
        let mut client = Client::connect(&server, "a", "10.0.0.1").await;
        client.send(&server, json!({"cmd": "join"})).await;
        assert_eq!(
            texts(&client.frames()),
            vec!["Failed to execute 'join': missing required channel, nick"]
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// chat
// ─────────────────────────────────────────────────────────────────────────────

mod chat {
    use super::*;

    #[tokio::test]
    async fn chat_reaches_channel_only() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        let mut bob = Client::joined(&server, "b", "10.0.0.2", "bob", "lobby").await;
        let mut carol = Client::joined(&server, "c", "10.0.0.3", "carol", "dev").await;
        alice.frames();

        bob.send(&server, json!({"cmd": "chat", "text": "  hello  "})).await;

        for frames in [alice.frames(), bob.frames()] {
            assert_eq!(cmds(&frames), vec!["chat"]);
            assert_eq!(frames[0]["text"], "hello");
            assert_eq!(frames[0]["nick"], "bob");
            assert_eq!(frames[0]["channel"], "lobby");
        }
        assert!(carol.frames().is_empty());
    }

    #[tokio::test]
    async fn msg_alias_and_blank_text() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;

        alice.send(&server, json!({"cmd": "chat", "text": "   "})).await;
        assert!(alice.frames().is_empty());

        alice.send(&server, json!({"cmd": "msg", "text": "aliased"})).await;
        assert_eq!(texts(&alice.frames()), vec!["aliased"]);
    }

    #[tokio::test]
    async fn long_text_costs_more() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;

        let wall = "x".repeat(83 * 4 * 30);
        alice.send(&server, json!({"cmd": "chat", "text": wall})).await;
        assert_eq!(texts(&alice.frames()), vec![TOO_MUCH_TEXT]);
    }

    #[tokio::test]
    async fn myhash_replies_privately() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        let mut bob = Client::joined(&server, "b", "10.0.0.2", "bob", "lobby").await;
        alice.frames();

        bob.send(&server, json!({"cmd": "chat", "text": "/myhash"})).await;
        let frames = bob.frames();
        assert_eq!(cmds(&frames), vec!["info"]);
        assert_eq!(
            frames[0]["text"],
            format!("Your hash: {}", server.socket_hash("10.0.0.2"))
        );
        assert!(alice.frames().is_empty());
    }

    #[tokio::test]
    async fn unknown_slash_command_is_not_broadcast() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        let mut bob = Client::joined(&server, "b", "10.0.0.2", "bob", "lobby").await;
        alice.frames();

        bob.send(&server, json!({"cmd": "chat", "text": "/shrug now"})).await;
        assert_eq!(texts(&bob.frames()), vec!["Unknown chat command: /shrug"]);
        assert!(alice.frames().is_empty());

        // Not a command: a path.
        bob.send(&server, json!({"cmd": "chat", "text": "/ is root"})).await;
        assert_eq!(cmds(&alice.frames()), vec!["chat"]);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// session
// ─────────────────────────────────────────────────────────────────────────────

mod session {
    use super::*;

    #[tokio::test]
    async fn token_from_join_restores_on_new_socket() {
        let server = server();
        let mut alice = Client::connect(&server, "a", "10.0.0.1").await;
        alice
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "alice"}))
            .await;
        let token = alice.frames().last().unwrap()["token"].as_str().unwrap().to_string();
        let mut bob = Client::joined(&server, "b", "10.0.0.2", "bob", "lobby").await;

        // The original socket closes; alice reconnects.
        server.on_disconnect("a").await;
        bob.frames();

        let mut again = Client::connect(&server, "a2", "10.0.0.9").await;
        again.send(&server, json!({"cmd": "session", "token": token})).await;

        let frames = again.frames();
        assert_eq!(cmds(&frames), vec!["session", "onlineSet"]);
        assert_eq!(frames[0]["restored"], true);
        assert_eq!(frames[1]["nicks"], json!(["bob", "alice"]));
        assert_eq!(cmds(&bob.frames()), vec!["onlineAdd"]);
    }

    #[tokio::test]
    async fn active_socket_can_request_a_token() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        alice.send(&server, json!({"cmd": "session"})).await;

        let frames = alice.frames();
        assert_eq!(cmds(&frames), vec!["session"]);
        let token = frames[0]["token"].as_str().unwrap();
        assert_eq!(server.sessions().verify(token).unwrap().nick, "alice");
    }

    #[tokio::test]
    async fn anything_else_is_uniform_failure() {
        let server = server();
        let mut anon = Client::connect(&server, "a", "10.0.0.1").await;
        anon.send(&server, json!({"cmd": "session"})).await;
        anon.send(&server, json!({"cmd": "session", "token": "v1.bogus.sig"})).await;

        let frames = anon.frames();
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(frame["restored"], false);
            assert_eq!(frame["channels"], json!([]));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// moderation
// ─────────────────────────────────────────────────────────────────────────────

mod moderation {
    use super::*;

    async fn with_moderator(server: &RelayServer) -> (Client, Client) {
        let mut moderator = Client::connect(server, "m", "10.0.0.1").await;
        moderator
            .send(server, json!({"cmd": "join", "channel": "lobby", "nick": "mod", "pass": MOD_PASS}))
            .await;
        let bob = Client::joined(server, "b", "10.0.0.2", "bob", "lobby").await;
        moderator.frames();
        (moderator, bob)
    }

    #[tokio::test]
    async fn ban_arrests_and_closes() {
        let server = server();
        let (mut moderator, mut bob) = with_moderator(&server).await;
        let bob_hash = server.connections().get("b").unwrap().identity().unwrap().hash;

        moderator.send(&server, json!({"cmd": "ban", "nick": "bob"})).await;

        let items = bob.outbound();
        assert!(items.contains(&Outbound::Close));
        assert!(server.police().is_arrested("10.0.0.2"));
        assert!(server.police().is_arrested(&bob_hash));

        let texts_to_mod = moderator.frames();
        assert!(texts(&texts_to_mod).contains(&"Banned bob"));
        assert!(texts(&texts_to_mod).iter().any(|t| t.starts_with("mod banned bob in lobby")));

        // Pardon by hash.
        moderator.send(&server, json!({"cmd": "unban", "hash": bob_hash})).await;
        assert!(!server.police().is_arrested("10.0.0.2"));
    }

    #[tokio::test]
    async fn ban_requires_moderator() {
        let server = server();
        let (_moderator, mut bob) = with_moderator(&server).await;

        bob.send(&server, json!({"cmd": "ban", "nick": "mod"})).await;
        assert_eq!(texts(&bob.frames()), vec![PERMISSION_DENIED]);
        assert!(server.police().score("10.0.0.2") >= PERMISSION_PENALTY);
        assert!(!server.police().is_arrested("10.0.0.1"));
    }

    #[tokio::test]
    async fn ban_refuses_equal_level_and_unknown_nick() {
        let server = server();
        let (mut moderator, _bob) = with_moderator(&server).await;
        let mut other = Client::connect(&server, "m2", "10.0.0.3").await;
        other
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "mod2", "pass": MOD_PASS}))
            .await;
        moderator.frames();

        moderator.send(&server, json!({"cmd": "ban", "nick": "mod2"})).await;
        moderator.send(&server, json!({"cmd": "ban", "nick": "nobody"})).await;
        assert_eq!(texts(&moderator.frames()), vec![SAME_LEVEL, USER_NOT_FOUND]);
    }

    #[tokio::test]
    async fn muzzle_is_a_shadow_mute() {
        let server = server();
        let (mut moderator, mut bob) = with_moderator(&server).await;

        moderator.send(&server, json!({"cmd": "muzzle", "nick": "bob"})).await;
        assert!(server.connections().get("b").unwrap().identity().unwrap().muzzled);
        moderator.frames();

        bob.send(&server, json!({"cmd": "chat", "text": "can anyone hear me"})).await;
        assert_eq!(texts(&bob.frames()), vec!["can anyone hear me"]);
        assert!(moderator.frames().is_empty());

        moderator.send(&server, json!({"cmd": "speak", "nick": "bob"})).await;
        moderator.frames();
        bob.send(&server, json!({"cmd": "chat", "text": "back"})).await;
        assert_eq!(texts(&moderator.frames()), vec!["back"]);
    }

    #[tokio::test]
    async fn muzzle_survives_reconnect() {
        let server = server();
        let mut moderator = Client::connect(&server, "m", "10.0.0.1").await;
        moderator
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "mod", "pass": MOD_PASS}))
            .await;
        let mut bob = Client::connect(&server, "b", "10.0.0.2").await;
        bob.send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "bob"}))
            .await;
        let token = bob.frames().last().unwrap()["token"].as_str().unwrap().to_string();
        moderator.frames();

        moderator.send(&server, json!({"cmd": "muzzle", "nick": "bob"})).await;
        server.on_disconnect("b").await;
        moderator.frames();

        // The join-time token still claims an unmuzzled identity.
        let mut again = Client::connect(&server, "b2", "10.0.0.2").await;
        again.send(&server, json!({"cmd": "session", "token": token})).await;
        assert_eq!(again.frames()[0]["restored"], true);
        moderator.frames();

        again.send(&server, json!({"cmd": "chat", "text": "still muzzled?"})).await;
        assert_eq!(texts(&again.frames()), vec!["still muzzled?"]);
        assert!(moderator.frames().is_empty());

        moderator.send(&server, json!({"cmd": "speak", "nick": "bob"})).await;
        moderator.frames();
        again.send(&server, json!({"cmd": "chat", "text": "free"})).await;
        assert_eq!(texts(&moderator.frames()), vec!["free"]);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// help, reload, disconnect
// ─────────────────────────────────────────────────────────────────────────────

mod misc {
    use super::*;

    #[tokio::test]
    async fn help_lists_public_categories() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;

        alice.send(&server, json!({"cmd": "help"})).await;
        let frames = alice.frames();
        let text = frames[0]["text"].as_str().unwrap();
        assert!(text.contains("core: chat, help, join, session"));
        assert!(text.contains("mod: ban, muzzle, speak, unban"));
        assert!(text.contains("admin: reload"));
        assert!(!text.contains("disconnect"));

        alice.send(&server, json!({"cmd": "help", "command": "muzzle"})).await;
        let text = alice.frames()[0]["text"].as_str().unwrap().to_string();
        assert!(text.starts_with("# muzzle"));
        assert!(text.contains("Usage: muzzle {nick}"));
    }

    #[tokio::test]
    async fn reload_is_admin_only() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        alice.send(&server, json!({"cmd": "reload"})).await;
        assert_eq!(texts(&alice.frames()), vec![PERMISSION_DENIED]);

        let mut admin = Client::connect(&server, "r", "10.0.0.2").await;
        admin
            .send(&server, json!({"cmd": "join", "channel": "lobby", "nick": "root", "pass": ADMIN_PASS}))
            .await;
        admin.frames();
        admin.send(&server, json!({"cmd": "reload", "reason": "testing"})).await;
        assert_eq!(
            texts(&admin.frames()),
            vec!["Reloaded 10 commands with reason: testing"]
        );
    }

    #[tokio::test]
    async fn socket_close_announces_departure() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        let _bob = Client::joined(&server, "b", "10.0.0.2", "bob", "lobby").await;
        alice.frames();

        server.on_disconnect("b").await;
        let frames = alice.frames();
        assert_eq!(cmds(&frames), vec!["onlineRemove"]);
        assert_eq!(frames[0]["nick"], "bob");
        assert!(server.connections().get("b").is_none());
    }

    #[tokio::test]
    async fn disconnect_cannot_be_sent_by_clients() {
        let server = server();
        let mut alice = Client::joined(&server, "a", "10.0.0.1", "alice", "lobby").await;
        let mut bob = Client::joined(&server, "b", "10.0.0.2", "bob", "lobby").await;
        alice.frames();

        bob.send(&server, json!({"cmd": "disconnect"})).await;
        assert!(bob.frames().is_empty());
        assert!(alice.frames().is_empty());
        assert!(server.connections().get("b").unwrap().is_active());
    }
}
