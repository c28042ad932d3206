#![cfg(feature = "skills")]

mod socket {
    use std::time::Duration;

    use clawpilot::config::ClawPilotConfig;
    use clawpilot::error::ClawPilotError;
    use clawpilot::gateway::GatewaySocket;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::{
        accept_hdr_async,
        tungstenite::{
            handshake::server::{Request, Response},
            Message,
        },
    };

    #[derive(Debug)]
    struct Observation {
        query: String,
        first: Value,
        second: Value,
    }

    #[tokio::test]
    async fn connect_lists_skills_and_forwards_commands() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr");

        let (observation_tx, observation_rx) = oneshot::channel::<Observation>();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("server should accept");
            let (query_tx, query_rx) = std::sync::mpsc::channel();
            let mut ws = accept_hdr_async(stream, move |req: &Request, response: Response| {
                let _ = query_tx.send(req.uri().query().unwrap_or_default().to_string());
                Ok(response)
            })
            .await
            .expect("handshake");
            let query = query_rx.recv().expect("query captured");

            let first = read_json(&mut ws).await;
            ws.send(Message::Text(
                json!({"type": "presence", "online": true}).to_string(),
            ))
            .await
            .expect("send presence");
            ws.send(Message::Text(
                json!({
                    "type": "skills.list",
                    "skills": [
                        {"name": "browser", "description": "Web browsing"},
                        {"name": "calendar", "enabled": false}
                    ]
                })
                .to_string(),
            ))
            .await
            .expect("send skills");

            let second = read_json(&mut ws).await;
            let _ = observation_tx.send(Observation {
                query,
                first,
                second,
            });
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let config = ClawPilotConfig::builder()
            .gateway_ws_url(format!("ws://{address}/gateway"))
            .device_token("dev-tok")
            .build();
        let socket = GatewaySocket::connect(&config).await.expect("connect");
        assert!(socket.is_connected());

        let mut skills = socket.watch_skills();
        timeout(Duration::from_secs(5), skills.changed())
            .await
            .expect("skills in time")
            .expect("sender alive");
        let listed = socket.skills();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "browser");
        assert_eq!(listed[0].description.as_deref(), Some("Web browsing"));
        assert_eq!(listed[1].extra.get("enabled"), Some(&json!(false)));

        socket
            .send("skills.install", json!({"name": "weather"}))
            .expect("send command");

        let observation = timeout(Duration::from_secs(5), observation_rx)
            .await
            .expect("observation in time")
            .expect("observation sent");
        assert_eq!(observation.query, "auth.token=dev-tok");
        assert_eq!(observation.first, json!({"type": "skills.list"}));
        assert_eq!(
            observation.second,
            json!({"type": "skills.install", "name": "weather"})
        );

        socket.close().await.expect("close");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn next_skills_times_out_on_silent_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("server should accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            let request = read_json(&mut ws).await;
            assert_eq!(request, json!({"type": "skills.list"}));
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let config = ClawPilotConfig::builder()
            .gateway_ws_url(format!("ws://{address}/gateway"))
            .device_token("dev-tok")
            .build();
        let socket = GatewaySocket::connect(&config).await.expect("connect");

        let err = socket
            .next_skills(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ClawPilotError::Timeout(100)));
        assert!(socket.skills().is_empty());

        socket.close().await.expect("close");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn connect_requires_token_and_url() {
        let config = ClawPilotConfig::builder()
            .gateway_ws_url("ws://127.0.0.1:1/gateway")
            .build();
        let err = match GatewaySocket::connect(&config).await {
            Ok(_) => panic!("connect should fail without a token"),
            Err(err) => err,
        };
        assert!(matches!(err, ClawPilotError::Pairing(_)));

        let config = ClawPilotConfig::builder().device_token("tok").build();
        let err = match GatewaySocket::connect(&config).await {
            Ok(_) => panic!("connect should fail without a URL"),
            Err(err) => err,
        };
        assert!(matches!(err, ClawPilotError::Configuration(_)));
    }

    async fn read_json<S>(ws: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("message in time")
                .expect("stream open")
                .expect("valid frame");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).expect("json frame");
            }
        }
    }
}
