//! End-to-end transport tests against a scripted in-process agent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use dtx_protocol::{
    FrameSplitter, INFO_ID, Message, NodePath, Registry, Schema, SearchMethod, Target, Value,
    build, codec,
};
use dtx_runtime::{ConnectOptions, Device, Error, RemoteDevice};

fn info_message() -> Message {
    Message::response(Target::System, "info", true)
        .with_id(INFO_ID)
        .with_param("version", Value::text("1.0"))
        .with_param("locale", Value::text("en_US"))
        .with_param("extensions", Value::List(vec![Value::text("battery")]))
}

fn options(registry: &Arc<Registry>) -> ConnectOptions {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut options = ConnectOptions::new(Arc::clone(registry));
    options.retry_window = Duration::from_millis(200);
    options.retry_step = Duration::from_millis(20);
    options.handshake_timeout = Duration::from_millis(500);
    options
}

/// Accepts one connection, announces itself, then answers every inbound
/// request with whatever `handler` returns.
async fn spawn_agent<F>(registry: Arc<Registry>, mut handler: F) -> String
where
    F: FnMut(Message) -> Vec<Message> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frame = codec::encode_frame(&info_message(), &registry).unwrap();
        stream.write_all(&frame).await.unwrap();
        let mut splitter = FrameSplitter::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            splitter.push(&buf[..n]);
            while let Some(payload) = splitter.next_frame() {
                let request = codec::decode_message(&payload, &registry, true).unwrap();
                for response in handler(request) {
                    let bytes = codec::encode_frame(&response, &registry).unwrap();
                    stream.write_all(&bytes).await.unwrap();
                }
            }
        }
    });
    addr
}

#[tokio::test]
async fn handshake_captures_device_info() {
    let registry = Arc::new(Registry::with_catalog());
    let addr = spawn_agent(Arc::clone(&registry), |_| Vec::new()).await;
    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();
    let info = device.info();
    assert_eq!(info.version, "1.0");
    assert_eq!(info.locale, "en_US");
    assert!(info.has_extension("battery"));
    assert!(device.connected());
    device.disconnect().await;
    assert!(!device.connected());
}

#[tokio::test]
async fn responses_correlate_out_of_order() {
    let registry = Arc::new(Registry::with_catalog());
    // Hold the first request back and answer both in reverse order.
    let mut stashed: Option<Message> = None;
    let addr = spawn_agent(Arc::clone(&registry), move |request| {
        let answer = |req: &Message| {
            build::response_for(req, true)
                .with_param("data", Value::text(format!("file-{}", req.id)))
        };
        match stashed.take() {
            None => {
                stashed = Some(request);
                Vec::new()
            }
            Some(first) => vec![answer(&request), answer(&first)],
        }
    })
    .await;

    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();
    let first = device
        .push_request(build::get_file(0, "/etc/one"))
        .await
        .unwrap();
    let second = device
        .push_request(build::get_file(0, "/etc/two"))
        .await
        .unwrap();
    assert_ne!(first, second);

    let one = device.pull_response(first, None).await.unwrap();
    let two = device.pull_response(second, None).await.unwrap();
    assert_eq!(one.text_param("data"), Some(format!("file-{first}").as_str()));
    assert_eq!(two.text_param("data"), Some(format!("file-{second}").as_str()));
}

#[tokio::test]
async fn silent_agent_causes_response_timeout() {
    let registry = Arc::new(Registry::with_catalog());
    let addr = spawn_agent(Arc::clone(&registry), |_| Vec::new()).await;
    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();
    let id = device
        .push_request(build::device_info(0))
        .await
        .unwrap();
    let err = device
        .pull_response(id, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
    assert!(device.connected());
}

#[tokio::test]
async fn connection_drop_fails_waiting_callers() {
    let registry = Arc::new(Registry::with_catalog());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frame = codec::encode_frame(&info_message(), &server_registry).unwrap();
        stream.write_all(&frame).await.unwrap();
        // Wait for one request, then hang up without answering.
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await;
    });

    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();
    let err = device.get_file("/etc/hostname").await.unwrap_err();
    assert!(err.is_disconnect(), "got {err:?}");
}

#[tokio::test]
async fn refused_connection_is_reported_after_retry_window() {
    let registry = Arc::new(Registry::with_catalog());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::ConnectionRefused { .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn mute_agent_fails_the_handshake() {
    let registry = Arc::new(Registry::with_catalog());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Accept and say nothing.
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let err = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Handshake(_)), "got {err:?}");
}

#[tokio::test]
async fn polluted_frames_still_decode() {
    let registry = Arc::new(Registry::with_catalog());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frame = codec::encode_frame(&info_message(), &server_registry).unwrap();
        stream.write_all(&frame).await.unwrap();
        let mut splitter = FrameSplitter::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            splitter.push(&buf[..n]);
            while let Some(payload) = splitter.next_frame() {
                let request = codec::decode_message(&payload, &server_registry, true).unwrap();
                let response = build::response_for(&request, true);
                let mut bytes = codec::encode_message(&response, &server_registry)
                    .unwrap()
                    .into_bytes();
                // Raw control bytes in the stream, as misbehaving agents emit.
                bytes.insert(5, 0x01);
                bytes.push(0x02);
                bytes.extend_from_slice(codec::TERMINATOR);
                stream.write_all(&bytes).await.unwrap();
            }
        }
    });

    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();
    let ok = device
        .exec_action(&NodePath::from_indices([0, 1]), "click")
        .await
        .unwrap();
    assert!(ok);
}

#[tokio::test]
async fn extension_calls_round_trip() {
    let mut registry = Registry::with_catalog();
    let mut response_params = BTreeMap::new();
    response_params.insert("level".to_string(), Schema::Int);
    registry
        .register_extension("battery", BTreeMap::new(), response_params)
        .unwrap();
    let registry = Arc::new(registry);

    let addr = spawn_agent(Arc::clone(&registry), |request| {
        vec![build::response_for(&request, true).with_param("level", Value::Int(70))]
    })
    .await;

    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();
    let response = device.extension("battery", BTreeMap::new()).await.unwrap();
    assert_eq!(response.status(), Some(true));
    assert_eq!(response.int_param("level"), Some(70));
}

#[tokio::test]
async fn unsolicited_responses_wait_in_the_mailbox() {
    let registry = Arc::new(Registry::with_catalog());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        for msg in [
            info_message(),
            Message::response(Target::System, "exec", true).with_id(99),
        ] {
            let frame = codec::encode_frame(&msg, &server_registry).unwrap();
            stream.write_all(&frame).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();
    // Delivered before anyone asked; retained until pulled.
    let late = device
        .pull_response(99, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(late.status(), Some(true));
}

#[tokio::test]
async fn full_facade_against_scripted_agent() {
    let registry = Arc::new(Registry::with_catalog());
    let addr = spawn_agent(Arc::clone(&registry), |request| {
        let response = match (request.target, request.name.as_str()) {
            (Target::Accessibility, "get") => {
                let path = request.path_param("path").cloned().unwrap_or_default();
                let mut node = dtx_protocol::Accessible::new(path);
                node.role = Some("frame".into());
                build::response_for(&request, true)
                    .with_param("accessible", Value::Accessible(Box::new(node)))
            }
            (Target::Accessibility, "search") => build::response_for(&request, false),
            (Target::System, "exec") => build::response_for(&request, true)
                .with_param("stdout", Value::text("ok\n"))
                .with_param("stderr", Value::text("")),
            _ => build::response_for(&request, true),
        };
        vec![response]
    })
    .await;

    let device = RemoteDevice::connect("dev-a", &addr, options(&registry))
        .await
        .unwrap();

    let node = device
        .get_accessible(&NodePath::from_indices([0, 1]), 0, &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.role.as_deref(), Some("frame"));

    let missing = device
        .search_accessible(&NodePath::root(), SearchMethod::Deep, &BTreeMap::new())
        .await
        .unwrap();
    assert!(missing.is_none());

    assert!(device.set_text(&NodePath::from_indices([2]), "hi").await.unwrap());
    assert!(device.put_file("/tmp/x", "data").await.unwrap());

    let output = device.system_exec("true", true).await.unwrap().unwrap();
    assert_eq!(output.stdout, "ok\n");
    assert!(output.stderr.is_empty());
}
