//! Job correlation and `Multi` batch expansion, exercised end to end over a
//! real TCP loopback connection.

use std::time::Duration;

use cm_client::header::{self, SessionIds, EMsg, NO_JOB};
use cm_client::schema::CMsgMulti;
use cm_client::{ClientConfig, ClientEvent, CmClient, Endpoint};
use prost::Message;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn write_frame(socket: &mut TcpStream, payload: &[u8]) {
    socket.write_u32_le(payload.len() as u32).await.unwrap();
    socket.write_all(b"VT01").await.unwrap();
    socket.write_all(payload).await.unwrap();
}

async fn read_frame(socket: &mut TcpStream) -> Vec<u8> {
    let len = socket.read_u32_le().await.unwrap() as usize;
    let mut magic = [0u8; 4];
    socket.read_exact(&mut magic).await.unwrap();
    assert_eq!(&magic, b"VT01");
    let mut buf = vec![0u8; len];
    socket.read_exact(&mut buf).await.unwrap();
    buf
}

/// Drives the handshake from the server side and returns the now-shared
/// session key plus the open socket, ready for further scripted traffic.
async fn complete_handshake(socket: &mut TcpStream, private_key: &RsaPrivateKey) -> [u8; 32] {
    let request_header = header::build_header(
        EMsg::CHANNEL_ENCRYPT_REQUEST,
        false,
        SessionIds::default(),
        NO_JOB,
        NO_JOB,
    );
    let mut request_frame = header::encode(&request_header);
    request_frame.extend_from_slice(&1u32.to_le_bytes());
    request_frame.extend_from_slice(&1u32.to_le_bytes());
    request_frame.extend_from_slice(&[0u8; 16]);
    write_frame(socket, &request_frame).await;

    let response_frame = read_frame(socket).await;
    let (response_header, response_body) = header::decode(&response_frame).unwrap();
    assert_eq!(response_header.msg(), EMsg::CHANNEL_ENCRYPT_RESPONSE);
    let key_len = u32::from_le_bytes(response_body[4..8].try_into().unwrap()) as usize;
    let encrypted_key = &response_body[8..8 + key_len];
    let session_key: [u8; 32] = private_key
        .decrypt(Oaep::new::<Sha1>(), encrypted_key)
        .unwrap()
        .try_into()
        .unwrap();

    let result_header = header::build_header(
        EMsg::CHANNEL_ENCRYPT_RESULT,
        false,
        SessionIds::default(),
        NO_JOB,
        NO_JOB,
    );
    let mut result_frame = header::encode(&result_header);
    result_frame.extend_from_slice(&1u32.to_le_bytes());
    let encrypted = cm_client::crypto::encrypt(&session_key, &result_frame);
    write_frame(socket, &encrypted).await;

    session_key
}

async fn start_server() -> (std::net::SocketAddr, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, listener)
}

#[tokio::test]
async fn job_correlated_request_receives_its_reply() {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    let (addr, listener) = start_server().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let session_key = complete_handshake(&mut socket, &private_key).await;

        // Read the client's request, encrypted now that the handshake is done.
        let raw = read_frame(&mut socket).await;
        let plaintext = cm_client::crypto::decrypt(&session_key, &raw).unwrap();
        let (req_header, req_body) = header::decode(&plaintext).unwrap();
        assert_eq!(req_header.msg(), EMsg(4242));
        assert_eq!(req_body, b"ping");

        let reply_header = req_header.stamp_reply_target(req_header.source_job());
        let mut reply_frame = header::encode(&reply_header);
        reply_frame.extend_from_slice(b"pong");
        let encrypted = cm_client::crypto::encrypt(&session_key, &reply_frame);
        write_frame(&mut socket, &encrypted).await;

        let _ = tokio::time::timeout(Duration::from_millis(200), socket.read_u8()).await;
    });

    let (client, mut events) = CmClient::new(ClientConfig::default(), public_key);
    client
        .set_servers(vec![Endpoint::new(addr.ip().to_string(), addr.port())])
        .unwrap();
    client.connect().unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
        {
            Some(ClientEvent::Connected) => break,
            Some(_) => continue,
            None => panic!("event stream closed before Connected"),
        }
    }

    let reply = tokio::time::timeout(
        Duration::from_secs(2),
        client.send_with_reply(EMsg(4242), false, b"ping".to_vec()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply, b"pong");

    client.disconnect().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn heartbeat_starts_only_after_log_on_response_using_the_servers_period() {
    use cm_client::schema::CMsgClientLogOnResponse;

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    let (addr, listener) = start_server().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let session_key = complete_handshake(&mut socket, &private_key).await;

        // No heartbeat should arrive before logon: give the client a window
        // in which, if it heartbeats early, we'd see it instead of a timeout.
        let premature = tokio::time::timeout(Duration::from_millis(300), read_frame(&mut socket)).await;
        assert!(premature.is_err(), "client sent a frame before logging on");

        let log_on = CMsgClientLogOnResponse {
            eresult: 1,
            out_of_game_heartbeat_seconds: 1,
            client_supplied_steamid: 76561198000000001,
        };
        let log_on_header = header::build_header(
            EMsg::CLIENT_LOG_ON_RESPONSE,
            true,
            SessionIds::default(),
            NO_JOB,
            NO_JOB,
        );
        let mut log_on_frame = header::encode(&log_on_header);
        log_on_frame.extend_from_slice(&log_on.encode_to_vec());
        let encrypted = cm_client::crypto::encrypt(&session_key, &log_on_frame);
        write_frame(&mut socket, &encrypted).await;

        let raw = tokio::time::timeout(Duration::from_secs(3), read_frame(&mut socket))
            .await
            .expect("client never sent a heartbeat after logging on");
        let decrypted = cm_client::crypto::decrypt(&session_key, &raw).unwrap();
        let (heartbeat_header, _) = header::decode(&decrypted).unwrap();
        assert_eq!(heartbeat_header.msg(), EMsg::CLIENT_HEARTBEAT);

        let _ = tokio::time::timeout(Duration::from_millis(200), socket.read_u8()).await;
    });

    // Wider than the server's heartbeat period so the idle-read timer never
    // races the scheduled heartbeat send.
    let config = ClientConfig {
        idle_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    let (client, mut events) = CmClient::new(config, public_key);
    client
        .set_servers(vec![Endpoint::new(addr.ip().to_string(), addr.port())])
        .unwrap();
    client.connect().unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
        {
            Some(ClientEvent::Connected) => break,
            Some(_) => continue,
            None => panic!("event stream closed before Connected"),
        }
    }

    server.await.unwrap();
    client.disconnect().unwrap();
}

#[tokio::test]
async fn multi_batch_expands_into_individual_messages() {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    let (addr, listener) = start_server().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let session_key = complete_handshake(&mut socket, &private_key).await;

        let sub_a = {
            let h = header::build_header(EMsg(7001), false, SessionIds::default(), NO_JOB, NO_JOB);
            let mut frame = header::encode(&h);
            frame.extend_from_slice(b"first");
            frame
        };
        let sub_b = {
            let h = header::build_header(EMsg(7002), false, SessionIds::default(), NO_JOB, NO_JOB);
            let mut frame = header::encode(&h);
            frame.extend_from_slice(b"second");
            frame
        };
        let mut batch = Vec::new();
        batch.extend_from_slice(&(sub_a.len() as u32).to_le_bytes());
        batch.extend_from_slice(&sub_a);
        batch.extend_from_slice(&(sub_b.len() as u32).to_le_bytes());
        batch.extend_from_slice(&sub_b);

        let multi = CMsgMulti {
            size_unzipped: 0,
            message_body: batch,
        };
        let multi_header =
            header::build_header(EMsg::MULTI, false, SessionIds::default(), NO_JOB, NO_JOB);
        let mut frame = header::encode(&multi_header);
        frame.extend_from_slice(&multi.encode_to_vec());
        let encrypted = cm_client::crypto::encrypt(&session_key, &frame);
        write_frame(&mut socket, &encrypted).await;

        let _ = tokio::time::timeout(Duration::from_millis(200), socket.read_u8()).await;
    });

    let (client, mut events) = CmClient::new(ClientConfig::default(), public_key);
    client
        .set_servers(vec![Endpoint::new(addr.ip().to_string(), addr.port())])
        .unwrap();
    client.connect().unwrap();

    let mut seen = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
        {
            Some(ClientEvent::Message(header, body, _reply)) => {
                seen.push((header.msg(), body));
                if seen.len() == 2 {
                    break;
                }
            }
            Some(_) => continue,
            None => panic!("event stream closed before both sub-messages arrived"),
        }
    }

    assert_eq!(seen[0].0, EMsg(7001));
    assert_eq!(seen[0].1, b"first");
    assert_eq!(seen[1].0, EMsg(7002));
    assert_eq!(seen[1].1, b"second");

    client.disconnect().unwrap();
    server.await.unwrap();
}
