//! Reconnect-on-drop behavior: a listener that closes every connection
//! immediately should see more than one connect attempt when `auto_retry`
//! is enabled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cm_client::{ClientConfig, CmClient, Endpoint};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::net::TcpListener;

#[tokio::test]
async fn auto_retry_reconnects_after_a_dropped_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    let server_attempts = attempts.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            server_attempts.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let mut config = ClientConfig::default();
    config.initial_backoff = Duration::from_millis(20);
    config.max_backoff = Duration::from_millis(50);
    config.auto_retry = true;

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 512).unwrap();
    let public_key = RsaPublicKey::from(&private_key);

    let (client, _events) = CmClient::new(config, public_key);
    client
        .set_servers(vec![Endpoint::new(addr.ip().to_string(), addr.port())])
        .unwrap();
    client.connect().unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    client.disconnect().unwrap();

    assert!(
        attempts.load(Ordering::SeqCst) >= 2,
        "expected at least two connect attempts, saw {}",
        attempts.load(Ordering::SeqCst)
    );
}
